//! The "CORRESPONDENCE" Protocol - Scripted multi-step exchanges
//!
//! A correspondence is a pre-generated script of steps between two parties:
//! - `Noop` succeeds immediately
//! - `AtoB` asks the scheduler to route a message from A to B
//! - `BtoA` asks for the reply direction
//!
//! One step is attempted per tick, gated by the ready flag. The scheduler
//! reports each message's fate back through `packet_success` / `packet_failed`.

use crate::ids::{CorrespondenceId, NodeId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Why a correspondence was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intention {
    /// Ordinary work traffic between employees
    Work,

    /// Attacker lures a victim into handing over credentials
    Phishing,

    /// Attacker drives a captured device
    Escalate,
}

/// One scripted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepCode {
    Noop,
    AtoB,
    BtoA,
}

impl StepCode {
    /// Numeric code used in traces (0, 1, 2).
    pub fn code(self) -> u8 {
        match self {
            StepCode::Noop => 0,
            StepCode::AtoB => 1,
            StepCode::BtoA => 2,
        }
    }
}

/// Terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// What the scheduler must do for the step attempted this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Not ready or already finished
    Wait,

    /// A `Noop` step auto-succeeded; carries the outcome if that ended the script
    Advanced(Option<Outcome>),

    /// Route one message in the given direction
    Send(StepCode),
}

/// Scripted exchange between two parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub id: CorrespondenceId,

    /// Initiator
    pub party_a: NodeId,

    /// Responder
    pub party_b: NodeId,

    pub intention: Intention,

    /// Remaining script, cursor indexes into it
    sequence: Vec<StepCode>,

    cursor: usize,

    /// Consecutive failures since the last success
    failure_count: u32,

    /// Failures tolerated before giving up (`None` retries forever)
    fails_to_end: Option<u32>,

    active: bool,

    ready: bool,

    /// Work value in 0..=10
    importance: u32,

    outcome: Option<Outcome>,
}

impl Correspondence {
    /// Opens a correspondence with a freshly generated script.
    pub fn initiate<R: Rng + ?Sized>(
        id: CorrespondenceId,
        party_a: NodeId,
        party_b: NodeId,
        intention: Intention,
        fails_to_end: Option<u32>,
        rng: &mut R,
    ) -> Self {
        let sequence = generate_sequence(intention, rng);
        let importance = rng.gen_range(0..=10);
        Self::with_sequence(id, party_a, party_b, intention, fails_to_end, sequence, importance)
    }

    /// Opens a correspondence with an explicit script.
    pub fn with_sequence(
        id: CorrespondenceId,
        party_a: NodeId,
        party_b: NodeId,
        intention: Intention,
        fails_to_end: Option<u32>,
        sequence: Vec<StepCode>,
        importance: u32,
    ) -> Self {
        Self {
            id,
            party_a,
            party_b,
            intention,
            sequence,
            cursor: 0,
            failure_count: 0,
            fails_to_end: fails_to_end.filter(|&f| f > 0),
            active: true,
            ready: true,
            importance: importance.min(10),
            outcome: None,
        }
    }

    /// Attempts the step under the cursor.
    ///
    /// Clears `ready` until the scheduler reports back. An empty script ends
    /// successfully on its first attempt.
    pub fn begin_step(&mut self) -> StepAction {
        if !self.active || !self.ready {
            return StepAction::Wait;
        }
        self.ready = false;

        match self.sequence.get(self.cursor).copied() {
            None => {
                self.end(true);
                StepAction::Advanced(self.outcome)
            }
            Some(StepCode::Noop) => StepAction::Advanced(self.packet_success()),
            Some(direction) => StepAction::Send(direction),
        }
    }

    /// Inserts a victim reply (`BtoA`) at a uniform position in `(cursor, len]`.
    pub fn insert_response<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let position = rng.gen_range((self.cursor + 1).min(self.sequence.len())..=self.sequence.len());
        self.sequence.insert(position, StepCode::BtoA);
    }

    /// The routed message arrived. Returns the outcome if the script just ended.
    pub fn packet_success(&mut self) -> Option<Outcome> {
        if !self.active {
            return None;
        }
        self.cursor += 1;
        self.failure_count = 0;
        self.ready = true;

        if self.cursor >= self.sequence.len() {
            self.end(true).then_some(Outcome::Succeeded)
        } else {
            None
        }
    }

    /// The routed message was dropped. Returns the outcome if this gave up.
    pub fn packet_failed(&mut self) -> Option<Outcome> {
        if !self.active {
            return None;
        }
        self.failure_count += 1;
        self.ready = true;

        match self.fails_to_end {
            Some(limit) if self.failure_count >= limit => self.end(false).then_some(Outcome::Failed),
            _ => None,
        }
    }

    /// Terminates the correspondence. Returns false if it had already ended.
    pub fn end(&mut self, success: bool) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.ready = false;
        self.outcome = Some(if success { Outcome::Succeeded } else { Outcome::Failed });
        true
    }

    /// Which parties earn work credit on success: `(party_a, party_b)`.
    ///
    /// A script of only `Noop` credits nobody, only `AtoB` credits A, only
    /// `BtoA` credits B, anything mixed credits both.
    pub fn work_credit(&self) -> (bool, bool) {
        let has = |code| self.sequence.contains(&code);
        let (noop, a_to_b, b_to_a) = (has(StepCode::Noop), has(StepCode::AtoB), has(StepCode::BtoA));
        let kinds = [noop, a_to_b, b_to_a].iter().filter(|&&k| k).count();
        match kinds {
            0 => (false, false),
            1 if noop => (false, false),
            1 if a_to_b => (true, false),
            1 => (false, true),
            _ => (true, true),
        }
    }

    /// Work done earned on success, `importance / 10`.
    pub fn work_value(&self) -> f64 {
        self.importance as f64 / 10.0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn importance(&self) -> u32 {
        self.importance
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn sequence(&self) -> &[StepCode] {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Draws the script for a new correspondence.
pub fn generate_sequence<R: Rng + ?Sized>(intention: Intention, rng: &mut R) -> Vec<StepCode> {
    match intention {
        Intention::Work => {
            let len = rng.gen_range(5..=15);
            let codes = [StepCode::Noop, StepCode::AtoB, StepCode::BtoA];
            (0..len)
                .map(|_| *codes.choose(rng).unwrap_or(&StepCode::Noop))
                .collect()
        }
        Intention::Phishing => {
            let len = rng.gen_range(1..=4);
            vec![StepCode::AtoB; len]
        }
        Intention::Escalate => {
            let len = rng.gen_range(2..=6);
            let codes = [StepCode::AtoB, StepCode::BtoA];
            (0..len)
                .map(|_| *codes.choose(rng).unwrap_or(&StepCode::AtoB))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scripted(sequence: Vec<StepCode>, fails_to_end: Option<u32>) -> Correspondence {
        Correspondence::with_sequence(
            CorrespondenceId(1),
            NodeId(1),
            NodeId(2),
            Intention::Work,
            fails_to_end,
            sequence,
            7,
        )
    }

    #[test]
    fn test_generated_sequences() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..50 {
            let work = generate_sequence(Intention::Work, &mut rng);
            assert!((5..=15).contains(&work.len()));

            let phish = generate_sequence(Intention::Phishing, &mut rng);
            assert!((1..=4).contains(&phish.len()));
            assert!(phish.iter().all(|&s| s == StepCode::AtoB));

            let esc = generate_sequence(Intention::Escalate, &mut rng);
            assert!((2..=6).contains(&esc.len()));
            assert!(esc.iter().all(|&s| s != StepCode::Noop));
        }
    }

    #[test]
    fn test_noop_steps_auto_succeed() {
        let mut c = scripted(vec![StepCode::Noop, StepCode::Noop], None);

        assert_eq!(c.begin_step(), StepAction::Advanced(None));
        assert_eq!(c.cursor(), 1);
        assert_eq!(c.begin_step(), StepAction::Advanced(Some(Outcome::Succeeded)));
        assert!(!c.is_active());
        assert_eq!(c.begin_step(), StepAction::Wait);
    }

    #[test]
    fn test_send_waits_for_report() {
        let mut c = scripted(vec![StepCode::AtoB, StepCode::BtoA], None);

        assert_eq!(c.begin_step(), StepAction::Send(StepCode::AtoB));
        // Not ready until the message is resolved
        assert_eq!(c.begin_step(), StepAction::Wait);

        assert_eq!(c.packet_success(), None);
        assert_eq!(c.begin_step(), StepAction::Send(StepCode::BtoA));
        assert_eq!(c.packet_success(), Some(Outcome::Succeeded));
        assert_eq!(c.outcome(), Some(Outcome::Succeeded));
    }

    #[test]
    fn test_fails_to_end_one() {
        let mut c = scripted(vec![StepCode::AtoB, StepCode::AtoB], Some(1));

        assert_eq!(c.begin_step(), StepAction::Send(StepCode::AtoB));
        assert_eq!(c.packet_failed(), Some(Outcome::Failed));
        assert!(!c.is_active());
        assert!(!c.is_ready());

        // Never steps again, and late reports are ignored
        assert_eq!(c.begin_step(), StepAction::Wait);
        assert_eq!(c.packet_failed(), None);
        assert_eq!(c.packet_success(), None);
        assert_eq!(c.outcome(), Some(Outcome::Failed));
        assert!(!c.end(true));
    }

    #[test]
    fn test_failures_reset_on_success() {
        let mut c = scripted(vec![StepCode::AtoB, StepCode::AtoB], Some(3));

        c.begin_step();
        assert_eq!(c.packet_failed(), None);
        c.begin_step();
        assert_eq!(c.packet_failed(), None);
        assert_eq!(c.failure_count(), 2);

        c.begin_step();
        c.packet_success();
        assert_eq!(c.failure_count(), 0);
        assert!(c.is_active());
    }

    #[test]
    fn test_unlimited_failures() {
        let mut c = scripted(vec![StepCode::AtoB], None);
        for _ in 0..100 {
            c.begin_step();
            assert_eq!(c.packet_failed(), None);
        }
        assert!(c.is_active());
    }

    #[test]
    fn test_insert_response_after_cursor() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut c = scripted(vec![StepCode::AtoB; 3], None);
        c.begin_step();
        c.packet_success();

        c.insert_response(&mut rng);
        assert_eq!(c.len(), 4);
        let pos = c.sequence().iter().position(|&s| s == StepCode::BtoA);
        assert!(matches!(pos, Some(p) if p > c.cursor()));
    }

    #[test]
    fn test_insert_response_on_last_step() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut c = scripted(vec![StepCode::AtoB], None);
        assert_eq!(c.begin_step(), StepAction::Send(StepCode::AtoB));

        c.insert_response(&mut rng);
        assert_eq!(c.sequence(), &[StepCode::AtoB, StepCode::BtoA]);
        assert_eq!(c.packet_success(), None);
        assert_eq!(c.begin_step(), StepAction::Send(StepCode::BtoA));
    }

    #[test]
    fn test_work_credit() {
        assert_eq!(scripted(vec![StepCode::Noop], None).work_credit(), (false, false));
        assert_eq!(scripted(vec![StepCode::AtoB], None).work_credit(), (true, false));
        assert_eq!(scripted(vec![StepCode::BtoA], None).work_credit(), (false, true));
        assert_eq!(
            scripted(vec![StepCode::Noop, StepCode::BtoA], None).work_credit(),
            (true, true)
        );
        assert!((scripted(vec![], None).work_value() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_empty_script_succeeds() {
        let mut c = scripted(vec![], None);
        assert_eq!(c.begin_step(), StepAction::Advanced(Some(Outcome::Succeeded)));
    }
}
