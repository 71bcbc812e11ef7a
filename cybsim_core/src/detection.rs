//! The "DETECTION" Engine - Detection trials and threat identities
//!
//! A single formula decides whether an organization catches an attack:
//!
//! ```text
//! b         = w_mode * security_budget
//! aggregate = (2 - sqrt(1-b) * (1-i)^(w/2) - (1-b) * (1-i)^w) / 2
//! p         = aggregate / (aggregate + effectiveness + stability)
//! ```
//!
//! where `i` is the share of the attacker's indicator bits the organization
//! has revealed and `w` is the information weight. `stability` is strictly
//! positive so `p` never divides by zero.

use crate::ids::AttackerId;
use cybsim_env::Tick;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// PARAMETERS
// ============================================================================

/// Weights for the detection trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Weight of the budget for per-tick trials on compromised devices
    pub passive_weight: f64,

    /// Weight for lateral movement inside an organization
    pub spread_weight: f64,

    /// Weight for targeted attacks and attackers the organization already knows
    pub target_weight: f64,

    /// Exponent applied to the unrevealed share of indicators
    pub information_weight: f64,

    /// `stability = 10^-exponent`
    pub stability_exponent: i32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            passive_weight: 0.125,
            spread_weight: 0.25,
            target_weight: 1.0,
            information_weight: 0.5,
            stability_exponent: 3,
        }
    }
}

/// Kind of trial being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Background check on an already compromised device
    Passive,

    /// Attacker moving from a captured device to a colleague's
    Spread,

    /// Attack payload executed against a chosen victim
    Target,
}

/// Everything one trial depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionInput {
    pub security_budget: f64,

    /// Revealed share of the attacker's indicator bits
    pub information: f64,

    pub effectiveness: f64,

    pub mode: DetectionMode,

    /// Organization already has an open incident for this attacker
    pub aware: bool,
}

impl DetectionParams {
    /// Stability constant added to the denominator.
    pub fn stability(&self) -> f64 {
        10f64.powi(-self.stability_exponent)
    }

    /// Budget weight for a trial. Awareness elevates every trial to the target weight.
    pub fn weight(&self, mode: DetectionMode, aware: bool) -> f64 {
        if aware {
            return self.target_weight;
        }
        match mode {
            DetectionMode::Passive => self.passive_weight,
            DetectionMode::Spread => self.spread_weight,
            DetectionMode::Target => self.target_weight,
        }
    }

    /// Detection probability for `input`, always in `[0, 1]`.
    pub fn probability(&self, input: &DetectionInput) -> f64 {
        let budget_term = self.weight(input.mode, input.aware) * input.security_budget;
        let aggregate = aggregate_security(budget_term, input.information, self.information_weight);
        detection_probability(aggregate, input.effectiveness, self.stability())
    }

    /// Runs one Bernoulli trial. Consumes exactly one draw.
    pub fn trial<R: Rng + ?Sized>(&self, input: &DetectionInput, rng: &mut R) -> bool {
        let p = self.probability(input);
        rng.gen::<f64>() < p
    }
}

/// Combines budget and information into one security level in `[0, 1]`.
pub fn aggregate_security(budget_term: f64, information: f64, information_weight: f64) -> f64 {
    let x = 1.0 - budget_term.clamp(0.0, 1.0);
    let y = 1.0 - information.clamp(0.0, 1.0);
    let w = information_weight.max(0.0);

    let value = (2.0 - x.sqrt() * y.powf(w / 2.0) - x * y.powf(w)) / 2.0;
    value.clamp(0.0, 1.0)
}

/// `aggregate / (aggregate + effectiveness + stability)`.
pub fn detection_probability(aggregate: f64, effectiveness: f64, stability: f64) -> f64 {
    let aggregate = aggregate.clamp(0.0, 1.0);
    let effectiveness = effectiveness.clamp(0.0, 1.0);
    let denominator = aggregate + effectiveness + stability.max(f64::MIN_POSITIVE);
    (aggregate / denominator).clamp(0.0, 1.0)
}

// ============================================================================
// THREAT IDENTITY
// ============================================================================

/// An attacker as seen by defenders: how strong it is and what gives it away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub id: AttackerId,

    /// Attack strength in `[0, 1]`
    pub effectiveness: f64,

    /// Tick the attacker became active
    pub activated_at: Tick,

    /// Order in which indicator bits get revealed
    reveal_order: Vec<usize>,
}

impl Threat {
    /// Samples a threat with `bits` indicators.
    ///
    /// The effectiveness draw always happens; `fixed` only replaces its value,
    /// so fixing effectiveness does not shift any later draw.
    pub fn sample<R: Rng + ?Sized>(
        id: AttackerId,
        bits: usize,
        fixed: Option<f64>,
        activated_at: Tick,
        rng: &mut R,
    ) -> Self {
        let drawn: f64 = rng.gen();
        let mut reveal_order: Vec<usize> = (0..bits).collect();
        reveal_order.shuffle(rng);

        Self {
            id,
            effectiveness: fixed.unwrap_or(drawn).clamp(0.0, 1.0),
            activated_at,
            reveal_order,
        }
    }

    /// Builds a threat with an explicit reveal order.
    pub fn with_order(id: AttackerId, effectiveness: f64, reveal_order: Vec<usize>) -> Self {
        Self {
            id,
            effectiveness: effectiveness.clamp(0.0, 1.0),
            activated_at: 0,
            reveal_order,
        }
    }

    /// Number of indicator bits.
    pub fn bits(&self) -> usize {
        self.reveal_order.len()
    }

    pub fn reveal_order(&self) -> &[usize] {
        &self.reveal_order
    }
}

/// Lifecycle of one (device, attacker) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfectionState {
    Uninfected,
    Compromised { since: Tick },
    Cleaned { at: Tick },
}
