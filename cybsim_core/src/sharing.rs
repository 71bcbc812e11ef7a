//! The "SHARING" Engine - Repeated bilateral information-sharing game
//!
//! Organizations meet pairwise with probability equal to their closeness and
//! each decides whether to share its indicator knowledge:
//! - Both share: closeness and trust rise, knowledge flows both ways, and
//!   closeness propagates to third parties (transitivity)
//! - Both withhold: closeness falls
//! - One shares: knowledge flows one way, the sharer trusts the other less
//!
//! A round is two-phase. All meetings and decisions are drawn against the
//! state at the start of the round; merges read a knowledge snapshot; the
//! updates are then committed in pair order.

use crate::ids::{AttackerId, OrgId};
use crate::organization::{IndicatorBits, Organization};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// PARAMETERS
// ============================================================================

/// When the game runs relative to the agents in a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPhase {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingParams {
    pub enabled: bool,

    /// Divisor for closeness moves (>= 1)
    pub reciprocity: f64,

    /// Divisor for trust moves (>= 1)
    pub trust_factor: f64,

    /// Divisor for closeness pulled toward a cooperating partner's (>= 1)
    pub transitivity: f64,

    pub initial_trust: f64,

    pub initial_closeness: f64,

    /// Share of one-sided giving tolerated before sharing scales down
    pub acceptable_freeload: f64,

    pub phase: SharingPhase,
}

impl Default for SharingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            reciprocity: 2.0,
            trust_factor: 2.0,
            transitivity: 1.0,
            initial_trust: 0.5,
            initial_closeness: 0.2,
            acceptable_freeload: 0.5,
            phase: SharingPhase::After,
        }
    }
}

/// Sharing propensity multiplier for an organization that has given `given`
/// to a counterpart and received `received` back.
///
/// 1 unless `given > received`, then `min(1, acceptable + received / given)`.
pub fn share_scale(given: f64, received: f64, acceptable_freeload: f64) -> f64 {
    if given > received && given > 0.0 {
        (acceptable_freeload + received / given).min(1.0)
    } else {
        1.0
    }
}

/// Closeness after a mutual move: up for cooperation, down for mutual defection.
pub fn reciprocate(closeness: f64, cooperated: bool, reciprocity: f64) -> f64 {
    let r = reciprocity.max(1.0);
    if cooperated {
        1.0 - (1.0 - closeness) / r
    } else {
        closeness / r
    }
}

pub fn increase_trust(trust: f64, trust_factor: f64) -> f64 {
    1.0 - (1.0 - trust) / trust_factor.max(1.0)
}

pub fn decrease_trust(trust: f64, trust_factor: f64) -> f64 {
    trust / trust_factor.max(1.0)
}

// ============================================================================
// TRUST NETWORK
// ============================================================================

/// Closeness (symmetric) and trust (directed) between organizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustNetwork {
    closeness: DMatrix<f64>,

    /// `trust[(i, j)]` is how much `i` trusts `j`
    trust: DMatrix<f64>,
}

impl TrustNetwork {
    pub fn new(size: usize, initial_closeness: f64, initial_trust: f64) -> Self {
        let mut closeness = DMatrix::from_element(size, size, initial_closeness.clamp(0.0, 1.0));
        let mut trust = DMatrix::from_element(size, size, initial_trust.clamp(0.0, 1.0));
        closeness.fill_diagonal(1.0);
        trust.fill_diagonal(1.0);
        Self { closeness, trust }
    }

    pub fn len(&self) -> usize {
        self.closeness.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.closeness.nrows() == 0
    }

    pub fn closeness(&self, i: usize, j: usize) -> f64 {
        self.closeness.get((i, j)).copied().unwrap_or(0.0)
    }

    pub fn trust(&self, i: usize, j: usize) -> f64 {
        self.trust.get((i, j)).copied().unwrap_or(0.0)
    }

    /// Writes both cells, clamped to `[0, 1]`.
    pub fn set_closeness(&mut self, i: usize, j: usize, value: f64) {
        if i >= self.len() || j >= self.len() || i == j {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        self.closeness[(i, j)] = value;
        self.closeness[(j, i)] = value;
    }

    pub fn set_trust(&mut self, i: usize, j: usize, value: f64) {
        if i >= self.len() || j >= self.len() || i == j {
            return;
        }
        self.trust[(i, j)] = value.clamp(0.0, 1.0);
    }

    pub fn closeness_matrix(&self) -> &DMatrix<f64> {
        &self.closeness
    }

    pub fn trust_matrix(&self) -> &DMatrix<f64> {
        &self.trust
    }

    /// Closeness is symmetric and every value lies in `[0, 1]`.
    pub fn is_consistent(&self) -> bool {
        let in_unit = |m: &DMatrix<f64>| m.iter().all(|v| (0.0..=1.0).contains(v));
        in_unit(&self.closeness) && in_unit(&self.trust) && self.closeness == self.closeness.transpose()
    }

    /// Mean off-diagonal closeness.
    pub fn mean_closeness(&self) -> f64 {
        let n = self.len();
        if n < 2 {
            return 0.0;
        }
        let total: f64 = self.closeness.sum() - n as f64;
        total / (n * (n - 1)) as f64
    }
}

/// Row-major copy of a matrix, for snapshots.
pub fn matrix_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

// ============================================================================
// ROUND
// ============================================================================

/// Result of one pairwise meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Cooperate,
    Defect,
    /// `sharer` shared, `withholder` did not
    OneSided { sharer: OrgId, withholder: OrgId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interaction {
    pub i: OrgId,

    pub j: OrgId,

    pub outcome: Outcome,
}

/// Tallies for one round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    pub interactions: usize,

    pub cooperations: usize,

    pub defections: usize,

    pub one_sided: usize,

    /// Indicator knowledge moved, in vector fractions
    pub information_moved: f64,
}

fn decides_to_share<R: Rng + ?Sized>(
    me: &Organization,
    other: OrgId,
    trust: f64,
    params: &SharingParams,
    rng: &mut R,
) -> bool {
    let scale = share_scale(me.given_to(other), me.received_from(other), params.acceptable_freeload);
    rng.gen::<f64>() < trust * scale
}

/// Plays one round over every unordered pair.
pub fn play_round<R: Rng + ?Sized>(
    network: &mut TrustNetwork,
    organizations: &mut [Organization],
    params: &SharingParams,
    rng: &mut R,
) -> RoundReport {
    let n = organizations.len().min(network.len());

    // Phase 1: meetings and decisions against committed state
    let mut interactions = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.gen::<f64>() >= network.closeness(i, j) {
                continue;
            }
            let (oi, oj) = (OrgId(i), OrgId(j));
            let share_i = decides_to_share(&organizations[i], oj, network.trust(i, j), params, rng);
            let share_j = decides_to_share(&organizations[j], oi, network.trust(j, i), params, rng);
            let outcome = match (share_i, share_j) {
                (true, true) => Outcome::Cooperate,
                (false, false) => Outcome::Defect,
                (true, false) => Outcome::OneSided { sharer: oi, withholder: oj },
                (false, true) => Outcome::OneSided { sharer: oj, withholder: oi },
            };
            interactions.push(Interaction { i: oi, j: oj, outcome });
        }
    }

    // Phase 2: commit against snapshots
    let knowledge: Vec<BTreeMap<AttackerId, IndicatorBits>> = organizations
        .iter()
        .map(|o| o.knowledge_map().clone())
        .collect();
    let closeness_before = network.closeness_matrix().clone();

    let mut report = RoundReport {
        interactions: interactions.len(),
        ..Default::default()
    };

    for interaction in &interactions {
        let (i, j) = (interaction.i.0, interaction.j.0);
        match interaction.outcome {
            Outcome::Cooperate => {
                report.cooperations += 1;
                let c = network.closeness(i, j);
                network.set_closeness(i, j, reciprocate(c, true, params.reciprocity));
                let t_ij = network.trust(i, j);
                let t_ji = network.trust(j, i);
                network.set_trust(i, j, increase_trust(t_ij, params.trust_factor));
                network.set_trust(j, i, increase_trust(t_ji, params.trust_factor));

                report.information_moved += transfer(organizations, &knowledge, i, j);
                report.information_moved += transfer(organizations, &knowledge, j, i);

                apply_transitivity(network, &closeness_before, i, j, params.transitivity);
            }
            Outcome::Defect => {
                report.defections += 1;
                let c = network.closeness(i, j);
                network.set_closeness(i, j, reciprocate(c, false, params.reciprocity));
            }
            Outcome::OneSided { sharer, withholder } => {
                report.one_sided += 1;
                let (s, w) = (sharer.0, withholder.0);
                report.information_moved += transfer(organizations, &knowledge, s, w);
                let t = network.trust(s, w);
                network.set_trust(s, w, decrease_trust(t, params.trust_factor));
            }
        }
    }

    debug!(
        interactions = report.interactions,
        cooperations = report.cooperations,
        defections = report.defections,
        one_sided = report.one_sided,
        "sharing round"
    );
    report
}

/// Merges the snapshot knowledge of `from` into `to` and books the gain.
fn transfer(
    organizations: &mut [Organization],
    snapshot: &[BTreeMap<AttackerId, IndicatorBits>],
    from: usize,
    to: usize,
) -> f64 {
    let Some(source) = snapshot.get(from) else {
        return 0.0;
    };
    let gained = match organizations.get_mut(to) {
        Some(org) => org.absorb(source),
        None => return 0.0,
    };
    if let Some(org) = organizations.get_mut(to) {
        org.record_received(OrgId(from), gained);
    }
    if let Some(org) = organizations.get_mut(from) {
        org.record_given(OrgId(to), gained);
    }
    gained
}

/// Pulls each side's closeness to third parties toward the partner's more
/// decided opinion, read from the pre-round matrix.
fn apply_transitivity(network: &mut TrustNetwork, before: &DMatrix<f64>, i: usize, j: usize, transitivity: f64) {
    let t = transitivity.max(1.0);
    for k in 0..network.len() {
        if k == i || k == j {
            continue;
        }
        let c_ik = before[(i, k)];
        let c_jk = before[(j, k)];
        let extremity_i = (c_ik - 0.5).abs();
        let extremity_j = (c_jk - 0.5).abs();

        if extremity_j > extremity_i {
            network.set_closeness(i, k, c_jk + (c_ik - c_jk) / t);
        } else if extremity_i > extremity_j {
            network.set_closeness(j, k, c_ik + (c_jk - c_ik) / t);
        }
    }
}
