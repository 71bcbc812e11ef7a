//! Organization aggregate state: knowledge, compromise, incidents, budget.
//!
//! An organization is the unit that detects attacks, learns indicators,
//! adapts its security budget and plays the sharing game. Device-level roles
//! live in the network; everything an organization knows or tallies lives here.

use crate::detection::{InfectionState, Threat};
use crate::ids::{AttackerId, NodeId, OrgId};
use cybsim_env::Tick;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ============================================================================
// INDICATOR BITS
// ============================================================================

/// Fixed-length indicator vector an organization holds about one attacker.
///
/// Bits are only ever set, never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorBits(Vec<bool>);

impl IndicatorBits {
    /// All-unknown vector of `len` bits.
    pub fn new(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Sets a bit. Returns true if it was newly set.
    pub fn set(&mut self, index: usize) -> bool {
        match self.0.get_mut(index) {
            Some(bit) if !*bit => {
                *bit = true;
                true
            }
            _ => false,
        }
    }

    /// ORs `other` into `self`. Returns the number of newly set bits.
    pub fn merge_from(&mut self, other: &IndicatorBits) -> usize {
        let mut gained = 0;
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            if *theirs && !*mine {
                *mine = true;
                gained += 1;
            }
        }
        gained
    }

    pub fn count_ones(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Revealed share in `[0, 1]`; zero for an empty vector.
    pub fn proportion(&self) -> f64 {
        if self.0.is_empty() {
            0.0
        } else {
            self.count_ones() as f64 / self.0.len() as f64
        }
    }

    /// True when every bit set in `other` is also set here.
    pub fn contains(&self, other: &IndicatorBits) -> bool {
        other
            .0
            .iter()
            .enumerate()
            .all(|(i, &bit)| !bit || self.get(i))
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Budget adaptation and incident memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetParams {
    /// Ticks between budget updates
    pub update_interval: u64,

    /// Multiplier applied when nothing went unhandled
    pub drop_factor: f64,

    /// Ticks without detection activity before an incident is abandoned
    pub organization_memory: u64,

    pub budget_min: f64,

    pub budget_max: f64,
}

impl Default for BudgetParams {
    fn default() -> Self {
        Self {
            update_interval: 10,
            drop_factor: 0.95,
            organization_memory: 50,
            budget_min: 0.005,
            budget_max: 1.0,
        }
    }
}

impl BudgetParams {
    pub fn clamp(&self, budget: f64) -> f64 {
        budget.clamp(self.budget_min, self.budget_max)
    }
}

/// Open incident for one attacker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub started: Tick,
    pub last_update: Tick,
}

/// How an incident was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentClosure {
    /// Every compromised device was cleaned
    Handled { duration: Tick },

    /// Forgotten after the memory window; `remaining` devices stay compromised
    Unhandled { duration: Tick, remaining: usize },
}

/// Run statistics for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgStats {
    pub incident_time_total: u64,

    pub incidents_closed: u64,

    pub budget_total: f64,

    pub newly_compromised_total: u64,

    pub ticks: u64,
}

// ============================================================================
// ORGANIZATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,

    /// Subnetwork node of this organization
    pub node: NodeId,

    pub security_budget: f64,

    /// Leaf devices inside the organization
    pub device_count: usize,

    /// Indicator knowledge per attacker
    knowledge: BTreeMap<AttackerId, IndicatorBits>,

    /// Devices currently compromised, per attacker, with the tick of compromise
    compromised: BTreeMap<AttackerId, BTreeMap<NodeId, Tick>>,

    /// Last cleaning tick per (device, attacker)
    cleaned: BTreeMap<(NodeId, AttackerId), Tick>,

    incidents: BTreeMap<AttackerId, Incident>,

    /// Devices left compromised by abandoned incidents since the last budget update
    unhandled: usize,

    /// Information given to each counterpart
    given: Vec<f64>,

    /// Information received from each counterpart
    received: Vec<f64>,

    pub info_in: f64,

    pub info_out: f64,

    pub stats: OrgStats,
}

impl Organization {
    pub fn new(id: OrgId, node: NodeId, security_budget: f64, device_count: usize, num_orgs: usize) -> Self {
        Self {
            id,
            node,
            security_budget,
            device_count,
            knowledge: BTreeMap::new(),
            compromised: BTreeMap::new(),
            cleaned: BTreeMap::new(),
            incidents: BTreeMap::new(),
            unhandled: 0,
            given: vec![0.0; num_orgs],
            received: vec![0.0; num_orgs],
            info_in: 0.0,
            info_out: 0.0,
            stats: OrgStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Knowledge
    // ------------------------------------------------------------------

    /// Starts tracking an attacker with no indicators known.
    pub fn register_threat(&mut self, threat: &Threat) {
        self.knowledge
            .entry(threat.id)
            .or_insert_with(|| IndicatorBits::new(threat.bits()));
    }

    pub fn knowledge(&self, attacker: AttackerId) -> Option<&IndicatorBits> {
        self.knowledge.get(&attacker)
    }

    pub fn knowledge_map(&self) -> &BTreeMap<AttackerId, IndicatorBits> {
        &self.knowledge
    }

    /// ORs another organization's knowledge in. Returns the gain in vector fractions.
    pub fn absorb(&mut self, other: &BTreeMap<AttackerId, IndicatorBits>) -> f64 {
        let mut gained = 0.0;
        for (attacker, bits) in other {
            let mine = self
                .knowledge
                .entry(*attacker)
                .or_insert_with(|| IndicatorBits::new(bits.len()));
            let newly = mine.merge_from(bits);
            if !bits.is_empty() {
                gained += newly as f64 / bits.len() as f64;
            }
        }
        gained
    }

    /// Revealed share of the attacker's indicators.
    pub fn information(&self, attacker: AttackerId) -> f64 {
        self.knowledge
            .get(&attacker)
            .map(IndicatorBits::proportion)
            .unwrap_or(0.0)
    }

    // ------------------------------------------------------------------
    // Compromise
    // ------------------------------------------------------------------

    /// Marks a device compromised. Returns false if it already was.
    pub fn compromise(&mut self, device: NodeId, attacker: AttackerId, tick: Tick) -> bool {
        let devices = self.compromised.entry(attacker).or_default();
        if devices.contains_key(&device) {
            return false;
        }
        devices.insert(device, tick);
        self.cleaned.remove(&(device, attacker));
        true
    }

    /// Cleans a device. Closes the incident as handled if it was the last one.
    pub fn clean(&mut self, device: NodeId, attacker: AttackerId, tick: Tick) -> Option<IncidentClosure> {
        let devices = self.compromised.get_mut(&attacker)?;
        devices.remove(&device)?;
        self.cleaned.insert((device, attacker), tick);

        if !devices.is_empty() {
            return None;
        }
        self.compromised.remove(&attacker);

        let incident = self.incidents.remove(&attacker)?;
        let duration = tick.saturating_sub(incident.started);
        self.stats.incident_time_total += duration;
        self.stats.incidents_closed += 1;
        debug!(org = self.id.0, attacker = attacker.0, duration, "incident handled");
        Some(IncidentClosure::Handled { duration })
    }

    pub fn infection_state(&self, device: NodeId, attacker: AttackerId) -> InfectionState {
        if let Some(&since) = self.compromised.get(&attacker).and_then(|d| d.get(&device)) {
            return InfectionState::Compromised { since };
        }
        match self.cleaned.get(&(device, attacker)) {
            Some(&at) => InfectionState::Cleaned { at },
            None => InfectionState::Uninfected,
        }
    }

    pub fn is_compromised_by(&self, device: NodeId, attacker: AttackerId) -> bool {
        self.compromised
            .get(&attacker)
            .map(|d| d.contains_key(&device))
            .unwrap_or(false)
    }

    /// Devices compromised by `attacker`.
    pub fn compromised_count(&self, attacker: AttackerId) -> usize {
        self.compromised.get(&attacker).map(BTreeMap::len).unwrap_or(0)
    }

    /// Distinct compromised devices across all attackers.
    pub fn compromised_devices(&self) -> usize {
        self.compromised
            .values()
            .flat_map(|d| d.keys())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Every compromised (device, attacker) pair in ascending order.
    pub fn compromised_pairs(&self) -> Vec<(NodeId, AttackerId)> {
        let mut pairs: Vec<(NodeId, AttackerId)> = self
            .compromised
            .iter()
            .flat_map(|(&attacker, devices)| devices.keys().map(move |&device| (device, attacker)))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn percent_compromised(&self) -> f64 {
        if self.device_count == 0 {
            0.0
        } else {
            100.0 * self.compromised_devices() as f64 / self.device_count as f64
        }
    }

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    /// Records a positive detection: reveals the next unknown indicator and
    /// opens or refreshes the incident. Returns the revealed bit index.
    ///
    /// No incident is opened while the attacker holds no device here, so a
    /// blocked attempt against a clean organization only reveals.
    pub fn record_detection(&mut self, threat: &Threat, tick: Tick) -> Option<usize> {
        if self.compromised_count(threat.id) > 0 {
            self.incidents
                .entry(threat.id)
                .and_modify(|incident| incident.last_update = tick)
                .or_insert(Incident {
                    started: tick,
                    last_update: tick,
                });
        }

        let bits = self
            .knowledge
            .entry(threat.id)
            .or_insert_with(|| IndicatorBits::new(threat.bits()));
        let next = threat.reveal_order().iter().copied().find(|&i| !bits.get(i))?;
        bits.set(next);
        Some(next)
    }

    pub fn is_aware(&self, attacker: AttackerId) -> bool {
        self.incidents.contains_key(&attacker)
    }

    pub fn incident(&self, attacker: AttackerId) -> Option<&Incident> {
        self.incidents.get(&attacker)
    }

    pub fn aware_of(&self) -> usize {
        self.incidents.len()
    }

    /// Abandons incidents with no detection activity for `memory` ticks.
    ///
    /// Devices still compromised by an abandoned attacker go to the unhandled tally.
    pub fn expire_incidents(&mut self, tick: Tick, memory: u64) -> Vec<(AttackerId, IncidentClosure)> {
        let stale: Vec<AttackerId> = self
            .incidents
            .iter()
            .filter(|(_, incident)| tick.saturating_sub(incident.last_update) >= memory)
            .map(|(&attacker, _)| attacker)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for attacker in stale {
            if let Some(incident) = self.incidents.remove(&attacker) {
                let remaining = self.compromised_count(attacker);
                let duration = tick.saturating_sub(incident.started);
                self.unhandled += remaining;
                self.stats.incident_time_total += duration;
                self.stats.incidents_closed += 1;
                closed.push((attacker, IncidentClosure::Unhandled { duration, remaining }));
            }
        }
        closed
    }

    pub fn unhandled(&self) -> usize {
        self.unhandled
    }

    // ------------------------------------------------------------------
    // Budget
    // ------------------------------------------------------------------

    /// Applies one budget update and resets the unhandled tally.
    pub fn adapt_budget(&mut self, params: &BudgetParams) -> f64 {
        let fraction = if self.device_count == 0 {
            0.0
        } else {
            (self.unhandled as f64 / self.device_count as f64).min(1.0)
        };

        let next = if fraction > 0.0 {
            self.security_budget + (1.0 - self.security_budget) * fraction
        } else {
            self.security_budget * params.drop_factor
        };
        self.security_budget = params.clamp(next);
        self.unhandled = 0;
        self.security_budget
    }

    // ------------------------------------------------------------------
    // Sharing ledgers
    // ------------------------------------------------------------------

    pub fn given_to(&self, other: OrgId) -> f64 {
        self.given.get(other.0).copied().unwrap_or(0.0)
    }

    pub fn received_from(&self, other: OrgId) -> f64 {
        self.received.get(other.0).copied().unwrap_or(0.0)
    }

    /// Records that `other` gained `amount` from this organization.
    pub fn record_given(&mut self, other: OrgId, amount: f64) {
        if let Some(slot) = self.given.get_mut(other.0) {
            *slot += amount;
        }
        self.info_out += amount;
    }

    /// Records that this organization gained `amount` from `other`.
    pub fn record_received(&mut self, other: OrgId, amount: f64) {
        if let Some(slot) = self.received.get_mut(other.0) {
            *slot += amount;
        }
        self.info_in += amount;
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub fn record_tick(&mut self, newly_compromised: usize) {
        self.stats.ticks += 1;
        self.stats.budget_total += self.security_budget;
        self.stats.newly_compromised_total += newly_compromised as u64;
    }

    /// `info_in / (info_in + info_out + 1e-5)`.
    pub fn freeloading_ratio(&self) -> f64 {
        self.info_in / (self.info_in + self.info_out + 1e-5)
    }

    pub fn avg_incident_duration(&self) -> f64 {
        if self.stats.incidents_closed == 0 {
            0.0
        } else {
            self.stats.incident_time_total as f64 / self.stats.incidents_closed as f64
        }
    }

    pub fn avg_security(&self) -> f64 {
        if self.stats.ticks == 0 {
            self.security_budget
        } else {
            self.stats.budget_total / self.stats.ticks as f64
        }
    }

    pub fn avg_compromised_per_step(&self) -> f64 {
        if self.stats.ticks == 0 {
            0.0
        } else {
            self.stats.newly_compromised_total as f64 / self.stats.ticks as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn org(budget: f64, devices: usize) -> Organization {
        Organization::new(OrgId(0), NodeId(1), budget, devices, 3)
    }

    fn threat(bits: usize) -> Threat {
        Threat::with_order(AttackerId(0), 0.5, (0..bits).rev().collect())
    }

    #[test]
    fn test_indicator_merge_counts_new_bits() {
        let mut a = IndicatorBits::from_bits(vec![true, false, false, true]);
        let b = IndicatorBits::from_bits(vec![false, true, false, true]);

        assert_eq!(a.merge_from(&b), 1);
        assert_eq!(a.as_slice(), &[true, true, false, true]);
        assert_eq!(a.merge_from(&b), 0);
        assert_relative_eq!(a.proportion(), 0.75);
        assert_relative_eq!(IndicatorBits::new(0).proportion(), 0.0);
    }

    #[test]
    fn test_detection_reveals_in_order() {
        let t = threat(3);
        let mut o = org(0.5, 10);
        o.register_threat(&t);
        o.compromise(NodeId(2), t.id, 4);

        assert_eq!(o.record_detection(&t, 5), Some(2));
        assert_eq!(o.record_detection(&t, 6), Some(1));
        assert_eq!(o.record_detection(&t, 7), Some(0));
        assert_eq!(o.record_detection(&t, 8), None);
        assert_relative_eq!(o.information(t.id), 1.0);

        let incident = o.incident(t.id).copied();
        assert_eq!(incident, Some(Incident { started: 5, last_update: 8 }));
    }

    #[test]
    fn test_detection_without_compromise_stays_unaware() {
        let t = threat(3);
        let mut o = org(0.5, 10);
        o.register_threat(&t);

        assert_eq!(o.record_detection(&t, 5), Some(2));
        assert!(!o.is_aware(t.id));
        assert_eq!(o.aware_of(), 0);
        assert!(o.expire_incidents(500, 50).is_empty());
        assert_eq!(o.unhandled(), 0);

        // Another attacker's foothold does not make this one an incident
        o.compromise(NodeId(4), AttackerId(7), 6);
        o.record_detection(&t, 7);
        assert!(!o.is_aware(t.id));
        assert_relative_eq!(o.information(t.id), 2.0 / 3.0);
    }

    #[test]
    fn test_cleaning_last_device_handles_incident() {
        let t = threat(4);
        let mut o = org(0.5, 10);
        assert!(o.compromise(NodeId(3), t.id, 1));
        assert!(o.compromise(NodeId(4), t.id, 2));
        assert!(!o.compromise(NodeId(4), t.id, 2));
        assert_eq!(o.compromised_count(t.id), 2);

        o.record_detection(&t, 10);
        assert!(o.is_aware(t.id));

        assert_eq!(o.clean(NodeId(3), t.id, 11), None);
        assert!(o.is_aware(t.id));
        assert_eq!(o.clean(NodeId(4), t.id, 14), Some(IncidentClosure::Handled { duration: 4 }));
        assert!(!o.is_aware(t.id));
        assert_eq!(o.infection_state(NodeId(4), t.id), InfectionState::Cleaned { at: 14 });
        assert_eq!(o.infection_state(NodeId(9), t.id), InfectionState::Uninfected);
        assert_relative_eq!(o.avg_incident_duration(), 4.0);

        // Re-compromise after cleaning
        o.compromise(NodeId(4), t.id, 20);
        assert_eq!(o.infection_state(NodeId(4), t.id), InfectionState::Compromised { since: 20 });
    }

    #[test]
    fn test_incident_expires_after_memory() {
        let t = threat(4);
        let mut o = org(0.5, 10);
        o.compromise(NodeId(3), t.id, 1);
        o.compromise(NodeId(5), AttackerId(1), 1);
        o.record_detection(&t, 10);

        assert!(o.expire_incidents(59, 50).is_empty());
        let closed = o.expire_incidents(60, 50);
        assert_eq!(
            closed,
            vec![(t.id, IncidentClosure::Unhandled { duration: 50, remaining: 1 })]
        );
        assert!(!o.is_aware(t.id));
        assert_eq!(o.unhandled(), 1);
        assert_eq!(o.compromised_devices(), 2);
    }

    #[test]
    fn test_budget_rises_with_unhandled() {
        let params = BudgetParams::default();
        let t = threat(2);
        let mut o = org(0.5, 4);
        o.compromise(NodeId(1), t.id, 0);
        o.compromise(NodeId(2), t.id, 0);
        o.record_detection(&t, 0);
        o.expire_incidents(100, params.organization_memory);

        // f = 2/4: 0.5 + 0.5 * 0.5
        assert_relative_eq!(o.adapt_budget(&params), 0.75);
        assert_eq!(o.unhandled(), 0);
    }

    #[test]
    fn test_budget_decays_and_clamps() {
        let params = BudgetParams::default();
        let mut o = org(0.5, 4);
        assert_relative_eq!(o.adapt_budget(&params), 0.475);

        let mut low = org(0.005, 4);
        assert_relative_eq!(low.adapt_budget(&params), 0.005);
    }

    #[test]
    fn test_ledgers_and_freeloading() {
        let mut o = org(0.5, 4);
        assert_relative_eq!(o.freeloading_ratio(), 0.0);

        o.record_received(OrgId(1), 0.75);
        o.record_given(OrgId(2), 0.25);
        assert_relative_eq!(o.received_from(OrgId(1)), 0.75);
        assert_relative_eq!(o.given_to(OrgId(2)), 0.25);
        assert_relative_eq!(o.freeloading_ratio(), 0.75 / (1.0 + 1e-5));

        // Unknown counterparts are ignored by the ledger but not the totals
        o.record_given(OrgId(9), 1.0);
        assert_relative_eq!(o.info_out, 1.25);
    }

    #[test]
    fn test_absorb_reports_fractional_gain() {
        let t = threat(4);
        let mut source = org(0.5, 4);
        source.register_threat(&t);
        source.record_detection(&t, 1);
        source.record_detection(&t, 2);

        let mut sink = org(0.5, 4);
        assert_relative_eq!(sink.absorb(source.knowledge_map()), 0.5);
        assert_relative_eq!(sink.absorb(source.knowledge_map()), 0.0);
        assert!(sink.knowledge(t.id).is_some_and(|k| k.contains(source.knowledge(t.id).unwrap())));
    }

    #[test]
    fn test_run_averages() {
        let mut o = org(0.4, 4);
        o.record_tick(2);
        o.security_budget = 0.6;
        o.record_tick(0);
        assert_relative_eq!(o.avg_security(), 0.5);
        assert_relative_eq!(o.avg_compromised_per_step(), 1.0);
    }

    proptest! {
        #[test]
        fn prop_merge_is_monotonic_or(
            left in proptest::collection::vec(any::<bool>(), 32),
            right in proptest::collection::vec(any::<bool>(), 32),
        ) {
            let old = IndicatorBits::from_bits(left.clone());
            let other = IndicatorBits::from_bits(right.clone());
            let mut merged = old.clone();
            let gained = merged.merge_from(&other);

            let expected: Vec<bool> = left.iter().zip(right.iter()).map(|(a, b)| *a || *b).collect();
            prop_assert_eq!(merged.as_slice(), expected.as_slice());
            prop_assert!(merged.contains(&old));
            prop_assert_eq!(gained, merged.count_ones() - old.count_ones());
        }
    }
}
