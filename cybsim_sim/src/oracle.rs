//! Invariant oracle for simulation runs.
//!
//! The Oracle watches a world from outside after every tick and reports any
//! state the engines should never produce:
//! - Closeness/trust outside [0, 1] or asymmetric closeness
//! - Security budgets outside their configured bounds
//! - Indicator knowledge that shrank
//! - Attacker captured sets that disagree with organization state
//! - Awareness of an attacker that holds no device in the organization
//! - Messages lost by the router
//! - Sharing ledgers that do not balance

use crate::world::SimWorld;
use cybsim_core::{AttackerId, OrgId, Role};
use cybsim_env::Tick;
use std::collections::BTreeMap;
use thiserror::Error;

/// A broken invariant, with the tick it was observed at.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("tick {tick}: closeness or trust out of bounds, or closeness asymmetric")]
    TrustMatrix { tick: Tick },

    #[error("tick {tick}: {org} budget {budget} outside [{min}, {max}]")]
    Budget {
        tick: Tick,
        org: OrgId,
        budget: f64,
        min: f64,
        max: f64,
    },

    #[error("tick {tick}: {org} knows {now} bits of {attacker}, down from {before}")]
    KnowledgeShrank {
        tick: Tick,
        org: OrgId,
        attacker: AttackerId,
        before: usize,
        now: usize,
    },

    #[error("tick {tick}: {attacker} holds {captured} devices, organizations report {owned}")]
    CapturedMismatch {
        tick: Tick,
        attacker: AttackerId,
        captured: usize,
        owned: usize,
    },

    #[error("tick {tick}: {org} is aware of {attacker} with nothing compromised")]
    StaleAwareness {
        tick: Tick,
        org: OrgId,
        attacker: AttackerId,
    },

    #[error("tick {tick}: {sent} messages sent, {accounted} delivered, dropped or pending")]
    MessageLeak { tick: Tick, sent: u64, accounted: u64 },

    #[error("tick {tick}: malicious mark on an idle edge")]
    EdgeMarks { tick: Tick },

    #[error("tick {tick}: information in {info_in} != information out {info_out}")]
    Ledger { tick: Tick, info_in: f64, info_out: f64 },
}

/// Tracks what it needs between ticks and collects violations.
#[derive(Debug, Default)]
pub struct InvariantOracle {
    /// Revealed bit count per (organization, attacker) at the last check
    knowledge: BTreeMap<(OrgId, AttackerId), usize>,

    violations: Vec<Violation>,

    checks: u64,
}

impl InvariantOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every invariant against the world's current state.
    ///
    /// Returns the violations found in this check; all of them are also kept.
    pub fn check(&mut self, world: &SimWorld) -> Vec<Violation> {
        let tick = world.tick();
        let mut found = Vec::new();
        self.checks += 1;

        if !world.trust().is_consistent() {
            found.push(Violation::TrustMatrix { tick });
        }

        let budget = &world.config().budget;
        for org in world.organizations() {
            let b = org.security_budget;
            if !(budget.budget_min..=budget.budget_max).contains(&b) {
                found.push(Violation::Budget {
                    tick,
                    org: org.id,
                    budget: b,
                    min: budget.budget_min,
                    max: budget.budget_max,
                });
            }

            for (&attacker, bits) in org.knowledge_map() {
                let now = bits.count_ones();
                let before = self.knowledge.insert((org.id, attacker), now).unwrap_or(0);
                if now < before {
                    found.push(Violation::KnowledgeShrank {
                        tick,
                        org: org.id,
                        attacker,
                        before,
                        now,
                    });
                }
            }
        }

        for org in world.organizations() {
            for &attacker in world.threats().keys() {
                if org.is_aware(attacker) && org.compromised_count(attacker) == 0 {
                    found.push(Violation::StaleAwareness {
                        tick,
                        org: org.id,
                        attacker,
                    });
                }
            }
        }

        for &attacker in world.threats().keys() {
            let captured = world
                .attacker_node(attacker)
                .and_then(|node| world.network().role(node))
                .and_then(Role::attacker)
                .map_or(0, |a| a.captured.len());
            let owned: usize = world
                .organizations()
                .iter()
                .map(|o| o.compromised_count(attacker))
                .sum();
            if captured != owned {
                found.push(Violation::CapturedMismatch {
                    tick,
                    attacker,
                    captured,
                    owned,
                });
            }
        }

        let m = world.metrics();
        let accounted = m.delivered + m.dropped() + world.network().pending_count() as u64;
        if m.messages_sent != accounted {
            found.push(Violation::MessageLeak {
                tick,
                sent: m.messages_sent,
                accounted,
            });
        }

        if world.network().edges().iter().any(|e| e.malicious && !e.active) {
            found.push(Violation::EdgeMarks { tick });
        }

        let info_in: f64 = world.organizations().iter().map(|o| o.info_in).sum();
        let info_out: f64 = world.organizations().iter().map(|o| o.info_out).sum();
        if (info_in - info_out).abs() > 1e-6 * (1.0 + info_in.abs()) {
            found.push(Violation::Ledger { tick, info_in, info_out });
        }

        self.violations.extend(found.iter().cloned());
        found
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Number of checks run so far.
    pub fn checks(&self) -> u64 {
        self.checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn test_fresh_world_is_clean() {
        let mut config = SimConfig::default();
        config.topology.organizations = 3;
        let world = SimWorld::new(config).unwrap();
        let mut oracle = InvariantOracle::new();
        assert!(oracle.check(&world).is_empty());
        assert!(oracle.is_clean());
        assert_eq!(oracle.checks(), 1);
    }

    #[test]
    fn test_oracle_follows_a_run() {
        let mut config = SimConfig::default().with_seed(11);
        config.topology.organizations = 5;
        config.topology.devices_max = 12;
        let mut world = SimWorld::new(config).unwrap();
        let mut oracle = InvariantOracle::new();
        for _ in 0..80 {
            world.step();
            oracle.check(&world);
        }
        assert!(oracle.is_clean(), "{:?}", oracle.violations());
    }

    #[test]
    fn test_violation_display() {
        let v = Violation::MessageLeak {
            tick: 3,
            sent: 5,
            accounted: 4,
        };
        assert_eq!(v.to_string(), "tick 3: 5 messages sent, 4 delivered, dropped or pending");

        let v = Violation::StaleAwareness {
            tick: 9,
            org: OrgId(2),
            attacker: AttackerId(1),
        };
        assert_eq!(v.to_string(), "tick 9: org2 is aware of atk1 with nothing compromised");
    }
}
