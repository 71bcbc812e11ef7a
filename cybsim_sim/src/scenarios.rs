//! Named scenarios: parameter presets layered on a base configuration.

use crate::config::{DepartmentConfig, SimConfig};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// CYB-001: Default parameters
    Baseline,

    /// CYB-002: No information sharing at all
    Isolated,

    /// CYB-003: Organizations start close and trusting
    HighTrust,

    /// CYB-004: Zero freeload tolerance, harsh trust penalties
    Freeloaders,

    /// CYB-005: Every attacker has the same, high effectiveness
    FixedEffectiveness,

    /// CYB-006: Many attackers arriving in quick succession
    AttackWave,

    /// CYB-007: Organizations split into departments
    Departments,

    /// CYB-008: Forwarding capacity and hop limits
    Congested,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::Isolated,
            ScenarioId::HighTrust,
            ScenarioId::Freeloaders,
            ScenarioId::FixedEffectiveness,
            ScenarioId::AttackWave,
            ScenarioId::Departments,
            ScenarioId::Congested,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::Isolated => "isolated",
            ScenarioId::HighTrust => "high_trust",
            ScenarioId::Freeloaders => "freeloaders",
            ScenarioId::FixedEffectiveness => "fixed_effectiveness",
            ScenarioId::AttackWave => "attack_wave",
            ScenarioId::Departments => "departments",
            ScenarioId::Congested => "congested",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Default parameters, invariants checked every tick",
            ScenarioId::Isolated => "Sharing disabled, organizations learn only from their own detections",
            ScenarioId::HighTrust => "Closeness and trust start at 0.9, cooperation expected",
            ScenarioId::Freeloaders => "No freeload tolerance and trust factor 4",
            ScenarioId::FixedEffectiveness => "All attackers at effectiveness 0.9",
            ScenarioId::AttackWave => "One initial attacker, seven more roughly every 20 ticks",
            ScenarioId::Departments => "Organizations built from 2-4 department subnetworks",
            ScenarioId::Congested => "Capacity 2 per device, 2 hops per tick, 3 failures end a correspondence",
        }
    }

    /// Applies this scenario's overrides to `base`.
    pub fn apply(&self, base: SimConfig) -> SimConfig {
        let mut config = base;
        match self {
            ScenarioId::Baseline => {}
            ScenarioId::Isolated => {
                config.sharing.enabled = false;
            }
            ScenarioId::HighTrust => {
                config.sharing.initial_closeness = 0.9;
                config.sharing.initial_trust = 0.9;
            }
            ScenarioId::Freeloaders => {
                config.sharing.acceptable_freeload = 0.0;
                config.sharing.trust_factor = 4.0;
            }
            ScenarioId::FixedEffectiveness => {
                config.attackers.fixed_effectiveness = Some(0.9);
            }
            ScenarioId::AttackWave => {
                config.attackers.initial = 1;
                config.attackers.total = 8;
                config.attackers.mean_activation_gap = 20.0;
            }
            ScenarioId::Departments => {
                config.topology.departments = Some(DepartmentConfig::default());
            }
            ScenarioId::Congested => {
                config.topology.device_capacity = Some(2);
                config.topology.max_hops = 2;
                config.correspondence.fails_to_end = Some(3);
            }
        }
        config
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "cyb-001" => Ok(ScenarioId::Baseline),
            "isolated" | "cyb-002" => Ok(ScenarioId::Isolated),
            "high_trust" | "hightrust" | "cyb-003" => Ok(ScenarioId::HighTrust),
            "freeloaders" | "cyb-004" => Ok(ScenarioId::Freeloaders),
            "fixed_effectiveness" | "fixedeffectiveness" | "cyb-005" => Ok(ScenarioId::FixedEffectiveness),
            "attack_wave" | "attackwave" | "cyb-006" => Ok(ScenarioId::AttackWave),
            "departments" | "cyb-007" => Ok(ScenarioId::Departments),
            "congested" | "cyb-008" => Ok(ScenarioId::Congested),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("CYB-006".parse::<ScenarioId>().unwrap(), ScenarioId::AttackWave);
        assert!("nope".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_presets_stay_valid() {
        for scenario in ScenarioId::all() {
            let config = scenario.apply(SimConfig::default());
            assert!(config.validate().is_ok(), "{} produced an invalid config", scenario);
        }
    }

    #[test]
    fn test_apply_keeps_base_fields() {
        let base = SimConfig::default().with_seed(9).with_ticks(33);
        let config = ScenarioId::Congested.apply(base);
        assert_eq!(config.seed, 9);
        assert_eq!(config.ticks, 33);
        assert_eq!(config.topology.device_capacity, Some(2));
    }
}
