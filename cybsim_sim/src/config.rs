//! Run configuration.
//!
//! Every field has a default; a TOML file may override any subset and CLI
//! flags override the file. `validate` rejects out-of-domain values before
//! the world is built.

use crate::error::ConfigError;
use cybsim_core::{BudgetParams, DetectionParams, SharingParams};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Department layout for organizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepartmentConfig {
    pub count_min: usize,

    pub count_max: usize,
}

impl Default for DepartmentConfig {
    fn default() -> Self {
        Self {
            count_min: 2,
            count_max: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Number of organizations on the backbone
    pub organizations: usize,

    /// Devices per organization (per department when departments are on)
    pub devices_min: usize,

    pub devices_max: usize,

    /// Split organizations into departments
    pub departments: Option<DepartmentConfig>,

    pub backbone_degree: f64,

    pub organization_degree: f64,

    /// Messages a device forwards per tick (unlimited when absent)
    pub device_capacity: Option<u32>,

    /// Hops a message may take per tick, `-1` for unlimited
    pub max_hops: i32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            organizations: 10,
            devices_min: 5,
            devices_max: 30,
            departments: None,
            backbone_degree: 2.0,
            organization_degree: 2.0,
            device_capacity: None,
            max_hops: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackerConfig {
    /// Attackers present from the first tick
    pub initial: usize,

    /// Attackers over the whole run, including the initial ones
    pub total: usize,

    /// Mean ticks between activations of the remaining attackers
    pub mean_activation_gap: f64,

    pub max_activity: f64,

    /// Same effectiveness for every attacker
    pub fixed_effectiveness: Option<f64>,

    /// Indicator bits per attacker
    pub indicator_bits: usize,

    pub targets_min: usize,

    pub targets_max: usize,
}

impl Default for AttackerConfig {
    fn default() -> Self {
        Self {
            initial: 2,
            total: 2,
            mean_activation_gap: 500.0,
            max_activity: 0.1,
            fixed_effectiveness: None,
            indicator_bits: 16,
            targets_min: 3,
            targets_max: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmployeeConfig {
    pub max_activity: f64,

    /// Spread of company security around the budget
    pub deviation_width: f64,

    pub colleagues_min: usize,

    pub colleagues_max: usize,

    pub outside_contacts_max: usize,
}

impl Default for EmployeeConfig {
    fn default() -> Self {
        Self {
            max_activity: 0.5,
            deviation_width: 0.25,
            colleagues_min: 2,
            colleagues_max: 10,
            outside_contacts_max: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrespondenceConfig {
    /// Consecutive failures before a correspondence gives up (never when absent)
    pub fails_to_end: Option<u32>,
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Ticks to run
    pub ticks: u64,

    pub topology: TopologyConfig,

    pub attackers: AttackerConfig,

    pub employees: EmployeeConfig,

    pub detection: DetectionParams,

    pub budget: BudgetParams,

    pub sharing: SharingParams,

    pub correspondence: CorrespondenceConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            ticks: 500,
            topology: TopologyConfig::default(),
            attackers: AttackerConfig::default(),
            employees: EmployeeConfig::default(),
            detection: DetectionParams::default(),
            budget: BudgetParams::default(),
            sharing: SharingParams::default(),
            correspondence: CorrespondenceConfig::default(),
        }
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{} is outside [0, 1]", value)))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{} must be finite and >= 0", value)))
    }
}

fn divisor(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{} must be >= 1", value)))
    }
}

fn ordered(field: &'static str, min: usize, max: usize) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("min {} exceeds max {}", min, max)))
    }
}

impl SimConfig {
    /// Parses TOML text over the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the run length.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;
        self
    }

    /// Checks every value against its domain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.topology;
        if t.organizations == 0 {
            return Err(ConfigError::invalid("topology.organizations", "need at least one"));
        }
        if t.devices_min == 0 {
            return Err(ConfigError::invalid("topology.devices_min", "need at least one device"));
        }
        ordered("topology.devices", t.devices_min, t.devices_max)?;
        if let Some(d) = &t.departments {
            if d.count_min == 0 {
                return Err(ConfigError::invalid("topology.departments.count_min", "need at least one"));
            }
            ordered("topology.departments", d.count_min, d.count_max)?;
        }
        non_negative("topology.backbone_degree", t.backbone_degree)?;
        non_negative("topology.organization_degree", t.organization_degree)?;
        if t.max_hops < -1 {
            return Err(ConfigError::invalid("topology.max_hops", "use -1 for unlimited"));
        }

        let a = &self.attackers;
        if a.initial > a.total {
            return Err(ConfigError::invalid(
                "attackers.initial",
                format!("{} exceeds total {}", a.initial, a.total),
            ));
        }
        non_negative("attackers.mean_activation_gap", a.mean_activation_gap)?;
        unit("attackers.max_activity", a.max_activity)?;
        if let Some(e) = a.fixed_effectiveness {
            unit("attackers.fixed_effectiveness", e)?;
        }
        if a.indicator_bits == 0 {
            return Err(ConfigError::invalid("attackers.indicator_bits", "need at least one bit"));
        }
        ordered("attackers.targets", a.targets_min, a.targets_max)?;

        let e = &self.employees;
        unit("employees.max_activity", e.max_activity)?;
        non_negative("employees.deviation_width", e.deviation_width)?;
        ordered("employees.colleagues", e.colleagues_min, e.colleagues_max)?;

        let d = &self.detection;
        non_negative("detection.passive_weight", d.passive_weight)?;
        non_negative("detection.spread_weight", d.spread_weight)?;
        non_negative("detection.target_weight", d.target_weight)?;
        non_negative("detection.information_weight", d.information_weight)?;
        let stability = d.stability();
        if !(stability.is_finite() && stability > 0.0) {
            return Err(ConfigError::invalid(
                "detection.stability_exponent",
                format!("10^-{} is not a usable stability constant", d.stability_exponent),
            ));
        }

        let b = &self.budget;
        unit("budget.budget_min", b.budget_min)?;
        unit("budget.budget_max", b.budget_max)?;
        if b.budget_min > b.budget_max {
            return Err(ConfigError::invalid(
                "budget",
                format!("min {} exceeds max {}", b.budget_min, b.budget_max),
            ));
        }
        if b.update_interval == 0 {
            return Err(ConfigError::invalid("budget.update_interval", "must be at least one tick"));
        }
        if !(b.drop_factor > 0.0 && b.drop_factor <= 1.0) {
            return Err(ConfigError::invalid("budget.drop_factor", "must lie in (0, 1]"));
        }

        let s = &self.sharing;
        divisor("sharing.reciprocity", s.reciprocity)?;
        divisor("sharing.trust_factor", s.trust_factor)?;
        divisor("sharing.transitivity", s.transitivity)?;
        unit("sharing.initial_trust", s.initial_trust)?;
        unit("sharing.initial_closeness", s.initial_closeness)?;
        non_negative("sharing.acceptable_freeload", s.acceptable_freeload)?;

        if self.correspondence.fails_to_end == Some(0) {
            return Err(ConfigError::invalid("correspondence.fails_to_end", "use none to retry forever"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cybsim_core::SharingPhase;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = SimConfig::from_toml_str(
            r#"
            seed = 7
            ticks = 120

            [topology]
            organizations = 4
            max_hops = 3

            [topology.departments]
            count_max = 6

            [sharing]
            reciprocity = 3.0
            phase = "before"

            [attackers]
            fixed_effectiveness = 0.8
            "#,
        )
        .expect("valid config");

        assert_eq!(config.seed, 7);
        assert_eq!(config.ticks, 120);
        assert_eq!(config.topology.organizations, 4);
        assert_eq!(config.topology.devices_max, 30);
        assert_eq!(config.topology.max_hops, 3);
        assert_eq!(
            config.topology.departments,
            Some(DepartmentConfig { count_min: 2, count_max: 6 })
        );
        assert_eq!(config.sharing.reciprocity, 3.0);
        assert_eq!(config.sharing.phase, SharingPhase::Before);
        assert_eq!(config.attackers.fixed_effectiveness, Some(0.8));
        assert_eq!(config.detection, DetectionParams::default());
    }

    #[test]
    fn test_rejects_out_of_domain_values() {
        let mut config = SimConfig::default();
        config.sharing.reciprocity = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "sharing.reciprocity", .. })
        ));

        let mut config = SimConfig::default();
        config.budget.budget_min = 0.9;
        config.budget.budget_max = 0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "budget", .. })));

        let mut config = SimConfig::default();
        config.detection.stability_exponent = 400;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "detection.stability_exponent", .. })
        ));

        let mut config = SimConfig::default();
        config.attackers.initial = 5;
        config.attackers.total = 3;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.topology.max_hops = -2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(matches!(
            SimConfig::from_toml_str("ticks = \"many\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimConfig::from_toml_file("/nonexistent/cybsim.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SimConfig::default().with_seed(99).with_ticks(10);
        let text = toml::to_string(&config).expect("serializable");
        let back = SimConfig::from_toml_str(&text).expect("parses");
        assert_eq!(back, config);
    }
}
