//! Read-only views of the world for exporters and dashboards.

use cybsim_env::{Address, Tick};
use serde::{Deserialize, Serialize};

/// State of one link this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub from: Address,
    pub to: Address,
    pub active: bool,
    pub malicious: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSnapshot {
    pub id: usize,

    pub security_budget: f64,

    pub freeloading_ratio: f64,

    pub avg_incident_duration: f64,

    pub percent_compromised: f64,

    pub compromised_devices: usize,

    /// Attackers with an open incident
    pub aware_of: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackerSnapshot {
    pub id: usize,

    pub address: Address,

    pub effectiveness: f64,

    pub activated_at: Tick,

    /// Devices currently controlled
    pub captured: usize,
}

/// Everything a frame of the dashboard shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: Tick,

    pub total_compromised: usize,

    pub edges: Vec<EdgeSnapshot>,

    pub organizations: Vec<OrganizationSnapshot>,

    pub attackers: Vec<AttackerSnapshot>,

    /// Row-major closeness matrix
    pub closeness: Vec<Vec<f64>>,

    /// Row-major trust matrix, `trust[i][j]` is i's trust in j
    pub trust: Vec<Vec<f64>>,
}

impl WorldSnapshot {
    pub fn active_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.active).count()
    }

    pub fn malicious_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.malicious).count()
    }
}

/// Per-organization summary after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationReport {
    pub id: usize,

    pub avg_incident_time: f64,

    pub free_loading_ratio: f64,

    pub avg_security: f64,

    pub avg_compromised_per_step: f64,
}
