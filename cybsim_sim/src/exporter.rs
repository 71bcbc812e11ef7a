//! JSON exporter for the dashboard.
//!
//! Exports world snapshots and final reports as one JSON document.

use crate::snapshot::{OrganizationReport, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Run id derived from the seed, so the same run always exports under the same id.
pub fn run_id(seed: u64) -> Uuid {
    let hi = seed.to_be_bytes();
    let lo = seed.wrapping_mul(0x9e3779b97f4a7c15).to_be_bytes();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&hi);
    bytes[8..].copy_from_slice(&lo);
    Uuid::from_bytes(bytes)
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub run_id: Uuid,

    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Tick of the last frame
    pub ticks: u64,

    /// Snapshots, one per export interval
    pub frames: Vec<WorldSnapshot>,

    /// Per-organization summaries after the run
    pub reports: Vec<OrganizationReport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            run_id: run_id(seed),
            scenario: scenario.to_string(),
            seed,
            ticks: 0,
            frames: Vec::new(),
            reports: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: WorldSnapshot) {
        self.ticks = frame.tick;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, reports: Vec<OrganizationReport>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.reports = reports;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_deterministic() {
        assert_eq!(run_id(42), run_id(42));
        assert_ne!(run_id(42), run_id(43));
    }

    #[test]
    fn test_export_tracks_last_tick() {
        let mut export = SimExport::new("baseline", 7);
        for tick in [10, 20] {
            export.add_frame(WorldSnapshot {
                tick,
                total_compromised: 0,
                edges: Vec::new(),
                organizations: Vec::new(),
                attackers: Vec::new(),
                closeness: Vec::new(),
                trust: Vec::new(),
            });
        }
        export.finalize(true, None, Vec::new());
        assert_eq!(export.ticks, 20);
        assert_eq!(export.frames.len(), 2);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["scenario"], "baseline");
        assert!(json.get("failure_reason").is_none());
    }
}
