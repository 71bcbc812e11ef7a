//! Scenario runner - executes named scenarios under the invariant oracle.

use crate::config::SimConfig;
use crate::exporter::SimExport;
use crate::oracle::InvariantOracle;
use crate::scenarios::ScenarioId;
use crate::snapshot::OrganizationReport;
use crate::world::SimWorld;

use cybsim_core::network::SubnetworkKind;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the run kept every invariant and met the scenario's expectation
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Compromised devices at the end
    pub final_compromised: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Per-organization summaries
    pub reports: Vec<OrganizationReport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub messages_sent: u64,

    pub delivered: u64,

    pub dropped: u64,

    pub held: u64,

    pub correspondences_opened: u64,

    pub correspondences_succeeded: u64,

    pub compromises: u64,

    pub detections: u64,

    pub peak_compromised: usize,

    pub cooperations: u64,

    pub defections: u64,

    /// Mean off-diagonal closeness at the end
    pub mean_closeness: f64,

    /// Mean security budget at the end
    pub mean_budget: f64,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld) -> Self {
        let m = world.metrics();
        let orgs = world.organizations();
        let mean_budget = if orgs.is_empty() {
            0.0
        } else {
            orgs.iter().map(|o| o.security_budget).sum::<f64>() / orgs.len() as f64
        };
        Self {
            messages_sent: m.messages_sent,
            delivered: m.delivered,
            dropped: m.dropped(),
            held: m.held,
            correspondences_opened: m.correspondences_opened,
            correspondences_succeeded: m.correspondences_succeeded,
            compromises: m.compromises,
            detections: m.detections,
            peak_compromised: m.peak_compromised,
            cooperations: m.cooperations,
            defections: m.defections,
            mean_closeness: world.trust().mean_closeness(),
            mean_budget,
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Overrides the configured run length
    ticks: Option<u64>,

    /// Configuration the scenario presets are layered on
    base: SimConfig,

    verbose: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: None,
            base: SimConfig::default(),
            verbose: false,
        }
    }

    /// Sets the run length.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Sets the base configuration.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.base = config;
        self
    }

    /// Enables per-message traces.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Effective configuration for `scenario`.
    pub fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let config = scenario.apply(self.base.clone()).with_seed(self.seed);
        match self.ticks {
            Some(ticks) => config.with_ticks(ticks),
            None => config,
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario, keeping a snapshot every `interval` ticks.
    pub fn run_with_export(&self, scenario: ScenarioId, interval: u64) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, Some(interval.max(1)));
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export_interval: Option<u64>) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let config = self.config_for(scenario);
        let ticks = config.ticks;
        let mut world = match SimWorld::new(config) {
            Ok(world) => world.with_verbose(self.verbose),
            Err(e) => {
                warn!("Scenario {} rejected its configuration: {}", scenario.name(), e);
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_compromised: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                    reports: Vec::new(),
                };
                return (result, None);
            }
        };

        let mut export = export_interval.map(|_| {
            let mut export = SimExport::new(scenario.name(), self.seed);
            export.add_frame(world.snapshot());
            export
        });
        let mut oracle = InvariantOracle::new();

        for _ in 0..ticks {
            let tick = world.step();
            for violation in oracle.check(&world) {
                warn!("{}", violation);
            }

            if let (Some(export), Some(interval)) = (export.as_mut(), export_interval) {
                if tick % interval == 0 || tick == ticks {
                    export.add_frame(world.snapshot());
                }
            }

            if tick % 100 == 0 {
                debug!(
                    "  t={} | compromised={} | detections={} | mean closeness={:.3}",
                    tick,
                    world.total_compromised(),
                    world.metrics().detections,
                    world.trust().mean_closeness()
                );
            }
        }

        let failure_reason = oracle
            .violations()
            .first()
            .map(|v| v.to_string())
            .or_else(|| Self::check_expectation(scenario, &world));
        let passed = failure_reason.is_none();
        let metrics = ScenarioMetrics::collect(&world);
        let reports = world.reports();

        if passed {
            info!(
                "✓ {} complete: {} ticks, {} compromises, {} detections, peak compromised {}",
                scenario.name(),
                world.tick(),
                metrics.compromises,
                metrics.detections,
                metrics.peak_compromised
            );
        }

        if let Some(export) = export.as_mut() {
            export.finalize(passed, failure_reason.clone(), reports.clone());
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick(),
            final_compromised: world.total_compromised(),
            failure_reason,
            metrics,
            reports,
        };
        (result, export)
    }

    /// Scenario-specific expectation on the finished world.
    fn check_expectation(scenario: ScenarioId, world: &SimWorld) -> Option<String> {
        let config = world.config();
        match scenario {
            ScenarioId::Baseline | ScenarioId::Freeloaders => None,
            ScenarioId::Isolated => {
                let moved = world.organizations().iter().any(|o| o.info_in > 0.0 || o.info_out > 0.0);
                if world.metrics().sharing_interactions > 0 || moved {
                    Some("information moved with sharing disabled".to_string())
                } else {
                    None
                }
            }
            ScenarioId::HighTrust => {
                if world.tick() > 0 && world.metrics().sharing_interactions == 0 {
                    Some("no organizations met despite closeness 0.9".to_string())
                } else {
                    None
                }
            }
            ScenarioId::FixedEffectiveness => {
                let expected = config.attackers.fixed_effectiveness.unwrap_or_default();
                world
                    .threats()
                    .values()
                    .find(|t| (t.effectiveness - expected).abs() > 1e-12)
                    .map(|t| format!("{} has effectiveness {} instead of {}", t.id, t.effectiveness, expected))
            }
            ScenarioId::AttackWave => {
                let seen = world.threats().len() + world.pending_activations().len();
                if seen != config.attackers.total {
                    Some(format!("{} attackers accounted for, expected {}", seen, config.attackers.total))
                } else {
                    None
                }
            }
            ScenarioId::Departments => {
                let network = world.network();
                let flat = world.organizations().iter().find(|o| {
                    network.subnetwork(o.node).map_or(true, |sub| {
                        !sub.children.iter().all(|&c| {
                            matches!(network.subnetwork(c).map(|s| s.kind), Some(SubnetworkKind::Department(_)))
                        })
                    })
                });
                flat.map(|o| format!("{} is not split into departments", o.id))
            }
            ScenarioId::Congested => {
                let limit = config.correspondence.fails_to_end.unwrap_or(u32::MAX);
                world
                    .correspondences()
                    .find(|c| c.failure_count() >= limit)
                    .map(|c| format!("{} still open after {} failures", c.id, c.failure_count()))
            }
        }
    }
}
