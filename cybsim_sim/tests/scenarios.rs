//! Every named scenario keeps the invariants on small worlds.

use cybsim_sim::{InvariantOracle, ScenarioId, ScenarioRunner, SimConfig, SimWorld};

fn small_base() -> SimConfig {
    let mut config = SimConfig::default();
    config.topology.organizations = 4;
    config.topology.devices_min = 4;
    config.topology.devices_max = 10;
    config
}

#[test]
fn test_all_scenarios_pass() {
    for seed in [1, 2] {
        let runner = ScenarioRunner::new(seed).with_config(small_base()).with_ticks(120);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} seed={} failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
            assert_eq!(result.total_ticks, 120);
        }
    }
}

#[test]
fn test_isolated_organizations_share_nothing() {
    let runner = ScenarioRunner::new(4).with_config(small_base()).with_ticks(80);
    let result = runner.run(ScenarioId::Isolated);
    assert_eq!(result.metrics.cooperations, 0);
    assert!(result.reports.iter().all(|r| r.free_loading_ratio == 0.0));
}

#[test]
fn test_high_trust_starts_cooperating() {
    let runner = ScenarioRunner::new(5).with_config(small_base()).with_ticks(30);
    let result = runner.run(ScenarioId::HighTrust);
    assert!(result.passed);
    assert!(result.metrics.cooperations > 0);
}

#[test]
fn test_congestion_drops_or_holds_messages() {
    let mut base = small_base();
    base.employees.max_activity = 1.0;
    let runner = ScenarioRunner::new(6).with_config(base).with_ticks(60);
    let result = runner.run(ScenarioId::Congested);
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.held + result.metrics.dropped > 0);
}

#[test]
fn test_aggressive_attackers_keep_invariants() {
    let mut config = small_base().with_seed(12).with_ticks(150);
    config.attackers.max_activity = 1.0;
    config.attackers.fixed_effectiveness = Some(1.0);
    config.attackers.initial = 3;
    config.attackers.total = 3;
    config.budget.budget_max = 0.1;

    let mut world = SimWorld::new(config).unwrap();
    let mut oracle = InvariantOracle::new();
    for _ in 0..150 {
        world.step();
        oracle.check(&world);
    }
    assert!(oracle.is_clean(), "{:?}", oracle.violations());
    assert!(world.metrics().correspondences_opened > 0);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_any_seed_keeps_invariants(seed in 1u64..10_000, reciprocity in 1.0f64..4.0) {
            let mut config = small_base().with_seed(seed).with_ticks(40);
            config.sharing.reciprocity = reciprocity;

            let mut world = SimWorld::new(config).unwrap();
            let mut oracle = InvariantOracle::new();
            for _ in 0..40 {
                world.step();
                oracle.check(&world);
            }
            prop_assert!(oracle.is_clean(), "{:?}", oracle.violations());
            prop_assert_eq!(world.tick(), 40);
        }
    }
}
