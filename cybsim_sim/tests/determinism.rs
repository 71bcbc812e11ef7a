//! Same seed, same trajectory.

use cybsim_sim::{ScenarioId, ScenarioRunner, SimConfig, SimWorld};

fn config(seed: u64) -> SimConfig {
    let mut config = SimConfig::default().with_seed(seed).with_ticks(100);
    config.topology.organizations = 5;
    config.topology.devices_max = 12;
    config.attackers.initial = 1;
    config.attackers.total = 3;
    config.attackers.mean_activation_gap = 25.0;
    config
}

#[test]
fn test_same_seed_same_snapshots() {
    let mut a = SimWorld::new(config(7)).unwrap();
    let mut b = SimWorld::new(config(7)).unwrap();
    assert_eq!(a.snapshot(), b.snapshot());

    for _ in 0..100 {
        a.step();
        b.step();
        assert_eq!(a.snapshot(), b.snapshot(), "diverged at tick {}", a.tick());
    }
    assert_eq!(a.metrics(), b.metrics());
    assert_eq!(a.reports(), b.reports());
}

#[test]
fn test_different_seeds_diverge() {
    let mut a = SimWorld::new(config(7)).unwrap();
    let mut b = SimWorld::new(config(8)).unwrap();
    a.run(50);
    b.run(50);
    assert_ne!(a.snapshot(), b.snapshot());
}

#[test]
fn test_verbosity_does_not_change_the_run() {
    let mut quiet = SimWorld::new(config(3)).unwrap();
    let mut loud = SimWorld::new(config(3)).unwrap().with_verbose(true);
    quiet.run(60);
    loud.run(60);
    assert_eq!(quiet.snapshot(), loud.snapshot());
}

#[test]
fn test_exports_are_reproducible() {
    let runner = ScenarioRunner::new(21).with_config(config(0)).with_ticks(40);
    let (_, first) = runner.run_with_export(ScenarioId::AttackWave, 10);
    let (_, second) = runner.run_with_export(ScenarioId::AttackWave, 10);

    assert_eq!(first.run_id, second.run_id);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
