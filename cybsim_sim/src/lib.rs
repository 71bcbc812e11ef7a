//! cybsim harness - deterministic tick scheduling for the security dynamics engines
//!
//! This crate drives the engines in `cybsim_core` through a seeded,
//! single-threaded world and checks the result.
//!
//! # Core Principle: One Seed, One Trajectory
//!
//! All randomness comes from the `SimContext` RNG and every tick runs its
//! phases in a fixed order:
//! - **Decide**: agents choose actions from a read-only view
//! - **Commit**: held messages, correspondences, detection, incidents, budgets
//! - **Share**: the trust game, before or after commit
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (seed, ChaCha8 RNG, tick)                 │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼─────┐            ┌─────▼──────┐                     │
//! │  │ Network  │◄──────────►│ Organiz-   │◄──► TrustNetwork    │
//! │  │ + Roles  │  routing   │ ations     │     (sharing game)  │
//! │  └──────────┘            └────────────┘                     │
//! │       ▲                        ▲                            │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │        InvariantOracle           │                       │
//! │  └──────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cybsim_sim::{SimConfig, SimWorld};
//!
//! let config = SimConfig::default().with_seed(42).with_ticks(200);
//! let mut world = SimWorld::new(config)?;
//! world.run_to_end();
//! println!("{} devices compromised", world.total_compromised());
//! # Ok::<(), cybsim_sim::ConfigError>(())
//! ```

pub mod config;
pub mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod snapshot;
pub mod world;

pub use config::SimConfig;
pub use error::ConfigError;
pub use exporter::SimExport;
pub use oracle::{InvariantOracle, Violation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use snapshot::{OrganizationReport, WorldSnapshot};
pub use world::{SimWorld, WorldMetrics};
