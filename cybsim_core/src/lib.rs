//! cybsim core - engines for organizational cyber-security dynamics
//!
//! This crate holds the simulation engines, free of any scheduling policy:
//! 1. **Topology**: random star-based local graphs and frozen routing tables
//! 2. **Network / Routing**: nested subnetworks and hop-by-hop forwarding
//! 3. **Correspondence**: scripted multi-step exchanges between two devices
//! 4. **Detection / Organizations**: compromise, detection, incidents, budgets
//! 5. **Sharing**: the repeated trust and information-sharing game
//!
//! Every random decision takes an explicit `Rng`, so the harness controls
//! the one seeded stream a run draws from.

pub mod agent;
pub mod correspondence;
pub mod detection;
pub mod error;
pub mod ids;
pub mod network;
pub mod organization;
pub mod routing;
pub mod sharing;
pub mod topology;

// Re-export key types for convenience
pub use agent::{decide, Action, Attacker, Employee, PopulationFactory, Role, WorldView};
pub use correspondence::{Correspondence, Intention, Outcome, StepAction, StepCode};
pub use detection::{DetectionInput, DetectionMode, DetectionParams, InfectionState, Threat};
pub use error::RoutingError;
pub use ids::{AttackerId, CorrespondenceId, NodeId, OrgId};
pub use network::{Network, NetworkBuilder, OrganizationLayout, RoleFactory};
pub use organization::{BudgetParams, IndicatorBits, IncidentClosure, Organization};
pub use routing::{DropReason, Message, Payload, RouteOutcome};
pub use sharing::{play_round, RoundReport, SharingParams, SharingPhase, TrustNetwork};
pub use topology::{LocalGraph, RoutingTable};
