//! Error types for the cybsim engines.

use crate::ids::NodeId;
use cybsim_env::{Address, EnvError};
use thiserror::Error;

/// Routing and topology errors.
///
/// None of these stop a run: the scheduler counts the affected message as
/// dropped and carries on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    /// Destination absent from a routing table or not resolvable to a device
    #[error("Routing failure at {at}: no route to {destination}")]
    RoutingFailure {
        at: NodeId,
        destination: Address,
    },
    
    /// Node id does not exist in the arena or has the wrong kind
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    
    /// Underlying address error
    #[error(transparent)]
    Address(#[from] EnvError),
}

impl RoutingError {
    /// Creates a routing failure.
    pub fn no_route(at: NodeId, destination: &Address) -> Self {
        Self::RoutingFailure {
            at,
            destination: destination.clone(),
        }
    }
}
