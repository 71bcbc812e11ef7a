//! Error types for the cybsim environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Address text or arithmetic operand could not form a valid address
    #[error("Invalid address operand: {0}")]
    InvalidAddressOperand(String),
    
    /// A context parameter is out of its domain
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EnvError {
    /// Creates an invalid address operand error.
    pub fn address(msg: impl Into<String>) -> Self {
        Self::InvalidAddressOperand(msg.into())
    }
    
    /// Creates an invalid parameter error.
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
