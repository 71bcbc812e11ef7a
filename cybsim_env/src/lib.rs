//! cybsim Environment Abstraction Layer
//!
//! This crate provides the pieces every cybsim engine shares but none of them
//! owns: the hierarchical [`Address`] space and the explicit [`SimContext`]
//! that carries the seeded random source and the tick clock.
//!
//! # Core Concept: One Source of Entropy
//!
//! A run is fully determined by its configuration and a 64-bit seed:
//! - **Time**: a discrete tick counter, advanced only by the scheduler
//! - **Randomness**: a single `ChaCha8Rng`, threaded through every call
//!
//! There is no ambient global state. Engines borrow the context (or its RNG)
//! for the duration of a call and hand it back.
//!
//! # Example
//!
//! ```
//! use cybsim_env::{Address, SimContext};
//!
//! let mut ctx = SimContext::new(42);
//! let device: Address = "3.1".parse().unwrap();
//! assert!(device.is_subnetwork_of(&"3.7".parse().unwrap()));
//!
//! ctx.advance_tick();
//! assert_eq!(ctx.tick(), 1);
//! ```

mod context;
mod types;
mod error;

pub use context::SimContext;
pub use types::{Address, Tick};
pub use error::EnvError;
