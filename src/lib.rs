//! Rotates identity-provider passwords through a secret-store vault.
//!
//! Every member of an identity-provider group gets a secret-store item whose
//! password is regenerated on each run and then pushed back to the identity
//! provider once the store has converged on the new value.

pub mod cli;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

pub use error::{Result, RotationError};
