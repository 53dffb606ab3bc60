#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # converge
//!
//! Drives simulated cloud resources through create and delete lifecycles
//! using the `converge-reconciler` engine.
//!
//! - [`sim`]: in-memory, eventually-consistent cache control plane
//! - [`resources`]: cluster and subnet group lifecycles on top of the engine
//! - [`simulate`]: concurrent end-to-end run with a shared cancel token
//! - [`report`]: text and JSON results

pub mod cli;
pub mod error;
pub mod report;
pub mod resources;
pub mod sim;
pub mod simulate;

pub use error::{ReconcileError, Result};
