//! Core types shared by the converge crates.
//!
//! - [`Error`] / [`Result`]: the error type for configuration and validation
//!   failures. Engine outcomes (timeouts, unexpected states, exhausted
//!   retries) live in `converge-reconciler`, since they are generic over the
//!   caller's own error type.
//! - [`ResultExt`]: logging combinators for configuration results.
//! - [`config`]: TOML-backed timing configuration for waits and retries.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{ConvergeConfig, RetryTimingConfig, WaitTimingConfig};
pub use error::Error;
pub use result::{Result, ResultExt};
