//! The status-probe abstraction.

use crate::types::Observation;

/// A side-effect-free status check against a remote resource.
///
/// Adapters build one per wait, capturing their API client and the resource
/// identifier. Any `FnMut() -> Result<Observation<R>, E>` closure is a
/// `StateQuery`.
///
/// ```
/// use converge_reconciler::{Observation, StateQuery};
///
/// let mut calls = 0;
/// let mut probe = || -> Result<Observation<()>, std::io::Error> {
///     calls += 1;
///     Ok(Observation::present((), "available"))
/// };
/// assert!(matches!(probe.probe(), Ok(Observation::Present { .. })));
/// assert_eq!(calls, 1);
/// ```
pub trait StateQuery {
    /// Whatever the remote API returned, handed back on convergence.
    type Resource;
    /// Transport, auth, or decoding failure of the status call itself.
    type Error;

    /// Query the current state once.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error when the status call itself fails. A
    /// missing resource is not an error; report it as [`Observation::Absent`].
    fn probe(&mut self) -> Result<Observation<Self::Resource>, Self::Error>;
}

impl<F, R, E> StateQuery for F
where
    F: FnMut() -> Result<Observation<R>, E>,
{
    type Resource = R;
    type Error = E;

    fn probe(&mut self) -> Result<Observation<R>, E> {
        self()
    }
}
