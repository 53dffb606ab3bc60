//! Permanent vs. transient classification of operation errors.
//!
//! The engine knows nothing about provider error codes. Each call site hands
//! the retrier something implementing [`Classify`]: a closure, one of the
//! helpers below, or a [`CodeClassifier`] listing the codes worth retrying.

use std::collections::BTreeSet;

use crate::types::ErrorClass;

/// Decide whether an operation error is worth retrying.
pub trait Classify<E> {
    fn classify(&self, error: &E) -> ErrorClass;
}

impl<E, F> Classify<E> for F
where
    F: Fn(&E) -> ErrorClass,
{
    fn classify(&self, error: &E) -> ErrorClass {
        self(error)
    }
}

/// Errors that carry a structured provider error code
/// (e.g. `DependencyViolation`, `Throttling`).
pub trait ProviderErrorCode {
    /// The code, or `None` for transport or client-side failures.
    fn code(&self) -> Option<&str>;
}

/// Classifies by provider error code: codes in the set are transient,
/// everything else is permanent, including errors without a code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeClassifier {
    transient: BTreeSet<String>,
}

impl CodeClassifier {
    /// Build a classifier retrying exactly the given codes.
    pub fn transient<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Add another transient code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.transient.insert(code.into());
        self
    }

    #[must_use]
    pub fn is_transient_code(&self, code: &str) -> bool {
        self.transient.contains(code)
    }
}

impl<E: ProviderErrorCode> Classify<E> for CodeClassifier {
    fn classify(&self, error: &E) -> ErrorClass {
        match error.code() {
            Some(code) if self.is_transient_code(code) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Retry every error until the deadline.
pub const fn always_transient<E>(_: &E) -> ErrorClass {
    ErrorClass::Transient
}

/// Never retry; the first error is final.
pub const fn always_permanent<E>(_: &E) -> ErrorClass {
    ErrorClass::Permanent
}
