//! Result alias and logging combinators.

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Combinators for [`Result`] that report errors without unwrapping.
pub trait ResultExt<T> {
    /// Log the error at warn level, tagged with `source`, and pass the result through.
    #[must_use]
    fn warn_on_error(self, source: &str) -> Self;

    /// Inspect the error without consuming the Result.
    #[must_use]
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn warn_on_error(self, source: &str) -> Self {
        self.inspect_error(|e| tracing::warn!(source, error = %e, "Configuration rejected"))
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_on_error_passes_through() {
        let ok: Result<u32> = Ok(7);
        assert!(matches!(ok.warn_on_error("inline"), Ok(7)));

        let err: Result<u32> = Err(Error::invalid_config("nope"));
        assert!(err.warn_on_error("inline").is_err_and(|e| e.is_invalid_config()));
    }

    #[test]
    fn test_inspect_error_sees_error() {
        let mut seen = false;
        let err: Result<u32> = Err(Error::invalid_config("nope"));
        let _ = err.inspect_error(|_| seen = true);
        assert!(seen);
    }

    #[test]
    fn test_inspect_error_skips_ok() {
        let mut seen = false;
        let ok: Result<u32> = Ok(1);
        let _ = ok.inspect_error(|_| seen = true);
        assert!(!seen);
    }
}
