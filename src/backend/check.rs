//! Construction-time error policy.
//!
//! With the `hard-stop` feature every failed native call panics at its call site so
//! the failure is caught where it happened. Without it the error is logged and
//! propagated unchanged; nothing in the crate retries.

use crate::backend::traits::BackendResult;

/// Applies the hard-stop policy to `result`.
#[track_caller]
pub fn check_result<T>(result: BackendResult<T>, operation: &str) -> BackendResult<T> {
    if let Err(error) = &result {
        if cfg!(feature = "hard-stop") {
            panic!("{operation} failed: {error}");
        }
        log::error!("{operation} failed: {error}");
    }
    result
}

#[cfg(all(test, not(feature = "hard-stop")))]
mod tests {
    use super::*;
    use crate::backend::traits::BackendError;

    #[test]
    fn test_check_result_propagates_error() {
        let result: BackendResult<()> = Err(BackendError::OutOfDeviceMemory);
        assert_eq!(
            check_result(result, "allocate"),
            Err(BackendError::OutOfDeviceMemory)
        );
    }

    #[test]
    fn test_check_result_passes_value() {
        assert_eq!(check_result(Ok(7), "create"), Ok(7));
    }
}
