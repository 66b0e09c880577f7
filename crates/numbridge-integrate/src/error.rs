#![forbid(unsafe_code)]

use numbridge_dense::DenseError;
use thiserror::Error;

use crate::callback::CallbackError;
use crate::validation::IntegrateValidationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrateError {
    #[error(transparent)]
    Validation(#[from] IntegrateValidationError),
    #[error(transparent)]
    Dense(#[from] DenseError),
    #[error("shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("the state vector is empty")]
    EmptyState,
    #[error("allocation failed: {what}")]
    OutOfMemory { what: &'static str },
    #[error("{operation} failed with {name} ({status}){}", detail_suffix(.detail))]
    Solver {
        operation: &'static str,
        status: i32,
        name: String,
        detail: Option<String>,
    },
    #[error("{operation} stopped on a callback failure ({status}): {source}")]
    Callback {
        operation: &'static str,
        status: i32,
        source: CallbackError,
    },
    #[error("a callback panicked: {message}")]
    CallbackPanicked { message: String },
    #[error("the integrator has finished; no further {operation} is possible")]
    Finished { operation: &'static str },
    #[error("{operation} is only possible before the integrator is prepared")]
    AlreadyPrepared { operation: &'static str },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

impl IntegrateError {
    /// Native status code behind this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<i32> {
        match self {
            Self::Solver { status, .. } | Self::Callback { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_error_message_carries_the_library_detail() {
        let err = IntegrateError::Solver {
            operation: "interpolation",
            status: -25,
            name: "BAD_T".to_owned(),
            detail: Some("output range error:t is outside. see[x.rs:1]".to_owned()),
        };
        assert_eq!(
            err.to_string(),
            "interpolation failed with BAD_T (-25): output range error:t is outside. see[x.rs:1]"
        );
        assert_eq!(err.status(), Some(-25));
    }

    #[test]
    fn solver_error_without_detail() {
        let err = IntegrateError::Solver {
            operation: "solve",
            status: -1,
            name: "TOO_MUCH_WORK".to_owned(),
            detail: None,
        };
        assert_eq!(err.to_string(), "solve failed with TOO_MUCH_WORK (-1)");
    }

    #[test]
    fn validation_errors_convert() {
        let err: IntegrateError = IntegrateValidationError::MaxStepMustBePositive.into();
        assert_eq!(err.to_string(), "`max_step` must be positive.");
        assert_eq!(err.status(), None);
    }
}
