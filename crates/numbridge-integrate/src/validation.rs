#![forbid(unsafe_code)]

use numbridge_runtime::RuntimeMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EPS: f64 = f64::EPSILON;
pub const MIN_RTOL: f64 = 100.0 * EPS;

/// Absolute tolerance: one value for every component, or one per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToleranceValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ToleranceValue {
    fn any(&self, mut predicate: impl FnMut(f64) -> bool) -> bool {
        match self {
            Self::Scalar(value) => predicate(*value),
            Self::Vector(values) => values.iter().copied().any(predicate),
        }
    }

    fn len_if_vector(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => None,
            Self::Vector(values) => Some(values.len()),
        }
    }
}

impl From<f64> for ToleranceValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for ToleranceValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Vector(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToleranceWarning {
    RtolClamped { minimum: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTolerance {
    pub rtol: f64,
    pub atol: ToleranceValue,
    pub mode: RuntimeMode,
    pub warnings: Vec<ToleranceWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrateValidationError {
    #[error("`first_step` must be positive.")]
    FirstStepMustBePositive,
    #[error("`first_step` exceeds bounds.")]
    FirstStepExceedsBounds,
    #[error("`max_step` must be positive.")]
    MaxStepMustBePositive,
    #[error("`max_steps` must be positive.")]
    MaxStepsMustBePositive,
    #[error("`atol` has wrong shape: expected {expected} values, got {actual}.")]
    AtolWrongShape { expected: usize, actual: usize },
    #[error("`atol` must be positive.")]
    AtolMustBePositive,
    #[error("`{name}` must be finite.")]
    NotFinite { name: &'static str },
    #[error("`t_eval` values are not within `t_span`.")]
    TEvalOutsideSpan,
    #[error("`t_eval` is not sorted in the direction of integration.")]
    TEvalNotSorted,
}

pub fn validate_first_step(
    first_step: f64,
    t0: f64,
    t_bound: f64,
) -> Result<f64, IntegrateValidationError> {
    if !(first_step > 0.0) {
        return Err(IntegrateValidationError::FirstStepMustBePositive);
    }
    if first_step > (t_bound - t0).abs() {
        return Err(IntegrateValidationError::FirstStepExceedsBounds);
    }
    Ok(first_step)
}

pub fn validate_max_step(max_step: f64) -> Result<f64, IntegrateValidationError> {
    if !(max_step > 0.0) {
        return Err(IntegrateValidationError::MaxStepMustBePositive);
    }
    Ok(max_step)
}

pub fn validate_max_steps(max_steps: usize) -> Result<usize, IntegrateValidationError> {
    if max_steps == 0 {
        return Err(IntegrateValidationError::MaxStepsMustBePositive);
    }
    Ok(max_steps)
}

/// Check tolerances for an `n`-component system.
///
/// `rtol` below [`MIN_RTOL`] is raised to it with a warning. Non-finite
/// tolerances are refused in every mode.
pub fn validate_tol(
    rtol: f64,
    atol: ToleranceValue,
    n: usize,
    mode: RuntimeMode,
) -> Result<ValidatedTolerance, IntegrateValidationError> {
    if !rtol.is_finite() {
        return Err(IntegrateValidationError::NotFinite { name: "rtol" });
    }
    let mut warnings = Vec::new();
    let rtol = if rtol < MIN_RTOL {
        warnings.push(ToleranceWarning::RtolClamped { minimum: MIN_RTOL });
        MIN_RTOL
    } else {
        rtol
    };

    if let Some(len) = atol.len_if_vector()
        && len != n
    {
        return Err(IntegrateValidationError::AtolWrongShape {
            expected: n,
            actual: len,
        });
    }

    if atol.any(|x| !x.is_finite()) {
        return Err(IntegrateValidationError::NotFinite { name: "atol" });
    }
    if atol.any(|x| x < 0.0) {
        return Err(IntegrateValidationError::AtolMustBePositive);
    }

    Ok(ValidatedTolerance {
        rtol,
        atol,
        mode,
        warnings,
    })
}

/// `t_eval` must lie inside `t_span` and increase strictly in the
/// direction of integration.
pub fn validate_t_eval(t_eval: &[f64], t_span: (f64, f64)) -> Result<(), IntegrateValidationError> {
    let (t0, tf) = t_span;
    let (lo, hi) = (t0.min(tf), t0.max(tf));
    if t_eval.iter().any(|&t| !(t >= lo && t <= hi)) {
        return Err(IntegrateValidationError::TEvalOutsideSpan);
    }
    let forward = tf >= t0;
    let sorted = t_eval
        .windows(2)
        .all(|w| if forward { w[1] > w[0] } else { w[1] < w[0] });
    if !sorted {
        return Err(IntegrateValidationError::TEvalNotSorted);
    }
    Ok(())
}
