#![deny(unsafe_code)]

use std::ffi::{CStr, c_int};

use numbridge_native::msolver::{
    NATIVE_ADAMS, NATIVE_BDF, NATIVE_FUNCTIONAL, NATIVE_NEWTON, NATIVE_NORMAL, NATIVE_ONE_STEP,
};
use numbridge_native::{NativeStats, native_msolver_flag_name};
use serde::{Deserialize, Serialize};

/// Linear multistep family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultistepMethod {
    /// Non-stiff problems.
    Adams,
    /// Stiff problems.
    #[default]
    Bdf,
}

impl MultistepMethod {
    pub(crate) const fn raw(self) -> c_int {
        match self {
            Self::Adams => NATIVE_ADAMS,
            Self::Bdf => NATIVE_BDF,
        }
    }
}

/// Nonlinear corrector iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationStrategy {
    /// Fixed-point iteration; needs no matrix.
    Functional,
    /// Modified Newton with a dense linear solver.
    #[default]
    Newton,
}

impl IterationStrategy {
    pub(crate) const fn raw(self) -> c_int {
        match self {
            Self::Functional => NATIVE_FUNCTIONAL,
            Self::Newton => NATIVE_NEWTON,
        }
    }

    #[must_use]
    pub const fn needs_linear_solver(self) -> bool {
        matches!(self, Self::Newton)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum Task {
    Normal,
    OneStep,
}

impl Task {
    pub(crate) const fn raw(self) -> c_int {
        match self {
            Self::Normal => NATIVE_NORMAL,
            Self::OneStep => NATIVE_ONE_STEP,
        }
    }
}

/// Lifecycle of an [`Integrator`](crate::Integrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverState {
    Constructed,
    Prepared,
    Stepping,
    /// Terminal: after an unrecoverable solver failure or `finish`.
    Finished,
}

/// Work counters of one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegratorStats {
    pub steps: u64,
    pub rhs_evals: u64,
    pub jac_evals: u64,
    pub lin_setups: u64,
    pub nonlin_iters: u64,
    pub conv_fails: u64,
    pub err_test_fails: u64,
    /// Calls that reached the user's right-hand side.
    pub rhs_callbacks: u64,
    /// Calls that reached the user's Jacobian.
    pub jac_callbacks: u64,
}

impl IntegratorStats {
    pub(crate) fn from_native(native: &NativeStats, rhs_callbacks: u64, jac_callbacks: u64) -> Self {
        let count = |v: i64| u64::try_from(v).unwrap_or(0);
        Self {
            steps: count(native.steps),
            rhs_evals: count(native.rhs_evals),
            jac_evals: count(native.jac_evals),
            lin_setups: count(native.lin_setups),
            nonlin_iters: count(native.nonlin_iters),
            conv_fails: count(native.conv_fails),
            err_test_fails: count(native.err_test_fails),
            rhs_callbacks,
            jac_callbacks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverEventKind {
    Constructed,
    Prepared,
    Advance,
    Step,
    Interpolate,
    Failed,
    Finished,
}

/// One entry of an integrator's evidence ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverEvent {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub kind: SolverEventKind,
    pub state: DriverState,
    pub t: f64,
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Symbolic name of a native solver status.
#[must_use]
pub fn flag_name(status: i32) -> String {
    let ptr = native_msolver_flag_name(status);
    if ptr.is_null() {
        return "NONE".to_owned();
    }
    // SAFETY: the library returns static NUL-terminated names.
    #[allow(unsafe_code)]
    let name = unsafe { CStr::from_ptr(ptr) };
    name.to_string_lossy().into_owned()
}
