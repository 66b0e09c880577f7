//! Right-hand-side and Jacobian trampolines.
//!
//! The native solver calls back through plain `extern "C"` functions with an
//! opaque `user_data` pointer. That pointer is a boxed [`CallbackContext`]
//! whose first field is a fixed tag, checked before anything else is read.
//! Closures return [`CallbackError`] to ask for a retry (`+1`) or to stop
//! the solver (`-1`). Panics never cross the boundary: they are caught,
//! kept, and reported once control is back in Rust.

use std::any::Any;
use std::ffi::{c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

use nalgebra::{DMatrixViewMut, DVectorView, DVectorViewMut};
use numbridge_native::{DenseContent, MatrixHandle, NVector, Real};
use numbridge_runtime::RuntimeMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nvector::{slice_mut_of, slice_of};

/// Failure reported by a user callback.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallbackError {
    /// The solver should retry with a smaller step.
    #[error("recoverable: {0}")]
    Recoverable(String),
    /// The solver should stop.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl CallbackError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable(message.into())
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Unrecoverable(message.into())
    }

    /// Status returned to the native solver.
    #[must_use]
    pub const fn code(&self) -> c_int {
        match self {
            Self::Recoverable(_) => 1,
            Self::Unrecoverable(_) => -1,
        }
    }
}

pub type CallbackResult = Result<(), CallbackError>;

/// `f(t, y, ydot)`: write the derivative of `y` at `t` into `ydot`.
pub(crate) type RhsBox<'f> =
    Box<dyn FnMut(f64, DVectorView<'_, f64>, DVectorViewMut<'_, f64>) -> CallbackResult + 'f>;

pub(crate) fn rhs_box<'f, F>(f: F) -> RhsBox<'f>
where
    F: FnMut(f64, DVectorView<'_, f64>, DVectorViewMut<'_, f64>) -> CallbackResult + 'f,
{
    Box::new(f)
}

type JacBox<'f> = Box<
    dyn FnMut(f64, DVectorView<'_, f64>, DVectorView<'_, f64>, DMatrixViewMut<'_, f64>) -> CallbackResult
        + 'f,
>;

/// Analytic Jacobian `∂f/∂y` of an `dim`-component right-hand side.
///
/// The closure receives `t`, `y`, `f(t, y)` and a zeroed `dim x dim`
/// column-major matrix to fill.
pub struct Jacobian<'f> {
    dim: usize,
    f: JacBox<'f>,
}

impl<'f> Jacobian<'f> {
    pub fn new<F>(dim: usize, f: F) -> Self
    where
        F: FnMut(f64, DVectorView<'_, f64>, DVectorView<'_, f64>, DMatrixViewMut<'_, f64>) -> CallbackResult
            + 'f,
    {
        Self {
            dim,
            f: Box::new(f),
        }
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }
}

impl std::fmt::Debug for Jacobian<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jacobian")
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

/// Why the last callback refused to continue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallbackFailure {
    Error(CallbackError),
    Panicked(String),
    NonFiniteJacobian { row: usize, col: usize },
    AliasedArguments,
}

pub(crate) const CONTEXT_TAG: u64 = 0x6e62_7269_6467_6521;

#[repr(C)]
pub(crate) struct CallbackContext<'f> {
    tag: u64,
    rhs: RhsBox<'f>,
    jacobian: Option<Jacobian<'f>>,
    mode: RuntimeMode,
    failure: Option<CallbackFailure>,
    rhs_calls: u64,
    jac_calls: u64,
}

impl<'f> CallbackContext<'f> {
    pub(crate) fn new(rhs: RhsBox<'f>, jacobian: Option<Jacobian<'f>>, mode: RuntimeMode) -> Self {
        Self {
            tag: CONTEXT_TAG,
            rhs,
            jacobian,
            mode,
            failure: None,
            rhs_calls: 0,
            jac_calls: 0,
        }
    }

    pub(crate) fn has_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }

    pub(crate) fn set_jacobian(&mut self, jacobian: Jacobian<'f>) {
        self.jacobian = Some(jacobian);
    }

    pub(crate) fn take_failure(&mut self) -> Option<CallbackFailure> {
        self.failure.take()
    }

    pub(crate) const fn rhs_calls(&self) -> u64 {
        self.rhs_calls
    }

    pub(crate) const fn jac_calls(&self) -> u64 {
        self.jac_calls
    }

    /// Opaque pointer handed to the native solver.
    pub(crate) fn as_user_data(&mut self) -> *mut c_void {
        (self as *mut Self).cast()
    }

    fn fail(&mut self, failure: CallbackFailure) -> c_int {
        let code = match &failure {
            CallbackFailure::Error(e) => e.code(),
            _ => -1,
        };
        // Only failures that stop the solver are surfaced afterwards.
        if code < 0 {
            self.failure = Some(failure);
        }
        code
    }
}

/// Recover the context behind `user_data`, or `None` when the pointer is
/// null or does not start with [`CONTEXT_TAG`].
unsafe fn context<'a>(user_data: *mut c_void) -> Option<&'a mut CallbackContext<'a>> {
    if user_data.is_null() || !user_data.cast::<u64>().is_aligned() {
        return None;
    }
    // SAFETY: non-null and aligned; every context starts with its tag.
    if unsafe { user_data.cast::<u64>().read() } != CONTEXT_TAG {
        log::warn!("callback user data does not carry the context tag");
        return None;
    }
    Some(unsafe { &mut *user_data.cast::<CallbackContext<'a>>() })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn settle(ctx: &mut CallbackContext<'_>, outcome: std::thread::Result<CallbackResult>) -> c_int {
    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => ctx.fail(CallbackFailure::Error(e)),
        Err(payload) => ctx.fail(CallbackFailure::Panicked(panic_message(payload))),
    }
}

/// Right-hand-side trampoline registered with the native solver.
///
/// # Safety
///
/// `y` and `ydot` must be adapter vectors and `user_data` null or a pointer
/// the solver received from the driver.
pub(crate) unsafe extern "C" fn rhs_trampoline(
    t: Real,
    y: NVector,
    ydot: NVector,
    user_data: *mut c_void,
) -> c_int {
    let Some(ctx) = (unsafe { context(user_data) }) else {
        return -1;
    };
    if y.is_null() || ydot.is_null() || std::ptr::eq(y, ydot) {
        return ctx.fail(CallbackFailure::AliasedArguments);
    }
    ctx.rhs_calls += 1;
    // SAFETY: distinct vectors; the solver does not touch them during the call.
    let (ys, dys) = unsafe { (slice_of(y), slice_mut_of(ydot)) };
    let n = dys.len();
    let yv = DVectorView::from_slice(ys, ys.len());
    let dyv = DVectorViewMut::from_slice(dys, n);
    let outcome = catch_unwind(AssertUnwindSafe(|| (ctx.rhs)(t, yv, dyv)));
    settle(ctx, outcome)
}

/// Jacobian trampoline registered with the native solver.
///
/// # Safety
///
/// `y` and `fy` must be adapter vectors, `jac` a dense handle whose column
/// table is consistent, and `user_data` as for [`rhs_trampoline`].
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn jac_trampoline(
    t: Real,
    y: NVector,
    fy: NVector,
    jac: MatrixHandle,
    user_data: *mut c_void,
    _tmp1: NVector,
    _tmp2: NVector,
    _tmp3: NVector,
) -> c_int {
    let Some(ctx) = (unsafe { context(user_data) }) else {
        return -1;
    };
    if y.is_null() || fy.is_null() || jac.is_null() {
        return ctx.fail(CallbackFailure::AliasedArguments);
    }
    let mode = ctx.mode;
    let Some(jacobian) = ctx.jacobian.as_mut() else {
        return -1;
    };
    ctx.jac_calls += 1;
    // SAFETY: `jac` is a dense handle; columns are contiguous from `data`.
    let content = unsafe { &*(*jac).content.cast::<DenseContent>() };
    let (rows, cols) = (content.rows as usize, content.cols as usize);
    let entries: &mut [f64] = if rows * cols == 0 || content.data.is_null() {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(content.data, rows * cols) }
    };
    let (ys, fys) = unsafe { (slice_of(y), slice_of(fy)) };
    let yv = DVectorView::from_slice(ys, ys.len());
    let fyv = DVectorView::from_slice(fys, fys.len());
    let jv = DMatrixViewMut::from_slice(&mut *entries, rows, cols);
    let outcome = catch_unwind(AssertUnwindSafe(|| (jacobian.f)(t, yv, fyv, jv)));
    let code = settle(ctx, outcome);
    if code != 0 || !mode.is_hardened() {
        return code;
    }
    match entries.iter().position(|v| !v.is_finite()) {
        Some(k) if rows > 0 => ctx.fail(CallbackFailure::NonFiniteJacobian {
            row: k % rows,
            col: k / rows,
        }),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DenseMatrixAdapter, VectorAdapter};

    fn context_with<'f>(rhs: RhsBox<'f>, jacobian: Option<Jacobian<'f>>, mode: RuntimeMode) -> Box<CallbackContext<'f>> {
        Box::new(CallbackContext::new(rhs, jacobian, mode))
    }

    fn decay() -> RhsBox<'static> {
        rhs_box(|_t, y, mut dy| {
            dy.copy_from(&(-y));
            Ok(())
        })
    }

    #[test]
    fn rhs_trampoline_dispatches_through_the_context() {
        let mut ctx = context_with(decay(), None, RuntimeMode::Strict);
        let y = VectorAdapter::owned(vec![1.0, 2.0]);
        let dy = VectorAdapter::zeros(2);
        let code = unsafe { rhs_trampoline(0.0, y.raw(), dy.raw(), ctx.as_user_data()) };
        assert_eq!(code, 0);
        assert_eq!(dy.as_slice(), &[-1.0, -2.0]);
        assert_eq!(ctx.rhs_calls(), 1);
    }

    #[test]
    fn wrong_tag_or_null_user_data_is_refused() {
        let y = VectorAdapter::zeros(1);
        let dy = VectorAdapter::zeros(1);
        let mut bogus = [0u64; 8];
        unsafe {
            assert_eq!(
                rhs_trampoline(0.0, y.raw(), dy.raw(), bogus.as_mut_ptr().cast()),
                -1
            );
            assert_eq!(rhs_trampoline(0.0, y.raw(), dy.raw(), std::ptr::null_mut()), -1);
        }
    }

    #[test]
    fn callback_errors_map_to_status_codes() {
        let mut calls = 0;
        let rhs = rhs_box(|_, _, _| {
            calls += 1;
            if calls == 1 {
                Err(CallbackError::recoverable("retry"))
            } else {
                Err(CallbackError::unrecoverable("stop"))
            }
        });
        let mut ctx = context_with(rhs, None, RuntimeMode::Strict);
        let y = VectorAdapter::zeros(1);
        let dy = VectorAdapter::zeros(1);
        unsafe {
            assert_eq!(rhs_trampoline(0.0, y.raw(), dy.raw(), ctx.as_user_data()), 1);
            assert!(ctx.take_failure().is_none());
            assert_eq!(rhs_trampoline(0.0, y.raw(), dy.raw(), ctx.as_user_data()), -1);
        }
        assert_eq!(
            ctx.take_failure(),
            Some(CallbackFailure::Error(CallbackError::unrecoverable("stop")))
        );
    }

    #[test]
    fn panics_are_caught_and_kept() {
        let rhs = rhs_box(|_, _, _| panic!("boom"));
        let mut ctx = context_with(rhs, None, RuntimeMode::Strict);
        let y = VectorAdapter::zeros(1);
        let dy = VectorAdapter::zeros(1);
        let code = unsafe { rhs_trampoline(0.0, y.raw(), dy.raw(), ctx.as_user_data()) };
        assert_eq!(code, -1);
        assert_eq!(
            ctx.take_failure(),
            Some(CallbackFailure::Panicked("boom".to_owned()))
        );
    }

    #[test]
    fn aliased_rhs_arguments_are_refused() {
        let mut ctx = context_with(decay(), None, RuntimeMode::Strict);
        let y = VectorAdapter::zeros(1);
        let code = unsafe { rhs_trampoline(0.0, y.raw(), y.raw(), ctx.as_user_data()) };
        assert_eq!(code, -1);
        assert_eq!(ctx.take_failure(), Some(CallbackFailure::AliasedArguments));
    }

    #[test]
    fn jacobian_trampoline_sees_state_and_fills_the_matrix() {
        let jac = Jacobian::new(2, |t, y, fy, mut j| {
            assert_eq!(t, 0.5);
            assert_eq!(y.as_slice(), &[1.0, 2.0]);
            assert_eq!(fy.as_slice(), &[-1.0, -2.0]);
            j[(0, 0)] = 2.0;
            j[(1, 1)] = 3.0;
            j[(0, 1)] = y[1];
            Ok(())
        });
        let mut ctx = context_with(decay(), Some(jac), RuntimeMode::Strict);
        let y = VectorAdapter::owned(vec![1.0, 2.0]);
        let fy = VectorAdapter::owned(vec![-1.0, -2.0]);
        let tmp = VectorAdapter::zeros(2);
        let m = DenseMatrixAdapter::zeros(2, 2);
        let code = unsafe {
            jac_trampoline(
                0.5,
                y.raw(),
                fy.raw(),
                m.raw(),
                ctx.as_user_data(),
                tmp.raw(),
                tmp.raw(),
                tmp.raw(),
            )
        };
        assert_eq!(code, 0);
        assert_eq!(m.as_slice(), &[2.0, 0.0, 2.0, 3.0]);
        assert!(m.column_pointers_consistent());
        assert_eq!(ctx.jac_calls(), 1);
    }

    #[test]
    fn hardened_mode_rejects_non_finite_jacobians() {
        let nan_jac = || {
            Jacobian::new(2, |_, _, _, mut j| {
                j[(1, 0)] = f64::NAN;
                Ok(())
            })
        };
        let y = VectorAdapter::zeros(2);
        let m = DenseMatrixAdapter::zeros(2, 2);
        let call = |ctx: &mut CallbackContext<'_>| unsafe {
            jac_trampoline(0.0, y.raw(), y.raw(), m.raw(), ctx.as_user_data(), y.raw(), y.raw(), y.raw())
        };

        let mut strict = context_with(decay(), Some(nan_jac()), RuntimeMode::Strict);
        assert_eq!(call(&mut strict), 0);

        let mut hardened = context_with(decay(), Some(nan_jac()), RuntimeMode::Hardened);
        assert_eq!(call(&mut hardened), -1);
        assert_eq!(
            hardened.take_failure(),
            Some(CallbackFailure::NonFiniteJacobian { row: 1, col: 0 })
        );
    }

    #[test]
    fn callback_error_codes() {
        assert_eq!(CallbackError::recoverable("x").code(), 1);
        assert_eq!(CallbackError::unrecoverable("x").code(), -1);
    }
}
