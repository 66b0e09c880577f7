//! Integration driver.
//!
//! An [`Integrator`] owns one native solver instance together with every
//! adapter the solver points into: the state vector, the callback context,
//! and for Newton iteration the dense matrix and linear solver. It moves
//! through [`DriverState`] `Constructed → Prepared → Stepping → Finished`
//! and releases the native pieces in reverse order of construction.

use std::ffi::c_void;
use std::ptr;

use nalgebra::{DVector, DVectorView, DVectorViewMut};
use numbridge_dense::ensure_finite;
use numbridge_native::msolver::NATIVE_MS_SUCCESS;
use numbridge_native::{
    JacFn, NativeStats, native_msolver_create, native_msolver_free, native_msolver_get_dky,
    native_msolver_get_stats, native_msolver_init, native_msolver_set_init_step,
    native_msolver_set_jac_fn, native_msolver_set_linear_solver, native_msolver_set_max_num_steps,
    native_msolver_set_max_step, native_msolver_set_user_data, native_msolver_solve,
    native_msolver_ss_tolerances, native_msolver_sv_tolerances,
};
use numbridge_runtime::{
    DEFAULT_EVIDENCE_CAPACITY, ErrorHandlerGuard, EvidenceLedger, RuntimeMode, clear_library_error,
    install_error_handler, now_unix_ms, take_library_error,
};
use serde::{Deserialize, Serialize};

use crate::callback::{
    CallbackContext, CallbackError, CallbackFailure, CallbackResult, Jacobian, jac_trampoline,
    rhs_box, rhs_trampoline,
};
use crate::solver::{
    DriverState, IntegratorStats, IterationStrategy, MultistepMethod, SolverEvent, SolverEventKind,
    Task, flag_name,
};
use crate::validation::{
    IntegrateValidationError, ToleranceValue, ValidatedTolerance, validate_first_step,
    validate_max_step, validate_max_steps, validate_tol,
};
use crate::{DenseMatrixAdapter, IntegrateError, LinearSolverAdapter, VectorAdapter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorOptions {
    pub method: MultistepMethod,
    pub iteration: IterationStrategy,
    pub rtol: f64,
    pub atol: ToleranceValue,
    /// Initial step size; chosen by the solver when `None`.
    pub first_step: Option<f64>,
    /// Bound on the step size; unbounded when `None`.
    pub max_step: Option<f64>,
    /// Internal steps allowed per `advance` call.
    pub max_steps: usize,
    pub mode: RuntimeMode,
    pub evidence_capacity: usize,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            method: MultistepMethod::Bdf,
            iteration: IterationStrategy::Newton,
            rtol: 1e-3,
            atol: ToleranceValue::Scalar(1e-6),
            first_step: None,
            max_step: None,
            max_steps: 500,
            mode: RuntimeMode::Strict,
            evidence_capacity: DEFAULT_EVIDENCE_CAPACITY,
        }
    }
}

/// A native multistep solver bound to Rust callbacks and buffers.
///
/// The state adapter receives the solver output after every
/// [`advance`](Self::advance) or [`step`](Self::step); writing to it through
/// [`state_mut`](Self::state_mut) does not feed back into the solver, which
/// integrates its own copy.
pub struct Integrator<'a> {
    // Released by hand in `Drop`, linear solver first.
    linear_solver: Option<LinearSolverAdapter>,
    mem: *mut c_void,
    context: Box<CallbackContext<'a>>,
    state: VectorAdapter<'a>,
    t: f64,
    options: IntegratorOptions,
    driver_state: DriverState,
    jacobian_registered: bool,
    evidence: EvidenceLedger<SolverEvent>,
    seq: u64,
    _guard: ErrorHandlerGuard,
}

impl<'a> Integrator<'a> {
    /// Create and configure a solver for `y' = rhs(t, y)` from `(t0, y0)`.
    ///
    /// Everything that can be checked in Rust is checked before the native
    /// solver exists. If a later native call fails, whatever was already
    /// created is released before the error is returned.
    pub fn new<F>(
        options: IntegratorOptions,
        t0: f64,
        y0: VectorAdapter<'a>,
        rhs: F,
        jacobian: Option<Jacobian<'a>>,
    ) -> Result<Self, IntegrateError>
    where
        F: FnMut(f64, DVectorView<'_, f64>, DVectorViewMut<'_, f64>) -> CallbackResult + 'a,
    {
        let n = y0.len();
        if n == 0 {
            return Err(IntegrateError::EmptyState);
        }
        let tolerance = validate_tol(options.rtol, options.atol.clone(), n, options.mode)?;
        for warning in &tolerance.warnings {
            log::warn!("tolerance adjusted: {warning:?}");
        }
        if let Some(h) = options.first_step {
            validate_first_step(h, t0, f64::INFINITY)?;
        }
        if let Some(h) = options.max_step {
            validate_max_step(h)?;
        }
        validate_max_steps(options.max_steps)?;
        if let Some(jacobian) = &jacobian {
            check_jacobian_dim(jacobian, n)?;
        }
        if options.mode.is_hardened() {
            if !t0.is_finite() {
                return Err(IntegrateValidationError::NotFinite { name: "t0" }.into());
            }
            ensure_finite(&y0.view())?;
        }

        let guard = install_error_handler();
        clear_library_error();
        let mem = native_msolver_create(options.method.raw(), options.iteration.raw());
        if mem.is_null() {
            return Err(IntegrateError::OutOfMemory {
                what: "solver memory",
            });
        }
        let context = Box::new(CallbackContext::new(rhs_box(rhs), jacobian, options.mode));
        let capacity = options.evidence_capacity;
        let mut integrator = Self {
            linear_solver: None,
            mem,
            context,
            state: y0,
            t: t0,
            options,
            driver_state: DriverState::Constructed,
            jacobian_registered: false,
            evidence: EvidenceLedger::new(capacity),
            seq: 0,
            _guard: guard,
        };
        integrator.configure(t0, &tolerance)?;
        log::debug!(
            "created {:?}/{:?} integrator for {n} components at t0 = {t0}",
            integrator.options.method,
            integrator.options.iteration
        );
        integrator.record(SolverEventKind::Constructed, NATIVE_MS_SUCCESS, None);
        Ok(integrator)
    }

    fn configure(&mut self, t0: f64, tolerance: &ValidatedTolerance) -> Result<(), IntegrateError> {
        let mem = self.mem;
        // SAFETY: `mem` is live and the state adapter outlives it.
        let status = unsafe { native_msolver_init(mem, Some(rhs_trampoline), t0, self.state.raw()) };
        self.check("initialization", status)?;

        let status = match &tolerance.atol {
            ToleranceValue::Scalar(atol) => unsafe {
                native_msolver_ss_tolerances(mem, tolerance.rtol, *atol)
            },
            ToleranceValue::Vector(atol) => {
                // The solver keeps its own copy.
                let atol = VectorAdapter::owned(atol.clone());
                unsafe { native_msolver_sv_tolerances(mem, tolerance.rtol, atol.raw()) }
            }
        };
        self.check("tolerance setup", status)?;

        let user_data = self.context.as_user_data();
        let status = unsafe { native_msolver_set_user_data(mem, user_data) };
        self.check("user data registration", status)?;

        let max_steps = i64::try_from(self.options.max_steps).unwrap_or(i64::MAX);
        let status = unsafe { native_msolver_set_max_num_steps(mem, max_steps) };
        self.check("step limit", status)?;

        if let Some(h) = self.options.first_step {
            let status = unsafe { native_msolver_set_init_step(mem, h) };
            self.check("initial step", status)?;
        }
        if let Some(h) = self.options.max_step {
            let status = unsafe { native_msolver_set_max_step(mem, h) };
            self.check("maximum step", status)?;
        }
        Ok(())
    }

    /// Supply or replace the analytic Jacobian. Only allowed before
    /// [`prepare`](Self::prepare), which decides what gets registered.
    pub fn set_jacobian(&mut self, jacobian: Jacobian<'a>) -> Result<(), IntegrateError> {
        if self.driver_state != DriverState::Constructed {
            return Err(IntegrateError::AlreadyPrepared {
                operation: "Jacobian configuration",
            });
        }
        check_jacobian_dim(&jacobian, self.state.len())?;
        self.context.set_jacobian(jacobian);
        Ok(())
    }

    /// Attach what the iteration strategy needs. Runs once; later calls
    /// return immediately.
    pub fn prepare(&mut self) -> Result<(), IntegrateError> {
        match self.driver_state {
            DriverState::Constructed => {}
            DriverState::Finished => return Err(IntegrateError::Finished { operation: "prepare" }),
            DriverState::Prepared | DriverState::Stepping => return Ok(()),
        }
        if self.options.iteration.needs_linear_solver() {
            let n = self.state.len();
            let ls = LinearSolverAdapter::new(&self.state, DenseMatrixAdapter::zeros(n, n))?;
            // SAFETY: both handles are owned by `self` and outlive `mem`.
            let status =
                unsafe { native_msolver_set_linear_solver(self.mem, ls.raw(), ls.matrix().raw()) };
            self.check("linear solver attachment", status)?;
            self.linear_solver = Some(ls);

            let jac: Option<JacFn> = if self.context.has_jacobian() {
                Some(jac_trampoline)
            } else {
                None
            };
            let status = unsafe { native_msolver_set_jac_fn(self.mem, jac) };
            self.check("Jacobian registration", status)?;
            self.jacobian_registered = jac.is_some();
            log::debug!(
                "attached a {n}x{n} linear solver ({} Jacobian)",
                if self.jacobian_registered { "analytic" } else { "difference quotient" }
            );
        } else if self.context.has_jacobian() {
            log::warn!("functional iteration never evaluates the Jacobian");
        }
        self.driver_state = DriverState::Prepared;
        self.record(SolverEventKind::Prepared, NATIVE_MS_SUCCESS, None);
        Ok(())
    }

    /// Integrate to `tout`; the state holds the solution at `tout`. A `tout`
    /// behind the last step interval is refused with `ILL_INPUT`.
    pub fn advance(&mut self, tout: f64) -> Result<f64, IntegrateError> {
        self.run(tout, Task::Normal, "advance")
    }

    /// Take one internal step towards `tout`; returns the time reached.
    pub fn step(&mut self, tout: f64) -> Result<f64, IntegrateError> {
        self.run(tout, Task::OneStep, "step")
    }

    fn run(&mut self, tout: f64, task: Task, operation: &'static str) -> Result<f64, IntegrateError> {
        if self.driver_state == DriverState::Finished {
            return Err(IntegrateError::Finished { operation });
        }
        if self.driver_state == DriverState::Constructed {
            self.prepare()?;
        }
        if self.options.mode.is_hardened() && !tout.is_finite() {
            return Err(IntegrateValidationError::NotFinite { name: "tout" }.into());
        }
        clear_library_error();
        let mut tret = self.t;
        // SAFETY: `mem`, the state adapter and everything the solver points
        // into are owned by `self`.
        let status = unsafe {
            native_msolver_solve(self.mem, tout, self.state.raw(), &mut tret, task.raw())
        };
        self.t = tret;
        let kind = match task {
            Task::Normal => SolverEventKind::Advance,
            Task::OneStep => SolverEventKind::Step,
        };
        match self.check(operation, status) {
            Ok(()) => {
                self.driver_state = DriverState::Stepping;
                self.record(kind, status, None);
                Ok(self.t)
            }
            Err(err) => {
                log::debug!("{operation} to {tout} stopped at t = {}: {err}", self.t);
                self.driver_state = DriverState::Finished;
                self.record(SolverEventKind::Failed, status, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Interpolated state at `t`, which must lie within the last step.
    pub fn interpolate(&mut self, t: f64) -> Result<DVector<f64>, IntegrateError> {
        self.dky(t, 0)
    }

    /// Interpolated derivative at `t`, which must lie within the last step.
    pub fn derivative(&mut self, t: f64) -> Result<DVector<f64>, IntegrateError> {
        self.dky(t, 1)
    }

    fn dky(&mut self, t: f64, k: i32) -> Result<DVector<f64>, IntegrateError> {
        let out = VectorAdapter::zeros(self.state.len());
        clear_library_error();
        let status = unsafe { native_msolver_get_dky(self.mem, t, k, out.raw()) };
        if let Err(err) = self.check("interpolation", status) {
            self.record(SolverEventKind::Failed, status, Some(err.to_string()));
            return Err(err);
        }
        self.record(SolverEventKind::Interpolate, status, None);
        Ok(DVector::from_column_slice(out.as_slice()))
    }

    /// Turn a native status into a result, preferring what the callbacks
    /// or the library error handler recorded over the bare status.
    fn check(&mut self, operation: &'static str, status: i32) -> Result<(), IntegrateError> {
        if status == NATIVE_MS_SUCCESS {
            return Ok(());
        }
        let library = take_library_error();
        let callback = |source| IntegrateError::Callback {
            operation,
            status,
            source,
        };
        Err(match self.context.take_failure() {
            Some(CallbackFailure::Panicked(message)) => IntegrateError::CallbackPanicked { message },
            Some(CallbackFailure::Error(source)) => callback(source),
            Some(CallbackFailure::NonFiniteJacobian { row, col }) => callback(
                CallbackError::unrecoverable(format!("non-finite Jacobian entry at ({row}, {col})")),
            ),
            Some(CallbackFailure::AliasedArguments) => callback(CallbackError::unrecoverable(
                "the solver passed unusable callback vectors",
            )),
            None => IntegrateError::Solver {
                operation,
                status,
                name: flag_name(status),
                detail: library.map(|e| e.message),
            },
        })
    }

    fn record(&mut self, kind: SolverEventKind, status: i32, detail: Option<String>) {
        self.seq += 1;
        self.evidence.record(SolverEvent {
            seq: self.seq,
            timestamp_ms: now_unix_ms(),
            kind,
            state: self.driver_state,
            t: self.t,
            status,
            detail,
        });
    }

    #[must_use]
    pub fn t(&self) -> f64 {
        self.t
    }

    #[must_use]
    pub fn state(&self) -> &[f64] {
        self.state.as_slice()
    }

    #[must_use]
    pub fn state_view(&self) -> DVectorView<'_, f64> {
        self.state.view()
    }

    pub fn state_mut(&mut self) -> &mut [f64] {
        self.state.as_mut_slice()
    }

    #[must_use]
    pub fn driver_state(&self) -> DriverState {
        self.driver_state
    }

    #[must_use]
    pub fn options(&self) -> &IntegratorOptions {
        &self.options
    }

    #[must_use]
    pub fn evidence(&self) -> &EvidenceLedger<SolverEvent> {
        &self.evidence
    }

    #[must_use]
    pub fn has_linear_solver(&self) -> bool {
        self.linear_solver.is_some()
    }

    #[must_use]
    pub fn linear_solver(&self) -> Option<&LinearSolverAdapter> {
        self.linear_solver.as_ref()
    }

    #[must_use]
    pub fn jacobian_registered(&self) -> bool {
        self.jacobian_registered
    }

    #[must_use]
    pub fn stats(&self) -> IntegratorStats {
        let mut native = NativeStats::default();
        // SAFETY: `mem` is live for the lifetime of `self`.
        let status = unsafe { native_msolver_get_stats(self.mem, &mut native) };
        if status != NATIVE_MS_SUCCESS {
            log::warn!("reading solver statistics failed with {}", flag_name(status));
        }
        IntegratorStats::from_native(&native, self.context.rhs_calls(), self.context.jac_calls())
    }

    /// End the integration and release every native resource.
    pub fn finish(mut self) -> IntegratorStats {
        let stats = self.stats();
        self.driver_state = DriverState::Finished;
        self.record(SolverEventKind::Finished, NATIVE_MS_SUCCESS, None);
        log::debug!("integration finished at t = {}: {stats:?}", self.t);
        stats
    }
}

fn check_jacobian_dim(jacobian: &Jacobian<'_>, n: usize) -> Result<(), IntegrateError> {
    if jacobian.dim() != n {
        return Err(IntegrateError::ShapeMismatch {
            what: "Jacobian",
            expected: (n, n),
            actual: (jacobian.dim(), jacobian.dim()),
        });
    }
    Ok(())
}

impl Drop for Integrator<'_> {
    fn drop(&mut self) {
        drop(self.linear_solver.take());
        if !self.mem.is_null() {
            // SAFETY: created by `native_msolver_create`, released once.
            unsafe { native_msolver_free(&mut self.mem) };
            self.mem = ptr::null_mut();
        }
        log::trace!("released solver memory");
    }
}

impl std::fmt::Debug for Integrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrator")
            .field("t", &self.t)
            .field("state", &self.driver_state)
            .field("options", &self.options)
            .field("linear_solver", &self.linear_solver.is_some())
            .field("jacobian_registered", &self.jacobian_registered)
            .finish_non_exhaustive()
    }
}
