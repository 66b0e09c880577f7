//! Low-order multistep ODE solver.
//!
//! Methods: BDF of order 1 (backward Euler) and Adams-Moulton of order 2
//! (trapezoidal rule), both with an explicit Euler predictor. The implicit
//! corrector equation
//!
//! ```text
//! y = a + γ f(t_{n+1}, y)
//! ```
//!
//! is solved either by functional (fixed-point) iteration or by modified
//! Newton iteration with `M = I - γ J`, factored by an attached dense linear
//! solver. The Jacobian comes from a registered callback or from forward
//! differences written column by column through the matrix column table.
//!
//! All vector arithmetic goes through the caller's vector operation table.

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use crate::error::{
    NATIVE_EBADFUNC, NATIVE_EBADTOL, NATIVE_EBADLEN, NATIVE_EFAILED, NATIVE_EFAULT, NATIVE_EINVAL,
    NATIVE_EMAXITER, NATIVE_ENOMEM, NATIVE_ERANGE, NATIVE_ESING, NATIVE_ETOL, report,
};
use crate::linsol::{LinearSolver, native_linsol_setup, native_linsol_solve};
use crate::matrix::{MatrixHandle, content};
use crate::nvector::{
    NVector, nv_abs, nv_add_const, nv_clone, nv_clone_empty, nv_copy, nv_data, nv_destroy, nv_inv_test,
    nv_len, nv_linear_sum, nv_min, nv_scale, nv_set_data, nv_wrms_norm,
};
use crate::Real;

pub const NATIVE_ADAMS: c_int = 1;
pub const NATIVE_BDF: c_int = 2;

pub const NATIVE_FUNCTIONAL: c_int = 1;
pub const NATIVE_NEWTON: c_int = 2;

pub const NATIVE_NORMAL: c_int = 1;
pub const NATIVE_ONE_STEP: c_int = 2;

pub const NATIVE_MS_SUCCESS: c_int = 0;
pub const NATIVE_TOO_MUCH_WORK: c_int = -1;
pub const NATIVE_TOO_MUCH_ACC: c_int = -2;
pub const NATIVE_ERR_FAILURE: c_int = -3;
pub const NATIVE_CONV_FAILURE: c_int = -4;
pub const NATIVE_LINIT_FAIL: c_int = -5;
pub const NATIVE_LSETUP_FAIL: c_int = -6;
pub const NATIVE_LSOLVE_FAIL: c_int = -7;
pub const NATIVE_RHSFUNC_FAIL: c_int = -8;
pub const NATIVE_FIRST_RHSFUNC_ERR: c_int = -9;
pub const NATIVE_REPTD_RHSFUNC_ERR: c_int = -10;
pub const NATIVE_UNREC_RHSFUNC_ERR: c_int = -11;
pub const NATIVE_MEM_FAIL: c_int = -20;
pub const NATIVE_MEM_NULL: c_int = -21;
pub const NATIVE_ILL_INPUT: c_int = -22;
pub const NATIVE_NO_MALLOC: c_int = -23;
pub const NATIVE_BAD_K: c_int = -24;
pub const NATIVE_BAD_T: c_int = -25;
pub const NATIVE_TOO_CLOSE: c_int = -27;

/// `rhs(t, y, ydot, user_data)`: write `f(t, y)` into `ydot`.
pub type RhsFn =
    unsafe extern "C" fn(t: Real, y: NVector, ydot: NVector, user_data: *mut c_void) -> c_int;

/// `jac(t, y, fy, J, user_data, tmp1, tmp2, tmp3)`: write `∂f/∂y` into `J`.
pub type JacFn = unsafe extern "C" fn(
    t: Real,
    y: NVector,
    fy: NVector,
    jac: MatrixHandle,
    user_data: *mut c_void,
    tmp1: NVector,
    tmp2: NVector,
    tmp3: NVector,
) -> c_int;

/// Counters reported by [`native_msolver_get_stats`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeStats {
    pub steps: i64,
    pub rhs_evals: i64,
    pub jac_evals: i64,
    pub lin_setups: i64,
    pub nonlin_iters: i64,
    pub conv_fails: i64,
    pub err_test_fails: i64,
}

const DEFAULT_MAX_STEPS: i64 = 500;
const MAX_CORRECTOR_ITERS: usize = 3;
const MAX_CONV_FAILS: usize = 10;
const MAX_ERR_FAILS: usize = 7;
const MAX_RHS_RETRIES: usize = 10;
const CORRECTOR_TOL: Real = 0.1;
const GAMMA_DRIFT: Real = 0.3;
const STEPS_BETWEEN_SETUPS: i64 = 20;
const STEPS_BETWEEN_JACOBIANS: i64 = 50;
const ETA_MAX: Real = 5.0;
const ETA_MIN: Real = 0.2;
const ETA_CONV_FAIL: Real = 0.25;
const SAFETY: Real = 0.9;

struct Workspace {
    y: NVector,
    y_prev: NVector,
    f_n: NVector,
    y_pred: NVector,
    y_corr: NVector,
    base: NVector,
    delta: NVector,
    ewt: NVector,
    ftemp: NVector,
    tmp1: NVector,
    tmp2: NVector,
    tmp3: NVector,
}

impl Workspace {
    unsafe fn alloc(template: NVector) -> Option<Self> {
        let mut slots = [ptr::null_mut(); 12];
        for i in 0..slots.len() {
            let v = unsafe { nv_clone(template) };
            if v.is_null() {
                for allocated in &slots[..i] {
                    unsafe { nv_destroy(*allocated) };
                }
                return None;
            }
            slots[i] = v;
        }
        let [y, y_prev, f_n, y_pred, y_corr, base, delta, ewt, ftemp, tmp1, tmp2, tmp3] = slots;
        Some(Self {
            y,
            y_prev,
            f_n,
            y_pred,
            y_corr,
            base,
            delta,
            ewt,
            ftemp,
            tmp1,
            tmp2,
            tmp3,
        })
    }

    unsafe fn release(&mut self) {
        for v in [
            self.y,
            self.y_prev,
            self.f_n,
            self.y_pred,
            self.y_corr,
            self.base,
            self.delta,
            self.ewt,
            self.ftemp,
            self.tmp1,
            self.tmp2,
            self.tmp3,
        ] {
            unsafe { nv_destroy(v) };
        }
    }
}

struct SolverMem {
    lmm: c_int,
    iter: c_int,
    rhs: Option<RhsFn>,
    jac: Option<JacFn>,
    user_data: *mut c_void,

    rtol: Real,
    atol: Real,
    atol_vec: NVector,
    tolerances_set: bool,

    work: Option<Workspace>,
    n: usize,

    tn: Real,
    t_prev: Real,
    h: Real,
    h_used: Real,
    h_init: Real,
    h_max: Real,
    max_steps: i64,

    ls: *mut LinearSolver,
    a: MatrixHandle,
    saved_j: MatrixHandle,
    gamma_setup: Real,
    last_setup_step: i64,
    last_jac_step: i64,
    jac_current: bool,
    force_setup: bool,

    stats: NativeStats,
}

enum Failure {
    /// Retry the step with a smaller `h`.
    Recoverable,
    /// Abort with this status.
    Fatal(c_int),
}

/// Create solver memory for the given method and iteration strategy.
/// Returns null on invalid arguments.
#[unsafe(no_mangle)]
pub extern "C" fn native_msolver_create(lmm: c_int, iter: c_int) -> *mut c_void {
    if lmm != NATIVE_ADAMS && lmm != NATIVE_BDF {
        report!(NATIVE_EINVAL, "illegal value for the multistep method");
        return ptr::null_mut();
    }
    if iter != NATIVE_FUNCTIONAL && iter != NATIVE_NEWTON {
        report!(NATIVE_EINVAL, "illegal value for the iteration strategy");
        return ptr::null_mut();
    }
    let mem = Box::new(SolverMem {
        lmm,
        iter,
        rhs: None,
        jac: None,
        user_data: ptr::null_mut(),
        rtol: 0.0,
        atol: 0.0,
        atol_vec: ptr::null_mut(),
        tolerances_set: false,
        work: None,
        n: 0,
        tn: 0.0,
        t_prev: 0.0,
        h: 0.0,
        h_used: 0.0,
        h_init: 0.0,
        h_max: Real::INFINITY,
        max_steps: DEFAULT_MAX_STEPS,
        ls: ptr::null_mut(),
        a: ptr::null_mut(),
        saved_j: ptr::null_mut(),
        gamma_setup: 0.0,
        last_setup_step: 0,
        last_jac_step: 0,
        jac_current: false,
        force_setup: true,
        stats: NativeStats::default(),
    });
    Box::into_raw(mem).cast()
}

unsafe fn mem_mut<'a>(mem: *mut c_void) -> Option<&'a mut SolverMem> {
    unsafe { mem.cast::<SolverMem>().as_mut() }
}

/// Allocate internal vectors shaped like `y0` and copy the initial state.
///
/// # Safety
///
/// `mem` must come from [`native_msolver_create`]; `y0` must be a valid
/// vector whose table is complete.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_init(
    mem: *mut c_void,
    rhs: Option<RhsFn>,
    t0: Real,
    y0: NVector,
) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if rhs.is_none() {
        report!(NATIVE_EFAULT, "right-hand side function is null");
        return NATIVE_ILL_INPUT;
    }
    if y0.is_null() {
        report!(NATIVE_EFAULT, "initial state vector is null");
        return NATIVE_ILL_INPUT;
    }
    if mem.work.is_some() {
        report!(NATIVE_EINVAL, "solver memory is already initialized");
        return NATIVE_ILL_INPUT;
    }
    let Some(work) = (unsafe { Workspace::alloc(y0) }) else {
        report!(NATIVE_ENOMEM, "allocation of solver vectors failed");
        return NATIVE_MEM_FAIL;
    };
    unsafe {
        nv_copy(y0, work.y);
        nv_copy(y0, work.y_prev);
    }
    mem.n = unsafe { nv_len(y0) };
    mem.rhs = rhs;
    mem.tn = t0;
    mem.t_prev = t0;
    mem.work = Some(work);
    NATIVE_MS_SUCCESS
}

/// Scalar relative and absolute tolerances.
///
/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_ss_tolerances(mem: *mut c_void, rtol: Real, atol: Real) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if !(rtol >= 0.0) || !(atol >= 0.0) {
        report!(NATIVE_EBADTOL, "tolerances must be non-negative");
        return NATIVE_ILL_INPUT;
    }
    unsafe { nv_destroy(mem.atol_vec) };
    mem.atol_vec = ptr::null_mut();
    mem.rtol = rtol;
    mem.atol = atol;
    mem.tolerances_set = true;
    NATIVE_MS_SUCCESS
}

/// Scalar relative and per-component absolute tolerances. `atol` is copied.
///
/// # Safety
///
/// `mem` must be null or live initialized solver memory; `atol` a valid vector.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_sv_tolerances(mem: *mut c_void, rtol: Real, atol: NVector) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if mem.work.is_none() {
        report!(NATIVE_EINVAL, "solver memory must be initialized before vector tolerances");
        return NATIVE_NO_MALLOC;
    }
    if atol.is_null() || unsafe { nv_len(atol) } != mem.n {
        report!(NATIVE_EBADLEN, "absolute tolerance vector has the wrong length");
        return NATIVE_ILL_INPUT;
    }
    let data = unsafe { nv_data(atol) };
    if data.is_null() {
        report!(NATIVE_EFAULT, "absolute tolerance vector has no data");
        return NATIVE_ILL_INPUT;
    }
    // Per component, so a NaN anywhere is refused like a scalar NaN.
    let components = unsafe { std::slice::from_raw_parts(data, mem.n) };
    if !(rtol >= 0.0) || components.iter().any(|&a| !(a >= 0.0)) {
        report!(NATIVE_EBADTOL, "tolerances must be non-negative");
        return NATIVE_ILL_INPUT;
    }
    let copy = unsafe { nv_clone(atol) };
    if copy.is_null() {
        report!(NATIVE_ENOMEM, "allocation of the tolerance vector failed");
        return NATIVE_MEM_FAIL;
    }
    unsafe {
        nv_copy(atol, copy);
        nv_destroy(mem.atol_vec);
    }
    mem.atol_vec = copy;
    mem.rtol = rtol;
    mem.atol = 0.0;
    mem.tolerances_set = true;
    NATIVE_MS_SUCCESS
}

/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_user_data(mem: *mut c_void, user_data: *mut c_void) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    mem.user_data = user_data;
    NATIVE_MS_SUCCESS
}

/// Maximum internal steps per solve call; `<= 0` restores the default.
///
/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_max_num_steps(mem: *mut c_void, max_steps: i64) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    mem.max_steps = if max_steps <= 0 { DEFAULT_MAX_STEPS } else { max_steps };
    NATIVE_MS_SUCCESS
}

/// Initial step size; `0` selects it automatically.
///
/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_init_step(mem: *mut c_void, h: Real) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    mem.h_init = h;
    NATIVE_MS_SUCCESS
}

/// Upper bound on `|h|`; `0` or infinity removes the bound.
///
/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_max_step(mem: *mut c_void, h_max: Real) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if h_max < 0.0 || h_max.is_nan() {
        report!(NATIVE_EINVAL, "maximum step must be non-negative");
        return NATIVE_ILL_INPUT;
    }
    mem.h_max = if h_max == 0.0 { Real::INFINITY } else { h_max };
    NATIVE_MS_SUCCESS
}

/// Attach a dense linear solver and its matrix for Newton iteration.
///
/// The solver keeps `ls` and `a` until freed; both must outlive every later
/// solve call. `a` is overwritten during each setup.
///
/// # Safety
///
/// `mem` must be live initialized memory; `ls` and `a` valid handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_linear_solver(
    mem: *mut c_void,
    ls: *mut LinearSolver,
    a: MatrixHandle,
) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if mem.work.is_none() {
        report!(NATIVE_EINVAL, "solver memory must be initialized before attaching a linear solver");
        return NATIVE_NO_MALLOC;
    }
    if mem.iter != NATIVE_NEWTON {
        report!(NATIVE_EINVAL, "a linear solver is only used with Newton iteration");
        return NATIVE_ILL_INPUT;
    }
    if ls.is_null() || a.is_null() {
        report!(NATIVE_EFAULT, "linear solver or matrix is null");
        return NATIVE_ILL_INPUT;
    }
    let c = unsafe { content(a) };
    if c.rows as usize != mem.n || c.cols as usize != mem.n {
        report!(NATIVE_EBADLEN, "linear solver matrix does not match the state length");
        return NATIVE_ILL_INPUT;
    }
    let saved = unsafe { ((*(*a).ops).clone)(a) };
    if saved.is_null() {
        report!(NATIVE_ENOMEM, "allocation of the saved Jacobian failed");
        return NATIVE_MEM_FAIL;
    }
    unsafe { release_saved_jacobian(mem) };
    mem.ls = ls;
    mem.a = a;
    mem.saved_j = saved;
    mem.jac = None;
    mem.force_setup = true;
    NATIVE_MS_SUCCESS
}

/// Register the Jacobian callback, or `None` for forward differences.
///
/// # Safety
///
/// `mem` must be null or live solver memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_set_jac_fn(mem: *mut c_void, jac: Option<JacFn>) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if mem.ls.is_null() {
        report!(NATIVE_EINVAL, "attach a linear solver before registering a Jacobian");
        return NATIVE_LINIT_FAIL;
    }
    mem.jac = jac;
    mem.force_setup = true;
    NATIVE_MS_SUCCESS
}

/// Advance towards `tout`.
///
/// In [`NATIVE_NORMAL`] mode the solver steps past `tout` and writes the
/// interpolated state at `tout` into `yout`; in [`NATIVE_ONE_STEP`] mode it
/// takes a single internal step. `*tret` receives the time of `yout`.
///
/// # Safety
///
/// `mem` must be live initialized memory; `yout` a valid vector of the
/// state length; `tret` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_solve(
    mem: *mut c_void,
    tout: Real,
    yout: NVector,
    tret: *mut Real,
    itask: c_int,
) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if mem.work.is_none() {
        report!(NATIVE_EINVAL, "solver memory was not initialized");
        return NATIVE_NO_MALLOC;
    }
    if yout.is_null() || tret.is_null() {
        report!(NATIVE_EFAULT, "output vector or time pointer is null");
        return NATIVE_ILL_INPUT;
    }
    if itask != NATIVE_NORMAL && itask != NATIVE_ONE_STEP {
        report!(NATIVE_EINVAL, "illegal value for the task");
        return NATIVE_ILL_INPUT;
    }
    if !mem.tolerances_set {
        report!(NATIVE_EBADTOL, "tolerances were not set");
        return NATIVE_ILL_INPUT;
    }
    if mem.iter == NATIVE_NEWTON && (mem.ls.is_null() || mem.a.is_null()) {
        report!(NATIVE_EFAILED, "Newton iteration requires an attached linear solver");
        return NATIVE_LINIT_FAIL;
    }

    let flag = unsafe { mem.run(tout, itask) };
    let (t_out, interpolate) = match flag {
        Ok(t) => t,
        Err(_) => (mem.tn, false),
    };
    let work = mem.work_ref();
    unsafe {
        if interpolate {
            mem.interpolate(t_out, yout);
        } else {
            nv_copy(work.y, yout);
        }
        *tret = t_out;
    }
    match flag {
        Ok(_) => NATIVE_MS_SUCCESS,
        Err(code) => code,
    }
}

/// Interpolated state (`k == 0`) or derivative (`k == 1`) at `t`, which
/// must lie within the last step.
///
/// # Safety
///
/// `mem` must be live initialized memory; `dky` a valid vector.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_get_dky(mem: *mut c_void, t: Real, k: c_int, dky: NVector) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if mem.work.is_none() {
        report!(NATIVE_EINVAL, "solver memory was not initialized");
        return NATIVE_NO_MALLOC;
    }
    if dky.is_null() {
        report!(NATIVE_EFAULT, "output vector is null");
        return NATIVE_ILL_INPUT;
    }
    if k != 0 && k != 1 {
        report!(NATIVE_EINVAL, "illegal derivative order; only 0 and 1 are available");
        return NATIVE_BAD_K;
    }
    if !mem.within_last_step(t) {
        report!(NATIVE_ERANGE, "requested time is outside the last step interval");
        return NATIVE_BAD_T;
    }
    let work = mem.work_ref();
    unsafe {
        if k == 0 {
            mem.interpolate(t, dky);
        } else if mem.h_used != 0.0 {
            let inv_h = 1.0 / (mem.tn - mem.t_prev);
            nv_linear_sum(inv_h, work.y, -inv_h, work.y_prev, dky);
        } else {
            nv_copy(work.f_n, dky);
        }
    }
    NATIVE_MS_SUCCESS
}

/// # Safety
///
/// `mem` must be null or live solver memory; `stats` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_get_stats(mem: *mut c_void, stats: *mut NativeStats) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if stats.is_null() {
        return NATIVE_ILL_INPUT;
    }
    unsafe { *stats = mem.stats };
    NATIVE_MS_SUCCESS
}

/// # Safety
///
/// `mem` must be null or live solver memory; `t` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_get_current_time(mem: *mut c_void, t: *mut Real) -> c_int {
    let Some(mem) = (unsafe { mem_mut(mem) }) else {
        return NATIVE_MEM_NULL;
    };
    if t.is_null() {
        return NATIVE_ILL_INPUT;
    }
    unsafe { *t = mem.tn };
    NATIVE_MS_SUCCESS
}

/// Release solver memory and null the caller's pointer. The attached linear
/// solver and matrix are not released; they belong to the caller.
///
/// # Safety
///
/// `mem` must point to null or to memory from [`native_msolver_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_msolver_free(mem: *mut *mut c_void) {
    if mem.is_null() {
        return;
    }
    let raw = unsafe { *mem };
    if raw.is_null() {
        return;
    }
    let mut solver = unsafe { Box::from_raw(raw.cast::<SolverMem>()) };
    unsafe {
        if let Some(mut work) = solver.work.take() {
            work.release();
        }
        nv_destroy(solver.atol_vec);
        release_saved_jacobian(&mut solver);
        *mem = ptr::null_mut();
    }
}

/// Symbolic name of a solver status code. The returned string is static.
#[unsafe(no_mangle)]
pub extern "C" fn native_msolver_flag_name(flag: c_int) -> *const c_char {
    let name = match flag {
        NATIVE_MS_SUCCESS => c"SUCCESS",
        NATIVE_TOO_MUCH_WORK => c"TOO_MUCH_WORK",
        NATIVE_TOO_MUCH_ACC => c"TOO_MUCH_ACC",
        NATIVE_ERR_FAILURE => c"ERR_FAILURE",
        NATIVE_CONV_FAILURE => c"CONV_FAILURE",
        NATIVE_LINIT_FAIL => c"LINIT_FAIL",
        NATIVE_LSETUP_FAIL => c"LSETUP_FAIL",
        NATIVE_LSOLVE_FAIL => c"LSOLVE_FAIL",
        NATIVE_RHSFUNC_FAIL => c"RHSFUNC_FAIL",
        NATIVE_FIRST_RHSFUNC_ERR => c"FIRST_RHSFUNC_ERR",
        NATIVE_REPTD_RHSFUNC_ERR => c"REPTD_RHSFUNC_ERR",
        NATIVE_UNREC_RHSFUNC_ERR => c"UNREC_RHSFUNC_ERR",
        NATIVE_MEM_FAIL => c"MEM_FAIL",
        NATIVE_MEM_NULL => c"MEM_NULL",
        NATIVE_ILL_INPUT => c"ILL_INPUT",
        NATIVE_NO_MALLOC => c"NO_MALLOC",
        NATIVE_BAD_K => c"BAD_K",
        NATIVE_BAD_T => c"BAD_T",
        NATIVE_TOO_CLOSE => c"TOO_CLOSE",
        _ => c"NONE",
    };
    name.as_ptr()
}

unsafe fn release_saved_jacobian(mem: &mut SolverMem) {
    if !mem.saved_j.is_null() {
        unsafe { ((*(*mem.saved_j).ops).destroy)(mem.saved_j) };
        mem.saved_j = ptr::null_mut();
    }
}

impl SolverMem {
    fn work_ref(&self) -> &Workspace {
        match &self.work {
            Some(work) => work,
            None => unreachable!("solver entry points check initialization first"),
        }
    }

    fn within_last_step(&self, t: Real) -> bool {
        let fuzz = 100.0 * Real::EPSILON * (self.tn.abs() + self.h_used.abs());
        let (lo, hi) = if self.tn >= self.t_prev {
            (self.t_prev, self.tn)
        } else {
            (self.tn, self.t_prev)
        };
        t >= lo - fuzz && t <= hi + fuzz
    }

    unsafe fn interpolate(&self, t: Real, out: NVector) {
        let work = self.work_ref();
        let span = self.tn - self.t_prev;
        if span == 0.0 {
            unsafe { nv_copy(work.y, out) };
            return;
        }
        let s = (t - self.t_prev) / span;
        unsafe { nv_linear_sum(1.0 - s, work.y_prev, s, work.y, out) };
    }

    /// Drive the step loop. Returns the output time and whether the output
    /// must be interpolated.
    unsafe fn run(&mut self, tout: Real, itask: c_int) -> Result<(Real, bool), c_int> {
        if self.stats.steps == 0 && self.h == 0.0 {
            unsafe { self.start(tout)? };
        } else if itask == NATIVE_NORMAL && self.stats.steps > 0 {
            if self.within_last_step(tout) {
                return Ok((tout, true));
            }
            if (tout - self.tn) * self.h < 0.0 {
                report!(NATIVE_EINVAL, "tout lies behind the last step interval");
                return Err(NATIVE_ILL_INPUT);
            }
        }

        let mut taken: i64 = 0;
        loop {
            if taken >= self.max_steps {
                report!(NATIVE_EMAXITER, "maximum number of steps reached before tout");
                return Err(NATIVE_TOO_MUCH_WORK);
            }
            unsafe { self.take_step()? };
            taken += 1;

            if itask == NATIVE_ONE_STEP {
                return Ok((self.tn, false));
            }
            if (self.tn - tout) * self.h >= 0.0 {
                return Ok((tout, true));
            }
        }
    }

    unsafe fn start(&mut self, tout: Real) -> Result<(), c_int> {
        let tdist = tout - self.tn;
        if tdist == 0.0 {
            report!(NATIVE_EINVAL, "tout is too close to the initial time");
            return Err(NATIVE_TOO_CLOSE);
        }
        let (y, f_n) = {
            let work = self.work_ref();
            (work.y, work.f_n)
        };
        match unsafe { self.call_rhs(self.tn, y, f_n) } {
            0 => {}
            flag if flag > 0 => {
                report!(NATIVE_EBADFUNC, "the right-hand side failed recoverably at the first call");
                return Err(NATIVE_FIRST_RHSFUNC_ERR);
            }
            _ => {
                report!(NATIVE_EBADFUNC, "the right-hand side failed at the first call");
                return Err(NATIVE_RHSFUNC_FAIL);
            }
        }
        unsafe { self.set_error_weights()? };

        let direction = tdist.signum();
        let mut h = if self.h_init != 0.0 {
            self.h_init.abs()
        } else {
            let work = self.work_ref();
            let fnorm = unsafe { nv_wrms_norm(work.f_n, work.ewt) };
            let mut h0 = 0.01 * tdist.abs();
            if fnorm * h0 > 0.5 {
                h0 = 0.5 / fnorm;
            }
            h0.max(100.0 * Real::EPSILON * self.tn.abs().max(tdist.abs()))
        };
        h = h.min(self.h_max).min(tdist.abs());
        self.h = direction * h;
        Ok(())
    }

    unsafe fn call_rhs(&mut self, t: Real, y: NVector, ydot: NVector) -> c_int {
        self.stats.rhs_evals += 1;
        match self.rhs {
            Some(rhs) => unsafe { rhs(t, y, ydot, self.user_data) },
            None => -1,
        }
    }

    /// ewt = 1 / (rtol |y| + atol)
    unsafe fn set_error_weights(&mut self) -> Result<(), c_int> {
        let work = self.work_ref();
        unsafe {
            nv_abs(work.y, work.tmp1);
            nv_scale(self.rtol, work.tmp1, work.tmp1);
            if self.atol_vec.is_null() {
                nv_add_const(work.tmp1, self.atol, work.tmp1);
            } else {
                nv_linear_sum(1.0, work.tmp1, 1.0, self.atol_vec, work.tmp1);
            }
            if nv_min(work.tmp1) <= 0.0 || !nv_inv_test(work.tmp1, work.ewt) {
                report!(NATIVE_EBADTOL, "an error weight became non-positive");
                return Err(NATIVE_ILL_INPUT);
            }
        }
        Ok(())
    }

    unsafe fn take_step(&mut self) -> Result<(), c_int> {
        unsafe { self.set_error_weights()? };
        let mut conv_fails = 0usize;
        let mut err_fails = 0usize;
        let mut rhs_retries = 0usize;

        loop {
            let h = self.h;
            let t_new = self.tn + h;
            if t_new == self.tn {
                report!(NATIVE_ETOL, "step size underflow; the requested accuracy is unattainable");
                return Err(NATIVE_TOO_MUCH_ACC);
            }
            let work = self.work_ref();
            let (y, f_n, y_pred, base) = (work.y, work.f_n, work.y_pred, work.base);
            let gamma = unsafe {
                nv_linear_sum(1.0, y, h, f_n, y_pred);
                if self.lmm == NATIVE_BDF {
                    nv_copy(y, base);
                    h
                } else {
                    nv_linear_sum(1.0, y, 0.5 * h, f_n, base);
                    0.5 * h
                }
            };

            let corrected = if self.iter == NATIVE_NEWTON {
                unsafe { self.newton(t_new, gamma) }
            } else {
                unsafe { self.functional(t_new, gamma) }
            };
            match corrected {
                Ok(()) => {}
                Err(Failure::Fatal(code)) => return Err(code),
                Err(Failure::Recoverable) => {
                    conv_fails += 1;
                    self.stats.conv_fails += 1;
                    if conv_fails >= MAX_CONV_FAILS {
                        report!(NATIVE_EMAXITER, "the corrector failed to converge repeatedly");
                        return Err(NATIVE_CONV_FAILURE);
                    }
                    self.h *= ETA_CONV_FAIL;
                    self.force_setup = true;
                    continue;
                }
            }

            let work = self.work_ref();
            let err = unsafe {
                nv_linear_sum(1.0, work.y_corr, -1.0, work.y_pred, work.tmp1);
                0.5 * nv_wrms_norm(work.tmp1, work.ewt)
            };
            if err > 1.0 {
                err_fails += 1;
                self.stats.err_test_fails += 1;
                if err_fails >= MAX_ERR_FAILS {
                    report!(NATIVE_ETOL, "the local error test failed repeatedly");
                    return Err(NATIVE_ERR_FAILURE);
                }
                self.h *= (SAFETY / err.sqrt()).max(ETA_MIN);
                continue;
            }

            // The step is committed only once f(t_new, y_new) is known, so
            // a failed evaluation leaves tn, y and the last step intact.
            let work = self.work_ref();
            let (y, y_prev, y_corr, f_n, ftemp) = (work.y, work.y_prev, work.y_corr, work.f_n, work.ftemp);
            match unsafe { self.call_rhs(t_new, y_corr, ftemp) } {
                0 => {}
                flag if flag > 0 && rhs_retries < MAX_RHS_RETRIES => {
                    rhs_retries += 1;
                    self.h *= ETA_CONV_FAIL;
                    continue;
                }
                flag if flag > 0 => {
                    report!(NATIVE_EBADFUNC, "the right-hand side failed recoverably too often");
                    return Err(NATIVE_REPTD_RHSFUNC_ERR);
                }
                _ => {
                    report!(NATIVE_EBADFUNC, "the right-hand side failed unrecoverably");
                    return Err(NATIVE_RHSFUNC_FAIL);
                }
            }
            unsafe {
                nv_copy(y, y_prev);
                nv_copy(y_corr, y);
                nv_copy(ftemp, f_n);
            }
            self.t_prev = self.tn;
            self.tn = t_new;
            self.h_used = h;
            self.stats.steps += 1;

            let eta = if err == 0.0 {
                ETA_MAX
            } else {
                (SAFETY / err.sqrt()).min(ETA_MAX)
            };
            if eta > 1.0 {
                let h_new = (self.h * eta).abs().min(self.h_max);
                self.h = h_new.copysign(self.h);
            }
            return Ok(());
        }
    }

    unsafe fn functional(&mut self, t_new: Real, gamma: Real) -> Result<(), Failure> {
        let work = self.work_ref();
        let (y_corr, y_pred, base, ftemp, delta, tmp2, ewt) = (
            work.y_corr,
            work.y_pred,
            work.base,
            work.ftemp,
            work.delta,
            work.tmp2,
            work.ewt,
        );
        unsafe { nv_copy(y_pred, y_corr) };
        let mut del_prev = 0.0;
        for m in 0..MAX_CORRECTOR_ITERS {
            unsafe { self.rhs_in_corrector(t_new, y_corr, ftemp)? };
            let del = unsafe {
                nv_linear_sum(1.0, base, gamma, ftemp, tmp2);
                nv_linear_sum(1.0, tmp2, -1.0, y_corr, delta);
                nv_copy(tmp2, y_corr);
                nv_wrms_norm(delta, ewt)
            };
            self.stats.nonlin_iters += 1;
            if converged(m, del, del_prev) {
                return Ok(());
            }
            if m > 0 && del > 2.0 * del_prev {
                return Err(Failure::Recoverable);
            }
            del_prev = del;
        }
        Err(Failure::Recoverable)
    }

    unsafe fn newton(&mut self, t_new: Real, gamma: Real) -> Result<(), Failure> {
        let needs_setup = self.force_setup
            || self.stats.steps - self.last_setup_step >= STEPS_BETWEEN_SETUPS
            || (gamma / self.gamma_setup - 1.0).abs() > GAMMA_DRIFT;
        if needs_setup {
            unsafe { self.newton_setup(t_new, gamma, false)? };
        }

        loop {
            match unsafe { self.newton_iterate(t_new) } {
                Ok(()) => return Ok(()),
                Err(Failure::Recoverable) if !self.jac_current => {
                    unsafe { self.newton_setup(t_new, gamma, true)? };
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    unsafe fn newton_setup(&mut self, t_new: Real, gamma: Real, fresh_jacobian: bool) -> Result<(), Failure> {
        let a = self.a;
        let saved = self.saved_j;
        let reuse = !fresh_jacobian
            && !self.force_setup
            && self.stats.jac_evals > 0
            && self.stats.steps - self.last_jac_step < STEPS_BETWEEN_JACOBIANS;

        if reuse {
            unsafe { ((*(*a).ops).copy)(saved, a) };
            self.jac_current = false;
        } else {
            let work = self.work_ref();
            let (y_pred, ftemp) = (work.y_pred, work.ftemp);
            unsafe { self.rhs_in_corrector(t_new, y_pred, ftemp)? };
            unsafe { ((*(*a).ops).zero)(a) };
            self.stats.jac_evals += 1;
            let flag = match self.jac {
                Some(jac) => {
                    let work = self.work_ref();
                    unsafe {
                        jac(t_new, y_pred, ftemp, a, self.user_data, work.tmp1, work.tmp2, work.tmp3)
                    }
                }
                None => unsafe { self.difference_jacobian(t_new, y_pred, ftemp) },
            };
            if flag > 0 {
                return Err(Failure::Recoverable);
            }
            if flag < 0 {
                report!(NATIVE_EBADFUNC, "the Jacobian function failed unrecoverably");
                return Err(Failure::Fatal(NATIVE_LSETUP_FAIL));
            }
            unsafe { ((*(*a).ops).copy)(a, saved) };
            self.jac_current = true;
            self.last_jac_step = self.stats.steps;
        }

        unsafe { ((*(*a).ops).scale_add_i)(-gamma, a) };
        self.stats.lin_setups += 1;
        self.gamma_setup = gamma;
        self.last_setup_step = self.stats.steps;
        self.force_setup = false;

        match unsafe { native_linsol_setup(self.ls, a) } {
            0 => Ok(()),
            flag if flag > 0 => {
                self.force_setup = true;
                Err(Failure::Recoverable)
            }
            _ => {
                report!(NATIVE_ESING, "the linear solver setup failed unrecoverably");
                Err(Failure::Fatal(NATIVE_LSETUP_FAIL))
            }
        }
    }

    /// Forward-difference Jacobian, one column at a time. Each column of the
    /// matrix is wrapped in a data-less vector pointed at `col_ptrs[j]`.
    unsafe fn difference_jacobian(&mut self, t: Real, y: NVector, fy: NVector) -> c_int {
        let work = self.work_ref();
        let (ewt, tmp1) = (work.ewt, work.tmp1);
        let column = unsafe { nv_clone_empty(tmp1) };
        if column.is_null() {
            report!(NATIVE_ENOMEM, "allocation of the Jacobian column vector failed");
            return -1;
        }
        let c = unsafe { content(self.a) };
        let n = self.n;
        let srur = Real::EPSILON.sqrt();
        let fnorm = unsafe { nv_wrms_norm(fy, ewt) };
        let min_inc = if fnorm != 0.0 {
            1000.0 * self.h.abs() * Real::EPSILON * n as Real * fnorm
        } else {
            1.0
        };

        let mut flag = 0;
        for j in 0..n {
            unsafe {
                nv_set_data(*c.col_ptrs.add(j), column);
                let y_data = nv_data(y);
                let ewt_data = nv_data(ewt);
                let yj = *y_data.add(j);
                let inc = (srur * yj.abs()).max(min_inc / *ewt_data.add(j));
                *y_data.add(j) = yj + inc;
                flag = self.call_rhs(t, y, column);
                *y_data.add(j) = yj;
                if flag != 0 {
                    break;
                }
                nv_linear_sum(1.0 / inc, column, -1.0 / inc, fy, column);
            }
        }
        unsafe { nv_destroy(column) };
        flag
    }

    unsafe fn newton_iterate(&mut self, t_new: Real) -> Result<(), Failure> {
        let gamma = self.gamma_setup;
        let work = self.work_ref();
        let (y_corr, y_pred, base, ftemp, delta, ewt) = (
            work.y_corr,
            work.y_pred,
            work.base,
            work.ftemp,
            work.delta,
            work.ewt,
        );
        unsafe { nv_copy(y_pred, y_corr) };
        let mut del_prev = 0.0;
        for m in 0..MAX_CORRECTOR_ITERS {
            unsafe { self.rhs_in_corrector(t_new, y_corr, ftemp)? };
            unsafe {
                nv_linear_sum(gamma, ftemp, 1.0, base, delta);
                nv_linear_sum(1.0, delta, -1.0, y_corr, delta);
            }
            match unsafe { native_linsol_solve(self.ls, self.a, delta, delta, 0.0) } {
                0 => {}
                flag if flag > 0 => return Err(Failure::Recoverable),
                _ => {
                    report!(NATIVE_EFAILED, "the linear solve failed unrecoverably");
                    return Err(Failure::Fatal(NATIVE_LSOLVE_FAIL));
                }
            }
            let del = unsafe {
                nv_linear_sum(1.0, y_corr, 1.0, delta, y_corr);
                nv_wrms_norm(delta, ewt)
            };
            self.stats.nonlin_iters += 1;
            if converged(m, del, del_prev) {
                return Ok(());
            }
            if m > 0 && del > 2.0 * del_prev {
                return Err(Failure::Recoverable);
            }
            del_prev = del;
        }
        Err(Failure::Recoverable)
    }

    unsafe fn rhs_in_corrector(&mut self, t: Real, y: NVector, ydot: NVector) -> Result<(), Failure> {
        match unsafe { self.call_rhs(t, y, ydot) } {
            0 => Ok(()),
            flag if flag > 0 => Err(Failure::Recoverable),
            _ => {
                report!(NATIVE_EBADFUNC, "the right-hand side failed unrecoverably");
                Err(Failure::Fatal(NATIVE_RHSFUNC_FAIL))
            }
        }
    }
}

fn converged(m: usize, del: Real, del_prev: Real) -> bool {
    if m == 0 {
        return del <= CORRECTOR_TOL;
    }
    let rate = if del_prev > 0.0 { del / del_prev } else { 0.0 };
    del * rate.min(1.0) <= CORRECTOR_TOL || del <= CORRECTOR_TOL * 0.01
}
