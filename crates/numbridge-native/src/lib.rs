//! numbridge-native: a small C-ABI numerical library.
//!
//! Everything in this crate is exposed the way a foreign C library would be:
//! `#[repr(C)]` structs, `unsafe extern "C"` entry points, integer status
//! codes and opaque handles. Callers own the memory they pass in and release
//! the handles they receive through the matching `*_free` / `destroy` entry.
//!
//! ## Module layout
//!
//! | Module     | Contents                                                          |
//! |------------|-------------------------------------------------------------------|
//! | `error`    | Error codes, [`native_strerror`], replaceable error handler       |
//! | `nvector`  | Opaque vector ABI: [`GenericVector`], 26-entry [`NVectorOps`]     |
//! | `matrix`   | Opaque dense matrix ABI: [`DenseContent`], [`MatrixOps`]          |
//! | `linsol`   | Dense LU direct linear solver over column-pointer tables          |
//! | `msolver`  | Low-order Adams / BDF multistep solver with functional or Newton  |
//!
//! Status convention for every solver entry point: `0` success, `> 0`
//! recoverable failure, `< 0` unrecoverable failure.

pub mod error;
pub mod linsol;
pub mod matrix;
pub mod msolver;
pub mod nvector;

pub use std::ffi::{c_char, c_int, c_void};

/// Floating-point type of every native buffer.
pub type Real = f64;

/// Index / length type of every native buffer.
pub type Index = i64;

pub use error::{
    ErrorHandlerFn, native_error, native_set_error_handler, native_strerror, NATIVE_EBADFUNC,
    NATIVE_EBADLEN, NATIVE_EBADTOL, NATIVE_EDOM, NATIVE_EFAILED, NATIVE_EFAULT, NATIVE_EINVAL,
    NATIVE_EMAXITER, NATIVE_ENOMEM, NATIVE_ENOTSQR, NATIVE_ERANGE, NATIVE_ESING, NATIVE_FAILURE,
    NATIVE_SUCCESS,
};
pub use linsol::{
    LinearSolver, native_dense_linsol_new, native_linsol_free, native_linsol_last_flag,
    native_linsol_setup, native_linsol_solve,
};
pub use matrix::{
    DenseContent, GenericMatrix, MatrixHandle, MatrixOps, native_dense_matrix_free,
    native_dense_matrix_new, native_dense_matrix_ops,
};
pub use msolver::{
    JacFn, NativeStats, RhsFn, native_msolver_create, native_msolver_flag_name,
    native_msolver_free, native_msolver_get_current_time, native_msolver_get_dky,
    native_msolver_get_stats, native_msolver_init, native_msolver_set_init_step,
    native_msolver_set_jac_fn, native_msolver_set_linear_solver, native_msolver_set_max_num_steps,
    native_msolver_set_max_step, native_msolver_set_user_data, native_msolver_solve,
    native_msolver_ss_tolerances, native_msolver_sv_tolerances,
};
pub use nvector::{GenericVector, NVector, NVECTOR_OPS_LEN, NVectorOps};
