//! Dense-matrix adapters for a C-ABI multistep ODE solver.
//!
//! | Module          | Role                                                        |
//! |-----------------|-------------------------------------------------------------|
//! | `nvector`       | Vector ABI adapter and the shared 26-entry operations table |
//! | `dense_matrix`  | Dense matrix ABI adapter with a column pointer table        |
//! | `linear_solver` | Native dense LU solver bound to one matrix adapter          |
//! | `callback`      | RHS and Jacobian trampolines behind `user_data`             |
//! | `driver`        | `Integrator` lifecycle around one native solver instance    |
//! | `api`           | `integrate()` over a time span                              |
//! | `validation`    | Tolerance and step option checks                            |

pub mod api;
pub mod callback;
pub mod dense_matrix;
pub mod driver;
pub mod error;
pub mod linear_solver;
pub mod nvector;
pub mod solver;
pub mod validation;

pub use api::{IntegrateOptions, IntegrateResult, integrate};
pub use callback::{CallbackError, CallbackResult, Jacobian};
pub use dense_matrix::DenseMatrixAdapter;
pub use driver::{Integrator, IntegratorOptions};
pub use error::IntegrateError;
pub use linear_solver::LinearSolverAdapter;
pub use nvector::{NVECTOR_ID_NALGEBRA, VectorAdapter};
pub use solver::{
    DriverState, IntegratorStats, IterationStrategy, MultistepMethod, SolverEvent,
    SolverEventKind, flag_name,
};
pub use validation::{
    EPS, IntegrateValidationError, MIN_RTOL, ToleranceValue, ToleranceWarning, ValidatedTolerance,
    validate_first_step, validate_max_step, validate_max_steps, validate_t_eval, validate_tol,
};
