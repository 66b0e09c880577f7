//! Dense direct linear solver bound to one matrix adapter.

use std::ffi::c_int;
use std::ptr::NonNull;

use numbridge_dense::DenseExpr;
use numbridge_native::{
    LinearSolver, native_dense_linsol_new, native_linsol_free, native_linsol_setup,
    native_linsol_solve,
};
use numbridge_runtime::{ErrorHandlerGuard, clear_library_error, install_error_handler, take_library_error};

use crate::{DenseMatrixAdapter, IntegrateError, VectorAdapter};

/// Native LU solver and the matrix it factors in place.
///
/// After [`setup`](Self::setup) the bound matrix holds the LU factors, not
/// the matrix that was assigned.
pub struct LinearSolverAdapter {
    raw: NonNull<LinearSolver>,
    matrix: DenseMatrixAdapter<'static>,
    _guard: ErrorHandlerGuard,
}

impl LinearSolverAdapter {
    /// Bind a solver to `matrix`, which must be square with the length of
    /// `template`.
    pub fn new(
        template: &VectorAdapter<'_>,
        matrix: DenseMatrixAdapter<'static>,
    ) -> Result<Self, IntegrateError> {
        let n = template.len();
        if matrix.shape() != (n, n) {
            return Err(IntegrateError::ShapeMismatch {
                what: "linear solver matrix",
                expected: (n, n),
                actual: matrix.shape(),
            });
        }
        let guard = install_error_handler();
        clear_library_error();
        // SAFETY: both handles are valid and outlive the call.
        let raw = unsafe { native_dense_linsol_new(template.raw(), matrix.raw()) };
        let Some(raw) = NonNull::new(raw) else {
            if let Some(report) = take_library_error() {
                log::warn!("linear solver construction failed: {report}");
            }
            return Err(IntegrateError::OutOfMemory {
                what: "dense linear solver",
            });
        };
        log::debug!("created a {n}x{n} dense linear solver");
        Ok(Self {
            raw,
            matrix,
            _guard: guard,
        })
    }

    pub(crate) fn raw(&self) -> *mut LinearSolver {
        self.raw.as_ptr()
    }

    #[must_use]
    pub fn n(&self) -> usize {
        self.matrix.nrows()
    }

    #[must_use]
    pub fn matrix(&self) -> &DenseMatrixAdapter<'static> {
        &self.matrix
    }

    /// Assign `expr` to the bound matrix and factor it.
    pub fn setup(&mut self, expr: &impl DenseExpr) -> Result<(), IntegrateError> {
        self.matrix.assign(expr)?;
        clear_library_error();
        // SAFETY: `raw` and the matrix handle stay valid for the call.
        let status = unsafe { native_linsol_setup(self.raw(), self.matrix.raw()) };
        check("linear solver setup", status)
    }

    /// Solve in place with the last factorization.
    pub fn solve(&mut self, rhs: &mut [f64]) -> Result<(), IntegrateError> {
        let n = self.n();
        if rhs.len() != n {
            return Err(IntegrateError::ShapeMismatch {
                what: "linear solver right-hand side",
                expected: (n, 1),
                actual: (rhs.len(), 1),
            });
        }
        clear_library_error();
        let b = VectorAdapter::borrowed(rhs);
        // SAFETY: `b` aliases `rhs`; the solver supports `x == b`.
        let status =
            unsafe { native_linsol_solve(self.raw(), self.matrix.raw(), b.raw(), b.raw(), 0.0) };
        check("linear solve", status)
    }
}

fn check(operation: &'static str, status: c_int) -> Result<(), IntegrateError> {
    if status == 0 {
        return Ok(());
    }
    let detail = if status > 0 {
        Some(format!("singular matrix: zero pivot in column {}", status - 1))
    } else {
        take_library_error().map(|e| e.message)
    };
    log::debug!("{operation} returned {status}");
    Err(IntegrateError::Solver {
        operation,
        status,
        name: if status > 0 { "SINGULAR" } else { "ILL_INPUT" }.to_owned(),
        detail,
    })
}

impl Drop for LinearSolverAdapter {
    fn drop(&mut self) {
        // SAFETY: released once; the matrix field drops after this.
        unsafe { native_linsol_free(self.raw.as_ptr()) };
        log::trace!("released the dense linear solver");
    }
}

impl std::fmt::Debug for LinearSolverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearSolverAdapter")
            .field("n", &self.n())
            .field("matrix", &self.matrix)
            .finish()
    }
}
