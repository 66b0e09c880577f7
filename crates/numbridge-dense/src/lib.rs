//! numbridge dense: matrix expressions and the buffers behind them.
//!
//! ## Module layout
//!
//! | Module   | Contents                                                           |
//! |----------|--------------------------------------------------------------------|
//! | `expr`   | [`DenseExpr`] / [`DenseExprMut`] over nalgebra matrices and views, [`FnExpr`], [`Layout`] |
//! | `scoped` | [`ScopedBuffer`], inline-or-heap scratch storage                   |
//! | `shared` | [`SharedMatrix`], reference-counted 2D buffer with [`RowMajor`] / [`ColMajor`] tags |
//!
//! Every consumer downstream wants column-major memory; [`evaluate`] and
//! [`DenseExpr::eval_column_major`] produce it from any expression,
//! transposing row-major sources on the way.

pub mod expr;
pub mod scoped;
pub mod shared;

pub use expr::{DenseExpr, DenseExprMut, FnExpr, Layout, ROW_SCRATCH};
pub use scoped::ScopedBuffer;
pub use shared::{ColMajor, LayoutTag, RowMajor, SharedMatrix};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DenseError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("expected a row or column vector, got a {rows}x{cols} matrix")]
    NotAVector { rows: usize, cols: usize },
    #[error("array must not contain infs or NaNs (first at ({row}, {col}))")]
    NonFinite { row: usize, col: usize },
}

/// Column-major copy of `expr`.
#[must_use]
pub fn evaluate(expr: &impl DenseExpr) -> Vec<f64> {
    let mut out = vec![0.0; expr.len()];
    // The buffer is sized from the expression, so the length always agrees.
    let _ = expr.eval_column_major(&mut out);
    out
}

/// `expr` as an owned nalgebra matrix.
#[must_use]
pub fn to_dmatrix(expr: &impl DenseExpr) -> DMatrix<f64> {
    DMatrix::from_vec(expr.nrows(), expr.ncols(), evaluate(expr))
}

/// Evaluated elements of a row or column vector expression.
pub fn evaluate_vector(expr: &impl DenseExpr) -> Result<Vec<f64>, DenseError> {
    let (rows, cols) = expr.shape();
    if rows != 1 && cols != 1 {
        return Err(DenseError::NotAVector { rows, cols });
    }
    // Row and column vectors share one element order.
    Ok(evaluate(expr))
}

/// Reject the first non-finite element, in column-major order.
pub fn ensure_finite(expr: &impl DenseExpr) -> Result<(), DenseError> {
    for col in 0..expr.ncols() {
        for row in 0..expr.nrows() {
            if !expr.get(row, col).is_finite() {
                return Err(DenseError::NonFinite { row, col });
            }
        }
    }
    Ok(())
}

/// Check that `expr` has exactly `expected` shape.
pub fn ensure_shape(expr: &impl DenseExpr, expected: (usize, usize)) -> Result<(), DenseError> {
    let actual = expr.shape();
    if actual != expected {
        return Err(DenseError::ShapeMismatch { expected, actual });
    }
    Ok(())
}
