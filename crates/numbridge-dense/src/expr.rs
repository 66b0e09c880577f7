//! Dense matrix expressions.
//!
//! A [`DenseExpr`] is anything that can report its shape and produce
//! elements by `(row, col)`. Expressions backed by contiguous storage also
//! expose it as a slice, which lets consumers copy (or alias) whole buffers
//! instead of walking elements.

use nalgebra::{Dim, Matrix, RawStorage, RawStorageMut};
use serde::{Deserialize, Serialize};

use crate::DenseError;
use crate::scoped::ScopedBuffer;

/// Rows up to this many columns are gathered without allocating.
pub const ROW_SCRATCH: usize = 32;

/// Natural element order of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    ColMajor,
    RowMajor,
    /// No contiguous order; elements are only reachable one by one.
    Strided,
}

pub trait DenseExpr {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn get(&self, row: usize, col: usize) -> f64;

    fn layout(&self) -> Layout {
        Layout::Strided
    }

    /// The whole expression as one contiguous column-major slice, if stored so.
    fn column_major_slice(&self) -> Option<&[f64]> {
        None
    }

    /// The whole expression as one contiguous row-major slice, if stored so.
    fn row_major_slice(&self) -> Option<&[f64]> {
        None
    }

    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn len(&self) -> usize {
        self.nrows() * self.ncols()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every element into `out` in column-major order.
    fn eval_column_major(&self, out: &mut [f64]) -> Result<(), DenseError> {
        let (nrows, ncols) = self.shape();
        if out.len() != nrows * ncols {
            return Err(DenseError::LengthMismatch {
                expected: nrows * ncols,
                actual: out.len(),
            });
        }
        if let Some(src) = self.column_major_slice() {
            out.copy_from_slice(src);
            return Ok(());
        }
        if let Some(src) = self.row_major_slice() {
            for (r, row) in src.chunks_exact(ncols.max(1)).enumerate().take(nrows) {
                for (c, &v) in row.iter().enumerate() {
                    out[c * nrows + r] = v;
                }
            }
            return Ok(());
        }
        match self.layout() {
            Layout::RowMajor => {
                // Lazy row-major sources are read a full row at a time.
                let mut row: ScopedBuffer<f64, ROW_SCRATCH> = ScopedBuffer::new(ncols);
                for r in 0..nrows {
                    for (c, slot) in row.iter_mut().enumerate() {
                        *slot = self.get(r, c);
                    }
                    for (c, &v) in row.iter().enumerate() {
                        out[c * nrows + r] = v;
                    }
                }
            }
            Layout::ColMajor | Layout::Strided => {
                for c in 0..ncols {
                    for r in 0..nrows {
                        out[c * nrows + r] = self.get(r, c);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Expressions whose column-major storage may be written in place.
pub trait DenseExprMut: DenseExpr {
    fn column_major_slice_mut(&mut self) -> Option<&mut [f64]>;
}

impl<E: DenseExpr + ?Sized> DenseExpr for &E {
    fn nrows(&self) -> usize {
        (**self).nrows()
    }
    fn ncols(&self) -> usize {
        (**self).ncols()
    }
    fn get(&self, row: usize, col: usize) -> f64 {
        (**self).get(row, col)
    }
    fn layout(&self) -> Layout {
        (**self).layout()
    }
    fn column_major_slice(&self) -> Option<&[f64]> {
        (**self).column_major_slice()
    }
    fn row_major_slice(&self) -> Option<&[f64]> {
        (**self).row_major_slice()
    }
}

fn strided_layout(nrows: usize, ncols: usize, strides: (usize, usize)) -> Layout {
    let (rstride, cstride) = strides;
    if (rstride == 1 || nrows <= 1) && (cstride == nrows || ncols <= 1) {
        Layout::ColMajor
    } else if (cstride == 1 || ncols <= 1) && (rstride == ncols || nrows <= 1) {
        Layout::RowMajor
    } else {
        Layout::Strided
    }
}

impl<R: Dim, C: Dim, S: RawStorage<f64, R, C>> DenseExpr for Matrix<f64, R, C, S> {
    fn nrows(&self) -> usize {
        self.shape().0
    }

    fn ncols(&self) -> usize {
        self.shape().1
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self[(row, col)]
    }

    fn layout(&self) -> Layout {
        let (nrows, ncols) = self.shape();
        strided_layout(nrows, ncols, self.strides())
    }

    fn column_major_slice(&self) -> Option<&[f64]> {
        if self.layout() != Layout::ColMajor {
            return None;
        }
        if self.is_empty() {
            return Some(&[]);
        }
        // SAFETY: unit row stride and a column stride equal to `nrows` make
        // the `nrows * ncols` elements from the base pointer contiguous.
        Some(unsafe { self.data.as_slice_unchecked() })
    }

    fn row_major_slice(&self) -> Option<&[f64]> {
        let (nrows, ncols) = self.shape();
        if self.layout() != Layout::RowMajor || nrows <= 1 || ncols <= 1 {
            return None;
        }
        // SAFETY: unit column stride and a row stride equal to `ncols`
        // cover `nrows * ncols` contiguous elements from the base pointer.
        Some(unsafe { self.data.as_slice_unchecked() })
    }
}

impl<R: Dim, C: Dim, S: RawStorageMut<f64, R, C>> DenseExprMut for Matrix<f64, R, C, S> {
    fn column_major_slice_mut(&mut self) -> Option<&mut [f64]> {
        if DenseExpr::layout(self) != Layout::ColMajor {
            return None;
        }
        if DenseExpr::is_empty(self) {
            return Some(&mut []);
        }
        // SAFETY: same contiguity argument as `column_major_slice`; the
        // exclusive borrow of `self` covers the whole slice.
        Some(unsafe { self.data.as_mut_slice_unchecked() })
    }
}

/// A lazy expression `f(row, col)`.
#[derive(Clone)]
pub struct FnExpr<F> {
    nrows: usize,
    ncols: usize,
    layout: Layout,
    f: F,
}

impl<F: Fn(usize, usize) -> f64> FnExpr<F> {
    #[must_use]
    pub fn new(nrows: usize, ncols: usize, f: F) -> Self {
        Self {
            nrows,
            ncols,
            layout: Layout::ColMajor,
            f,
        }
    }

    /// Evaluate row by row instead of column by column.
    #[must_use]
    pub fn row_major(mut self) -> Self {
        self.layout = Layout::RowMajor;
        self
    }
}

impl<F> std::fmt::Debug for FnExpr<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExpr")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl<F: Fn(usize, usize) -> f64> DenseExpr for FnExpr<F> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn get(&self, row: usize, col: usize) -> f64 {
        (self.f)(row, col)
    }
    fn layout(&self) -> Layout {
        self.layout
    }
}
