#![forbid(unsafe_code)]

//! Reference-counted 2D buffer with a compile-time layout.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::DenseError;
use crate::expr::{DenseExpr, DenseExprMut, Layout};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::RowMajor {}
    impl Sealed for super::ColMajor {}
}

/// Storage order marker for [`SharedMatrix`].
pub trait LayoutTag: sealed::Sealed + Copy + Default + fmt::Debug + Send + Sync + 'static {
    const LAYOUT: Layout;
    /// The other order.
    type Flipped: LayoutTag;

    fn offset(row: usize, col: usize, nrows: usize, ncols: usize) -> usize;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowMajor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColMajor;

impl LayoutTag for RowMajor {
    const LAYOUT: Layout = Layout::RowMajor;
    type Flipped = ColMajor;

    #[inline]
    fn offset(row: usize, col: usize, _nrows: usize, ncols: usize) -> usize {
        row * ncols + col
    }
}

impl LayoutTag for ColMajor {
    const LAYOUT: Layout = Layout::ColMajor;
    type Flipped = RowMajor;

    #[inline]
    fn offset(row: usize, col: usize, nrows: usize, _ncols: usize) -> usize {
        col * nrows + row
    }
}

/// Shared `nrows x ncols` buffer. Clones share one allocation; the first
/// write through a shared handle copies it.
pub struct SharedMatrix<L: LayoutTag> {
    nrows: usize,
    ncols: usize,
    data: Arc<Vec<f64>>,
    _layout: PhantomData<L>,
}

impl<L: LayoutTag> SharedMatrix<L> {
    #[must_use]
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_parts(nrows, ncols, vec![0.0; nrows * ncols])
    }

    #[must_use]
    pub fn from_fn(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = vec![0.0; nrows * ncols];
        for r in 0..nrows {
            for c in 0..ncols {
                data[L::offset(r, c, nrows, ncols)] = f(r, c);
            }
        }
        Self::from_parts(nrows, ncols, data)
    }

    /// Wrap `data`, which must already be in `L` order.
    pub fn from_vec(nrows: usize, ncols: usize, data: Vec<f64>) -> Result<Self, DenseError> {
        if data.len() != nrows * ncols {
            return Err(DenseError::LengthMismatch {
                expected: nrows * ncols,
                actual: data.len(),
            });
        }
        Ok(Self::from_parts(nrows, ncols, data))
    }

    /// Evaluate any expression into a new buffer.
    #[must_use]
    pub fn from_expr(expr: &impl DenseExpr) -> Self {
        Self::from_fn(expr.nrows(), expr.ncols(), |r, c| expr.get(r, c))
    }

    fn from_parts(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        Self {
            nrows,
            ncols,
            data: Arc::new(data),
            _layout: PhantomData,
        }
    }

    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.ncols
    }

    /// Another handle to the same allocation.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            nrows: self.nrows,
            ncols: self.ncols,
            data: Arc::clone(&self.data),
            _layout: PhantomData,
        }
    }

    /// Number of handles sharing this allocation.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Elements in `L` order.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Elements in `L` order; detaches from other handles first.
    pub fn make_mut(&mut self) -> &mut [f64] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// The same matrix stored in the other order.
    #[must_use]
    pub fn transposed_layout(&self) -> SharedMatrix<L::Flipped> {
        SharedMatrix::from_fn(self.nrows, self.ncols, |r, c| self[(r, c)])
    }

    /// Element-wise image, in a fresh allocation.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_parts(self.nrows, self.ncols, self.data.iter().map(|&v| f(v)).collect())
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.nrows && col < self.ncols,
            "index ({row}, {col}) out of bounds for a {}x{} matrix",
            self.nrows,
            self.ncols
        );
        L::offset(row, col, self.nrows, self.ncols)
    }
}

impl<L: LayoutTag> Clone for SharedMatrix<L> {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl<L: LayoutTag> fmt::Debug for SharedMatrix<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMatrix")
            .field("layout", &L::LAYOUT)
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl<L: LayoutTag> PartialEq for SharedMatrix<L> {
    fn eq(&self, other: &Self) -> bool {
        self.nrows == other.nrows && self.ncols == other.ncols && self.data == other.data
    }
}

impl<L: LayoutTag> Index<(usize, usize)> for SharedMatrix<L> {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[self.offset(row, col)]
    }
}

impl<L: LayoutTag> IndexMut<(usize, usize)> for SharedMatrix<L> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        let offset = self.offset(row, col);
        &mut Arc::make_mut(&mut self.data)[offset]
    }
}

impl<L: LayoutTag> DenseExpr for SharedMatrix<L> {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self[(row, col)]
    }

    fn layout(&self) -> Layout {
        L::LAYOUT
    }

    fn column_major_slice(&self) -> Option<&[f64]> {
        (L::LAYOUT == Layout::ColMajor).then(|| self.as_slice())
    }

    fn row_major_slice(&self) -> Option<&[f64]> {
        (L::LAYOUT == Layout::RowMajor).then(|| self.as_slice())
    }
}

impl DenseExprMut for SharedMatrix<ColMajor> {
    fn column_major_slice_mut(&mut self) -> Option<&mut [f64]> {
        Some(self.make_mut())
    }
}
