//! Dense matrix ABI adapter.
//!
//! The native dense matrix is a [`DenseContent`]: a column-major data
//! pointer plus a table of per-column pointers that must always satisfy
//! `col_ptrs[j] == data + j * rows`. The adapter owns the column table and
//! either owns the data or aliases a caller's column-major storage.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use nalgebra::{DMatrix, DMatrixView};
use numbridge_dense::{DenseExpr, DenseExprMut, ensure_shape, evaluate};
use numbridge_native::{DenseContent, GenericMatrix, Index, MatrixHandle, Real, native_dense_matrix_ops};

use crate::IntegrateError;

/// A column-major buffer presented to the native library as a dense matrix.
pub struct DenseMatrixAdapter<'a> {
    handle: NonNull<GenericMatrix>,
    content: NonNull<DenseContent>,
    nrows: usize,
    ncols: usize,
    /// Boxed slice owned by the adapter; null when aliasing.
    owned: *mut [Real],
    col_ptrs: *mut [*mut Real],
    _borrow: PhantomData<&'a mut [f64]>,
}

impl DenseMatrixAdapter<'static> {
    /// Owned column-major copy of `expr`.
    #[must_use]
    pub fn from_expr(expr: &impl DenseExpr) -> Self {
        let (nrows, ncols) = expr.shape();
        Self::with_owned(nrows, ncols, evaluate(expr))
    }

    #[must_use]
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::with_owned(nrows, ncols, vec![0.0; nrows * ncols])
    }

    fn with_owned(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        let owned = Box::into_raw(data.into_boxed_slice());
        // SAFETY: `owned` holds exactly `nrows * ncols` elements.
        unsafe { Self::build(nrows, ncols, owned.cast::<Real>(), owned) }
    }
}

impl<'a> DenseMatrixAdapter<'a> {
    /// Zero-copy view of `source` when its storage is one contiguous
    /// column-major block; an owned copy otherwise. Writes by the solver
    /// reach `source` only in the first case, see [`is_aliased`](Self::is_aliased).
    pub fn alias<E: DenseExprMut>(source: &'a mut E) -> Self {
        let (nrows, ncols) = source.shape();
        let contiguous = source
            .column_major_slice_mut()
            .map(|s| (s.as_mut_ptr(), s.len()));
        match contiguous {
            Some((data, len)) if len == nrows * ncols => {
                log::trace!("aliasing {nrows}x{ncols} column-major storage");
                let empty: *mut [Real] = ptr::slice_from_raw_parts_mut(ptr::null_mut(), 0);
                // SAFETY: `data` covers `len` elements that stay exclusively
                // borrowed for `'a`.
                unsafe { Self::build(nrows, ncols, data, empty) }
            }
            _ => {
                log::trace!("copying {nrows}x{ncols} strided or row-major storage");
                DenseMatrixAdapter::from_expr(&*source)
            }
        }
    }

    /// # Safety
    ///
    /// `data` must address `nrows * ncols` elements valid for `'a`; `owned`
    /// is either null or the boxed slice behind `data`.
    unsafe fn build(nrows: usize, ncols: usize, data: *mut Real, owned: *mut [Real]) -> Self {
        let col_ptrs = Box::into_raw(column_table(data, nrows, ncols));
        let content = Box::new(DenseContent {
            rows: nrows as Index,
            cols: ncols as Index,
            data,
            ldata: (nrows * ncols) as Index,
            col_ptrs: col_ptrs.cast::<*mut Real>(),
        });
        let content = NonNull::from(Box::leak(content));
        let handle = Box::new(GenericMatrix {
            content: content.as_ptr().cast(),
            ops: native_dense_matrix_ops(),
        });
        Self {
            handle: NonNull::from(Box::leak(handle)),
            content,
            nrows,
            ncols,
            owned,
            col_ptrs,
            _borrow: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> MatrixHandle {
        self.handle.as_ptr()
    }

    fn content(&self) -> &DenseContent {
        // SAFETY: the adapter owns the content until drop.
        unsafe { self.content.as_ref() }
    }

    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.ncols
    }

    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.nrows * self.ncols
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the data belongs to the storage passed to [`alias`](Self::alias).
    #[must_use]
    pub fn is_aliased(&self) -> bool {
        self.owned.cast::<Real>().is_null()
    }

    #[must_use]
    pub fn data_ptr(&self) -> *const f64 {
        self.content().data
    }

    #[must_use]
    pub fn column_pointers(&self) -> &[*mut f64] {
        // SAFETY: the table holds `ncols` entries and lives as long as `self`.
        unsafe { &*self.col_ptrs }
    }

    /// `col_ptrs[j] == data + j * rows` for every column.
    #[must_use]
    pub fn column_pointers_consistent(&self) -> bool {
        let c = self.content();
        ptr::eq(c.col_ptrs, self.col_ptrs.cast::<*mut Real>())
            && self
                .column_pointers()
                .iter()
                .enumerate()
                .all(|(j, &p)| ptr::eq(p, c.data.wrapping_add(j * self.nrows)))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        let data = self.content().data;
        if self.is_empty() || data.is_null() {
            return &[];
        }
        // SAFETY: `data` addresses `len()` elements and no native call is
        // running while `self` is borrowed.
        unsafe { std::slice::from_raw_parts(data, self.len()) }
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        let data = self.content().data;
        if self.is_empty() || data.is_null() {
            return &mut [];
        }
        // SAFETY: as `as_slice`, exclusive through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(data, self.len()) }
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(
            row < self.nrows && col < self.ncols,
            "index ({row}, {col}) out of bounds for a {}x{} matrix",
            self.nrows,
            self.ncols
        );
        self.as_slice()[col * self.nrows + row]
    }

    #[must_use]
    pub fn as_view(&self) -> DMatrixView<'_, f64> {
        DMatrixView::from_slice(self.as_slice(), self.nrows, self.ncols)
    }

    #[must_use]
    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        self.as_view().into_owned()
    }

    /// Re-evaluate `expr` into this matrix. The shape must not change.
    pub fn assign(&mut self, expr: &impl DenseExpr) -> Result<(), IntegrateError> {
        ensure_shape(expr, self.shape())?;
        expr.eval_column_major(self.as_mut_slice())?;
        self.refresh_column_pointers();
        Ok(())
    }

    fn refresh_column_pointers(&mut self) {
        let data = self.content().data;
        let nrows = self.nrows;
        // SAFETY: the table holds `ncols` entries owned by `self`.
        let table = unsafe { &mut *self.col_ptrs };
        for (j, slot) in table.iter_mut().enumerate() {
            *slot = data.wrapping_add(j * nrows);
        }
        // SAFETY: content is owned by `self`.
        unsafe { self.content.as_mut() }.col_ptrs = self.col_ptrs.cast::<*mut Real>();
    }
}

fn column_table(data: *mut Real, nrows: usize, ncols: usize) -> Box<[*mut Real]> {
    (0..ncols).map(|j| data.wrapping_add(j * nrows)).collect()
}

impl DenseExpr for DenseMatrixAdapter<'_> {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        DenseMatrixAdapter::get(self, row, col)
    }

    fn layout(&self) -> numbridge_dense::Layout {
        numbridge_dense::Layout::ColMajor
    }

    fn column_major_slice(&self) -> Option<&[f64]> {
        Some(self.as_slice())
    }
}

impl Drop for DenseMatrixAdapter<'_> {
    fn drop(&mut self) {
        // SAFETY: every pointer below was produced by `Box::into_raw` /
        // `Box::leak` in `build` and is released exactly once here.
        unsafe {
            drop(Box::from_raw(self.handle.as_ptr()));
            drop(Box::from_raw(self.content.as_ptr()));
            drop(Box::from_raw(self.col_ptrs));
            if !self.owned.cast::<Real>().is_null() {
                drop(Box::from_raw(self.owned));
            }
        }
    }
}

impl std::fmt::Debug for DenseMatrixAdapter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseMatrixAdapter")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("aliased", &self.is_aliased())
            .finish_non_exhaustive()
    }
}
