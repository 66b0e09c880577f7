//! Opaque dense matrix ABI.
//!
//! A dense matrix is stored column-major in `data`; `cols[j]` must always be
//! `data + j * rows`. The operations in [`native_dense_matrix_ops`] rely on
//! the column table only, never on `data` directly.

use std::ffi::{c_int, c_void};
use std::ptr;

use crate::error::{NATIVE_EBADLEN, NATIVE_EINVAL, report};
use crate::nvector::{NVector, nv_data, nv_len};
use crate::{Index, Real};

pub type MatrixHandle = *mut GenericMatrix;

#[repr(C)]
pub struct GenericMatrix {
    pub content: *mut c_void,
    pub ops: *const MatrixOps,
}

/// Content of a dense matrix handle.
#[repr(C)]
pub struct DenseContent {
    pub rows: Index,
    pub cols: Index,
    pub data: *mut Real,
    pub ldata: Index,
    pub col_ptrs: *mut *mut Real,
}

pub const MATRIX_ID_DENSE: c_int = 0;

#[repr(C)]
pub struct MatrixOps {
    pub get_id: unsafe extern "C" fn(a: MatrixHandle) -> c_int,
    /// New library-owned matrix of the same shape; release with `destroy`.
    pub clone: unsafe extern "C" fn(a: MatrixHandle) -> MatrixHandle,
    /// Only valid for handles produced by `clone` or [`native_dense_matrix_new`].
    pub destroy: unsafe extern "C" fn(a: MatrixHandle),
    pub zero: unsafe extern "C" fn(a: MatrixHandle) -> c_int,
    /// b = a
    pub copy: unsafe extern "C" fn(a: MatrixHandle, b: MatrixHandle) -> c_int,
    /// a = c a + b
    pub scale_add: unsafe extern "C" fn(c: Real, a: MatrixHandle, b: MatrixHandle) -> c_int,
    /// a = c a + I
    pub scale_add_i: unsafe extern "C" fn(c: Real, a: MatrixHandle) -> c_int,
    /// y = a x
    pub matvec: unsafe extern "C" fn(a: MatrixHandle, x: NVector, y: NVector) -> c_int,
    pub space: unsafe extern "C" fn(a: MatrixHandle, lrw: *mut Index, liw: *mut Index) -> c_int,
}

static DENSE_MATRIX_OPS: MatrixOps = MatrixOps {
    get_id: dense_get_id,
    clone: dense_clone,
    destroy: dense_destroy,
    zero: dense_zero,
    copy: dense_copy,
    scale_add: dense_scale_add,
    scale_add_i: dense_scale_add_i,
    matvec: dense_matvec,
    space: dense_space,
};

/// The dense operation table. Callers building their own dense handles
/// attach this table to a [`DenseContent`] they own.
#[unsafe(no_mangle)]
pub extern "C" fn native_dense_matrix_ops() -> *const MatrixOps {
    &DENSE_MATRIX_OPS
}

/// Allocate a zeroed `rows x cols` dense matrix owned by the library.
#[unsafe(no_mangle)]
pub extern "C" fn native_dense_matrix_new(rows: Index, cols: Index) -> MatrixHandle {
    if rows <= 0 || cols <= 0 {
        report!(NATIVE_EINVAL, "matrix dimensions must be positive");
        return ptr::null_mut();
    }
    let (Ok(m), Ok(n)) = (usize::try_from(rows), usize::try_from(cols)) else {
        return ptr::null_mut();
    };
    let Some(len) = m.checked_mul(n) else {
        return ptr::null_mut();
    };

    let data: *mut Real = Box::into_raw(vec![0.0; len].into_boxed_slice()).cast();
    let col_ptrs: Vec<*mut Real> = (0..n).map(|j| data.wrapping_add(j * m)).collect();
    let col_ptrs: *mut *mut Real = Box::into_raw(col_ptrs.into_boxed_slice()).cast();
    let content = Box::new(DenseContent {
        rows,
        cols,
        data,
        ldata: rows * cols,
        col_ptrs,
    });
    Box::into_raw(Box::new(GenericMatrix {
        content: Box::into_raw(content).cast(),
        ops: &DENSE_MATRIX_OPS,
    }))
}

/// Release a matrix created by [`native_dense_matrix_new`] or `clone`.
///
/// # Safety
///
/// `a` must be null or a library-owned handle not yet released.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_dense_matrix_free(a: MatrixHandle) {
    if a.is_null() {
        return;
    }
    // SAFETY: `a` was produced by `native_dense_matrix_new`, so every pointer
    // below came from `Box::into_raw` with the recorded lengths.
    unsafe {
        let matrix = Box::from_raw(a);
        let content = Box::from_raw(matrix.content.cast::<DenseContent>());
        let len = content.ldata as usize;
        let n = content.cols as usize;
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(content.data, len)));
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(content.col_ptrs, n)));
    }
}

/// Borrow the dense content of `a`.
///
/// # Safety
///
/// `a` must be a valid dense handle.
pub(crate) unsafe fn content<'a>(a: MatrixHandle) -> &'a DenseContent {
    unsafe { &*(*a).content.cast::<DenseContent>() }
}

/// Mutable view of column `j`.
///
/// # Safety
///
/// `a` must be a valid dense handle, `j < cols`, and no other live
/// reference may cover the same column.
pub(crate) unsafe fn column_mut<'a>(a: MatrixHandle, j: usize) -> &'a mut [Real] {
    unsafe {
        let c = content(a);
        let col = *c.col_ptrs.add(j);
        std::slice::from_raw_parts_mut(col, c.rows as usize)
    }
}

unsafe fn shape(a: MatrixHandle) -> (usize, usize) {
    let c = unsafe { content(a) };
    (c.rows as usize, c.cols as usize)
}

unsafe extern "C" fn dense_get_id(_a: MatrixHandle) -> c_int {
    MATRIX_ID_DENSE
}

unsafe extern "C" fn dense_clone(a: MatrixHandle) -> MatrixHandle {
    let c = unsafe { content(a) };
    native_dense_matrix_new(c.rows, c.cols)
}

unsafe extern "C" fn dense_destroy(a: MatrixHandle) {
    unsafe { native_dense_matrix_free(a) }
}

unsafe extern "C" fn dense_zero(a: MatrixHandle) -> c_int {
    let (_, n) = unsafe { shape(a) };
    for j in 0..n {
        unsafe { column_mut(a, j) }.fill(0.0);
    }
    0
}

unsafe extern "C" fn dense_copy(a: MatrixHandle, b: MatrixHandle) -> c_int {
    let (m, n) = unsafe { shape(a) };
    if unsafe { shape(b) } != (m, n) {
        report!(NATIVE_EBADLEN, "matrix copy between different shapes");
        return -1;
    }
    if a == b {
        return 0;
    }
    for j in 0..n {
        let src = unsafe { column_mut(a, j) };
        let dst = unsafe { column_mut(b, j) };
        dst.copy_from_slice(src);
    }
    0
}

unsafe extern "C" fn dense_scale_add(c: Real, a: MatrixHandle, b: MatrixHandle) -> c_int {
    let (m, n) = unsafe { shape(a) };
    if unsafe { shape(b) } != (m, n) {
        report!(NATIVE_EBADLEN, "matrix scale-add between different shapes");
        return -1;
    }
    for j in 0..n {
        if a == b {
            for v in unsafe { column_mut(a, j) }.iter_mut() {
                *v = (c + 1.0) * *v;
            }
            continue;
        }
        let dst = unsafe { column_mut(a, j) };
        let src = unsafe { column_mut(b, j) };
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = c * *d + s;
        }
    }
    0
}

unsafe extern "C" fn dense_scale_add_i(c: Real, a: MatrixHandle) -> c_int {
    let (_, n) = unsafe { shape(a) };
    for j in 0..n {
        let col = unsafe { column_mut(a, j) };
        for (i, v) in col.iter_mut().enumerate() {
            *v *= c;
            if i == j {
                *v += 1.0;
            }
        }
    }
    0
}

unsafe extern "C" fn dense_matvec(a: MatrixHandle, x: NVector, y: NVector) -> c_int {
    let (m, n) = unsafe { shape(a) };
    if unsafe { nv_len(x) } != n || unsafe { nv_len(y) } != m {
        report!(NATIVE_EBADLEN, "matvec operand lengths do not match the matrix");
        return -1;
    }
    let xd = unsafe { nv_data(x) };
    let yd = unsafe { nv_data(y) };
    if xd == yd {
        report!(NATIVE_EINVAL, "matvec input and output must be distinct");
        return -1;
    }
    // SAFETY: distinct buffers of the checked lengths.
    let (xs, ys) = unsafe {
        (
            std::slice::from_raw_parts(xd, n),
            std::slice::from_raw_parts_mut(yd, m),
        )
    };
    ys.fill(0.0);
    for (j, &xj) in xs.iter().enumerate() {
        let col = unsafe { column_mut(a, j) };
        for (yi, aij) in ys.iter_mut().zip(col.iter()) {
            *yi += aij * xj;
        }
    }
    0
}

unsafe extern "C" fn dense_space(a: MatrixHandle, lrw: *mut Index, liw: *mut Index) -> c_int {
    let c = unsafe { content(a) };
    if !lrw.is_null() {
        unsafe { *lrw = c.ldata };
    }
    if !liw.is_null() {
        unsafe { *liw = 3 + c.cols };
    }
    0
}
