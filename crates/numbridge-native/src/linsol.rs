//! Direct dense linear solver (LU with partial pivoting).
//!
//! The factorization overwrites the matrix passed to `setup`; `solve` must be
//! called with the same, still factored, matrix.

use std::ffi::c_int;
use std::ptr;

use crate::error::{NATIVE_EBADLEN, NATIVE_EFAULT, NATIVE_ENOTSQR, report};
use crate::matrix::{MatrixHandle, column_mut, content};
use crate::nvector::{NVector, nv_copy, nv_data, nv_len};
use crate::{Index, Real};

pub const LS_SUCCESS: c_int = 0;
pub const LS_MEM_NULL: c_int = -1;
pub const LS_ILL_INPUT: c_int = -2;

/// Opaque linear solver handle.
pub struct LinearSolver {
    n: usize,
    pivots: Vec<usize>,
    last_flag: c_int,
}

/// Create a dense LU solver for systems shaped like `y` and `a`.
///
/// Returns null when the shapes disagree or `a` is not square.
///
/// # Safety
///
/// `y` must be a valid vector and `a` a valid dense matrix handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_dense_linsol_new(y: NVector, a: MatrixHandle) -> *mut LinearSolver {
    if y.is_null() || a.is_null() {
        report!(NATIVE_EFAULT, "linear solver template vector or matrix is null");
        return ptr::null_mut();
    }
    let c = unsafe { content(a) };
    if c.rows != c.cols {
        report!(NATIVE_ENOTSQR, "dense linear solver requires a square matrix");
        return ptr::null_mut();
    }
    let n = c.rows as usize;
    if unsafe { nv_len(y) } != n {
        report!(NATIVE_EBADLEN, "vector length does not match the matrix dimension");
        return ptr::null_mut();
    }
    Box::into_raw(Box::new(LinearSolver {
        n,
        pivots: vec![0; n],
        last_flag: LS_SUCCESS,
    }))
}

/// Factor `a` in place. Returns `k + 1 > 0` when the `k`-th pivot is zero.
///
/// # Safety
///
/// `ls` must come from [`native_dense_linsol_new`]; `a` must be a valid
/// dense handle of the solver's dimension.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_linsol_setup(ls: *mut LinearSolver, a: MatrixHandle) -> c_int {
    let Some(ls) = (unsafe { ls.as_mut() }) else {
        return LS_MEM_NULL;
    };
    if a.is_null() || unsafe { content(a) }.rows as usize != ls.n {
        ls.last_flag = LS_ILL_INPUT;
        return LS_ILL_INPUT;
    }
    let flag = unsafe { dense_getrf(a, ls.n, &mut ls.pivots) };
    ls.last_flag = c_int::try_from(flag).unwrap_or(c_int::MAX);
    ls.last_flag
}

/// Solve `a x = b` with the factorization from the last setup. `x` and `b`
/// may be the same vector.
///
/// # Safety
///
/// Arguments must be valid handles of the solver's dimension.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_linsol_solve(
    ls: *mut LinearSolver,
    a: MatrixHandle,
    x: NVector,
    b: NVector,
    _tol: Real,
) -> c_int {
    let Some(ls) = (unsafe { ls.as_mut() }) else {
        return LS_MEM_NULL;
    };
    if a.is_null() || x.is_null() || b.is_null() || unsafe { nv_len(x) } != ls.n {
        ls.last_flag = LS_ILL_INPUT;
        return LS_ILL_INPUT;
    }
    if x != b {
        unsafe { nv_copy(b, x) };
    }
    // SAFETY: `x` holds `n` reals and is not covered by any column of `a`.
    let rhs = unsafe { std::slice::from_raw_parts_mut(nv_data(x), ls.n) };
    unsafe { dense_getrs(a, ls.n, &ls.pivots, rhs) };
    ls.last_flag = LS_SUCCESS;
    LS_SUCCESS
}

/// Flag returned by the most recent setup or solve.
///
/// # Safety
///
/// `ls` must be null or a live solver handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_linsol_last_flag(ls: *const LinearSolver) -> c_int {
    unsafe { ls.as_ref() }.map_or(LS_MEM_NULL, |ls| ls.last_flag)
}

/// Release a solver handle.
///
/// # Safety
///
/// `ls` must be null or a handle from [`native_dense_linsol_new`] that has
/// not been released yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_linsol_free(ls: *mut LinearSolver) -> c_int {
    if !ls.is_null() {
        drop(unsafe { Box::from_raw(ls) });
    }
    LS_SUCCESS
}

unsafe fn dense_getrf(a: MatrixHandle, n: usize, pivots: &mut [usize]) -> Index {
    for k in 0..n {
        let l = {
            let col_k = unsafe { column_mut(a, k) };
            let mut l = k;
            for i in (k + 1)..n {
                if col_k[i].abs() > col_k[l].abs() {
                    l = i;
                }
            }
            if col_k[l] == 0.0 {
                return (k + 1) as Index;
            }
            l
        };
        pivots[k] = l;

        if l != k {
            for j in 0..n {
                unsafe { column_mut(a, j) }.swap(l, k);
            }
        }

        let col_k = unsafe { column_mut(a, k) };
        let mult = 1.0 / col_k[k];
        for v in &mut col_k[(k + 1)..n] {
            *v *= mult;
        }

        for j in (k + 1)..n {
            let col_j = unsafe { column_mut(a, j) };
            let a_kj = col_j[k];
            if a_kj != 0.0 {
                for i in (k + 1)..n {
                    col_j[i] -= a_kj * col_k[i];
                }
            }
        }
    }
    0
}

unsafe fn dense_getrs(a: MatrixHandle, n: usize, pivots: &[usize], b: &mut [Real]) {
    for (k, &pk) in pivots.iter().enumerate() {
        if pk != k {
            b.swap(k, pk);
        }
    }

    for k in 0..n {
        let col_k = unsafe { column_mut(a, k) };
        let bk = b[k];
        for i in (k + 1)..n {
            b[i] -= col_k[i] * bk;
        }
    }

    for k in (0..n).rev() {
        let col_k = unsafe { column_mut(a, k) };
        b[k] /= col_k[k];
        let bk = b[k];
        for i in 0..k {
            b[i] -= col_k[i] * bk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{native_dense_matrix_free, native_dense_matrix_new};

    #[test]
    fn getrf_getrs_solve_pivoted_system() {
        // [[0, 1], [2, 3]] x = [1, 8]  →  x = [2.5, 1]
        let a = native_dense_matrix_new(2, 2);
        unsafe {
            column_mut(a, 0).copy_from_slice(&[0.0, 2.0]);
            column_mut(a, 1).copy_from_slice(&[1.0, 3.0]);
            let mut pivots = vec![0; 2];
            assert_eq!(dense_getrf(a, 2, &mut pivots), 0);
            let mut b = [1.0, 8.0];
            dense_getrs(a, 2, &pivots, &mut b);
            approx::assert_relative_eq!(b[0], 2.5, epsilon = 1e-14);
            approx::assert_relative_eq!(b[1], 1.0, epsilon = 1e-14);
            native_dense_matrix_free(a);
        }
    }

    #[test]
    fn getrf_reports_singular_column() {
        let a = native_dense_matrix_new(2, 2);
        unsafe {
            column_mut(a, 0).copy_from_slice(&[1.0, 2.0]);
            column_mut(a, 1).copy_from_slice(&[2.0, 4.0]);
            let mut pivots = vec![0; 2];
            assert_eq!(dense_getrf(a, 2, &mut pivots), 2);
            native_dense_matrix_free(a);
        }
    }
}
