//! Exercises the library strictly through its exported C entry points, the
//! way a foreign caller would.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_int};
use std::ptr;

use numbridge_native::matrix::MATRIX_ID_DENSE;
use numbridge_native::msolver::{NATIVE_BDF, NATIVE_NEWTON, NATIVE_NO_MALLOC};
use numbridge_native::{
    DenseContent, GenericMatrix, Index, MatrixHandle, NATIVE_EFAULT, NATIVE_EINVAL, NATIVE_ERANGE,
    native_dense_linsol_new, native_dense_matrix_free, native_dense_matrix_new,
    native_dense_matrix_ops, native_linsol_free, native_linsol_setup, native_msolver_create,
    native_msolver_free, native_msolver_get_dky, native_set_error_handler, native_strerror,
};

thread_local! {
    static REPORTS: RefCell<Vec<(String, c_int)>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "C" fn record(reason: *const c_char, _file: *const c_char, _line: c_int, code: c_int) {
    let reason = unsafe { CStr::from_ptr(reason) }.to_string_lossy().into_owned();
    REPORTS.with(|r| r.borrow_mut().push((reason, code)));
}

fn take_reports() -> Vec<(String, c_int)> {
    REPORTS.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

unsafe fn content<'a>(a: MatrixHandle) -> &'a DenseContent {
    unsafe { &*(*a).content.cast::<DenseContent>() }
}

unsafe fn entry(a: MatrixHandle, i: usize, j: usize) -> f64 {
    unsafe { *(*content(a).col_ptrs.add(j)).add(i) }
}

unsafe fn set(a: MatrixHandle, i: usize, j: usize, v: f64) {
    unsafe { *(*content(a).col_ptrs.add(j)).add(i) = v };
}

#[test]
fn strerror_is_static_text() {
    let text = unsafe { CStr::from_ptr(native_strerror(NATIVE_ERANGE)) };
    assert_eq!(text.to_str().unwrap(), "output range error");
}

#[test]
fn library_matrix_ops_follow_the_column_table() {
    native_set_error_handler(Some(record));
    let a = native_dense_matrix_new(2, 3);
    assert!(!a.is_null());
    unsafe {
        let c = content(a);
        assert_eq!((c.rows, c.cols, c.ldata), (2, 3, 6));
        for j in 0..3 {
            assert_eq!(*c.col_ptrs.add(j), c.data.add(2 * j));
        }
        let ops = &*native_dense_matrix_ops();
        assert!(ptr::eq((*a).ops, ops));
        assert_eq!((ops.get_id)(a), MATRIX_ID_DENSE);

        set(a, 1, 2, 5.0);
        let b = (ops.clone)(a);
        assert_eq!((ops.copy)(a, b), 0);
        assert_eq!(entry(b, 1, 2), 5.0);
        assert_eq!((ops.zero)(a), 0);
        assert_eq!(entry(a, 1, 2), 0.0);
        assert_eq!(entry(b, 1, 2), 5.0);

        let (mut lrw, mut liw): (Index, Index) = (0, 0);
        assert_eq!((ops.space)(b, &mut lrw, &mut liw), 0);
        assert_eq!(lrw, 6);
        (ops.destroy)(b);
        native_dense_matrix_free(a);
    }
    assert!(take_reports().is_empty());
}

#[test]
fn non_positive_dimensions_are_reported() {
    native_set_error_handler(Some(record));
    assert!(native_dense_matrix_new(0, 3).is_null());
    let reports = take_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, NATIVE_EINVAL);
}

#[test]
fn linear_solver_refuses_a_null_template() {
    native_set_error_handler(Some(record));
    let a = native_dense_matrix_new(2, 2);
    unsafe {
        assert!(native_dense_linsol_new(ptr::null_mut(), a).is_null());
        assert_eq!(take_reports()[0].1, NATIVE_EFAULT);
        native_dense_matrix_free(a);
    }
}

#[test]
fn linear_solver_entry_points_accept_null_handles() {
    let mut dummy = GenericMatrix {
        content: ptr::null_mut(),
        ops: native_dense_matrix_ops(),
    };
    assert!(unsafe { native_linsol_setup(ptr::null_mut(), &mut dummy) } < 0);
    assert_eq!(unsafe { native_linsol_free(ptr::null_mut()) }, 0);
}

#[test]
fn uninitialized_solver_memory_is_rejected() {
    native_set_error_handler(Some(record));
    let mut mem = native_msolver_create(NATIVE_BDF, NATIVE_NEWTON);
    assert!(!mem.is_null());
    let status = unsafe { native_msolver_get_dky(mem, 0.0, 0, ptr::null_mut()) };
    assert_eq!(status, NATIVE_NO_MALLOC);
    assert_eq!(take_reports().len(), 1);
    unsafe { native_msolver_free(&mut mem) };
    assert!(mem.is_null());
    // Freeing a nulled pointer is a no-op.
    unsafe { native_msolver_free(&mut mem) };
}

#[test]
fn invalid_method_yields_null_memory() {
    native_set_error_handler(Some(record));
    assert!(native_msolver_create(42, NATIVE_NEWTON).is_null());
    assert_eq!(take_reports()[0].1, NATIVE_EINVAL);
}
