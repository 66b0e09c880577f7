//! Differential and property tests for dense expressions and buffers.
//!
//! Oracle values come from nalgebra itself: every evaluation path must
//! agree with `DMatrix` indexing of the same logical matrix.

use nalgebra::{DMatrix, Dyn, MatrixView};
use numbridge_dense::{
    ColMajor, DenseExpr, DenseExprMut, FnExpr, Layout, RowMajor, ScopedBuffer, SharedMatrix,
    evaluate, to_dmatrix,
};
use numbridge_runtime::{TestLogEntry, TestResult, assert_close_slice};
use proptest::prelude::*;

fn log_case(test_id: &str, message: &str) {
    let entry = TestLogEntry::new(test_id, "numbridge_dense::differential", message)
        .with_result(TestResult::Pass);
    eprintln!("{}", entry.to_json_line());
}

fn oracle(nrows: usize, ncols: usize, data_row_major: &[f64]) -> DMatrix<f64> {
    DMatrix::from_row_slice(nrows, ncols, data_row_major)
}

#[test]
fn every_source_kind_agrees_with_nalgebra() {
    let data: Vec<f64> = (0..12).map(|i| i as f64 * 0.5 - 2.0).collect();
    let expected = oracle(3, 4, &data);

    let row_buf = SharedMatrix::<RowMajor>::from_vec(3, 4, data.clone()).unwrap();
    let col_buf = row_buf.transposed_layout();
    let lazy = FnExpr::new(3, 4, |r, c| data[r * 4 + c]);
    let lazy_rows = FnExpr::new(3, 4, |r, c| data[r * 4 + c]).row_major();
    let strided = MatrixView::<f64, Dyn, Dyn, Dyn, Dyn>::from_slice_with_strides_generic(
        &data,
        Dyn(3),
        Dyn(4),
        Dyn(4),
        Dyn(1),
    );

    let expected_cm = expected.as_slice().to_vec();
    assert_close_slice(&evaluate(&row_buf), &expected_cm, 0.0, 0.0);
    assert_close_slice(&evaluate(&col_buf), &expected_cm, 0.0, 0.0);
    assert_close_slice(&evaluate(&lazy), &expected_cm, 0.0, 0.0);
    assert_close_slice(&evaluate(&lazy_rows), &expected_cm, 0.0, 0.0);
    assert_close_slice(&evaluate(&strided), &expected_cm, 0.0, 0.0);
    assert_close_slice(&evaluate(&expected), &expected_cm, 0.0, 0.0);
    log_case("every_source_kind_agrees_with_nalgebra", "6 sources, 3x4");
}

#[test]
fn wide_rows_spill_scratch_to_heap_and_still_agree() {
    let ncols = numbridge_dense::ROW_SCRATCH + 5;
    let lazy = FnExpr::new(2, ncols, |r, c| (r * 1000 + c) as f64).row_major();
    let expected = DMatrix::from_fn(2, ncols, |r, c| (r * 1000 + c) as f64);
    assert_eq!(to_dmatrix(&lazy), expected);
    assert!(!ScopedBuffer::<f64, { numbridge_dense::ROW_SCRATCH }>::new(ncols).is_static());
}

#[test]
fn column_major_buffers_alias_their_storage() {
    let mut buf = SharedMatrix::<ColMajor>::from_fn(2, 2, |r, c| (r + 2 * c) as f64);
    let ptr = buf.as_slice().as_ptr();
    assert_eq!(buf.column_major_slice().map(<[f64]>::as_ptr), Some(ptr));
    let slice = buf.column_major_slice_mut().unwrap();
    slice[3] = -1.0;
    assert_eq!(buf[(1, 1)], -1.0);
    assert_eq!(buf.layout(), Layout::ColMajor);
}

#[test]
fn shared_results_keep_one_allocation_until_written() {
    let base = SharedMatrix::<ColMajor>::from_fn(3, 3, |r, c| if r == c { 1.0 } else { 0.0 });
    let views: Vec<_> = (0..4).map(|_| base.share()).collect();
    assert_eq!(base.ref_count(), 5);
    assert!(views.iter().all(|v| v.shares_storage_with(&base)));
    drop(views);
    assert_eq!(base.ref_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_layout_round_trip_preserves_elements(
        nrows in 1usize..8,
        ncols in 1usize..8,
        seed in any::<u32>(),
    ) {
        let value = |r: usize, c: usize| f64::from(seed % 97) + (r * 31 + c * 7) as f64;
        let row = SharedMatrix::<RowMajor>::from_fn(nrows, ncols, value);
        let back = row.transposed_layout().transposed_layout();
        prop_assert_eq!(&back, &row);
        prop_assert_eq!(to_dmatrix(&row), DMatrix::from_fn(nrows, ncols, value));
    }

    #[test]
    fn prop_scoped_buffer_mode_follows_threshold(len in 0usize..64) {
        let buf: ScopedBuffer<f64, 16> = ScopedBuffer::new(len);
        prop_assert_eq!(buf.is_static(), len <= 16);
        prop_assert_eq!(buf.len(), len);
        prop_assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn prop_copy_on_write_isolates_owners(
        nrows in 1usize..6,
        ncols in 1usize..6,
        r in 0usize..6,
        c in 0usize..6,
        v in -1e6f64..1e6,
    ) {
        let r = r % nrows;
        let c = c % ncols;
        let original = SharedMatrix::<RowMajor>::zeros(nrows, ncols);
        let mut writer = original.share();
        writer[(r, c)] = v;
        prop_assert_eq!(original[(r, c)], 0.0);
        prop_assert_eq!(writer[(r, c)], v);
        prop_assert_eq!(original.ref_count(), 1);
    }
}
