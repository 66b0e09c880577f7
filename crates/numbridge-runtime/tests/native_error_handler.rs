//! End-to-end checks of the error-handler lifecycle against the native
//! library: reports are captured instead of aborting, and the message
//! carries the library description, the reason and the source location.
//!
//! All tests produce structured JSON log lines.

use numbridge_native::{native_dense_matrix_new, native_strerror};
use numbridge_runtime::{
    ErrorCode, EvidenceLedger, TestLogEntry, TestResult, clear_library_error,
    error_handler_installed, install_error_handler, take_library_error,
};
use proptest::prelude::*;

fn log_case(test_id: &str, message: &str, pass: bool) {
    let entry = TestLogEntry::new(test_id, "numbridge_runtime::handler", message).with_result(
        if pass {
            TestResult::Pass
        } else {
            TestResult::Fail
        },
    );
    eprintln!("{}", entry.to_json_line());
}

#[test]
fn native_report_is_captured_while_guard_alive() {
    let _guard = install_error_handler();
    clear_library_error();

    let handle = native_dense_matrix_new(0, 3);
    assert!(handle.is_null());

    let err = take_library_error().expect("the library reported the bad dimension");
    assert_eq!(err.code, ErrorCode::Invalid);
    assert_eq!(err.reason, "matrix dimensions must be positive");
    assert!(err.file.ends_with("matrix.rs"), "file = {}", err.file);
    assert!(err.line > 0);
    assert!(
        err.message
            .starts_with("invalid argument supplied by user:matrix dimensions must be positive. see[")
    );
    log_case("native_report_is_captured", &err.message, true);
}

#[test]
fn nested_guards_keep_the_handler_installed() {
    let first = install_error_handler();
    {
        let _second = install_error_handler();
        assert!(error_handler_installed());
    }
    assert!(error_handler_installed());

    clear_library_error();
    assert!(native_dense_matrix_new(-1, 1).is_null());
    assert!(take_library_error().is_some());
    drop(first);
}

#[test]
fn reports_are_thread_local() {
    let _guard = install_error_handler();
    clear_library_error();
    let other = std::thread::spawn(|| {
        let _guard = install_error_handler();
        assert!(native_dense_matrix_new(0, 0).is_null());
        take_library_error().map(|e| e.code)
    })
    .join()
    .expect("thread finished");
    assert_eq!(other, Some(ErrorCode::Invalid));
    assert!(take_library_error().is_none());
}

#[test]
fn strerror_matches_error_code_description() {
    for raw in -2..=24 {
        let text = unsafe { std::ffi::CStr::from_ptr(native_strerror(raw)) };
        assert_eq!(text.to_str().ok(), Some(ErrorCode::from_raw(raw).description()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_ledger_never_exceeds_capacity(
        capacity in 0usize..16,
        values in proptest::collection::vec(any::<u32>(), 0..64),
    ) {
        let mut ledger = EvidenceLedger::new(capacity);
        for v in &values {
            ledger.record(*v);
        }
        prop_assert!(ledger.len() <= capacity.max(1));
        prop_assert_eq!(ledger.len() as u64 + ledger.evicted(), values.len() as u64);
        prop_assert_eq!(ledger.latest(), values.last());
    }

    #[test]
    fn prop_error_code_raw_round_trip(raw in any::<i32>()) {
        prop_assert_eq!(ErrorCode::from_raw(raw).raw(), raw);
    }
}
