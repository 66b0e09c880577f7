//! numbridge runtime: modes, native error handling and evidence.
//!
//! ## Module layout
//!
//! | Module      | Contents                                                        |
//! |-------------|-----------------------------------------------------------------|
//! | `mode`      | [`RuntimeMode`] enum (Strict / Hardened)                        |
//! | `handler`   | [`ErrorHandlerGuard`], [`LibraryError`], native error codes     |
//! | `evidence`  | [`EvidenceLedger`], bounded JSONL-serializable audit trail      |
//!
//! Everything outside `handler` is safe code; `handler` owns the one
//! `extern "C"` callback the native library calls back into.

pub mod evidence;
pub mod handler;
pub mod mode;

// ── Re-exports: preserve the flat public API ────────────────────────
pub use evidence::EvidenceLedger;
pub use handler::{
    ErrorCode, ErrorHandlerGuard, LibraryError, clear_library_error, error_handler_installed,
    install_error_handler, record_library_error, take_library_error,
};
pub use mode::RuntimeMode;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Capacity used by [`EvidenceLedger::default`].
pub const DEFAULT_EVIDENCE_CAPACITY: usize = 256;

/// Milliseconds since the Unix epoch; `0` if the clock is before it.
#[must_use]
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ═══════════════════════════════════════════════════════════════════
// Test Helpers - Shared assertion and logging utilities
// ═══════════════════════════════════════════════════════════════════

/// Structured test log line, one JSON object per case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub test_id: String,
    pub timestamp_ms: u64,
    pub level: TestLogLevel,
    pub module: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RuntimeMode>,
    /// Native status code observed by the case, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestLogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Fail,
}

impl TestLogEntry {
    #[must_use]
    pub fn new(
        test_id: impl Into<String>,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            timestamp_ms: now_unix_ms(),
            level: TestLogLevel::Info,
            module: module.into(),
            message: message.into(),
            seed: None,
            mode: None,
            status: None,
            result: None,
        }
    }

    /// A failed result raises the level to `error`.
    #[must_use]
    pub fn with_result(mut self, result: TestResult) -> Self {
        if result == TestResult::Fail {
            self.level = TestLogLevel::Error;
        }
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    /// Serialize to JSON line for structured logging.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Assert `|actual - expected| <= atol + rtol * |expected|`.
pub fn assert_close(actual: f64, expected: f64, atol: f64, rtol: f64) {
    let tol = atol + rtol * expected.abs();
    assert!(
        (actual - expected).abs() <= tol,
        "assert_close failed: actual={actual} expected={expected} diff={} tol={tol}",
        (actual - expected).abs()
    );
}

/// Element-wise [`assert_close`] over equal-length slices.
pub fn assert_close_slice(actual: &[f64], expected: &[f64], atol: f64, rtol: f64) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "assert_close_slice: length mismatch: actual={} expected={}",
        actual.len(),
        expected.len()
    );
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        let tol = atol + rtol * e.abs();
        assert!(
            (a - e).abs() <= tol,
            "assert_close_slice[{idx}]: actual={a} expected={e} tol={tol}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_mode_defaults_to_strict() {
        assert_eq!(RuntimeMode::default(), RuntimeMode::Strict);
        assert!(RuntimeMode::Hardened.is_hardened());
        assert!(!RuntimeMode::Strict.is_hardened());
    }

    #[test]
    fn runtime_mode_serializes_by_name() {
        let json = serde_json::to_string(&RuntimeMode::Hardened).expect("serialize");
        assert_eq!(json, "\"Hardened\"");
        let back: RuntimeMode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, RuntimeMode::Hardened);
    }

    #[test]
    fn default_ledger_uses_default_capacity() {
        let ledger: EvidenceLedger<u8> = EvidenceLedger::default();
        assert_eq!(ledger.capacity(), DEFAULT_EVIDENCE_CAPACITY);
    }

    // ═══ Test helper tests ═══

    #[test]
    fn test_helpers_assert_close_exact() {
        assert_close(1.0, 1.0, 1e-12, 1e-12);
    }

    #[test]
    fn test_helpers_assert_close_within_atol() {
        assert_close(1.0 + 1e-13, 1.0, 1e-12, 0.0);
    }

    #[test]
    fn test_helpers_assert_close_within_rtol() {
        assert_close(100.0 + 1e-10, 100.0, 0.0, 1e-11);
    }

    #[test]
    #[should_panic(expected = "assert_close failed")]
    fn test_helpers_assert_close_rejects_far() {
        assert_close(1.0, 2.0, 1e-12, 1e-12);
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_helpers_assert_close_slice_length_mismatch() {
        assert_close_slice(&[1.0, 2.0], &[1.0], 1e-12, 1e-12);
    }

    #[test]
    fn test_helpers_log_entry_serializes() {
        let entry = TestLogEntry::new("test_foo", "numbridge_integrate", "advance passed")
            .with_result(TestResult::Pass)
            .with_seed(42)
            .with_mode(RuntimeMode::Strict);
        let json = entry.to_json_line();
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(parsed["test_id"], "test_foo");
        assert_eq!(parsed["result"], "pass");
        assert_eq!(parsed["seed"], 42);
        assert_eq!(parsed["mode"], "Strict");
        assert_eq!(parsed["level"], "info");
    }

    #[test]
    fn test_helpers_failed_case_logs_at_error_level() {
        let entry = TestLogEntry::new("test_baz", "numbridge_integrate", "advance failed")
            .with_status(-8)
            .with_result(TestResult::Fail);
        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_json_line()).expect("valid JSON");
        assert_eq!(parsed["level"], "error");
        assert_eq!(parsed["status"], -8);
    }

    #[test]
    fn test_helpers_log_entry_omits_none_fields() {
        let entry = TestLogEntry::new("test_bar", "numbridge_dense", "evaluated");
        let json = entry.to_json_line();
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
        assert!(parsed.get("seed").is_none());
        assert!(parsed.get("status").is_none());
        assert!(parsed.get("mode").is_none());
        assert!(parsed.get("result").is_none());
    }
}
