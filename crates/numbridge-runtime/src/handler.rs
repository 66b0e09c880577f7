//! Process-wide error handler for the native library.
//!
//! The native library reports every failure through a single, replaceable
//! callback and aborts the process when none is installed. Rust callers
//! hold an [`ErrorHandlerGuard`] for as long as they may call into the
//! library; the first guard installs [`record_library_error`], dropping the
//! last one restores the library default.
//!
//! Reports are formatted as `"<description>:<reason>. see[<file>:<line>]"`
//! and parked in a thread-local slot until [`take_library_error`] drains
//! it. A newer report replaces an unread older one.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_int};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use numbridge_native::{native_set_error_handler, native_strerror};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes of the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    Failure,
    Continue,
    Domain,
    Range,
    Fault,
    Invalid,
    Failed,
    Factor,
    Sanity,
    NoMemory,
    BadFunction,
    Runaway,
    MaxIterations,
    ZeroDivision,
    BadTolerance,
    Tolerance,
    Underflow,
    Overflow,
    Loss,
    Round,
    BadLength,
    NotSquare,
    Singular,
    Diverge,
    Unsupported,
    Unimplemented,
    Other(i32),
}

impl ErrorCode {
    #[must_use]
    pub const fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::Failure,
            -2 => Self::Continue,
            1 => Self::Domain,
            2 => Self::Range,
            3 => Self::Fault,
            4 => Self::Invalid,
            5 => Self::Failed,
            6 => Self::Factor,
            7 => Self::Sanity,
            8 => Self::NoMemory,
            9 => Self::BadFunction,
            10 => Self::Runaway,
            11 => Self::MaxIterations,
            12 => Self::ZeroDivision,
            13 => Self::BadTolerance,
            14 => Self::Tolerance,
            15 => Self::Underflow,
            16 => Self::Overflow,
            17 => Self::Loss,
            18 => Self::Round,
            19 => Self::BadLength,
            20 => Self::NotSquare,
            21 => Self::Singular,
            22 => Self::Diverge,
            23 => Self::Unsupported,
            24 => Self::Unimplemented,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => -1,
            Self::Continue => -2,
            Self::Domain => 1,
            Self::Range => 2,
            Self::Fault => 3,
            Self::Invalid => 4,
            Self::Failed => 5,
            Self::Factor => 6,
            Self::Sanity => 7,
            Self::NoMemory => 8,
            Self::BadFunction => 9,
            Self::Runaway => 10,
            Self::MaxIterations => 11,
            Self::ZeroDivision => 12,
            Self::BadTolerance => 13,
            Self::Tolerance => 14,
            Self::Underflow => 15,
            Self::Overflow => 16,
            Self::Loss => 17,
            Self::Round => 18,
            Self::BadLength => 19,
            Self::NotSquare => 20,
            Self::Singular => 21,
            Self::Diverge => 22,
            Self::Unsupported => 23,
            Self::Unimplemented => 24,
            Self::Other(code) => code,
        }
    }

    /// The library's own description of this code.
    #[must_use]
    pub fn description(self) -> &'static str {
        let ptr = native_strerror(self.raw());
        // SAFETY: `native_strerror` always returns a static NUL-terminated string.
        let text: &'static CStr = unsafe { CStr::from_ptr(ptr) };
        text.to_str().unwrap_or("unknown error code")
    }
}

/// An error reported by the native library through its handler.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct LibraryError {
    pub code: ErrorCode,
    pub reason: String,
    pub file: String,
    pub line: u32,
    /// `"<description>:<reason>. see[<file>:<line>]"`
    pub message: String,
}

impl LibraryError {
    #[must_use]
    pub fn new(code: ErrorCode, reason: &str, file: &str, line: u32) -> Self {
        let message = format!("{}:{reason}. see[{file}:{line}]", code.description());
        Self {
            code,
            reason: reason.to_owned(),
            file: file.to_owned(),
            line,
            message,
        }
    }
}

static INSTALLED: Mutex<usize> = Mutex::new(0);

thread_local! {
    static PENDING: RefCell<Option<LibraryError>> = const { RefCell::new(None) };
}

fn installed_count() -> MutexGuard<'static, usize> {
    INSTALLED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps the Rust error handler installed while alive.
#[derive(Debug)]
#[must_use = "the handler is removed again when the guard is dropped"]
pub struct ErrorHandlerGuard {
    _private: PhantomData<()>,
}

/// Install the Rust error handler, or add a reference to the installed one.
pub fn install_error_handler() -> ErrorHandlerGuard {
    let mut count = installed_count();
    if *count == 0 {
        let previous = native_set_error_handler(Some(record_library_error));
        log::debug!(
            "installed native error handler (replaced a custom handler: {})",
            previous.is_some()
        );
    }
    *count += 1;
    ErrorHandlerGuard {
        _private: PhantomData,
    }
}

impl Clone for ErrorHandlerGuard {
    fn clone(&self) -> Self {
        install_error_handler()
    }
}

impl Drop for ErrorHandlerGuard {
    fn drop(&mut self) {
        let mut count = installed_count();
        *count = count.saturating_sub(1);
        if *count == 0 {
            let _ = native_set_error_handler(None);
            log::debug!("restored the native default error handler");
        }
    }
}

/// Whether at least one [`ErrorHandlerGuard`] is alive.
#[must_use]
pub fn error_handler_installed() -> bool {
    *installed_count() > 0
}

/// Drain the report left on this thread by the native library, if any.
pub fn take_library_error() -> Option<LibraryError> {
    PENDING.with(|slot| slot.try_borrow_mut().ok().and_then(|mut s| s.take()))
}

/// Discard any unread report on this thread.
pub fn clear_library_error() {
    let _ = take_library_error();
}

/// Handler registered with the native library.
///
/// # Safety
///
/// `reason` and `file` must be null or NUL-terminated strings valid for the
/// duration of the call.
pub unsafe extern "C" fn record_library_error(
    reason: *const c_char,
    file: *const c_char,
    line: c_int,
    code: c_int,
) {
    // SAFETY: forwarded from the caller's contract.
    let reason = unsafe { lossy(reason) };
    let file = unsafe { lossy(file) };
    let error = LibraryError::new(
        ErrorCode::from_raw(code),
        &reason,
        &file,
        u32::try_from(line).unwrap_or(0),
    );
    log::debug!("native library reported: {error}");
    PENDING.with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = Some(error);
        }
    });
}

unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null and NUL-terminated per the caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_raw() {
        for raw in -2..=24 {
            assert_eq!(ErrorCode::from_raw(raw).raw(), raw);
        }
        assert_eq!(ErrorCode::from_raw(77), ErrorCode::Other(77));
    }

    #[test]
    fn descriptions_come_from_the_library() {
        assert_eq!(ErrorCode::Range.description(), "output range error");
        assert_eq!(ErrorCode::NotSquare.description(), "matrix not square");
        assert_eq!(ErrorCode::Other(999).description(), "unknown error code");
    }

    #[test]
    fn message_has_description_reason_and_location() {
        let err = LibraryError::new(ErrorCode::Invalid, "bad thing", "src/x.rs", 12);
        assert_eq!(
            err.message,
            "invalid argument supplied by user:bad thing. see[src/x.rs:12]"
        );
        assert_eq!(err.to_string(), err.message);
    }

    #[test]
    fn trampoline_parks_the_latest_report() {
        clear_library_error();
        unsafe {
            record_library_error(c"first".as_ptr(), c"a.c".as_ptr(), 1, 4);
            record_library_error(c"second".as_ptr(), c"b.c".as_ptr(), 2, 2);
        }
        let err = take_library_error().expect("pending report");
        assert_eq!(err.code, ErrorCode::Range);
        assert_eq!(err.reason, "second");
        assert!(err.message.starts_with("output range error:second"));
        assert!(take_library_error().is_none());
    }

    #[test]
    fn trampoline_tolerates_null_strings() {
        clear_library_error();
        unsafe { record_library_error(std::ptr::null(), std::ptr::null(), -3, 5) };
        let err = take_library_error().expect("pending report");
        assert_eq!(err.line, 0);
        assert_eq!(err.message, "generic failure:. see[:0]");
    }

    #[test]
    fn guards_are_reference_counted() {
        let outer = install_error_handler();
        let inner = outer.clone();
        assert!(error_handler_installed());
        drop(inner);
        assert!(error_handler_installed());
        drop(outer);
    }
}
