//! Library error codes and the process-wide error handler.
//!
//! Every failure detected inside the library is reported once through
//! [`native_error`] before the failing entry point returns its status code.
//! With no handler installed the library prints the report and aborts.

use std::ffi::{CStr, c_char, c_int};
use std::sync::Mutex;

pub const NATIVE_SUCCESS: c_int = 0;
pub const NATIVE_FAILURE: c_int = -1;
pub const NATIVE_CONTINUE: c_int = -2;
pub const NATIVE_EDOM: c_int = 1;
pub const NATIVE_ERANGE: c_int = 2;
pub const NATIVE_EFAULT: c_int = 3;
pub const NATIVE_EINVAL: c_int = 4;
pub const NATIVE_EFAILED: c_int = 5;
pub const NATIVE_EFACTOR: c_int = 6;
pub const NATIVE_ESANITY: c_int = 7;
pub const NATIVE_ENOMEM: c_int = 8;
pub const NATIVE_EBADFUNC: c_int = 9;
pub const NATIVE_ERUNAWAY: c_int = 10;
pub const NATIVE_EMAXITER: c_int = 11;
pub const NATIVE_EZERODIV: c_int = 12;
pub const NATIVE_EBADTOL: c_int = 13;
pub const NATIVE_ETOL: c_int = 14;
pub const NATIVE_EUNDRFLW: c_int = 15;
pub const NATIVE_EOVRFLW: c_int = 16;
pub const NATIVE_ELOSS: c_int = 17;
pub const NATIVE_EROUND: c_int = 18;
pub const NATIVE_EBADLEN: c_int = 19;
pub const NATIVE_ENOTSQR: c_int = 20;
pub const NATIVE_ESING: c_int = 21;
pub const NATIVE_EDIVERGE: c_int = 22;
pub const NATIVE_EUNSUP: c_int = 23;
pub const NATIVE_EUNIMPL: c_int = 24;

/// `handler(reason, file, line, code)`. Strings are NUL-terminated and only
/// valid for the duration of the call.
pub type ErrorHandlerFn =
    unsafe extern "C" fn(reason: *const c_char, file: *const c_char, line: c_int, code: c_int);

static HANDLER: Mutex<Option<ErrorHandlerFn>> = Mutex::new(None);

/// Textual description of an error code. The returned string is static.
#[unsafe(no_mangle)]
pub extern "C" fn native_strerror(code: c_int) -> *const c_char {
    let text: &'static CStr = match code {
        NATIVE_SUCCESS => c"success",
        NATIVE_FAILURE => c"failure",
        NATIVE_CONTINUE => c"the iteration has not converged yet",
        NATIVE_EDOM => c"input domain error",
        NATIVE_ERANGE => c"output range error",
        NATIVE_EFAULT => c"invalid pointer",
        NATIVE_EINVAL => c"invalid argument supplied by user",
        NATIVE_EFAILED => c"generic failure",
        NATIVE_EFACTOR => c"factorization failed",
        NATIVE_ESANITY => c"sanity check failed - shouldn't happen",
        NATIVE_ENOMEM => c"malloc failed",
        NATIVE_EBADFUNC => c"problem with user-supplied function",
        NATIVE_ERUNAWAY => c"iterative process is out of control",
        NATIVE_EMAXITER => c"exceeded max number of iterations",
        NATIVE_EZERODIV => c"tried to divide by zero",
        NATIVE_EBADTOL => c"specified tolerance is invalid or theoretically unattainable",
        NATIVE_ETOL => c"failed to reach the specified tolerance",
        NATIVE_EUNDRFLW => c"underflow",
        NATIVE_EOVRFLW => c"overflow",
        NATIVE_ELOSS => c"loss of accuracy",
        NATIVE_EROUND => c"roundoff error",
        NATIVE_EBADLEN => c"matrix/vector sizes are not conformant",
        NATIVE_ENOTSQR => c"matrix not square",
        NATIVE_ESING => c"apparent singularity detected",
        NATIVE_EDIVERGE => c"integral or series is divergent",
        NATIVE_EUNSUP => c"the required feature is not supported by this hardware platform",
        NATIVE_EUNIMPL => c"the requested feature is not (yet) implemented",
        _ => c"unknown error code",
    };
    text.as_ptr()
}

/// Install `handler` (or restore the default when `None`) and return the
/// previously installed handler.
#[unsafe(no_mangle)]
pub extern "C" fn native_set_error_handler(handler: Option<ErrorHandlerFn>) -> Option<ErrorHandlerFn> {
    let mut slot = HANDLER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *slot, handler)
}

/// Report an error through the installed handler.
///
/// # Safety
///
/// `reason` and `file` must be null or point to NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn native_error(
    reason: *const c_char,
    file: *const c_char,
    line: c_int,
    code: c_int,
) {
    let handler = *HANDLER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handler) = handler {
        // SAFETY: the caller upholds the string contract; the handler gets it unchanged.
        unsafe { handler(reason, file, line, code) };
        return;
    }

    // SAFETY: same string contract as above.
    let reason = unsafe { lossy(reason) };
    let file = unsafe { lossy(file) };
    eprintln!("numbridge-native: {file}:{line}: ERROR: {reason}");
    eprintln!("Default error handler invoked.");
    std::process::abort();
}

unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::from("(null)");
    }
    // SAFETY: non-null and NUL-terminated per the caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Report `$reason` (a string literal) with the current file and line.
macro_rules! report {
    ($code:expr, $reason:literal) => {
        // SAFETY: both strings are static and NUL-terminated.
        unsafe {
            $crate::error::native_error(
                concat!($reason, "\0").as_ptr().cast(),
                concat!(file!(), "\0").as_ptr().cast(),
                line!() as ::std::ffi::c_int,
                $code,
            )
        }
    };
}

pub(crate) use report;
