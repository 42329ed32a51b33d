//! Crate-wide error type and the `err_at!` helper macro.
//!
//! Every error carries the source location it was raised at, so that a
//! fatal I/O or invariant failure can be traced back to the call site
//! without a backtrace.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Malformed command-line-adjacent input: bad directory, wrong command.
    UsageError(String, String),
    /// A single malformed record: bad hex, bad JSON, bad tab line.
    FormatError(String, String),
    /// Conflicting non-empty metadata update, settings-version mismatch,
    /// or other "this should never happen" state.
    InvariantViolation(String, String),
    /// Underlying KV or file I/O failure.
    IOError(String, String),
    /// Point lookup miss. Usually handled as `Option::None`, not propagated;
    /// exists so `err_at!` has a variant for explicit "not found" errors.
    NotFound(String, String),
    /// Encoding (to bytes) failed.
    EncodeFail(String, String),
    /// Decoding (from bytes) failed.
    DecodeFail(String, String),
    /// A thread panicked or failed to join.
    ThreadFail(String, String),
    /// Inter-thread channel send/recv failed.
    IPCFail(String, String),
    /// A numeric conversion failed (e.g. `usize::try_from`).
    FailConvert(String, String),
    /// Feature recognized by the format but not implemented by this crate
    /// (e.g. EWF compressed chunk decoding).
    Unimplemented(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            UsageError(p, msg) => write!(f, "{} usage-error: {}", p, msg),
            FormatError(p, msg) => write!(f, "{} format-error: {}", p, msg),
            InvariantViolation(p, msg) => write!(f, "{} invariant-violation: {}", p, msg),
            IOError(p, msg) => write!(f, "{} io-error: {}", p, msg),
            NotFound(p, msg) => write!(f, "{} not-found: {}", p, msg),
            EncodeFail(p, msg) => write!(f, "{} encode-fail: {}", p, msg),
            DecodeFail(p, msg) => write!(f, "{} decode-fail: {}", p, msg),
            ThreadFail(p, msg) => write!(f, "{} thread-fail: {}", p, msg),
            IPCFail(p, msg) => write!(f, "{} ipc-fail: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} fail-convert: {}", p, msg),
            Unimplemented(p, msg) => write!(f, "{} unimplemented: {}", p, msg),
        }
    }
}

impl std::error::Error for Error {}

/// Stamp a `file!():line!()` prefix onto an error, in one of three shapes:
///
/// * `err_at!(Variant, expr)` — wrap a `Result`'s error side.
/// * `err_at!(Variant, expr, "fmt", args...)` — wrap a `Result`'s error
///   side, appending a formatted context message.
/// * `err_at!(Variant, msg: "fmt", args...)` — construct a fresh error with
///   a formatted message, no underlying `Result` to wrap.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let ctx = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{}: {}", ctx, err)))
            }
        }
    }};
}
