//! Typed errors and result aliases for the message bus.

use error_stack::Report;
use thiserror::Error;

/// Error-stack–backed result alias for bus operations.
///
/// Equivalent to `Result<T, error_stack::Report<BusError>>`.
pub type BusResult<T> = ::std::result::Result<T, Report<BusError>>;

/// Extension trait to convert `Result<T, BusError>` into [`BusResult<T>`].
pub trait IntoBusReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> BusResult<T>;
}

impl<T> IntoBusReport<T> for ::std::result::Result<T, BusError> {
    #[inline]
    fn into_report(self) -> BusResult<T> {
        self.map_err(Report::new)
    }
}

/// Errors raised by the message bus.
///
/// Dispatch itself never fails. Pattern construction and requests can.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// A regular expression pattern did not compile.
    #[error("Invalid subscription pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The pattern source as supplied by the caller.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// No responder was registered for the request topic.
    #[error("No responder for `{topic}`")]
    NoResponder { topic: String },

    /// The responder did not reply in time.
    #[error("Request to `{topic}` timed out after {timeout_ms}ms")]
    RequestTimeout { topic: String, timeout_ms: u64 },

    /// The responder returned an error or panicked.
    #[error("Responder for `{topic}` failed: {message}")]
    ResponderFailed { topic: String, message: String },
}
