// Error types for the audiometer core
//
// This module defines custom error types for tone output, calibration lookup
// and session orchestration, providing structured error handling with error
// codes suitable for front-ends that consume the core.

mod audio;
mod calibration;
mod session;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use session::{log_session_error, SessionError, SessionErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the core and its front-ends.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
