// Session error types and constants

use crate::error::{AudioError, CalibrationError, ErrorCode};
use log::error;
use std::fmt;

/// Session error code constants
///
/// Error code range: 3001-3006
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// Presentation level would exceed 0 dBFS
    pub const SIGNAL_DISTORTION: i32 = 3001;

    /// Cancellation was requested
    pub const CANCELLED: i32 = 3002;

    /// Calibration lookup failed
    pub const CALIBRATION: i32 = 3003;

    /// Tone engine failed
    pub const AUDIO: i32 = 3004;

    /// Configuration rejected at construction time
    pub const INVALID_CONFIG: i32 = 3005;

    /// Session worker thread panicked
    pub const WORKER_PANICKED: i32 = 3006;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=Session, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while presenting trials and running a session
///
/// Only `SignalDistortion` and `Cancelled` are recoverable: a distorted
/// combination is skipped with an undetermined threshold, a cancellation
/// ends the session without forwarding a partial result. Everything else is
/// a precondition or integration failure and aborts the session.
///
/// Error code range: 3001-3006
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Converted level is above full scale
    SignalDistortion {
        frequency: u32,
        level_dbhl: f32,
        level_dbfs: f32,
    },

    /// Cooperative cancellation observed
    Cancelled,

    /// Calibration lookup failed
    Calibration(CalibrationError),

    /// Tone engine failed
    Audio(AudioError),

    /// Configuration rejected
    InvalidConfig { reason: String },

    /// Session worker thread panicked
    WorkerPanicked,
}

impl SessionError {
    /// Patient-facing conditions that must never crash the session
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::SignalDistortion { .. } | SessionError::Cancelled
        )
    }
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::SignalDistortion { .. } => SessionErrorCodes::SIGNAL_DISTORTION,
            SessionError::Cancelled => SessionErrorCodes::CANCELLED,
            SessionError::Calibration(_) => SessionErrorCodes::CALIBRATION,
            SessionError::Audio(_) => SessionErrorCodes::AUDIO,
            SessionError::InvalidConfig { .. } => SessionErrorCodes::INVALID_CONFIG,
            SessionError::WorkerPanicked => SessionErrorCodes::WORKER_PANICKED,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::SignalDistortion {
                frequency,
                level_dbhl,
                level_dbfs,
            } => format!(
                "Signal distorted at {} Hz: {} dBHL maps to {} dBFS. \
                 Possible causes are an incorrect calibration or a severe hearing loss.",
                frequency, level_dbhl, level_dbfs
            ),
            SessionError::Cancelled => "Session cancelled".to_string(),
            SessionError::Calibration(err) => err.message(),
            SessionError::Audio(err) => err.message(),
            SessionError::InvalidConfig { reason } => {
                format!("Invalid configuration: {}", reason)
            }
            SessionError::WorkerPanicked => "Session worker thread panicked".to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Calibration(err) => Some(err),
            SessionError::Audio(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Audio(err)
    }
}

impl From<CalibrationError> for SessionError {
    fn from(err: CalibrationError) -> Self {
        SessionError::Calibration(err)
    }
}
