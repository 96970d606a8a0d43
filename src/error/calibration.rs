// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2003
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// No calibration entry for the requested frequency
    pub const MISSING: i32 = 2001;

    /// Two entries share a frequency
    pub const DUPLICATE_FREQUENCY: i32 = 2002;

    /// Entry contains a non-finite constant or a zero frequency
    pub const INVALID_ENTRY: i32 = 2003;
}

/// Log a calibration error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=CalibrationTable, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
///
/// These errors cover the dBHL to dBFS conversion table. A missing
/// frequency is never approximated from its neighbours.
///
/// Error code range: 2001-2003
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// No exact-match entry for this frequency
    Missing { frequency: u32 },

    /// Table already holds an entry for this frequency
    DuplicateFrequency { frequency: u32 },

    /// Entry cannot be used for conversion
    InvalidEntry { frequency: u32, reason: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::Missing { .. } => CalibrationErrorCodes::MISSING,
            CalibrationError::DuplicateFrequency { .. } => {
                CalibrationErrorCodes::DUPLICATE_FREQUENCY
            }
            CalibrationError::InvalidEntry { .. } => CalibrationErrorCodes::INVALID_ENTRY,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::Missing { frequency } => {
                format!("No calibration entry for {} Hz", frequency)
            }
            CalibrationError::DuplicateFrequency { frequency } => {
                format!("Duplicate calibration entry for {} Hz", frequency)
            }
            CalibrationError::InvalidEntry { frequency, reason } => {
                format!("Invalid calibration entry for {} Hz: {}", frequency, reason)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::Missing { frequency: 900 }.code(),
            CalibrationErrorCodes::MISSING
        );
        assert_eq!(
            CalibrationError::DuplicateFrequency { frequency: 1000 }.code(),
            CalibrationErrorCodes::DUPLICATE_FREQUENCY
        );
        assert_eq!(
            CalibrationError::InvalidEntry {
                frequency: 1000,
                reason: "test".to_string()
            }
            .code(),
            CalibrationErrorCodes::INVALID_ENTRY
        );
    }

    #[test]
    fn test_calibration_error_messages() {
        let err = CalibrationError::Missing { frequency: 900 };
        assert_eq!(err.message(), "No calibration entry for 900 Hz");

        let err = CalibrationError::InvalidEntry {
            frequency: 250,
            reason: "reference is NaN".to_string(),
        };
        assert_eq!(
            err.message(),
            "Invalid calibration entry for 250 Hz: reference is NaN"
        );
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::Missing { frequency: 900 };
        let display = format!("{}", err);
        assert!(display.contains("CalibrationError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
