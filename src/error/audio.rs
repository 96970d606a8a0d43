// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// These constants provide a single source of truth for error codes
/// shared between the core and any front-end reporting them.
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Tone request is malformed (non-finite level, level above full scale, ...)
    pub const INVALID_TONE_REQUEST: i32 = 1001;

    /// start() called while a tone is still active
    pub const TONE_ALREADY_ACTIVE: i32 = 1002;

    /// stop() called while the engine is idle
    pub const TONE_NOT_ACTIVE: i32 = 1003;

    /// Attack or release time is not positive
    pub const INVALID_ENVELOPE: i32 = 1004;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1005;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1006;

    /// Requested output device does not exist
    pub const DEVICE_NOT_FOUND: i32 = 1007;

    /// Output device cannot isolate two ear channels
    pub const UNSUPPORTED_CHANNEL_LAYOUT: i32 = 1008;

    /// Control queue towards the audio callback is full
    pub const COMMAND_QUEUE_FULL: i32 = 1009;

    /// Audio callback recorded a fault during the stream lifetime
    pub const CALLBACK_FAULT: i32 = 1010;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=ToneEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover the tone engine lifecycle, envelope configuration
/// and hardware access.
///
/// Error code range: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Tone request rejected before reaching the callback
    InvalidToneRequest { reason: String },

    /// Tone is already active; stop() must come first
    ToneAlreadyActive,

    /// Engine is idle; start() must come first
    ToneNotActive,

    /// Attack/release must both be positive
    InvalidEnvelope { attack_ms: f32, release_ms: f32 },

    /// Hardware error occurred
    HardwareError { details: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Named output device was not found
    DeviceNotFound { name: String },

    /// Device exposes fewer than two output channels
    UnsupportedChannelLayout { channels: u16 },

    /// Callback has not drained pending commands
    CommandQueueFull,

    /// Sticky callback status collected while the stream was running
    CallbackFault { flags: u32, details: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::InvalidToneRequest { .. } => AudioErrorCodes::INVALID_TONE_REQUEST,
            AudioError::ToneAlreadyActive => AudioErrorCodes::TONE_ALREADY_ACTIVE,
            AudioError::ToneNotActive => AudioErrorCodes::TONE_NOT_ACTIVE,
            AudioError::InvalidEnvelope { .. } => AudioErrorCodes::INVALID_ENVELOPE,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::DeviceNotFound { .. } => AudioErrorCodes::DEVICE_NOT_FOUND,
            AudioError::UnsupportedChannelLayout { .. } => {
                AudioErrorCodes::UNSUPPORTED_CHANNEL_LAYOUT
            }
            AudioError::CommandQueueFull => AudioErrorCodes::COMMAND_QUEUE_FULL,
            AudioError::CallbackFault { .. } => AudioErrorCodes::CALLBACK_FAULT,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::InvalidToneRequest { reason } => {
                format!("Invalid tone request: {}", reason)
            }
            AudioError::ToneAlreadyActive => {
                "Tone already active. Call stop() before start().".to_string()
            }
            AudioError::ToneNotActive => "Tone not active. Call start() first.".to_string(),
            AudioError::InvalidEnvelope {
                attack_ms,
                release_ms,
            } => format!(
                "Attack and release must be positive (attack={} ms, release={} ms)",
                attack_ms, release_ms
            ),
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::DeviceNotFound { name } => {
                format!("Output device not found: {}", name)
            }
            AudioError::UnsupportedChannelLayout { channels } => format!(
                "Output device has {} channel(s); two are required for ear isolation",
                channels
            ),
            AudioError::CommandQueueFull => {
                "Tone command queue full; audio callback is not running".to_string()
            }
            AudioError::CallbackFault { flags, details } => {
                format!("Audio callback fault (flags {:#06x}): {}", flags, details)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
