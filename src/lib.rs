// Audiometer Core - pure-tone threshold audiometry
// Real-time tone output, response capture and the Hughson-Westlake staircase

// Module declarations
pub mod audio;
pub mod calibration;
pub mod config;
pub mod ear;
pub mod error;
pub mod response;
pub mod session;
pub mod testing;
pub mod threshold;
pub mod trial;

// Re-exports for convenience
pub use audio::{AudioBackend, CpalBackend, HeadlessBackend, StreamRequest, ToneEngine, ToneSettings};
pub use calibration::{CalibrationEntry, CalibrationTable};
pub use config::{AppConfig, FrequencyPreset, SessionConfig, ToneConfig};
pub use ear::Ear;
pub use error::{AudioError, CalibrationError, ErrorCode, SessionError};
pub use response::{InputSource, InputSourceKind, ResponseCapture};
pub use session::{
    start_session, BroadcastObserver, CancelToken, CombinationResult, Session, SessionEvent,
    SessionHandle, SessionObserver, SessionPlan, SessionProgress, SessionSummary,
};
pub use threshold::{EstimateKind, Threshold, ThresholdEstimate};
pub use trial::{Trial, TrialRequest, TrialResult, TrialRunner};
