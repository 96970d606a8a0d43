// Audio module - real-time tone output with strict ear isolation
//
// ToneEngine (control side) sends start/stop commands through a lock-free
// SPSC queue to ToneRenderer (callback side), which owns the envelope and
// writes one ear channel while zeroing every other channel.

pub mod backend;
pub mod callback;
pub mod engine;
pub mod envelope;
pub mod status;

// Re-export commonly used types for convenience
pub use backend::{
    list_output_devices, AudioBackend, CpalBackend, HeadlessBackend, HeadlessMonitor,
    OutputStream, StreamRequest,
};
pub use callback::{ToneCommand, ToneRenderer};
pub use engine::{ToneEngine, ToneSettings};
pub use envelope::EnvelopeState;
pub use status::CallbackStatus;
