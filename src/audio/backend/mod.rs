//! Backend abstractions for the tone engine.
//!
//! A backend turns a [`ToneRenderer`] into a running output stream. The
//! renderer is moved into the backend's callback; the returned
//! [`OutputStream`] keeps the device alive until it is closed or dropped.

use serde::{Deserialize, Serialize};

use super::callback::ToneRenderer;
use crate::error::AudioError;

/// Parameters for opening an output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Output device name (substring match); `None` selects the default device
    pub device: Option<String>,
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Minimum number of output channels (at least 2)
    pub channels: u16,
    /// Fixed frames per callback; `None` lets the backend choose
    pub block_size: Option<u32>,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44_100,
            channels: 2,
            block_size: None,
        }
    }
}

/// A running output stream.
///
/// Not `Send`: some platform streams must be dropped on the thread that
/// created them.
pub trait OutputStream {
    /// Sample rate actually negotiated with the device
    fn sample_rate(&self) -> u32;
    /// Interleaved channel count of the device buffers
    fn channels(&self) -> u16;
    /// Stop the callback and release the device; repeated calls are no-ops
    fn close(&mut self) -> Result<(), AudioError>;
}

/// Trait implemented by platform audio backends.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a stream whose callback drives `renderer`.
    ///
    /// Implementations must call [`ToneRenderer::set_sample_rate`] with the
    /// negotiated rate before the first callback.
    fn open(
        &self,
        request: &StreamRequest,
        renderer: ToneRenderer,
    ) -> Result<Box<dyn OutputStream>, AudioError>;
}

pub(crate) fn require_stereo(channels: u16) -> Result<(), AudioError> {
    if channels < 2 {
        return Err(AudioError::UnsupportedChannelLayout { channels });
    }
    Ok(())
}

mod cpal;
pub use self::cpal::{list_output_devices, CpalBackend};

mod headless;
pub use headless::{HeadlessBackend, HeadlessMonitor};
