// ToneEngine - control handle for the real-time tone renderer
//
// The engine never touches samples. start()/stop() validate the request,
// keep a control-side mirror of the target gain and push a command to the
// renderer; the renderer applies it at the next block boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtrb::{Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use super::backend::{AudioBackend, OutputStream, StreamRequest};
use super::callback::{ToneCommand, ToneRenderer};
use super::envelope::db_to_linear;
use super::status::CallbackStatus;
use crate::ear::Ear;
use crate::error::{log_audio_error, AudioError};

/// Pending commands between two callbacks; one trial needs at most two
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Envelope timing shared by every tone of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSettings {
    /// Fade-in time in milliseconds
    pub attack_ms: f32,
    /// Fade-out time in milliseconds
    pub release_ms: f32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            attack_ms: 30.0,
            release_ms: 40.0,
        }
    }
}

impl ToneSettings {
    pub fn validate(&self) -> Result<(), AudioError> {
        let valid = |ms: f32| ms.is_finite() && ms > 0.0;
        if !valid(self.attack_ms) || !valid(self.release_ms) {
            return Err(AudioError::InvalidEnvelope {
                attack_ms: self.attack_ms,
                release_ms: self.release_ms,
            });
        }
        Ok(())
    }
}

pub struct ToneEngine {
    commands: Producer<ToneCommand>,
    status: Arc<CallbackStatus>,
    frames_rendered: Arc<AtomicU64>,
    settings: ToneSettings,
    sample_rate: u32,
    /// Control-side mirror of the renderer's target gain
    active_gain: f32,
    stream: Option<Box<dyn OutputStream>>,
    closed: bool,
}

impl ToneEngine {
    /// Create a connected engine/renderer pair without opening a device.
    ///
    /// The caller is responsible for driving [`ToneRenderer::render`].
    pub fn pair(
        settings: ToneSettings,
        sample_rate: u32,
    ) -> Result<(ToneEngine, ToneRenderer), AudioError> {
        settings.validate()?;
        if sample_rate == 0 {
            return Err(AudioError::StreamOpenFailed {
                reason: "sample rate must be positive".to_string(),
            });
        }

        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let status = Arc::new(CallbackStatus::new());
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let renderer = ToneRenderer::new(
            consumer,
            sample_rate,
            settings.attack_ms,
            settings.release_ms,
            Arc::clone(&status),
            Arc::clone(&frames_rendered),
        );
        let engine = ToneEngine {
            commands: producer,
            status,
            frames_rendered,
            settings,
            sample_rate,
            active_gain: 0.0,
            stream: None,
            closed: false,
        };
        Ok((engine, renderer))
    }

    /// Create an engine and start its output stream on `backend`
    pub fn open(
        settings: ToneSettings,
        backend: &dyn AudioBackend,
        request: &StreamRequest,
    ) -> Result<ToneEngine, AudioError> {
        let (mut engine, renderer) = Self::pair(settings, request.sample_rate)?;
        let stream = backend.open(request, renderer)?;
        engine.sample_rate = stream.sample_rate();
        log::info!(
            "[ToneEngine] Opened on {} backend: sample_rate={}, channels={}",
            backend.name(),
            stream.sample_rate(),
            stream.channels()
        );
        engine.stream = Some(stream);
        Ok(engine)
    }

    /// Begin a tone on one ear.
    ///
    /// Fails if a tone is already active or the level is not a finite value
    /// at or below full scale.
    pub fn start(&mut self, frequency: u32, level_dbfs: f32, ear: Ear) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::InvalidToneRequest {
                reason: "engine is closed".to_string(),
            });
        }
        if self.active_gain != 0.0 {
            return Err(AudioError::ToneAlreadyActive);
        }
        if !level_dbfs.is_finite() {
            return Err(AudioError::InvalidToneRequest {
                reason: format!("level must be finite, got {}", level_dbfs),
            });
        }
        if level_dbfs > 0.0 {
            return Err(AudioError::InvalidToneRequest {
                reason: format!("level {} dBFS exceeds full scale", level_dbfs),
            });
        }
        if frequency == 0 || frequency as u64 * 2 >= self.sample_rate as u64 {
            return Err(AudioError::InvalidToneRequest {
                reason: format!(
                    "frequency {} Hz outside (0, {}) Hz",
                    frequency,
                    self.sample_rate / 2
                ),
            });
        }

        let gain = db_to_linear(level_dbfs);
        if gain <= 0.0 || !gain.is_finite() {
            return Err(AudioError::InvalidToneRequest {
                reason: format!("level {} dBFS is below representable amplitude", level_dbfs),
            });
        }

        self.commands
            .push(ToneCommand::Start {
                frequency,
                gain,
                ear,
            })
            .map_err(|_| AudioError::CommandQueueFull)?;
        self.active_gain = gain;

        log::debug!(
            "[ToneEngine] start: {} Hz, {:.1} dBFS, ear={}",
            frequency,
            level_dbfs,
            ear
        );
        Ok(())
    }

    /// Ramp the active tone down over the release time
    pub fn stop(&mut self) -> Result<(), AudioError> {
        if self.active_gain == 0.0 {
            return Err(AudioError::ToneNotActive);
        }
        self.commands
            .push(ToneCommand::Stop)
            .map_err(|_| AudioError::CommandQueueFull)?;
        self.active_gain = 0.0;

        log::debug!("[ToneEngine] stop");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active_gain != 0.0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn settings(&self) -> ToneSettings {
        self.settings
    }

    /// Total frames written by the renderer
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Current sticky callback flags without clearing them
    pub fn status_flags(&self) -> u32 {
        self.status.flags()
    }

    /// Release the output device.
    ///
    /// An active tone is ramped down first. Callback faults recorded while
    /// the stream ran are returned as [`AudioError::CallbackFault`]. Safe to
    /// call more than once.
    pub fn close(&mut self) -> Result<(), AudioError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.active_gain != 0.0 && self.commands.push(ToneCommand::Stop).is_ok() {
            self.active_gain = 0.0;
            if self.stream.is_some() {
                let release = Duration::from_secs_f32(self.settings.release_ms / 1000.0);
                thread::sleep(release);
            }
        }

        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
        }

        let flags = self.status.take();
        if flags != 0 {
            return Err(AudioError::CallbackFault {
                flags,
                details: CallbackStatus::describe(flags),
            });
        }

        log::info!("[ToneEngine] Closed");
        Ok(())
    }
}

impl Drop for ToneEngine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log_audio_error(&err, "ToneEngine::drop");
        }
    }
}
