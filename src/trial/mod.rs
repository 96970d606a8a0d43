// Trial module - "present tone, observe response"
//
// A trial converts the requested dBHL level through the calibration table,
// plays one tone on one ear, and decides whether the patient responded.
// The threshold algorithm only talks to the TrialRunner trait, so it can be
// driven by real audio or by a simulated patient.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::audio::ToneEngine;
use crate::calibration::CalibrationTable;
use crate::config::SessionConfig;
use crate::ear::Ear;
use crate::error::SessionError;
use crate::response::ResponseCapture;
use crate::session::CancelToken;

/// One tone to present
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub frequency: u32,
    pub level_dbhl: f32,
    pub ear: Ear,
}

/// Outcome of one trial. `level` is in dBHL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub level: f32,
    pub responded: bool,
}

/// How a trial judges and paces the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationMode {
    /// Release must follow within the tolerance; randomized pause
    Staircase,
    /// Any press counts; short fixed pause
    Familiarization,
}

pub trait TrialRunner {
    /// Present one tone and report whether it was heard.
    ///
    /// `SignalDistortion` if the level would exceed full scale, `Cancelled`
    /// if cancellation was observed while the trial was running.
    fn present(
        &mut self,
        request: TrialRequest,
        mode: PresentationMode,
    ) -> Result<TrialResult, SessionError>;

    /// Wait for the explicit "I heard it" press and release.
    /// `Ok(false)` on timeout.
    fn await_acknowledgement(&mut self) -> Result<bool, SessionError>;

    /// Forget all response state before a new frequency/ear combination
    fn reset(&mut self);

    /// Release resources at the end of a session
    fn finish(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Timing parameters used by [`Trial`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialTiming {
    pub tone_duration: Duration,
    pub release_tolerance: Duration,
    pub pause_min: Duration,
    pub pause_max: Duration,
    pub familiarization_pause: Duration,
    pub familiarization_release_timeout: Duration,
    pub acknowledgement_timeout: Duration,
    pub acknowledgement_grace: Duration,
    pub poll: Duration,
}

impl From<&SessionConfig> for TrialTiming {
    fn from(config: &SessionConfig) -> Self {
        Self {
            tone_duration: Duration::from_millis(config.tone_duration_ms),
            release_tolerance: Duration::from_millis(config.release_tolerance_ms),
            pause_min: Duration::from_millis(config.pause_ms[0]),
            pause_max: Duration::from_millis(config.pause_ms[1]),
            familiarization_pause: Duration::from_millis(config.familiarization_pause_ms),
            familiarization_release_timeout: Duration::from_millis(
                config.familiarization_release_timeout_ms,
            ),
            acknowledgement_timeout: Duration::from_millis(config.acknowledgement_timeout_ms),
            acknowledgement_grace: Duration::from_millis(config.acknowledgement_grace_ms),
            poll: config.cancel_poll(),
        }
    }
}

/// Trial runner backed by a real tone engine and response capture
pub struct Trial {
    engine: ToneEngine,
    response: Arc<ResponseCapture>,
    calibration: CalibrationTable,
    timing: TrialTiming,
    cancel: CancelToken,
    rng: StdRng,
}

impl Trial {
    pub fn new(
        engine: ToneEngine,
        response: Arc<ResponseCapture>,
        calibration: CalibrationTable,
        timing: TrialTiming,
        cancel: CancelToken,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            engine,
            response,
            calibration,
            timing,
            cancel,
            rng,
        }
    }

    pub fn engine(&self) -> &ToneEngine {
        &self.engine
    }

    fn inter_trial_pause(&mut self) -> Duration {
        let (min, max) = (self.timing.pause_min, self.timing.pause_max);
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// Repeat a bounded response wait in poll-sized chunks until it succeeds,
    /// the deadline passes, or cancellation is observed.
    fn wait_until(
        &self,
        deadline: Instant,
        wait: impl Fn(&ResponseCapture, Duration) -> bool,
    ) -> Result<bool, SessionError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait(&self.response, remaining.min(self.timing.poll)) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn pause(&self, duration: Duration) -> Result<(), SessionError> {
        if self.cancel.sleep(duration, self.timing.poll) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }
}

impl TrialRunner for Trial {
    fn present(
        &mut self,
        request: TrialRequest,
        mode: PresentationMode,
    ) -> Result<TrialResult, SessionError> {
        let level_dbfs = self
            .calibration
            .to_device_level(request.frequency, request.level_dbhl)?;
        if level_dbfs > 0.0 {
            return Err(SessionError::SignalDistortion {
                frequency: request.frequency,
                level_dbhl: request.level_dbhl,
                level_dbfs,
            });
        }

        self.response.clear();
        self.engine
            .start(request.frequency, level_dbfs, request.ear)?;

        let held = self
            .cancel
            .sleep(self.timing.tone_duration, self.timing.poll);
        self.engine.stop()?;
        if !held {
            log::debug!("[Trial] Cancelled during tone");
            return Err(SessionError::Cancelled);
        }

        let stopped_at = Instant::now();
        let pressed = self.response.pressed_during_window();

        let responded = match mode {
            PresentationMode::Staircase => {
                // A button still held past the tolerance is not a response
                pressed
                    && self.wait_until(stopped_at + self.timing.release_tolerance, |r, t| {
                        r.wait_for_release(t)
                    })?
            }
            PresentationMode::Familiarization => {
                if pressed {
                    let deadline = stopped_at + self.timing.familiarization_release_timeout;
                    self.wait_until(deadline, |r, t| r.wait_for_release(t))?;
                }
                pressed
            }
        };

        log::debug!(
            "[Trial] {} Hz {:.1} dBHL ({:.1} dBFS) ear={} -> {}",
            request.frequency,
            request.level_dbhl,
            level_dbfs,
            request.ear,
            if responded { "heard" } else { "not heard" }
        );

        let pause = match mode {
            PresentationMode::Staircase => self.inter_trial_pause(),
            PresentationMode::Familiarization => self.timing.familiarization_pause,
        };
        self.pause(pause)?;

        Ok(TrialResult {
            level: request.level_dbhl,
            responded,
        })
    }

    fn await_acknowledgement(&mut self) -> Result<bool, SessionError> {
        self.response.clear();
        let started = Instant::now();

        let pressed = self.wait_until(started + self.timing.acknowledgement_timeout, |r, t| {
            r.wait_for_press(t)
        })?;
        if !pressed {
            log::warn!("[Trial] No acknowledgement within timeout");
            return Ok(false);
        }

        let deadline =
            started + self.timing.acknowledgement_timeout + self.timing.acknowledgement_grace;
        let released = self.wait_until(deadline, |r, t| r.wait_for_release(t))?;
        if !released {
            log::warn!("[Trial] Acknowledgement press was not released");
        }
        Ok(released)
    }

    fn reset(&mut self) {
        self.response.clear();
    }

    /// Close the tone engine, surfacing callback faults
    fn finish(&mut self) -> Result<(), SessionError> {
        self.engine.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{HeadlessBackend, StreamRequest, ToneSettings};
    use std::thread;

    fn timing() -> TrialTiming {
        TrialTiming {
            tone_duration: Duration::from_millis(100),
            release_tolerance: Duration::from_millis(50),
            pause_min: Duration::from_millis(5),
            pause_max: Duration::from_millis(10),
            familiarization_pause: Duration::from_millis(5),
            familiarization_release_timeout: Duration::from_millis(50),
            acknowledgement_timeout: Duration::from_millis(200),
            acknowledgement_grace: Duration::from_millis(100),
            poll: Duration::from_millis(10),
        }
    }

    fn make_trial(backend: &HeadlessBackend, cancel: CancelToken) -> (Trial, Arc<ResponseCapture>) {
        let request = StreamRequest {
            sample_rate: 16_000,
            block_size: Some(160),
            ..StreamRequest::default()
        };
        let settings = ToneSettings {
            attack_ms: 5.0,
            release_ms: 5.0,
        };
        let engine = ToneEngine::open(settings, backend, &request).unwrap();
        let response = Arc::new(ResponseCapture::new());
        let trial = Trial::new(
            engine,
            Arc::clone(&response),
            CalibrationTable::default(),
            timing(),
            cancel,
            Some(7),
        );
        (trial, response)
    }

    fn request(level_dbhl: f32) -> TrialRequest {
        TrialRequest {
            frequency: 1000,
            level_dbhl,
            ear: Ear::Left,
        }
    }

    /// Press `press_at` after the call, release `release_at` after the call
    fn patient(
        response: &Arc<ResponseCapture>,
        press_at: u64,
        release_at: u64,
    ) -> thread::JoinHandle<()> {
        let response = Arc::clone(response);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(press_at));
            response.on_press();
            thread::sleep(Duration::from_millis(release_at - press_at));
            response.on_release();
        })
    }

    #[test]
    fn test_no_press_is_no_response() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, _response) = make_trial(&backend, CancelToken::new());
        let result = trial
            .present(request(30.0), PresentationMode::Staircase)
            .unwrap();
        assert_eq!(
            result,
            TrialResult {
                level: 30.0,
                responded: false
            }
        );
        assert!(!trial.engine().is_active());
    }

    #[test]
    fn test_release_within_tolerance_is_response() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, response) = make_trial(&backend, CancelToken::new());
        // Tone is 100 ms: press at 20 ms, release 40 ms after the tone ends
        let handle = patient(&response, 20, 140);
        let result = trial
            .present(request(30.0), PresentationMode::Staircase)
            .unwrap();
        handle.join().unwrap();
        assert!(result.responded);
    }

    #[test]
    fn test_release_after_tolerance_is_no_response() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, response) = make_trial(&backend, CancelToken::new());
        // Release 120 ms after the tone ends, tolerance is 50 ms
        let handle = patient(&response, 20, 220);
        let result = trial
            .present(request(30.0), PresentationMode::Staircase)
            .unwrap();
        handle.join().unwrap();
        assert!(!result.responded);
    }

    #[test]
    fn test_familiarization_counts_any_press() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, response) = make_trial(&backend, CancelToken::new());
        let handle = patient(&response, 20, 300);
        let result = trial
            .present(request(30.0), PresentationMode::Familiarization)
            .unwrap();
        assert!(result.responded);
        handle.join().unwrap();
    }

    #[test]
    fn test_distortion_rejected_before_tone() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, _response) = make_trial(&backend, CancelToken::new());
        // 1000 Hz: -84 - 4 + 95 = +7 dBFS
        let err = trial
            .present(request(95.0), PresentationMode::Staircase)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::SignalDistortion {
                frequency: 1000,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert!(!trial.engine().is_active());
    }

    #[test]
    fn test_uncalibrated_frequency_is_fatal() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, _response) = make_trial(&backend, CancelToken::new());
        let err = trial
            .present(
                TrialRequest {
                    frequency: 1100,
                    level_dbhl: 30.0,
                    ear: Ear::Right,
                },
                PresentationMode::Staircase,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::Calibration(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_cancel_mid_tone_stops_engine() {
        let backend = HeadlessBackend::new(160);
        let cancel = CancelToken::new();
        let (mut trial, _response) = make_trial(&backend, cancel.clone());
        let mut slow = timing();
        slow.tone_duration = Duration::from_secs(10);
        trial.timing = slow;

        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let err = trial
            .present(request(30.0), PresentationMode::Staircase)
            .unwrap_err();
        assert_eq!(err, SessionError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!trial.engine().is_active());
        handle.join().unwrap();
    }

    #[test]
    fn test_acknowledgement() {
        let backend = HeadlessBackend::new(160);
        let (mut trial, response) = make_trial(&backend, CancelToken::new());

        let handle = patient(&response, 20, 60);
        assert!(trial.await_acknowledgement().unwrap());
        handle.join().unwrap();

        // Nobody presses: times out after 200 ms
        assert!(!trial.await_acknowledgement().unwrap());
    }
}
