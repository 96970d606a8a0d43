// Session module - runs every frequency/ear combination of one test
//
// Three execution contexts are involved:
// - the audio callback (owned by the backend, see crate::audio)
// - the session worker thread, where all blocking happens
// - the caller, which only holds a SessionHandle and receives observer
//   notifications from the worker thread
//
// The worker owns the TrialRunner, the plan and the observer. The caller
// shares only the cancellation token and the progress counters.

pub mod cancel;
pub mod events;
pub mod plan;

pub use cancel::CancelToken;
pub use events::{BroadcastObserver, NullObserver, SessionEvent, SessionObserver};
pub use plan::SessionPlan;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioBackend, ToneEngine};
use crate::config::{AppConfig, SessionConfig};
use crate::ear::Ear;
use crate::error::{log_session_error, SessionError};
use crate::response::ResponseCapture;
use crate::threshold::{determine_threshold, StaircaseParams, Threshold};
use crate::trial::{Trial, TrialRunner, TrialTiming};

/// Threshold of one completed combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinationResult {
    pub ear: Ear,
    pub frequency: u32,
    pub threshold: Threshold,
}

/// Outcome of a session that ended without a fatal error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub ear_order: Vec<Ear>,
    /// Completed combinations in test order
    pub results: Vec<CombinationResult>,
    /// True if the session stopped early on request
    pub cancelled: bool,
}

impl SessionSummary {
    pub fn threshold(&self, ear: Ear, frequency: u32) -> Option<Threshold> {
        self.results
            .iter()
            .find(|r| r.ear == ear && r.frequency == frequency)
            .map(|r| r.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl SessionProgress {
    fn new(completed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (completed * 100 / total) as u8
        };
        Self {
            completed,
            total,
            percent,
        }
    }
}

/// Progress counters readable from any thread
#[derive(Debug, Default)]
struct ProgressTracker {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl ProgressTracker {
    fn snapshot(&self) -> SessionProgress {
        SessionProgress::new(
            self.completed.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }
}

/// Orchestrates one test session over a [`TrialRunner`]
pub struct Session {
    config: SessionConfig,
    plan: SessionPlan,
    params: StaircaseParams,
    cancel: CancelToken,
    progress: Arc<ProgressTracker>,
}

impl Session {
    /// Build the plan; the ear order is shuffled here, once
    pub fn new(config: SessionConfig, cancel: CancelToken) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let plan = SessionPlan::new(&config, &mut rng);
        let params = StaircaseParams::from(&config);
        let progress = Arc::new(ProgressTracker::default());
        progress.total.store(plan.total_steps(), Ordering::Release);
        Self {
            config,
            plan,
            params,
            cancel,
            progress,
        }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn progress(&self) -> SessionProgress {
        self.progress.snapshot()
    }

    fn summary(&self, results: Vec<CombinationResult>, cancelled: bool) -> SessionSummary {
        SessionSummary {
            ear_order: self.plan.ear_order().to_vec(),
            results,
            cancelled,
        }
    }

    /// Run every combination in plan order.
    ///
    /// Cancellation returns `Ok` with `cancelled` set and without a result
    /// for the interrupted combination. Signal distortion records that
    /// combination as undetermined and moves on. Any other error aborts.
    pub fn run<R: TrialRunner + ?Sized>(
        &mut self,
        runner: &mut R,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionSummary, SessionError> {
        let span = tracing::info_span!("session", steps = self.plan.total_steps());
        let _enter = span.enter();

        let poll = self.config.cancel_poll();
        let ear_order = self.plan.ear_order().to_vec();
        let frequencies = self.plan.frequencies().to_vec();
        let mut results = Vec::with_capacity(self.plan.total_steps());

        log::info!(
            "[Session] Starting: ears={:?}, frequencies={:?}",
            ear_order,
            frequencies
        );

        for (ear_index, &ear) in ear_order.iter().enumerate() {
            if ear_index > 0 && !self.cancel.sleep(self.config.ear_switch_pause(), poll) {
                return Ok(self.cancelled(results));
            }
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(results));
            }
            observer.on_ear_changed(ear);

            for (freq_index, &frequency) in frequencies.iter().enumerate() {
                if freq_index > 0 && !self.cancel.sleep(self.config.combination_pause(), poll) {
                    return Ok(self.cancelled(results));
                }
                if self.cancel.is_cancelled() {
                    return Ok(self.cancelled(results));
                }
                observer.on_frequency_changed(frequency);

                runner.reset();
                let threshold =
                    match determine_threshold(runner, &self.cancel, self.params, frequency, ear) {
                        Ok(threshold) => threshold,
                        Err(SessionError::Cancelled) => return Ok(self.cancelled(results)),
                        Err(err @ SessionError::SignalDistortion { .. }) => {
                            log::warn!("[Session] {}; {} Hz {} undetermined", err, frequency, ear);
                            Threshold::Undetermined
                        }
                        Err(err) => {
                            log_session_error(&err, "Session::run");
                            return Err(err);
                        }
                    };

                tracing::info!(
                    ear = %ear,
                    frequency,
                    level = ?threshold.level(),
                    "threshold determined"
                );
                results.push(CombinationResult {
                    ear,
                    frequency,
                    threshold,
                });

                let completed = self.progress.completed.fetch_add(1, Ordering::AcqRel) + 1;
                observer.on_threshold_determined(ear, frequency, threshold);
                observer.on_progress(SessionProgress::new(completed, self.plan.total_steps()).percent);
            }
        }

        log::info!("[Session] Completed {} combinations", results.len());
        Ok(self.summary(results, false))
    }

    fn cancelled(&self, results: Vec<CombinationResult>) -> SessionSummary {
        log::info!(
            "[Session] Cancelled after {} of {} combinations",
            results.len(),
            self.plan.total_steps()
        );
        self.summary(results, true)
    }
}

/// Caller-side handle of a session running on its own thread
pub struct SessionHandle {
    cancel: CancelToken,
    progress: Arc<ProgressTracker>,
    worker: Option<JoinHandle<Result<SessionSummary, SessionError>>>,
}

impl SessionHandle {
    /// Run a session on a new worker thread.
    ///
    /// `make_runner` is called on the worker, so the runner itself does not
    /// need to be `Send` (audio streams often are not).
    pub fn spawn<R, F>(
        config: SessionConfig,
        cancel: CancelToken,
        mut observer: Box<dyn SessionObserver + Send>,
        make_runner: F,
    ) -> Result<SessionHandle, SessionError>
    where
        R: TrialRunner,
        F: FnOnce() -> Result<R, SessionError> + Send + 'static,
    {
        let mut session = Session::new(config, cancel.clone());
        let progress = Arc::clone(&session.progress);

        let worker = thread::Builder::new()
            .name("audiometer-session".to_string())
            .spawn(move || {
                let mut runner = make_runner()?;
                let outcome = session.run(&mut runner, observer.as_mut());
                let finished = runner.finish();
                let summary = outcome?;
                finished?;
                Ok(summary)
            })
            .map_err(|e| SessionError::InvalidConfig {
                reason: format!("failed to spawn session thread: {}", e),
            })?;

        Ok(SessionHandle {
            cancel,
            progress,
            worker: Some(worker),
        })
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> SessionProgress {
        self.progress.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Wait for the worker and return its outcome
    pub fn join(mut self) -> Result<SessionSummary, SessionError> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| SessionError::WorkerPanicked)?,
            None => Err(SessionError::WorkerPanicked),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.cancel.cancel();
            let _ = worker.join();
        }
    }
}

/// Start a session with real audio output.
///
/// The configuration is validated here; the tone engine is opened on the
/// worker thread. `response` must be fed by an attached input source.
pub fn start_session(
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    response: Arc<ResponseCapture>,
    observer: Box<dyn SessionObserver + Send>,
    cancel: CancelToken,
) -> Result<SessionHandle, SessionError> {
    config.validate()?;

    let AppConfig {
        session,
        tone,
        calibration,
    } = config;
    let timing = TrialTiming::from(&session);
    let seed = session.seed;
    let trial_cancel = cancel.clone();

    SessionHandle::spawn(session, cancel, observer, move || {
        let engine = ToneEngine::open(tone.settings(), backend.as_ref(), &tone.stream_request())?;
        Ok(Trial::new(
            engine,
            response,
            calibration,
            timing,
            trial_cancel,
            seed,
        ))
    })
}
