use std::sync::{Arc, Mutex, PoisonError};

use crate::ear::Ear;
use crate::session::{SessionEvent, SessionObserver};
use crate::threshold::Threshold;

/// Observer that keeps every event.
///
/// Clones share the same log, so one copy can be moved into a session while
/// another is inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn results(&self) -> Vec<(Ear, u32, Threshold)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ThresholdDetermined {
                    ear,
                    frequency,
                    threshold,
                } => Some((ear, frequency, threshold)),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { percent } => Some(percent),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_ear_changed(&mut self, ear: Ear) {
        self.record(SessionEvent::EarChanged { ear });
    }

    fn on_frequency_changed(&mut self, frequency: u32) {
        self.record(SessionEvent::FrequencyChanged { frequency });
    }

    fn on_progress(&mut self, percent: u8) {
        self.record(SessionEvent::Progress { percent });
    }

    fn on_threshold_determined(&mut self, ear: Ear, frequency: u32, threshold: Threshold) {
        self.record(SessionEvent::ThresholdDetermined {
            ear,
            frequency,
            threshold,
        });
    }
}
