//! Session notifications for external collaborators.
//!
//! Observers are called synchronously on the session thread. Anything that
//! needs another thread (a GUI event loop, an async task) should forward
//! through [`BroadcastObserver`] or its own channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ear::Ear;
use crate::threshold::Threshold;

/// Buffered events per subscriber before old ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 100;

pub trait SessionObserver {
    fn on_ear_changed(&mut self, _ear: Ear) {}

    fn on_frequency_changed(&mut self, _frequency: u32) {}

    /// Whole-number percentage of completed combinations
    fn on_progress(&mut self, _percent: u8) {}

    /// Invoked once per completed combination, in test order
    fn on_threshold_determined(&mut self, ear: Ear, frequency: u32, threshold: Threshold);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    EarChanged {
        ear: Ear,
    },
    FrequencyChanged {
        frequency: u32,
    },
    Progress {
        percent: u8,
    },
    ThresholdDetermined {
        ear: Ear,
        frequency: u32,
        threshold: Threshold,
    },
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_threshold_determined(&mut self, _ear: Ear, _frequency: u32, _threshold: Threshold) {}
}

/// Publishes [`SessionEvent`]s on a tokio broadcast channel.
///
/// Sending never blocks the session thread. Lagging subscribers lose the
/// oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastObserver {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_ear_changed(&mut self, ear: Ear) {
        self.publish(SessionEvent::EarChanged { ear });
    }

    fn on_frequency_changed(&mut self, frequency: u32) {
        self.publish(SessionEvent::FrequencyChanged { frequency });
    }

    fn on_progress(&mut self, percent: u8) {
        self.publish(SessionEvent::Progress { percent });
    }

    fn on_threshold_determined(&mut self, ear: Ear, frequency: u32, threshold: Threshold) {
        self.publish(SessionEvent::ThresholdDetermined {
            ear,
            frequency,
            threshold,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::{EstimateKind, ThresholdEstimate};

    #[test]
    fn test_broadcast_observer_delivers_in_order() {
        let mut observer = BroadcastObserver::new();
        let mut rx = observer.subscribe();

        observer.on_ear_changed(Ear::Left);
        observer.on_frequency_changed(1000);
        observer.on_threshold_determined(Ear::Left, 1000, Threshold::Undetermined);
        observer.on_progress(50);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::EarChanged { ear: Ear::Left }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::FrequencyChanged { frequency: 1000 }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ThresholdDetermined { .. }
        ));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Progress { percent: 50 });
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let mut observer = BroadcastObserver::new();
        observer.on_progress(10);
    }

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::ThresholdDetermined {
            ear: Ear::Right,
            frequency: 4000,
            threshold: Threshold::Determined(ThresholdEstimate {
                level: 25.0,
                kind: EstimateKind::Confirmed,
            }),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["event"], "threshold_determined");
        assert_eq!(json["ear"], "right");
        assert_eq!(json["threshold"]["status"], "determined");
        assert_eq!(json["threshold"]["level"], 25.0);
        assert_eq!(json["threshold"]["kind"], "confirmed");
    }
}
