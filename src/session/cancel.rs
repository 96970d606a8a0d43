use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between the caller and the session.
///
/// Every blocking wait in a session is a sequence of short sleeps, each
/// followed by a check of this flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `duration` in chunks of at most `poll`.
    ///
    /// Returns `false` as soon as cancellation is observed, `true` if the
    /// full duration elapsed.
    pub fn sleep(&self, duration: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let poll = poll.max(Duration::from_millis(1));
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(poll));
        }
    }
}
