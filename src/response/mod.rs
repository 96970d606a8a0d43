// Response module - patient button state shared between input and trials
//
// ResponseCapture is the only shared mutable state of a running session.
// Input sources push press/release transitions into it from any thread; the
// session thread clears it before each trial and reads or waits on it.

pub mod sources;

pub use sources::{ButtonEvent, EventSource, InputSource, InputSourceKind, UiButton};

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Snapshot of the response button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseState {
    /// A press happened since the last clear()
    pub pressed_during_window: bool,
    /// Button is held right now
    pub is_pressed: bool,
    pub last_press: Option<Instant>,
    pub last_release: Option<Instant>,
}

/// Thread-safe response capture.
///
/// Every transition happens under one mutex and wakes all waiters on the
/// paired condition variable. Waits are bounded by their timeout.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    state: Mutex<ResponseState>,
    changed: Condvar,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    // State is plain data, so a panic elsewhere cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new response window
    pub fn clear(&self) {
        let mut state = self.lock();
        state.pressed_during_window = false;
        self.changed.notify_all();
    }

    pub fn on_press(&self) {
        let mut state = self.lock();
        if state.is_pressed {
            // Key auto-repeat or a bouncing contact
            return;
        }
        state.is_pressed = true;
        state.pressed_during_window = true;
        state.last_press = Some(Instant::now());
        self.changed.notify_all();
        log::trace!("[ResponseCapture] press");
    }

    /// A release without a preceding press is ignored
    pub fn on_release(&self) {
        let mut state = self.lock();
        if !state.is_pressed {
            return;
        }
        state.is_pressed = false;
        state.last_release = Some(Instant::now());
        self.changed.notify_all();
        log::trace!("[ResponseCapture] release");
    }

    /// True if a press occurred since the last clear(), released or not
    pub fn pressed_during_window(&self) -> bool {
        self.lock().pressed_during_window
    }

    pub fn is_released(&self) -> bool {
        !self.lock().is_pressed
    }

    pub fn snapshot(&self) -> ResponseState {
        *self.lock()
    }

    /// Block until the button is up; false on timeout
    pub fn wait_for_release(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| s.is_pressed)
            .unwrap_or_else(PoisonError::into_inner);
        !guard.is_pressed
    }

    /// Block until a press is registered in the current window, or timeout
    pub fn wait_for_press(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| !s.pressed_during_window)
            .unwrap_or_else(PoisonError::into_inner);
        guard.pressed_during_window
    }

    /// Wait for a press within `timeout`, then for the release by
    /// `timeout + grace` from the call.
    ///
    /// Only presses since the last clear() count, so callers clear first.
    pub fn wait_for_press_then_release(&self, timeout: Duration, grace: Duration) -> bool {
        let deadline = Instant::now() + timeout + grace;
        if !self.wait_for_press(timeout) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.wait_for_release(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_clear_resets_window() {
        let capture = ResponseCapture::new();
        capture.on_press();
        capture.on_release();
        assert!(capture.pressed_during_window());

        capture.clear();
        assert!(!capture.pressed_during_window());
    }

    #[test]
    fn test_press_is_remembered_until_clear() {
        let capture = ResponseCapture::new();
        capture.clear();
        capture.on_press();
        assert!(!capture.is_released());
        capture.on_release();
        assert!(capture.is_released());
        assert!(capture.pressed_during_window());
    }

    #[test]
    fn test_held_button_does_not_leak_into_next_window() {
        let capture = ResponseCapture::new();
        capture.on_press();
        capture.clear();
        // Repeated press while held is ignored
        capture.on_press();
        assert!(!capture.pressed_during_window());
    }

    #[test]
    fn test_release_without_press_ignored() {
        let capture = ResponseCapture::new();
        capture.on_release();
        let state = capture.snapshot();
        assert!(state.last_release.is_none());
        assert!(!state.is_pressed);
    }

    #[test]
    fn test_timestamps_are_ordered() {
        let capture = ResponseCapture::new();
        capture.on_press();
        thread::sleep(Duration::from_millis(2));
        capture.on_release();
        let state = capture.snapshot();
        assert!(state.last_press.unwrap() <= state.last_release.unwrap());
    }

    #[test]
    fn test_wait_for_release_times_out_while_held() {
        let capture = ResponseCapture::new();
        capture.on_press();
        let started = Instant::now();
        assert!(!capture.wait_for_release(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_for_release_returns_immediately_when_up() {
        let capture = ResponseCapture::new();
        assert!(capture.wait_for_release(Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_for_release_wakes_on_release() {
        let capture = Arc::new(ResponseCapture::new());
        capture.on_press();

        let releaser = Arc::clone(&capture);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            releaser.on_release();
        });

        let started = Instant::now();
        assert!(capture.wait_for_release(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_press_then_release_from_other_thread() {
        let capture = Arc::new(ResponseCapture::new());
        capture.clear();

        let patient = Arc::clone(&capture);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            patient.on_press();
            thread::sleep(Duration::from_millis(20));
            patient.on_release();
        });

        assert!(capture.wait_for_press_then_release(
            Duration::from_secs(2),
            Duration::from_secs(1)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_press_then_release_times_out_without_press() {
        let capture = ResponseCapture::new();
        capture.clear();
        assert!(!capture.wait_for_press_then_release(
            Duration::from_millis(20),
            Duration::from_millis(10)
        ));
    }

    #[test]
    fn test_press_then_release_fails_if_never_released() {
        let capture = ResponseCapture::new();
        capture.clear();
        capture.on_press();
        let started = Instant::now();
        assert!(!capture.wait_for_press_then_release(
            Duration::from_millis(20),
            Duration::from_millis(20)
        ));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
