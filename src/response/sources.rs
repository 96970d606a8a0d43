//! Input sources feeding [`ResponseCapture`].
//!
//! The capture does not know where transitions come from. A hardware button
//! driver, a global keyboard hook or a GUI widget all implement
//! [`InputSource`] and forward presses and releases into it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ResponseCapture;

const FORWARD_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSourceKind {
    PhysicalButton,
    KeyboardHook,
    UiControl,
}

/// One transition of the response button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Released,
}

pub trait InputSource: Send {
    fn kind(&self) -> InputSourceKind;

    /// Start forwarding transitions into `capture`
    fn attach(&mut self, capture: Arc<ResponseCapture>) -> io::Result<()>;

    /// Stop forwarding; later transitions are dropped
    fn detach(&mut self);
}

fn deliver(capture: &ResponseCapture, event: ButtonEvent) {
    match event {
        ButtonEvent::Pressed => capture.on_press(),
        ButtonEvent::Released => capture.on_release(),
    }
}

/// Source backed by a channel of [`ButtonEvent`]s.
///
/// Platform drivers (GPIO poller, keyboard hook, stdin reader) own the
/// `Sender` and push transitions from their own thread. A forwarding thread
/// delivers them to the capture once attached.
pub struct EventSource {
    kind: InputSourceKind,
    events: Option<Receiver<ButtonEvent>>,
    attached: Arc<AtomicBool>,
    forwarder: Option<JoinHandle<()>>,
}

impl EventSource {
    pub fn new(kind: InputSourceKind, events: Receiver<ButtonEvent>) -> Self {
        Self {
            kind,
            events: Some(events),
            attached: Arc::new(AtomicBool::new(false)),
            forwarder: None,
        }
    }

    pub fn keyboard_hook(events: Receiver<ButtonEvent>) -> Self {
        Self::new(InputSourceKind::KeyboardHook, events)
    }

    pub fn physical_button(events: Receiver<ButtonEvent>) -> Self {
        Self::new(InputSourceKind::PhysicalButton, events)
    }
}

impl InputSource for EventSource {
    fn kind(&self) -> InputSourceKind {
        self.kind
    }

    fn attach(&mut self, capture: Arc<ResponseCapture>) -> io::Result<()> {
        let events = self.events.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "event source already attached")
        })?;

        self.attached.store(true, Ordering::Release);
        let attached = Arc::clone(&self.attached);
        let handle = thread::Builder::new()
            .name("response-input".to_string())
            .spawn(move || {
                while attached.load(Ordering::Acquire) {
                    match events.recv_timeout(FORWARD_POLL) {
                        Ok(event) => deliver(&capture, event),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        self.forwarder = Some(handle);

        log::debug!("[ResponseCapture] {:?} source attached", self.kind);
        Ok(())
    }

    fn detach(&mut self) {
        self.attached.store(false, Ordering::Release);
        if let Some(handle) = self.forwarder.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.detach();
    }
}

/// On-screen response button.
///
/// Clones share one attachment, so a GUI can hand copies to its widgets and
/// call [`UiButton::press`] / [`UiButton::release`] from its event loop.
#[derive(Debug, Clone, Default)]
pub struct UiButton {
    target: Arc<Mutex<Option<Arc<ResponseCapture>>>>,
}

impl UiButton {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, event: ButtonEvent) {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capture) = target.as_ref() {
            deliver(capture, event);
        }
    }

    pub fn press(&self) {
        self.send(ButtonEvent::Pressed);
    }

    pub fn release(&self) {
        self.send(ButtonEvent::Released);
    }
}

impl InputSource for UiButton {
    fn kind(&self) -> InputSourceKind {
        InputSourceKind::UiControl
    }

    fn attach(&mut self, capture: Arc<ResponseCapture>) -> io::Result<()> {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(capture);
        Ok(())
    }

    fn detach(&mut self) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_ui_button_forwards_only_when_attached() {
        let capture = Arc::new(ResponseCapture::new());
        let mut button = UiButton::new();
        let widget = button.clone();

        widget.press();
        assert!(!capture.pressed_during_window());

        button.attach(Arc::clone(&capture)).unwrap();
        widget.press();
        assert!(capture.pressed_during_window());
        widget.release();
        assert!(capture.is_released());

        button.detach();
        capture.clear();
        widget.press();
        assert!(!capture.pressed_during_window());
        assert_eq!(button.kind(), InputSourceKind::UiControl);
    }

    #[test]
    fn test_event_source_forwards_from_channel() {
        let capture = Arc::new(ResponseCapture::new());
        let (tx, rx) = mpsc::channel();
        let mut source = EventSource::keyboard_hook(rx);
        source.attach(Arc::clone(&capture)).unwrap();

        tx.send(ButtonEvent::Pressed).unwrap();
        assert!(capture.wait_for_press(Duration::from_secs(2)));
        tx.send(ButtonEvent::Released).unwrap();
        assert!(capture.wait_for_release(Duration::from_secs(2)));

        source.detach();
        assert_eq!(source.kind(), InputSourceKind::KeyboardHook);
    }

    #[test]
    fn test_event_source_attach_twice_fails() {
        let (_tx, rx) = mpsc::channel();
        let mut source = EventSource::physical_button(rx);
        source.attach(Arc::new(ResponseCapture::new())).unwrap();
        let err = source
            .attach(Arc::new(ResponseCapture::new()))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_detach_stops_forwarding_promptly() {
        let capture = Arc::new(ResponseCapture::new());
        let (tx, rx) = mpsc::channel();
        let mut source = EventSource::keyboard_hook(rx);
        source.attach(Arc::clone(&capture)).unwrap();

        let started = Instant::now();
        source.detach();
        assert!(started.elapsed() < Duration::from_secs(1));

        let _ = tx.send(ButtonEvent::Pressed);
        thread::sleep(Duration::from_millis(20));
        assert!(!capture.pressed_during_window());
    }
}
