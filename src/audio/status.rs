//! Sticky status flags raised from the audio callback.
//!
//! The callback cannot log, block or return errors, so anomalies are OR-ed
//! into an atomic bit set and surfaced when the engine is closed.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct CallbackStatus {
    flags: AtomicU32,
}

impl CallbackStatus {
    /// Envelope slope disagreed with its ramp direction
    pub const ENVELOPE_INCONSISTENT: u32 = 1 << 0;
    /// A synthesized sample was NaN or infinite
    pub const NON_FINITE_SAMPLE: u32 = 1 << 1;
    /// Callback received fewer than two channels
    pub const CHANNEL_LAYOUT: u32 = 1 << 2;
    /// Buffer length was not a multiple of the channel count
    pub const PARTIAL_FRAME: u32 = 1 << 3;
    /// Backend reported a stream error
    pub const STREAM_ERROR: u32 = 1 << 4;

    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free; safe from the real-time thread
    #[inline]
    pub fn raise(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Relaxed)
    }

    /// Read and clear
    pub fn take(&self) -> u32 {
        self.flags.swap(0, Ordering::AcqRel)
    }

    pub fn describe(flags: u32) -> String {
        let names = [
            (Self::ENVELOPE_INCONSISTENT, "envelope inconsistent"),
            (Self::NON_FINITE_SAMPLE, "non-finite sample"),
            (Self::CHANNEL_LAYOUT, "fewer than two channels"),
            (Self::PARTIAL_FRAME, "partial frame"),
            (Self::STREAM_ERROR, "stream error"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| flags & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}
