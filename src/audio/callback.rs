//! Real-time tone renderer
//!
//! `ToneRenderer` is moved into the backend's audio callback. It owns the
//! envelope, drains start/stop commands from a lock-free queue and writes
//! interleaved output where only the selected ear channel can be non-zero.
//!
//! Everything here is allocation-free and never blocks. Faults are recorded
//! in [`CallbackStatus`] rather than reported.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::Consumer;

use super::envelope::{ms_to_samples, EnvelopeState};
use super::status::CallbackStatus;
use crate::ear::Ear;

/// Control message from the engine handle to the callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneCommand {
    /// Ramp up a tone with the given linear peak gain
    Start { frequency: u32, gain: f32, ear: Ear },
    /// Ramp the current tone down to silence
    Stop,
}

pub struct ToneRenderer {
    commands: Consumer<ToneCommand>,
    envelope: EnvelopeState,
    frequency: u32,
    ear: Ear,
    sample_rate: u32,
    attack_ms: f32,
    release_ms: f32,
    attack_samples: u32,
    release_samples: u32,
    status: Arc<CallbackStatus>,
    frames_rendered: Arc<AtomicU64>,
}

impl ToneRenderer {
    pub(crate) fn new(
        commands: Consumer<ToneCommand>,
        sample_rate: u32,
        attack_ms: f32,
        release_ms: f32,
        status: Arc<CallbackStatus>,
        frames_rendered: Arc<AtomicU64>,
    ) -> Self {
        Self {
            commands,
            envelope: EnvelopeState::default(),
            frequency: 0,
            ear: Ear::Left,
            sample_rate,
            attack_ms,
            release_ms,
            attack_samples: ms_to_samples(attack_ms, sample_rate),
            release_samples: ms_to_samples(release_ms, sample_rate),
            status,
            frames_rendered,
        }
    }

    /// Adopt the sample rate actually negotiated with the device.
    ///
    /// Backends call this before the first callback.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.attack_samples = ms_to_samples(self.attack_ms, self.sample_rate);
        self.release_samples = ms_to_samples(self.release_ms, self.sample_rate);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn attack_samples(&self) -> u32 {
        self.attack_samples
    }

    pub fn release_samples(&self) -> u32 {
        self.release_samples
    }

    pub fn envelope(&self) -> &EnvelopeState {
        &self.envelope
    }

    pub fn ear(&self) -> Ear {
        self.ear
    }

    /// Shared status flags, for backends that need to report stream errors
    pub fn status(&self) -> Arc<CallbackStatus> {
        Arc::clone(&self.status)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                ToneCommand::Start {
                    frequency,
                    gain,
                    ear,
                } => {
                    if self.envelope.current_gain == 0.0 {
                        self.envelope.phase_index = 0;
                        self.ear = ear;
                    } else if ear != self.ear {
                        // Still releasing on the other ear: cut it rather than
                        // move a non-zero signal across channels.
                        self.envelope.current_gain = 0.0;
                        self.envelope.phase_index = 0;
                        self.ear = ear;
                    }
                    self.frequency = frequency;
                    self.envelope.attack(gain, self.attack_samples);
                }
                ToneCommand::Stop => {
                    self.envelope.release(self.release_samples);
                }
            }
        }
    }

    /// Fill one interleaved block of `channels` channels.
    ///
    /// Every slot is zeroed first, then only the selected ear's slot is
    /// written. Blocks with fewer than two channels are output as silence.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();

        if channels < 2 {
            out.fill(0.0);
            self.status.raise(CallbackStatus::CHANNEL_LAYOUT);
            return;
        }
        if out.len() % channels != 0 {
            self.status.raise(CallbackStatus::PARTIAL_FRAME);
        }

        let target = self.ear.channel_index();
        let step = TAU * self.frequency as f64 / self.sample_rate as f64;
        let period = self.sample_rate as u64;
        let mut frames = 0u64;

        for frame in out.chunks_mut(channels) {
            frame.fill(0.0);
            if frame.len() < channels {
                continue;
            }

            let gain = self.envelope.next_gain();
            if gain != 0.0 {
                let sample = gain * (step * self.envelope.phase_index as f64).sin() as f32;
                if sample.is_finite() {
                    frame[target] = sample;
                } else {
                    self.status.raise(CallbackStatus::NON_FINITE_SAMPLE);
                }
            }
            // Integer frequency: the waveform repeats every `sample_rate` samples.
            self.envelope.phase_index = (self.envelope.phase_index + 1) % period;
            frames += 1;
        }

        if !self.envelope.is_consistent() {
            self.status.raise(CallbackStatus::ENVELOPE_INCONSISTENT);
        }
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    fn renderer(sample_rate: u32) -> (rtrb::Producer<ToneCommand>, ToneRenderer) {
        let (tx, rx) = RingBuffer::new(8);
        let r = ToneRenderer::new(
            rx,
            sample_rate,
            1.0,
            1.0,
            Arc::new(CallbackStatus::new()),
            Arc::new(AtomicU64::new(0)),
        );
        (tx, r)
    }

    #[test]
    fn test_idle_renderer_outputs_silence() {
        let (_tx, mut r) = renderer(48000);
        let mut buf = vec![1.0f32; 256];
        r.render(&mut buf, 2);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_tone_only_on_selected_channel() {
        let (mut tx, mut r) = renderer(48000);
        tx.push(ToneCommand::Start {
            frequency: 1000,
            gain: 0.5,
            ear: Ear::Right,
        })
        .unwrap();

        let mut buf = vec![0.3f32; 2 * 512];
        r.render(&mut buf, 2);

        assert!(buf.chunks(2).all(|f| f[0] == 0.0));
        assert!(buf.chunks(2).any(|f| f[1] != 0.0));
        assert!(buf.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn test_extra_channels_are_zeroed() {
        let (mut tx, mut r) = renderer(44100);
        tx.push(ToneCommand::Start {
            frequency: 500,
            gain: 1.0,
            ear: Ear::Left,
        })
        .unwrap();

        let mut buf = vec![0.7f32; 4 * 128];
        r.render(&mut buf, 4);
        for frame in buf.chunks(4) {
            assert_eq!(frame[1], 0.0);
            assert_eq!(frame[2], 0.0);
            assert_eq!(frame[3], 0.0);
        }
    }

    #[test]
    fn test_mono_layout_is_silenced_and_flagged() {
        let (mut tx, mut r) = renderer(44100);
        tx.push(ToneCommand::Start {
            frequency: 500,
            gain: 1.0,
            ear: Ear::Left,
        })
        .unwrap();

        let mut buf = vec![0.7f32; 64];
        r.render(&mut buf, 1);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_ne!(r.status().flags() & CallbackStatus::CHANNEL_LAYOUT, 0);
    }

    #[test]
    fn test_stop_ramps_to_silence() {
        let (mut tx, mut r) = renderer(48000);
        tx.push(ToneCommand::Start {
            frequency: 1000,
            gain: 0.5,
            ear: Ear::Left,
        })
        .unwrap();
        let mut buf = vec![0.0f32; 2 * 480];
        r.render(&mut buf, 2);
        assert!((r.envelope().current_gain - 0.5).abs() < 1e-6);

        tx.push(ToneCommand::Stop).unwrap();
        r.render(&mut buf, 2);
        assert!(r.envelope().is_silent());
        assert_eq!(r.envelope().slope, 0.0);

        r.render(&mut buf, 2);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_eq!(r.status().flags(), 0);
    }

    #[test]
    fn test_sample_rate_change_recomputes_ramp_lengths() {
        let (_tx, mut r) = renderer(48000);
        assert_eq!(r.attack_samples(), 48);
        r.set_sample_rate(96000);
        assert_eq!(r.attack_samples(), 96);
        assert_eq!(r.release_samples(), 96);
    }
}
