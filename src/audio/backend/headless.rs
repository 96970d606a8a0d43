use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{require_stereo, AudioBackend, OutputStream, StreamRequest};
use crate::audio::callback::ToneRenderer;
use crate::error::AudioError;

const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Per-channel absolute peaks stored as f32 bits.
///
/// For non-negative floats the bit pattern orders like the value, so
/// `fetch_max` on the bits keeps the numeric maximum.
type PeakMeters = Arc<[AtomicU32]>;

fn new_meters(channels: usize) -> PeakMeters {
    (0..channels).map(|_| AtomicU32::new(0)).collect()
}

/// Output observed by the headless clock.
///
/// Peaks are absolute sample maxima per channel since the stream was opened.
/// The clock thread only touches atomics; the mutex swaps in a fresh set of
/// meters when a stream opens.
#[derive(Debug)]
pub struct HeadlessMonitor {
    blocks_rendered: AtomicU64,
    peaks: Mutex<PeakMeters>,
}

impl Default for HeadlessMonitor {
    fn default() -> Self {
        Self {
            blocks_rendered: AtomicU64::new(0),
            peaks: Mutex::new(new_meters(0)),
        }
    }
}

impl HeadlessMonitor {
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered.load(Ordering::Relaxed)
    }

    /// Per-channel peak amplitude since the last open
    pub fn channel_peaks(&self) -> Vec<f32> {
        let meters = Arc::clone(&self.peaks.lock().unwrap_or_else(PoisonError::into_inner));
        meters
            .iter()
            .map(|bits| f32::from_bits(bits.load(Ordering::Relaxed)))
            .collect()
    }

    /// Install zeroed meters and return the handle the clock thread writes to
    fn reset(&self, channels: usize) -> PeakMeters {
        self.blocks_rendered.store(0, Ordering::Relaxed);
        let meters = new_meters(channels);
        *self.peaks.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&meters);
        meters
    }

    fn record(&self, meters: &[AtomicU32], block: &[f32], channels: usize) {
        for (channel, meter) in meters.iter().enumerate().take(channels) {
            let peak = block
                .iter()
                .skip(channel)
                .step_by(channels)
                .fold(0.0f32, |peak, sample| peak.max(sample.abs()));
            meter.fetch_max(peak.to_bits(), Ordering::Relaxed);
        }
        self.blocks_rendered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Software clock backend with no audio device.
///
/// A worker thread calls the renderer once per block interval, so tone
/// timing behaves as it would on hardware. Used for tests, simulations and
/// dry runs.
pub struct HeadlessBackend {
    block_size: u32,
    monitor: Arc<HeadlessMonitor>,
}

impl HeadlessBackend {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            monitor: Arc::new(HeadlessMonitor::default()),
        }
    }

    pub fn monitor(&self) -> Arc<HeadlessMonitor> {
        Arc::clone(&self.monitor)
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

struct HeadlessStream {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream for HeadlessStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| AudioError::HardwareError {
                details: "headless clock thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

impl Drop for HeadlessStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl AudioBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn open(
        &self,
        request: &StreamRequest,
        mut renderer: ToneRenderer,
    ) -> Result<Box<dyn OutputStream>, AudioError> {
        require_stereo(request.channels)?;
        if request.sample_rate == 0 {
            return Err(AudioError::StreamOpenFailed {
                reason: "sample rate must be positive".to_string(),
            });
        }

        let sample_rate = request.sample_rate;
        let channels = request.channels as usize;
        let frames = request.block_size.unwrap_or(self.block_size).max(1) as usize;
        let interval = Duration::from_secs_f64(frames as f64 / sample_rate as f64);

        renderer.set_sample_rate(sample_rate);
        let meters = self.monitor.reset(channels);

        let running = Arc::new(AtomicBool::new(true));
        let running_worker = Arc::clone(&running);
        let monitor = Arc::clone(&self.monitor);

        let worker = thread::Builder::new()
            .name("headless-audio".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; frames * channels];
                let mut next_tick = Instant::now();
                while running_worker.load(Ordering::Acquire) {
                    renderer.render(&mut block, channels);
                    monitor.record(&meters, &block, channels);

                    next_tick += interval;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    } else {
                        next_tick = now;
                    }
                }
            })
            .map_err(AudioError::from)?;

        log::debug!(
            "[HeadlessBackend] Clock started: sample_rate={}, channels={}, block={}",
            sample_rate,
            channels,
            frames
        );

        Ok(Box::new(HeadlessStream {
            running,
            worker: Some(worker),
            sample_rate,
            channels: request.channels,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_keeps_per_channel_maxima() {
        let monitor = HeadlessMonitor::default();
        let meters = monitor.reset(2);

        monitor.record(&meters, &[0.25, 0.0, -0.5, 0.0], 2);
        monitor.record(&meters, &[0.1, 0.0, 0.3, 0.0], 2);

        assert_eq!(monitor.channel_peaks(), vec![0.5, 0.0]);
        assert_eq!(monitor.blocks_rendered(), 2);
    }

    #[test]
    fn test_reopen_starts_from_zero() {
        let monitor = HeadlessMonitor::default();
        let first = monitor.reset(2);
        monitor.record(&first, &[0.9, 0.9], 2);

        let second = monitor.reset(3);
        // The previous stream's meters are detached from the monitor
        monitor.record(&first, &[1.0, 1.0], 2);
        monitor.record(&second, &[0.0, 0.0, 0.2], 3);

        assert_eq!(monitor.channel_peaks(), vec![0.0, 0.0, 0.2]);
        assert_eq!(monitor.blocks_rendered(), 2);
    }
}
