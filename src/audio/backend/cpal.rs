//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! Opens an f32 output stream on the default or a named device and moves the
//! tone renderer into its callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{require_stereo, AudioBackend, OutputStream, StreamRequest};
use crate::audio::callback::ToneRenderer;
use crate::audio::status::CallbackStatus;
use crate::error::AudioError;

/// CPAL output backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Names of all output devices on the default host
pub fn list_output_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::HardwareError {
            details: format!("Failed to enumerate output devices: {}", e),
        })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .collect())
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::StreamOpenFailed {
                reason: "No default output device found".to_string(),
            }),
        Some(wanted) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::HardwareError {
                    details: format!("Failed to enumerate output devices: {}", e),
                })?;
            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name.contains(wanted) {
                        return Ok(device);
                    }
                }
            }
            Err(AudioError::DeviceNotFound {
                name: wanted.to_string(),
            })
        }
    }
}

/// Pick an f32 config with enough channels at the requested rate, falling
/// back to the device default.
fn select_config(
    device: &cpal::Device,
    request: &StreamRequest,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let wanted_rate = cpal::SampleRate(request.sample_rate);

    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.sample_format() == cpal::SampleFormat::F32
                && range.channels() >= request.channels
                && range.min_sample_rate() <= wanted_rate
                && wanted_rate <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted_rate));
            }
        }
    }

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    log::warn!(
        "[CpalBackend] No f32 config at {} Hz with {} channels, using device default ({} Hz, {} channels)",
        request.sample_rate,
        request.channels,
        config.sample_rate().0,
        config.channels()
    );
    Ok(config)
}

struct CpalStream {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            paused.map_err(|e| AudioError::HardwareError {
                details: format!("Output stop failed: {}", e),
            })?;
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        request: &StreamRequest,
        mut renderer: ToneRenderer,
    ) -> Result<Box<dyn OutputStream>, AudioError> {
        require_stereo(request.channels)?;

        let host = cpal::default_host();
        let device = select_device(&host, request.device.as_deref())?;
        let config = select_config(&device, request)?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::StreamOpenFailed {
                reason: "Only F32 sample format is currently supported for output".to_string(),
            });
        }
        require_stereo(config.channels())?;

        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(frames) = request.block_size {
            stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
        }
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;
        let channels_count = channels as usize;

        renderer.set_sample_rate(sample_rate);
        let status = renderer.status();

        let err_fn = move |err| {
            status.raise(CallbackStatus::STREAM_ERROR);
            log::error!("[CpalBackend] Output stream error: {}", err);
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data, channels_count);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("{:?}", e),
            })?;

        stream.play().map_err(|e| AudioError::HardwareError {
            details: format!("Output start failed: {}", e),
        })?;

        log::info!(
            "[CpalBackend] Output stream started: device={}, sample_rate={}, channels={}, block={:?}",
            device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            sample_rate,
            channels,
            request.block_size
        );

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            sample_rate,
            channels,
        }))
    }
}
