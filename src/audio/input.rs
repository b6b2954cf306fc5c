//! Live audio input capture using cpal
//!
//! Captures audio from an input device and hands it to the render callback
//! through a lock-free ring buffer, converted to the unit's input channel
//! count.

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::device::{get_input_config, get_input_device, AudioConfig};
use super::perf::{f32_to_u32, u32_to_f32};
use crate::error::DeviceError;

/// Periods of audio the ring can hold before the capture side drops samples
const RING_PERIODS: usize = 8;

/// Shared state between input stream and readers
struct InputSharedState {
    /// Ring buffer consumer, only ever locked by the render callback.
    /// Mutex is used because ringbuf's consumer is not `Sync`.
    consumer: Mutex<ringbuf::HeapCons<f32>>,
    input_level: AtomicU32,
    dropped_samples: AtomicU64,
    is_active: AtomicBool,
    /// Interleaved channel count delivered to readers
    channels: usize,
}

/// Read side of a running capture
#[derive(Clone)]
pub struct InputCaptureHandle {
    shared: Arc<InputSharedState>,
}

impl InputCaptureHandle {
    /// Fill `output` with captured interleaved samples.
    ///
    /// Any shortfall (empty ring, or the consumer briefly unavailable) is
    /// zero-filled. Returns the number of captured samples written.
    pub fn read_into(&self, output: &mut [f32]) -> usize {
        let read = match self.shared.consumer.try_lock() {
            Some(mut consumer) => consumer.pop_slice(output),
            None => 0,
        };
        output[read..].fill(0.0);
        read
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Smoothed peak input level (0.0 - 1.0)
    pub fn input_level(&self) -> f32 {
        u32_to_f32(self.shared.input_level.load(Ordering::Relaxed))
    }

    /// Samples lost because the ring was full
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped_samples.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active.load(Ordering::SeqCst)
    }

    /// Discard buffered samples (call when (re)starting to avoid stale data)
    pub fn clear_buffer(&self) {
        let mut consumer = self.shared.consumer.lock();
        let stale = consumer.occupied_len();
        consumer.skip(stale);
    }

    pub fn available_samples(&self) -> usize {
        self.shared.consumer.lock().occupied_len()
    }
}

/// Input capture stream
pub struct InputCapture {
    _stream: cpal::Stream,
    handle: InputCaptureHandle,
    device_name: String,
}

/// Convert one captured frame to `out_channels` interleaved samples
fn convert_frame(frame: &[f32], out_channels: usize, mut push: impl FnMut(f32)) {
    match (frame.len(), out_channels) {
        (_, 1) => push(frame.iter().sum::<f32>() / frame.len().max(1) as f32),
        (1, _) => {
            for _ in 0..out_channels {
                push(frame[0]);
            }
        }
        _ => {
            for ch in 0..out_channels {
                push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
}

impl InputCapture {
    /// Open `device_name` (or the default input) at the engine's sample rate
    pub fn new(device_name: Option<&str>, config: &AudioConfig) -> Result<Self, DeviceError> {
        let device = get_input_device(device_name)?;
        let device_name_str = device.name().unwrap_or_else(|_| "Unknown".to_string());

        log::info!("Creating input capture for device: {}", device_name_str);

        let stream_config = get_input_config(&device, config)?;
        let device_channels = stream_config.channels as usize;
        let out_channels = config.input_channels.max(1) as usize;

        log::info!(
            "Input stream config: {} Hz, {} channels -> {} unit channels",
            stream_config.sample_rate.0,
            device_channels,
            out_channels
        );

        let capacity = config.frames_per_period as usize * out_channels * RING_PERIODS;
        let rb = HeapRb::<f32>::new(capacity.max(1));
        let (mut producer, consumer) = rb.split();

        let shared = Arc::new(InputSharedState {
            consumer: Mutex::new(consumer),
            input_level: AtomicU32::new(f32_to_u32(0.0)),
            dropped_samples: AtomicU64::new(0),
            is_active: AtomicBool::new(true),
            channels: out_channels,
        });

        let shared_clone = Arc::clone(&shared);
        let level_smoothing = 0.15f32;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut peak = 0.0f32;
                    let mut dropped = 0u64;

                    for frame in data.chunks(device_channels.max(1)) {
                        convert_frame(frame, out_channels, |sample| {
                            peak = peak.max(sample.abs());
                            // Drop samples if the reader fell behind
                            if producer.try_push(sample).is_err() {
                                dropped += 1;
                            }
                        });
                    }

                    if dropped > 0 {
                        shared_clone.dropped_samples.fetch_add(dropped, Ordering::Relaxed);
                    }

                    let current = u32_to_f32(shared_clone.input_level.load(Ordering::Relaxed));
                    let new_level = current * (1.0 - level_smoothing) + peak * level_smoothing;
                    shared_clone.input_level.store(f32_to_u32(new_level), Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::PlayStream(e.to_string()))?;

        log::info!("Input capture started successfully");

        Ok(Self {
            _stream: stream,
            handle: InputCaptureHandle { shared },
            device_name: device_name_str,
        })
    }

    /// Get a handle to read from this input capture
    pub fn handle(&self) -> InputCaptureHandle {
        self.handle.clone()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for InputCapture {
    fn drop(&mut self) {
        log::info!("Input capture stopped: {}", self.device_name);
        self.handle.shared.is_active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl InputCaptureHandle {
    /// Handle fed from a test-owned producer instead of a device
    pub(crate) fn detached(channels: usize, capacity: usize) -> (Self, ringbuf::HeapProd<f32>) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let handle = Self {
            shared: Arc::new(InputSharedState {
                consumer: Mutex::new(consumer),
                input_level: AtomicU32::new(f32_to_u32(0.0)),
                dropped_samples: AtomicU64::new(0),
                is_active: AtomicBool::new(true),
                channels,
            }),
        };
        (handle, producer)
    }
}
