//! Per-period render pipeline
//!
//! `RenderCore` is everything the audio callback touches. Each period:
//!
//! 1. Drain the message queue into the unit (updates land before rendering)
//! 2. Fill the unit's input from live capture, or zeros
//! 3. Render at most `frames_per_period` frames
//! 4. Feed the unshaped mono downmix to the pitch detector
//! 5. Apply master volume, then the soft limiter
//! 6. Every few periods, re-run pitch analysis
//!
//! Nothing here allocates after construction or returns an error; a missing
//! unit renders silence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::device::AudioConfig;
use super::input::InputCaptureHandle;
use super::message::ControlMessage;
use super::perf::{f32_to_u32, u32_to_f32, PerfCounters};
use super::pitch::PitchDetector;
use super::queue::Consumer;
use super::unit::AudioUnit;

/// Level up to which the limiter is transparent
const LIMIT_KNEE: f32 = 0.7;

/// Smooth saturating limiter.
///
/// Linear below the knee, tanh-shaped above it, asymptotic to ±1.0.
/// Non-finite input becomes silence.
#[inline]
pub fn soft_limit(sample: f32) -> f32 {
    if !sample.is_finite() {
        return 0.0;
    }
    let magnitude = sample.abs();
    if magnitude <= LIMIT_KNEE {
        return sample;
    }
    let headroom = 1.0 - LIMIT_KNEE;
    let shaped = LIMIT_KNEE + headroom * ((magnitude - LIMIT_KNEE) / headroom).tanh();
    shaped.min(1.0).copysign(sample)
}

/// State shared between the control context and the audio callback
pub struct EngineShared {
    master_volume: AtomicU32,
    detected_pitch: AtomicU32,
    pub perf: PerfCounters,
}

impl EngineShared {
    pub fn new(master_volume: f32) -> Self {
        Self {
            master_volume: AtomicU32::new(f32_to_u32(master_volume.clamp(0.0, 1.0))),
            detected_pitch: AtomicU32::new(f32_to_u32(0.0)),
            perf: PerfCounters::new(),
        }
    }

    pub fn master_volume(&self) -> f32 {
        u32_to_f32(self.master_volume.load(Ordering::Relaxed))
    }

    /// Read directly by the callback, so this bypasses the queue
    pub fn set_master_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        self.master_volume.store(f32_to_u32(volume), Ordering::Relaxed);
    }

    pub fn detected_pitch(&self) -> f32 {
        u32_to_f32(self.detected_pitch.load(Ordering::Relaxed))
    }

    fn set_detected_pitch(&self, hz: f32) {
        self.detected_pitch.store(f32_to_u32(hz), Ordering::Relaxed);
    }
}

/// Apply one queued message to the unit
fn apply(unit: &mut dyn AudioUnit, message: ControlMessage) {
    match message {
        ControlMessage::SetParameter { id, value } => unit.set_parameter(id, value),
        ControlMessage::NoteOn { note, velocity } => unit.note_on(note, velocity),
        ControlMessage::NoteOff { note } => unit.note_off(note),
        ControlMessage::AllNotesOff => unit.all_notes_off(),
        ControlMessage::LoadPreset { index } => unit.load_preset(index),
        ControlMessage::SetTempo { tempo } => unit.set_tempo(tempo),
    }
}

pub struct RenderCore {
    max_frames: usize,
    output_channels: usize,
    input_channels: usize,
    period_ns: u64,

    unit: Option<Box<dyn AudioUnit>>,
    messages: Consumer<ControlMessage>,
    capture: Option<InputCaptureHandle>,

    // Pre-allocated buffers
    input: Vec<f32>,
    output: Vec<f32>,
    mono: Vec<f32>,

    pitch: PitchDetector,
    pitch_counter: u32,
    pitch_interval: u32,

    shared: Arc<EngineShared>,
}

impl RenderCore {
    pub fn new(
        config: &AudioConfig,
        pitch_interval: u32,
        messages: Consumer<ControlMessage>,
        shared: Arc<EngineShared>,
    ) -> Self {
        let max_frames = config.frames_per_period.max(1) as usize;
        let output_channels = config.output_channels.max(1) as usize;
        let input_channels = config.input_channels as usize;
        // Without live input the unit still gets a zeroed buffer of output width
        let input_stride = input_channels.max(output_channels);

        Self {
            max_frames,
            output_channels,
            input_channels,
            period_ns: config.period_ns(),
            unit: None,
            messages,
            capture: None,
            input: vec![0.0; max_frames * input_stride],
            output: vec![0.0; max_frames * output_channels],
            mono: vec![0.0; max_frames],
            pitch: PitchDetector::new(config.sample_rate),
            pitch_counter: 0,
            pitch_interval: pitch_interval.max(1),
            shared,
        }
    }

    pub fn set_unit(&mut self, unit: Option<Box<dyn AudioUnit>>) -> Option<Box<dyn AudioUnit>> {
        self.pitch.reset();
        self.shared.set_detected_pitch(0.0);
        std::mem::replace(&mut self.unit, unit)
    }

    pub fn unit_mut(&mut self) -> Option<&mut (dyn AudioUnit + 'static)> {
        self.unit.as_deref_mut()
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    pub fn set_capture(&mut self, capture: Option<InputCaptureHandle>) {
        if let Some(capture) = &capture {
            capture.clear_buffer();
        }
        self.capture = capture;
    }

    /// Apply every queued message. Without a unit they are discarded.
    pub fn drain_messages(&mut self) -> usize {
        let mut count = 0;
        while let Some(message) = self.messages.pop() {
            if let Some(unit) = self.unit.as_deref_mut() {
                apply(unit, message);
            }
            count += 1;
        }
        count
    }

    /// Render one period into the interleaved device buffer `out`
    pub fn process(&mut self, out: &mut [f32]) {
        let started = Instant::now();

        self.drain_messages();

        let Some(unit) = self.unit.as_deref_mut() else {
            out.fill(0.0);
            return;
        };

        let channels = self.output_channels;
        let requested = out.len() / channels;
        let frames = requested.min(self.max_frames);
        if requested > self.max_frames {
            self.shared.perf.record_clamped();
        }

        let input_len = match &self.capture {
            Some(capture) if self.input_channels > 0 => {
                let len = frames * self.input_channels;
                capture.read_into(&mut self.input[..len]);
                len
            }
            _ => {
                let len = frames * channels;
                self.input[..len].fill(0.0);
                len
            }
        };

        let output_len = frames * channels;
        let output = &mut self.output[..output_len];
        output.fill(0.0);

        let render_started = Instant::now();
        unit.render(&self.input[..input_len], output, frames as u32);
        self.shared
            .perf
            .record_render(render_started.elapsed().as_nanos() as u64);

        // Analysis sees the unit's own output, before volume and limiting
        let scale = 1.0 / channels as f32;
        for (mono, frame) in self.mono.iter_mut().zip(output.chunks_exact(channels)) {
            let sum: f32 = frame.iter().sum();
            *mono = if sum.is_finite() { sum * scale } else { 0.0 };
        }
        self.pitch.push_samples(&self.mono[..frames]);

        let volume = self.shared.master_volume();
        for (dst, &src) in out.iter_mut().zip(output.iter()) {
            *dst = soft_limit(src * volume);
        }
        out[output_len..].fill(0.0);

        self.pitch_counter += 1;
        if self.pitch_counter >= self.pitch_interval {
            self.pitch_counter = 0;
            let hz = self.pitch.analyze();
            self.shared.set_detected_pitch(hz);
        }

        let elapsed = started.elapsed().as_nanos() as u64;
        self.shared.perf.record_period(elapsed, self.period_ns);
    }
}
