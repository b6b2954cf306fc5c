//! Render engine: owns the unit, the message queue and the output stream
//!
//! The control context talks to the engine through `&mut self` methods. The
//! only path into the audio callback is the message queue (plus the master
//! volume atomic, which the callback only reads).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;

use super::device::{get_output_device, get_supported_config, AudioConfig};
use super::input::InputCapture;
use super::message::ControlMessage;
use super::midi::NoteSink;
use super::perf::PerfSnapshot;
use super::queue::{message_queue, Producer};
use super::render::{EngineShared, RenderCore};
use super::unit::{AudioUnit, Capabilities, UnitInfo, UnitModule};
use crate::error::{DeviceError, EngineError};

/// Construction parameters for a `RenderEngine`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub audio: AudioConfig,
    pub output_device: Option<String>,
    pub input_device: Option<String>,
    /// Message queue slots (power of two)
    pub queue_capacity: usize,
    /// Periods between pitch analyses
    pub pitch_interval: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            output_device: None,
            input_device: None,
            queue_capacity: 64,
            pitch_interval: 8,
        }
    }
}

pub struct RenderEngine {
    options: EngineOptions,
    shared: Arc<EngineShared>,
    core: Arc<Mutex<RenderCore>>,
    messages: Producer<ControlMessage>,

    info: Option<UnitInfo>,
    /// Control-side handle for string queries on a loaded library
    control: Option<UnitModule>,
    initialized: bool,

    stream: Option<cpal::Stream>,
    capture: Option<InputCapture>,
}

impl RenderEngine {
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        let (messages, consumer) = message_queue(options.queue_capacity)?;
        let shared = Arc::new(EngineShared::new(options.audio.master_volume));
        let core = RenderCore::new(
            &options.audio,
            options.pitch_interval,
            consumer,
            Arc::clone(&shared),
        );

        log::info!(
            "Render engine created: {} Hz, {} frames, {} in / {} out, queue {}",
            options.audio.sample_rate,
            options.audio.frames_per_period,
            options.audio.input_channels,
            options.audio.output_channels,
            options.queue_capacity
        );

        Ok(Self {
            options,
            shared,
            core: Arc::new(Mutex::new(core)),
            messages,
            info: None,
            control: None,
            initialized: false,
            stream: None,
            capture: None,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.options.audio
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    // ---- Unit lifecycle ----

    /// Load a unit library from disk, replacing any current unit
    pub fn load_unit(&mut self, path: &Path) -> Result<UnitInfo, EngineError> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        let module = UnitModule::open(path)?;
        let info = module.info().clone();
        self.install(Box::new(module.clone()), Some(module));
        Ok(info)
    }

    /// Install an already constructed unit. The engine must be stopped.
    pub fn set_unit(&mut self, unit: Box<dyn AudioUnit>) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        self.install(unit, None);
        Ok(())
    }

    fn install(&mut self, unit: Box<dyn AudioUnit>, control: Option<UnitModule>) {
        let info = unit.info().clone();
        // Old library handles go first so the old unit tears down on replace
        self.control = None;
        let previous = self.core.lock().set_unit(Some(unit));
        if let Some(previous) = previous {
            log::info!("Replaced unit {}", previous.info().name);
        }
        self.control = control;
        self.info = Some(info);
        self.initialized = false;
    }

    /// Remove the current unit. The engine must be stopped.
    pub fn unload_unit(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        self.control = None;
        if let Some(unit) = self.core.lock().set_unit(None) {
            log::info!("Unloaded unit {}", unit.info().name);
        }
        self.info = None;
        self.initialized = false;
        Ok(())
    }

    pub fn unit_info(&self) -> Option<&UnitInfo> {
        self.info.as_ref()
    }

    pub fn has_unit(&self) -> bool {
        self.info.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Hand the runtime descriptor to the unit. Runs at most once per unit.
    pub fn initialize_unit(&mut self) -> Result<(), EngineError> {
        if self.initialized {
            return Ok(());
        }
        let runtime = self.options.audio.runtime();
        let mut core = self.core.lock();
        if let Some(unit) = core.unit_mut() {
            unit.initialize(&runtime)?;
            self.initialized = true;
        }
        Ok(())
    }

    // ---- Audio lifecycle ----

    /// Initialize the unit and open the output stream.
    ///
    /// On any failure the engine stays stopped.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.has_unit() {
            log::warn!("Starting audio without a unit, output will be silent");
        }
        self.initialize_unit()?;

        let audio = self.options.audio.clone();
        let device = get_output_device(self.options.output_device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let stream_config = get_supported_config(&device, &audio)?;

        log::info!(
            "Opening output stream on {}: {} Hz, {} channels, buffer {:?}",
            device_name,
            stream_config.sample_rate.0,
            stream_config.channels,
            stream_config.buffer_size
        );

        let capture = if audio.input_channels > 0 {
            let capture = InputCapture::new(self.options.input_device.as_deref(), &audio)?;
            self.core.lock().set_capture(Some(capture.handle()));
            Some(capture)
        } else {
            None
        };

        self.shared.perf.reset();
        let core = Arc::clone(&self.core);
        let shared = Arc::clone(&self.shared);
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // The control side holds the lock only while stopped or
                    // swapping units; a miss costs one silent period
                    match core.try_lock() {
                        Some(mut core) => core.process(data),
                        None => {
                            data.fill(0.0);
                            shared.perf.record_underrun();
                        }
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::BuildStream(e.to_string()));

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.core.lock().set_capture(None);
                return Err(e.into());
            }
        };

        if let Err(e) = stream.play() {
            self.core.lock().set_capture(None);
            return Err(DeviceError::PlayStream(e.to_string()).into());
        }

        self.stream = Some(stream);
        self.capture = capture;
        log::info!("Audio started");
        Ok(())
    }

    /// Stop audio. Notes are silenced before the stream goes away, and any
    /// message the callback did not get to is applied directly afterwards.
    pub fn stop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        let queued = self.messages.push(ControlMessage::AllNotesOff).is_ok();
        if !queued {
            log::warn!("Message queue full while stopping, all-notes-off sent after drain");
        }
        let period = Duration::from_nanos(self.options.audio.period_ns());
        std::thread::sleep(period * 2);

        if let Err(e) = stream.pause() {
            log::warn!("Failed to pause output stream: {}", e);
        }
        drop(stream);
        self.capture = None;

        let mut core = self.core.lock();
        core.set_capture(None);
        let drained = core.drain_messages();
        if !queued {
            if let Some(unit) = core.unit_mut() {
                unit.all_notes_off();
            }
        }
        drop(core);

        let perf = self.shared.perf.snapshot();
        log::info!(
            "Audio stopped ({} late messages applied, {} underruns, {} clamped periods)",
            drained,
            perf.underruns,
            perf.clamped_periods
        );
    }

    /// Render one period without a device, initializing the unit first.
    ///
    /// Returns interleaved output after volume and limiting.
    pub fn render_offline(&mut self, frames: usize) -> Result<Vec<f32>, EngineError> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        self.initialize_unit()?;

        let channels = self.options.audio.output_channels.max(1) as usize;
        let mut output = vec![0.0; frames * channels];
        self.core.lock().process(&mut output);
        Ok(output)
    }

    // ---- Control surface ----

    /// Queue a raw message for the next period
    pub fn enqueue(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        self.messages
            .push(message)
            .map_err(|_| EngineError::QueueFull)
    }

    /// Queue a parameter update, clamped to the parameter's range.
    ///
    /// A full queue is recoverable: retry on a later tick.
    pub fn enqueue_parameter(&mut self, id: u8, value: i32) -> Result<i32, EngineError> {
        let param = self
            .info
            .as_ref()
            .and_then(|info| info.param(id))
            .ok_or(EngineError::UnknownParameter(id))?;
        let value = param.clamp(value);
        self.enqueue(ControlMessage::SetParameter { id, value })?;
        Ok(value)
    }

    pub fn load_preset(&mut self, index: u8) -> Result<(), EngineError> {
        self.enqueue(ControlMessage::LoadPreset { index })
    }

    pub fn set_tempo(&mut self, bpm: f32) -> Result<(), EngineError> {
        self.enqueue(ControlMessage::tempo(bpm))
    }

    /// Applied directly, not queued
    pub fn set_master_volume(&self, volume: f32) {
        self.shared.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    pub fn cpu_load(&self) -> f32 {
        self.shared.perf.cpu_load()
    }

    /// Detected pitch in Hz, 0 when none
    pub fn detected_pitch(&self) -> f32 {
        self.shared.detected_pitch()
    }

    pub fn perf(&self) -> PerfSnapshot {
        self.shared.perf.snapshot()
    }

    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn input_level(&self) -> Option<f32> {
        self.capture.as_ref().map(|c| c.handle().input_level())
    }

    /// Run a read-only query against the unit.
    ///
    /// Loaded libraries answer through the control-side handle. Other units
    /// live only in the render core, which is locked briefly.
    fn query<R>(&self, f: impl FnOnce(&dyn AudioUnit) -> R) -> Option<R> {
        if let Some(module) = &self.control {
            return Some(f(module));
        }
        let mut core = self.core.lock();
        core.unit_mut().map(|unit| f(&*unit))
    }

    pub fn capabilities(&self) -> Capabilities {
        self.query(|unit| unit.capabilities()).unwrap_or_default()
    }

    /// Display string for a parameter value, from the unit when it can
    /// format values and from the descriptor otherwise
    pub fn parameter_display(&self, id: u8, value: i32) -> Option<String> {
        let param = self.info.as_ref()?.param(id)?;
        self.query(|unit| unit.parameter_display(id, value))
            .flatten()
            .or_else(|| Some(param.format_value(value)))
    }

    pub fn preset_name(&self, index: u8) -> Option<String> {
        self.query(|unit| unit.preset_name(index)).flatten()
    }
}

impl NoteSink for RenderEngine {
    fn note_on(&mut self, note: u8, velocity: u8) {
        if self.enqueue(ControlMessage::NoteOn { note, velocity }).is_err() {
            log::warn!("Message queue full, dropped note-on {}", note);
        }
    }

    fn note_off(&mut self, note: u8) {
        if self.enqueue(ControlMessage::NoteOff { note }).is_err() {
            log::warn!("Message queue full, dropped note-off {}", note);
        }
    }

    fn all_notes_off(&mut self) {
        if self.enqueue(ControlMessage::AllNotesOff).is_err() {
            log::warn!("Message queue full, dropped all-notes-off");
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.stop();
        log::info!("Render engine dropped");
    }
}
