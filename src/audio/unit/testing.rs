//! Recording unit for engine and render tests

use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioUnit, Capabilities, ParamDescriptor, ParamDisplay, RuntimeConfig, UnitInfo};
use crate::error::UnitError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitCall {
    Initialize(RuntimeConfig),
    Render { frames: u32 },
    SetParameter(u8, i32),
    NoteOn(u8, u8),
    NoteOff(u8),
    AllNotesOff,
    LoadPreset(u8),
    SetTempo(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestSignal {
    Silence,
    Constant(f32),
    /// Sine at the given frequency, same on every channel
    Sine { hz: f32, amplitude: f32 },
    /// Output = input (requires matching channel counts)
    PassThrough,
}

pub struct TestUnit {
    info: UnitInfo,
    signal: TestSignal,
    init_result: Result<(), UnitError>,
    sample_rate: f32,
    channels: usize,
    phase: f32,
    pub calls: Arc<Mutex<Vec<UnitCall>>>,
}

impl TestUnit {
    pub fn new(signal: TestSignal) -> Self {
        let param = |name: &str, min: i16, max: i16, default: i16| ParamDescriptor {
            name: name.to_string(),
            min,
            max,
            center: 0,
            default,
            display: ParamDisplay::None,
            fraction: 0,
            fraction_decimal: false,
        };

        Self {
            info: UnitInfo {
                name: "TestUnit".to_string(),
                vendor_id: 0x5445_5354,
                unit_id: 1,
                api_version: super::sys::UNIT_API_VERSION,
                version: 0x0001_0000,
                target: super::sys::UNIT_TARGET_PLATFORM | 3,
                params: vec![param("GAIN", 0, 100, 50), param("DETUNE", -64, 63, 0)],
                preset_count: 2,
            },
            signal,
            init_result: Ok(()),
            sample_rate: 48_000.0,
            channels: 2,
            phase: 0.0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_init(mut self, error: UnitError) -> Self {
        self.init_result = Err(error);
        self
    }

    /// Shared handle on the call log
    pub fn calls(&self) -> Arc<Mutex<Vec<UnitCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: UnitCall) {
        self.calls.lock().push(call);
    }
}

impl AudioUnit for TestUnit {
    fn info(&self) -> &UnitInfo {
        &self.info
    }

    fn initialize(&mut self, runtime: &RuntimeConfig) -> Result<(), UnitError> {
        self.record(UnitCall::Initialize(*runtime));
        self.sample_rate = runtime.sample_rate as f32;
        self.channels = runtime.output_channels.max(1) as usize;
        self.init_result.clone()
    }

    fn render(&mut self, input: &[f32], output: &mut [f32], frames: u32) {
        self.record(UnitCall::Render { frames });
        let channels = self.channels;
        let frames = frames as usize;

        for frame in 0..frames {
            let value = match self.signal {
                TestSignal::Silence => 0.0,
                TestSignal::Constant(value) => value,
                TestSignal::Sine { hz, amplitude } => {
                    let value = amplitude * (2.0 * PI * self.phase).sin();
                    self.phase = (self.phase + hz / self.sample_rate).fract();
                    value
                }
                TestSignal::PassThrough => 0.0,
            };
            for ch in 0..channels {
                let idx = frame * channels + ch;
                output[idx] = match self.signal {
                    TestSignal::PassThrough => input.get(idx).copied().unwrap_or(0.0),
                    _ => value,
                };
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            set_parameter: true,
            notes: true,
            all_notes_off: true,
            presets: true,
            tempo: true,
            ..Capabilities::default()
        }
    }

    fn set_parameter(&mut self, id: u8, value: i32) {
        self.record(UnitCall::SetParameter(id, value));
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        self.record(UnitCall::NoteOn(note, velocity));
    }

    fn note_off(&mut self, note: u8) {
        self.record(UnitCall::NoteOff(note));
    }

    fn all_notes_off(&mut self) {
        self.record(UnitCall::AllNotesOff);
    }

    fn load_preset(&mut self, index: u8) {
        self.record(UnitCall::LoadPreset(index));
    }

    fn set_tempo(&mut self, tempo: u32) {
        self.record(UnitCall::SetTempo(tempo));
    }
}
