//! Unit hosting
//!
//! A unit is an externally built audio module exposing a metadata header, two
//! mandatory callbacks (initialize, render) and a set of optional ones. The
//! engine drives any `AudioUnit`; `UnitModule` is the implementation backed by
//! a shared library loaded at runtime.

pub mod loader;
pub mod runtime;
pub mod sys;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;

use crate::error::UnitError;

pub use loader::UnitModule;
pub use runtime::RuntimeConfig;

/// How a parameter value is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamDisplay {
    None,
    Percent,
    Decibels,
    Cents,
    Semitones,
    Octaves,
    Hertz,
    Kilohertz,
    Bpm,
    Milliseconds,
    Seconds,
    Enumeration,
    Strings,
    Bitmaps,
    DryWet,
    Pan,
    Spread,
    OnOff,
    MidiNote,
    Other(u8),
}

impl ParamDisplay {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Percent,
            2 => Self::Decibels,
            3 => Self::Cents,
            4 => Self::Semitones,
            5 => Self::Octaves,
            6 => Self::Hertz,
            7 => Self::Kilohertz,
            8 => Self::Bpm,
            9 => Self::Milliseconds,
            10 => Self::Seconds,
            11 => Self::Enumeration,
            12 => Self::Strings,
            13 => Self::Bitmaps,
            14 => Self::DryWet,
            15 => Self::Pan,
            16 => Self::Spread,
            17 => Self::OnOff,
            18 => Self::MidiNote,
            other => Self::Other(other),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Percent => "%",
            Self::Decibels => " dB",
            Self::Cents => " c",
            Self::Semitones => " st",
            Self::Octaves => " oct",
            Self::Hertz => " Hz",
            Self::Kilohertz => " kHz",
            Self::Bpm => " bpm",
            Self::Milliseconds => " ms",
            Self::Seconds => " s",
            _ => "",
        }
    }
}

/// Descriptor of one unit parameter, copied out of the module header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub min: i16,
    pub max: i16,
    pub center: i16,
    pub default: i16,
    pub display: ParamDisplay,
    /// Number of fractional digits (decimal) or bits (fixed point)
    pub fraction: u8,
    pub fraction_decimal: bool,
}

impl ParamDescriptor {
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min as i32, self.max as i32)
    }

    /// Host-side rendering of a value, used when the unit has no string callback
    pub fn format_value(&self, value: i32) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        match self.display {
            ParamDisplay::OnOff => return if value != 0 { "on" } else { "off" }.to_string(),
            ParamDisplay::MidiNote if (0..=127).contains(&value) => {
                return format!("{}{}", NOTE_NAMES[value as usize % 12], value / 12 - 1);
            }
            ParamDisplay::Pan | ParamDisplay::DryWet if value != 0 => {
                let side = match (self.display, value < 0) {
                    (ParamDisplay::Pan, true) => "L",
                    (ParamDisplay::Pan, false) => "R",
                    (_, true) => "D",
                    (_, false) => "W",
                };
                return format!("{}{}", side, value.abs());
            }
            _ => {}
        }

        let text = if self.fraction == 0 {
            value.to_string()
        } else if self.fraction_decimal {
            let scaled = value as f64 / 10f64.powi(self.fraction as i32);
            format!("{:.*}", self.fraction as usize, scaled)
        } else {
            let scaled = value as f64 / (1u32 << self.fraction.min(15)) as f64;
            format!("{:.2}", scaled)
        };
        format!("{}{}", text, self.display.suffix())
    }
}

/// Module category, from the low byte of the header target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    Global,
    DelayFx,
    ReverbFx,
    Synth,
    MasterFx,
    Unknown(u8),
}

impl UnitCategory {
    pub fn from_target(target: u16) -> Self {
        match (target & sys::UNIT_TARGET_MODULE_MASK) as u8 {
            0 => Self::Global,
            1 => Self::DelayFx,
            2 => Self::ReverbFx,
            3 => Self::Synth,
            4 => Self::MasterFx,
            other => Self::Unknown(other),
        }
    }
}

/// Metadata header of a loaded unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitInfo {
    pub name: String,
    pub vendor_id: u32,
    pub unit_id: u32,
    pub api_version: u32,
    pub version: u32,
    pub target: u16,
    pub params: Vec<ParamDescriptor>,
    pub preset_count: u32,
}

impl UnitInfo {
    pub fn category(&self) -> UnitCategory {
        UnitCategory::from_target(self.target)
    }

    pub fn param(&self, id: u8) -> Option<&ParamDescriptor> {
        self.params.get(id as usize)
    }

    /// Vendor id rendered as its four ASCII characters when printable
    pub fn vendor_tag(&self) -> String {
        let bytes = self.vendor_id.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            format!("{:#010x}", self.vendor_id)
        }
    }

    /// `major.minor.patch` of the unit's own version field
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version >> 16,
            (self.version >> 8) & 0xFF,
            self.version & 0xFF
        )
    }

    /// `major.minor` of the API the unit was built against
    pub fn api_string(&self) -> String {
        format!(
            "{}.{}",
            (self.api_version & sys::UNIT_API_MAJOR_MASK) >> 16,
            self.api_version & sys::UNIT_API_MINOR_MASK
        )
    }
}

/// Which optional callbacks a unit provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub set_parameter: bool,
    pub get_parameter: bool,
    pub parameter_display: bool,
    pub notes: bool,
    pub all_notes_off: bool,
    pub presets: bool,
    pub preset_names: bool,
    pub tempo: bool,
}

/// Capability set driven by the render engine.
///
/// `initialize` and `render` are mandatory. Everything else is optional: the
/// default bodies are no-ops / `None`, and `capabilities()` reports which ones
/// the unit really implements so callers can check before relying on them.
///
/// `render` runs on the audio thread and must not allocate or block.
pub trait AudioUnit: Send {
    fn info(&self) -> &UnitInfo;

    fn initialize(&mut self, runtime: &RuntimeConfig) -> Result<(), UnitError>;

    /// Render `frames` frames; buffers are interleaved by channel count.
    fn render(&mut self, input: &[f32], output: &mut [f32], frames: u32);

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn set_parameter(&mut self, _id: u8, _value: i32) {}

    fn parameter(&self, _id: u8) -> Option<i32> {
        None
    }

    fn parameter_display(&self, _id: u8, _value: i32) -> Option<String> {
        None
    }

    fn note_on(&mut self, _note: u8, _velocity: u8) {}

    fn note_off(&mut self, _note: u8) {}

    fn all_notes_off(&mut self) {}

    fn load_preset(&mut self, _index: u8) {}

    fn preset_name(&self, _index: u8) -> Option<String> {
        None
    }

    fn set_tempo(&mut self, _tempo: u32) {}
}
