//! Unit module FFI structures
//!
//! These structures match the unit runtime C API: the exported metadata
//! header, the runtime descriptor handed to `unit_init`, and the callback
//! signatures. All structs are byte-packed like their C counterparts.

use std::ffi::c_void;
use std::os::raw::c_char;

// =============================================================================
// Version / limits
// =============================================================================

pub const UNIT_API_VERSION: u32 = 0x0002_0000;
pub const UNIT_API_MAJOR_MASK: u32 = 0x7FFF_0000;
pub const UNIT_API_MINOR_MASK: u32 = 0x0000_FFFF;

pub const UNIT_NAME_LEN: usize = 13;
pub const UNIT_PARAM_NAME_LEN: usize = 12;
pub const UNIT_MAX_PARAM_COUNT: usize = 24;
pub const UNIT_SAMPLE_NAME_LEN: usize = 31;

/// Platform bits of the target field
pub const UNIT_TARGET_PLATFORM_MASK: u16 = 0xFF00;
/// Module category bits of the target field
pub const UNIT_TARGET_MODULE_MASK: u16 = 0x00FF;

pub const UNIT_TARGET_PLATFORM: u16 = 0x0400;

/// `true` when a unit built against `api` can run on this host
pub fn api_is_compatible(api: u32) -> bool {
    (api & UNIT_API_MAJOR_MASK) == (UNIT_API_VERSION & UNIT_API_MAJOR_MASK)
        && (api & UNIT_API_MINOR_MASK) <= (UNIT_API_VERSION & UNIT_API_MINOR_MASK)
}

// =============================================================================
// Header
// =============================================================================

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct UnitParam {
    pub min: i16,
    pub max: i16,
    pub center: i16,
    pub init: i16,
    pub param_type: u8,
    /// frac:4, frac_mode:1, reserved:3 (LSB first)
    pub frac_bits: u8,
    pub name: [c_char; UNIT_PARAM_NAME_LEN + 1],
}

impl UnitParam {
    pub const fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            center: 0,
            init: 0,
            param_type: 0,
            frac_bits: 0,
            name: [0; UNIT_PARAM_NAME_LEN + 1],
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct UnitHeader {
    pub header_size: u32,
    pub target: u16,
    pub api: u32,
    pub dev_id: u32,
    pub unit_id: u32,
    pub version: u32,
    pub name: [c_char; UNIT_NAME_LEN + 1],
    pub num_presets: u32,
    pub num_params: u32,
    pub params: [UnitParam; UNIT_MAX_PARAM_COUNT],
}

// =============================================================================
// Runtime descriptor
// =============================================================================

#[repr(C, packed)]
pub struct SampleWrapper {
    pub bank: u8,
    pub index: u8,
    pub channels: u8,
    pub name: [c_char; UNIT_SAMPLE_NAME_LEN + 1],
    pub frames: usize,
    pub sample_ptr: *const f32,
}

pub type GetNumSampleBanksFn = unsafe extern "C" fn() -> u8;
pub type GetNumSamplesForBankFn = unsafe extern "C" fn(bank: u8) -> u8;
pub type GetSampleFn = unsafe extern "C" fn(bank: u8, index: u8) -> *const SampleWrapper;

#[repr(C, packed)]
pub struct UnitRuntimeDesc {
    pub target: u16,
    pub api: u32,
    pub samplerate: u32,
    pub frames_per_buffer: u16,
    pub input_channels: u8,
    pub output_channels: u8,
    pub get_num_sample_banks: Option<GetNumSampleBanksFn>,
    pub get_num_samples_for_bank: Option<GetNumSamplesForBankFn>,
    pub get_sample: Option<GetSampleFn>,
}

// =============================================================================
// Callbacks exported by the unit
// =============================================================================

pub const SYM_HEADER: &[u8] = b"unit_header\0";
pub const SYM_INIT: &[u8] = b"unit_init\0";
pub const SYM_RENDER: &[u8] = b"unit_render\0";
pub const SYM_TEARDOWN: &[u8] = b"unit_teardown\0";
pub const SYM_SET_PARAM_VALUE: &[u8] = b"unit_set_param_value\0";
pub const SYM_GET_PARAM_VALUE: &[u8] = b"unit_get_param_value\0";
pub const SYM_GET_PARAM_STR_VALUE: &[u8] = b"unit_get_param_str_value\0";
pub const SYM_LOAD_PRESET: &[u8] = b"unit_load_preset\0";
pub const SYM_GET_PRESET_NAME: &[u8] = b"unit_get_preset_name\0";
pub const SYM_SET_TEMPO: &[u8] = b"unit_set_tempo\0";
pub const SYM_NOTE_ON: &[u8] = b"unit_note_on\0";
pub const SYM_NOTE_OFF: &[u8] = b"unit_note_off\0";
pub const SYM_ALL_NOTE_OFF: &[u8] = b"unit_all_note_off\0";

pub type UnitInitFn = unsafe extern "C" fn(desc: *const UnitRuntimeDesc) -> i8;
pub type UnitRenderFn = unsafe extern "C" fn(input: *const f32, output: *mut f32, frames: u32);
pub type UnitTeardownFn = unsafe extern "C" fn();
pub type UnitSetParamValueFn = unsafe extern "C" fn(id: u8, value: i32);
pub type UnitGetParamValueFn = unsafe extern "C" fn(id: u8) -> i32;
pub type UnitGetParamStrValueFn = unsafe extern "C" fn(id: u8, value: i32) -> *const c_char;
pub type UnitLoadPresetFn = unsafe extern "C" fn(index: u8);
pub type UnitGetPresetNameFn = unsafe extern "C" fn(index: u8) -> *const c_char;
pub type UnitSetTempoFn = unsafe extern "C" fn(tempo: u32);
pub type UnitNoteOnFn = unsafe extern "C" fn(note: u8, velocity: u8);
pub type UnitNoteOffFn = unsafe extern "C" fn(note: u8);
pub type UnitAllNoteOffFn = unsafe extern "C" fn();

/// Source of exported symbol addresses (a loaded library, or a table in tests)
pub trait SymbolSource: Send + Sync {
    /// Address of the NUL-terminated symbol `name`, or `None` when absent
    fn lookup(&self, name: &[u8]) -> Option<*const c_void>;
}

impl SymbolSource for libloading::Library {
    fn lookup(&self, name: &[u8]) -> Option<*const c_void> {
        // Safety: the symbol is only read as an address here; callers cast it
        // to the type the ABI declares for that name.
        let address = unsafe { self.get::<*const c_void>(name).ok().map(|symbol| *symbol) }?;
        (!address.is_null()).then_some(address)
    }
}
