//! Runtime descriptor and the host's sample bank
//!
//! A unit receives the stream geometry plus three sample accessors in its
//! runtime descriptor. The host exposes a single bank holding one mono test
//! sample: one second of a 440 Hz sine at amplitude 0.1.

use std::f32::consts::PI;
use std::os::raw::c_char;

use once_cell::sync::Lazy;

use super::sys::{self, SampleWrapper, UnitRuntimeDesc};

/// Stream geometry handed to a unit at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub sample_rate: u32,
    pub frames_per_period: u16,
    pub input_channels: u8,
    pub output_channels: u8,
}

impl RuntimeConfig {
    /// Build the C descriptor. `target` is the unit's own header target so the
    /// unit's target check always passes.
    pub(crate) fn to_desc(self, target: u16) -> UnitRuntimeDesc {
        UnitRuntimeDesc {
            target,
            api: sys::UNIT_API_VERSION,
            samplerate: self.sample_rate,
            frames_per_buffer: self.frames_per_period,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            get_num_sample_banks: Some(get_num_sample_banks),
            get_num_samples_for_bank: Some(get_num_samples_for_bank),
            get_sample: Some(get_sample),
        }
    }
}

pub const SAMPLE_BANK_RATE: u32 = 48_000;
pub const SAMPLE_FREQUENCY_HZ: f32 = 440.0;
pub const SAMPLE_AMPLITUDE: f32 = 0.1;

const SAMPLE_NAME: &[u8] = b"Sine 440";

struct SampleBank {
    /// Backing storage for `wrapper.sample_ptr`; never resized after creation
    _data: Vec<f32>,
    wrapper: SampleWrapper,
}

// Safety: the bank is immutable after construction and the raw pointer in the
// wrapper refers to `_data`, which lives as long as the bank (process lifetime).
unsafe impl Send for SampleBank {}
unsafe impl Sync for SampleBank {}

static SAMPLE_BANK: Lazy<SampleBank> = Lazy::new(|| {
    let frames = SAMPLE_BANK_RATE as usize;
    let data: Vec<f32> = (0..frames)
        .map(|i| {
            let t = i as f32 / SAMPLE_BANK_RATE as f32;
            SAMPLE_AMPLITUDE * (2.0 * PI * SAMPLE_FREQUENCY_HZ * t).sin()
        })
        .collect();

    let mut name = [0 as c_char; sys::UNIT_SAMPLE_NAME_LEN + 1];
    for (dst, &src) in name.iter_mut().zip(SAMPLE_NAME) {
        *dst = src as c_char;
    }

    let wrapper = SampleWrapper {
        bank: 0,
        index: 0,
        channels: 1,
        name,
        frames,
        sample_ptr: data.as_ptr(),
    };

    SampleBank {
        _data: data,
        wrapper,
    }
});

unsafe extern "C" fn get_num_sample_banks() -> u8 {
    1
}

unsafe extern "C" fn get_num_samples_for_bank(bank: u8) -> u8 {
    if bank == 0 {
        1
    } else {
        0
    }
}

unsafe extern "C" fn get_sample(bank: u8, index: u8) -> *const SampleWrapper {
    if bank == 0 && index == 0 {
        &SAMPLE_BANK.wrapper
    } else {
        std::ptr::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sample_bank_shape() {
        unsafe {
            assert_eq!(get_num_sample_banks(), 1);
            assert_eq!(get_num_samples_for_bank(0), 1);
            assert_eq!(get_num_samples_for_bank(1), 0);
            assert!(get_sample(0, 1).is_null());
            assert!(get_sample(1, 0).is_null());
        }
    }

    #[test]
    fn test_sample_contents() {
        let wrapper = unsafe { &*get_sample(0, 0) };
        let frames = wrapper.frames;
        let channels = wrapper.channels;
        assert_eq!(frames, 48_000);
        assert_eq!(channels, 1);

        let data = unsafe { std::slice::from_raw_parts(wrapper.sample_ptr, frames) };
        let peak = data.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert_abs_diff_eq!(peak, SAMPLE_AMPLITUDE, epsilon = 1e-4);
        // quarter period of 440 Hz at 48 kHz is ~27.27 frames
        assert_abs_diff_eq!(data[0], 0.0, epsilon = 1e-6);
        assert!(data[27] > 0.099);
    }

    #[test]
    fn test_desc_carries_host_api() {
        let desc = RuntimeConfig {
            sample_rate: 48_000,
            frames_per_period: 128,
            input_channels: 0,
            output_channels: 2,
        }
        .to_desc(0x0403);
        let target = desc.target;
        let api = desc.api;
        let frames = desc.frames_per_buffer;
        assert_eq!(target, 0x0403);
        assert_eq!(api, sys::UNIT_API_VERSION);
        let get_sample = desc.get_sample;
        assert_eq!(frames, 128);
        assert!(get_sample.is_some());
    }
}
