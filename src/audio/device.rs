//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use super::unit::RuntimeConfig;
use crate::error::DeviceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frames_per_period: u16,
    /// 0 disables live input
    pub input_channels: u8,
    pub output_channels: u8,
    /// Linear output gain, 0..=1
    pub master_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frames_per_period: 128,
            input_channels: 0,
            output_channels: 2,
            master_volume: 0.5,
        }
    }
}

impl AudioConfig {
    /// Geometry handed to the unit at initialization
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            sample_rate: self.sample_rate,
            frames_per_period: self.frames_per_period,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
        }
    }

    /// Duration of one period in nanoseconds
    pub fn period_ns(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames_per_period as u64 * 1_000_000_000 / self.sample_rate as u64
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Output,
    Input,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

fn list_devices(direction: Direction) -> Result<Vec<AudioDeviceInfo>, DeviceError> {
    let host = cpal::default_host();
    let default_device = match direction {
        Direction::Output => host.default_output_device(),
        Direction::Input => host.default_input_device(),
    };
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    let devices: Vec<cpal::Device> = match direction {
        Direction::Output => host.output_devices().map(|d| d.collect()),
        Direction::Input => host.input_devices().map(|d| d.collect()),
    }
    .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    Ok(devices
        .into_iter()
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: Some(&name) == default_name.as_ref(),
            name,
        })
        .collect())
}

fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();

    let Some(device_name) = name else {
        let device = match direction {
            Direction::Output => host.default_output_device(),
            Direction::Input => host.default_input_device(),
        };
        return device.ok_or(DeviceError::NoDefaultDevice(direction.label()));
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Output => host.output_devices().map(|d| d.collect()),
        Direction::Input => host.input_devices().map(|d| d.collect()),
    }
    .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    devices
        .into_iter()
        .find(|device| device.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| DeviceError::NotFound {
            kind: direction.label(),
            name: device_name.to_string(),
        })
}

/// Get list of available output devices
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>, DeviceError> {
    list_devices(Direction::Output)
}

/// Get list of available input devices
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, DeviceError> {
    list_devices(Direction::Input)
}

/// Get output device by name, or default if name is None
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    find_device(Direction::Output, name)
}

/// Get input device by name, or default if name is None
pub fn get_input_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    find_device(Direction::Input, name)
}

fn fixed_or_default(
    range: &cpal::SupportedBufferSize,
    frames: u16,
) -> cpal::BufferSize {
    match range {
        cpal::SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&(frames as u32)) =>
        {
            cpal::BufferSize::Fixed(frames as u32)
        }
        _ => cpal::BufferSize::Default,
    }
}

/// Output stream config at exactly the requested rate.
///
/// The unit is initialized for one sample rate, so there is no fallback to the
/// device default. The period size is fixed when the device allows it;
/// otherwise the backend chooses and the engine clamps oversized periods.
pub fn get_supported_config(
    device: &cpal::Device,
    preferred: &AudioConfig,
) -> Result<cpal::StreamConfig, DeviceError> {
    let supported_configs = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Config(e.to_string()))?;

    for config in supported_configs {
        let min_rate = config.min_sample_rate().0;
        let max_rate = config.max_sample_rate().0;

        if preferred.sample_rate >= min_rate
            && preferred.sample_rate <= max_rate
            && config.channels() >= preferred.output_channels as u16
        {
            return Ok(cpal::StreamConfig {
                channels: preferred.output_channels as u16,
                sample_rate: cpal::SampleRate(preferred.sample_rate),
                buffer_size: fixed_or_default(config.buffer_size(), preferred.frames_per_period),
            });
        }
    }

    Err(DeviceError::UnsupportedSampleRate(preferred.sample_rate))
}

/// Input stream config at the output rate, with the device's channel count
/// capped at stereo
pub fn get_input_config(
    device: &cpal::Device,
    preferred: &AudioConfig,
) -> Result<cpal::StreamConfig, DeviceError> {
    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Config(e.to_string()))?;

    for config in supported_configs {
        let min_rate = config.min_sample_rate().0;
        let max_rate = config.max_sample_rate().0;

        if preferred.sample_rate >= min_rate && preferred.sample_rate <= max_rate {
            return Ok(cpal::StreamConfig {
                channels: config.channels().min(2),
                sample_rate: cpal::SampleRate(preferred.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }

    Err(DeviceError::UnsupportedSampleRate(preferred.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.frames_per_period, 128);
        assert_eq!(config.output_channels, 2);
        assert_eq!(config.period_ns(), 2_666_666);
    }

    #[test]
    fn test_runtime_mirrors_config() {
        let config = AudioConfig {
            input_channels: 2,
            frames_per_period: 64,
            ..AudioConfig::default()
        };
        let runtime = config.runtime();
        assert_eq!(runtime.input_channels, 2);
        assert_eq!(runtime.frames_per_period, 64);
        assert_eq!(runtime.sample_rate, 48_000);
    }

    #[test]
    fn test_buffer_size_selection() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(fixed_or_default(&range, 128), cpal::BufferSize::Fixed(128));
        assert_eq!(fixed_or_default(&range, 32), cpal::BufferSize::Default);
        assert_eq!(
            fixed_or_default(&cpal::SupportedBufferSize::Unknown, 128),
            cpal::BufferSize::Default
        );
    }
}
