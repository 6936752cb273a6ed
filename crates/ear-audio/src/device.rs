//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};

use crate::{AudioError, AudioResult};

/// Rates we report when probing a device
const PROBED_SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub input_channels: u16,
    pub output_channels: u16,
    pub sample_rates: Vec<u32>,
}

impl DeviceInfo {
    /// True when the device can deliver a reference pair next to the microphones
    pub fn has_reference_inputs(&self) -> bool {
        self.input_channels >= 4
    }
}

/// Get the audio host (platform default backend)
pub fn get_host() -> Host {
    cpal::default_host()
}

/// List capture devices
pub fn list_input_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (input_channels, sample_rates) = probe(&device, true);
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                input_channels,
                output_channels: 0,
                sample_rates,
            })
        })
        .collect();

    Ok(devices)
}

/// List playback devices
pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (output_channels, sample_rates) = probe(&device, false);
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                input_channels: 0,
                output_channels,
                sample_rates,
            })
        })
        .collect();

    Ok(devices)
}

/// Named capture device, or the host default when `name` is `None`
pub fn input_device(name: Option<&str>) -> AudioResult<Device> {
    let host = get_host();
    match name {
        None => host.default_input_device().ok_or(AudioError::NoDevice),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::BackendError(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Named playback device, or the host default when `name` is `None`
pub fn output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = get_host();
    match name {
        None => host.default_output_device().ok_or(AudioError::NoDevice),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::BackendError(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

fn probe(device: &Device, is_input: bool) -> (u16, Vec<u32>) {
    let configs: Vec<SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    summarize_configs(&configs)
}

/// Widest channel count and the probed rates any range covers
fn summarize_configs(configs: &[SupportedStreamConfigRange]) -> (u16, Vec<u32>) {
    let max_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);

    let mut sample_rates: Vec<u32> = configs
        .iter()
        .flat_map(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            PROBED_SAMPLE_RATES
                .into_iter()
                .filter(move |&rate| rate >= min && rate <= max)
        })
        .collect();

    sample_rates.sort_unstable();
    sample_rates.dedup();

    (max_channels, sample_rates)
}

/// Name of the backend in use
pub fn host_name() -> String {
    format!("{:?}", get_host().id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    #[test]
    fn test_summarize_configs() {
        let configs = [range(2, 44100, 48000), range(4, 96000, 96000)];
        let (channels, rates) = summarize_configs(&configs);

        assert_eq!(channels, 4);
        assert_eq!(rates, vec![44100, 48000, 96000]);
    }

    #[test]
    fn test_reference_inputs() {
        let info = DeviceInfo {
            name: "interface".into(),
            is_default: true,
            input_channels: 4,
            output_channels: 2,
            sample_rates: vec![48000],
        };
        assert!(info.has_reference_inputs());
    }
}
