//! ear-core: Shared types for the EAR adaptive equalization engine
//!
//! This crate provides the foundational types used across all EAR crates:
//! sample types, per-callback buffer views, configuration and errors.

mod config;
mod error;
mod sample;

pub use config::*;
pub use error::*;
pub use sample::*;

/// Number of frequency bins the adaptive core works on
pub const MAX_CONTROLS: usize = 2048;

/// Largest per-callback working size
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a raw rate reported by a device, if it is one we support
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            88200 => Some(Self::Hz88200),
            96000 => Some(Self::Hz96000),
            _ => None,
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples64 = 64,
    Samples128 = 128,
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
    Samples2048 = 2048,
    Samples4096 = 4096,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    /// Map a requested period length, if it is one we support
    pub fn from_frames(frames: u32) -> Option<Self> {
        match frames {
            64 => Some(Self::Samples64),
            128 => Some(Self::Samples128),
            256 => Some(Self::Samples256),
            512 => Some(Self::Samples512),
            1024 => Some(Self::Samples1024),
            2048 => Some(Self::Samples2048),
            4096 => Some(Self::Samples4096),
            _ => None,
        }
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples1024
    }
}

/// Stereo channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}

/// Which per-callback path the processor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum OperationMode {
    CalibratingLatency = 0,
    ProcessingAudio = 1,
}

impl OperationMode {
    #[inline]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::CalibratingLatency,
            _ => Self::ProcessingAudio,
        }
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::ProcessingAudio
    }
}

/// Where the reference signal comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SignalSource {
    External = 0,
    WhiteNoise = 1,
    PinkNoise = 2,
}

impl SignalSource {
    #[inline]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WhiteNoise,
            2 => Self::PinkNoise,
            _ => Self::External,
        }
    }
}

impl Default for SignalSource {
    fn default() -> Self {
        Self::External
    }
}
