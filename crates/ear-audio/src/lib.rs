//! ear-audio: Audio transports for the EAR engine
//!
//! Connects the adaptive processor to a period clock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Processor    │◀────│ AudioTransport │────▶│ cpal Device │
//! │              │     │                │     │  or         │
//! │ - equalizers │     │ - period clock │     │ Simulated   │
//! │ - adaptation │     │ - deinterleave │     │ Room        │
//! │ - calibrator │     │                │     │             │
//! └──────────────┘     └────────────────┘     └─────────────┘
//! ```

mod device;
mod engine;
mod error;
mod simulated;
mod stream;

pub use device::*;
pub use engine::*;
pub use error::*;
pub use simulated::*;
pub use stream::*;

use ear_core::{BufferSize, SampleRate};

/// Device transport configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    /// Microphone pair plus optional reference pair
    pub input_channels: u16,
    pub output_channels: u16,
    /// Capture device name, host default when `None`
    pub input_device: Option<String>,
    /// Playback device name, host default when `None`
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            buffer_size: BufferSize::Samples1024,
            input_channels: 4,
            output_channels: 2,
            input_device: None,
            output_device: None,
        }
    }
}
