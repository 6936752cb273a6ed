//! ear-dsp: Adaptive core of the EAR engine
//!
//! Everything here runs on, or is prepared for, the real-time audio thread.
//!
//! ## Modules
//! - `fft` - Pre-planned complex transforms and magnitude analysis
//! - `equalizer` - Per-bin gain controls turned into a windowed FIR
//! - `history` - Bounded reference history for latency compensation
//! - `adaptation` - Spectral gap closing between reference and microphone
//! - `calibration` - Click-train round-trip latency measurement
//! - `noise` - White and pink reference generators
//! - `processor` - Per-callback entry point and control handle

pub mod adaptation;
pub mod calibration;
pub mod equalizer;
pub mod fft;
pub mod history;
pub mod noise;
pub mod processor;

pub use adaptation::{AdaptationEngine, AdaptationOutcome};
pub use calibration::{LatencyCalibrator, StereoLatency};
pub use equalizer::{ControlsGuard, ControlsHandle, Equalizer};
pub use history::ReferenceHistory;
pub use noise::{PinkNoise, WhiteNoise};
pub use processor::{Processor, ProcessorEvent, ProcessorEvents, ProcessorHandle};
