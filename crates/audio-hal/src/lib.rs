//! ALSA-style audio hardware layer.
//!
//! [`AudioHardware`] owns at most one output and one input stream, routes them to devices
//! named after the active route and audio mode, and drives a mixer for volume and mute.
//! Capture at rates below 44.1 kHz goes through a fixed-point [`downsampler::Downsampler`].

pub mod config;
pub mod downsampler;
pub mod error;
pub mod hardware;
pub mod input;
pub mod mixer;
pub mod output;
pub mod params;
pub mod pcm;
pub mod power;
pub mod resample;
pub mod routes;
pub mod stream_ops;
pub mod telephony;

#[cfg(test)]
mod testing;

pub use audio_hal_types as types;
pub use config::HalConfig;
pub use error::{HalError, Result};
pub use hardware::{AudioHardware, HardwareBuilder};
pub use input::InputStream;
pub use mixer::{Mixer, SoftMixerBackend};
pub use output::OutputStream;
pub use pcm::{HostPcmBackend, NullPcmBackend, PcmBackend};
pub use routes::{Route, RouteMask};
pub use stream_ops::StreamRequest;
