//! PCM driver interface.
//!
//! Streams talk to hardware through two traits:
//! - [`PcmBackend`] opens a named PCM device for a direction
//! - [`PcmDevice`] is an opened handle: parameter negotiation, interleaved I/O, recovery
//!
//! Negotiation follows the usual two-phase shape: start from the device's full
//! [`HwCapabilities`] ("any"), narrow it with [`HwParams`] setters, then commit the resulting
//! [`PcmConfig`]. Software thresholds ([`SwParams`]) are committed afterwards.

use std::ops::RangeInclusive;

use audio_hal_types::StreamDirection;

mod host;
mod null;
mod ring;

pub use host::HostPcmBackend;
pub use null::{NULL_DEVICE_NAME, NullPcm, NullPcmBackend};
pub use ring::{SampleRing, Take};

/// Errors raised by a PCM driver, each with the errno the driver would report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcmError {
    /// Handle is in a bad state and must be reconfigured.
    #[error("file descriptor in bad state")]
    BadFd,
    /// Underrun (playback) or overrun (capture).
    #[error("xrun")]
    Xrun,
    #[error("stream suspended")]
    Suspended,
    #[error("interrupted")]
    Interrupted,
    #[error("no such device: {0}")]
    NoDevice(String),
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("i/o error (errno {0})")]
    Io(i32),
}

impl PcmError {
    /// Negative errno.
    pub fn errno(&self) -> i32 {
        match self {
            PcmError::BadFd => -77,
            PcmError::Xrun => -32,
            PcmError::Suspended => -86,
            PcmError::Interrupted => -4,
            PcmError::NoDevice(_) => -19,
            PcmError::Invalid(_) => -22,
            PcmError::Io(code) => -code.abs(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmFormat {
    S16Le,
    U8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmAccess {
    RwInterleaved,
    RwNonInterleaved,
}

/// Everything a device could accept before any narrowing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HwCapabilities {
    pub formats: Vec<PcmFormat>,
    pub access: Vec<PcmAccess>,
    pub channels: RangeInclusive<u32>,
    pub rates: RangeInclusive<u32>,
    pub buffer_frames: RangeInclusive<usize>,
    pub period_frames: RangeInclusive<usize>,
}

impl HwCapabilities {
    /// Accepts any mono/stereo 16-bit interleaved configuration.
    pub fn permissive() -> Self {
        Self {
            formats: vec![PcmFormat::S16Le],
            access: vec![PcmAccess::RwInterleaved],
            channels: 1..=2,
            rates: 8_000..=192_000,
            buffer_frames: 16..=1 << 20,
            period_frames: 16..=1 << 18,
        }
    }
}

/// Hardware parameter space being narrowed towards a [`PcmConfig`].
#[derive(Clone, Debug)]
pub struct HwParams {
    caps: HwCapabilities,
    format: Option<PcmFormat>,
    access: Option<PcmAccess>,
    channels: Option<u32>,
    rate: Option<u32>,
    buffer_frames: Option<usize>,
    period_frames: Option<usize>,
}

impl HwParams {
    /// Start from the full capability space.
    pub fn any(caps: HwCapabilities) -> Self {
        Self {
            caps,
            format: None,
            access: None,
            channels: None,
            rate: None,
            buffer_frames: None,
            period_frames: None,
        }
    }

    pub fn set_format(&mut self, format: PcmFormat) -> Result<(), PcmError> {
        if !self.caps.formats.contains(&format) {
            return Err(PcmError::Invalid(format!("format {format:?}")));
        }
        self.format = Some(format);
        Ok(())
    }

    pub fn set_access(&mut self, access: PcmAccess) -> Result<(), PcmError> {
        if !self.caps.access.contains(&access) {
            return Err(PcmError::Invalid(format!("access {access:?}")));
        }
        self.access = Some(access);
        Ok(())
    }

    pub fn set_channels(&mut self, channels: u32) -> Result<(), PcmError> {
        if !self.caps.channels.contains(&channels) {
            return Err(PcmError::Invalid(format!("{channels} channels")));
        }
        self.channels = Some(channels);
        Ok(())
    }

    /// Pick the supported rate closest to `rate`; returns the rate actually chosen.
    pub fn set_rate_near(&mut self, rate: u32) -> Result<u32, PcmError> {
        if self.caps.rates.is_empty() {
            return Err(PcmError::Invalid("no supported rate".into()));
        }
        let chosen = rate.clamp(*self.caps.rates.start(), *self.caps.rates.end());
        self.rate = Some(chosen);
        Ok(chosen)
    }

    pub fn set_buffer_size(&mut self, frames: usize) -> Result<(), PcmError> {
        if !self.caps.buffer_frames.contains(&frames) {
            return Err(PcmError::Invalid(format!("buffer of {frames} frames")));
        }
        self.buffer_frames = Some(frames);
        Ok(())
    }

    /// Pick the supported period closest to `frames`, never longer than the buffer;
    /// returns the period actually chosen.
    pub fn set_period_size_near(&mut self, frames: usize) -> Result<usize, PcmError> {
        let max = match self.buffer_frames {
            Some(buffer) => buffer.min(*self.caps.period_frames.end()),
            None => *self.caps.period_frames.end(),
        };
        let min = *self.caps.period_frames.start();
        if min > max {
            return Err(PcmError::Invalid("no supported period".into()));
        }
        let chosen = frames.clamp(min, max);
        self.period_frames = Some(chosen);
        Ok(chosen)
    }

    /// Resolve every parameter, taking the smallest allowed value for any left open.
    pub fn finish(&self) -> Result<PcmConfig, PcmError> {
        let format = match self.format {
            Some(f) => f,
            None => *self
                .caps
                .formats
                .first()
                .ok_or_else(|| PcmError::Invalid("no supported format".into()))?,
        };
        let access = match self.access {
            Some(a) => a,
            None => *self
                .caps
                .access
                .first()
                .ok_or_else(|| PcmError::Invalid("no supported access".into()))?,
        };
        Ok(PcmConfig {
            format,
            access,
            channels: self.channels.unwrap_or(*self.caps.channels.start()),
            rate: self.rate.unwrap_or(*self.caps.rates.start()),
            buffer_frames: self.buffer_frames.unwrap_or(*self.caps.buffer_frames.start()),
            period_frames: self.period_frames.unwrap_or(*self.caps.period_frames.start()),
        })
    }
}

/// A fully resolved hardware configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmConfig {
    pub format: PcmFormat,
    pub access: PcmAccess,
    pub channels: u32,
    pub rate: u32,
    pub buffer_frames: usize,
    pub period_frames: usize,
}

/// Software thresholds, all in frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwParams {
    /// Buffered frames needed before a playback stream starts (1 for capture).
    pub start_threshold: usize,
    /// Fill level at which the stream stops on xrun.
    pub stop_threshold: usize,
    /// Minimum available frames before a blocked reader/writer is woken.
    pub avail_min: usize,
}

/// Opens PCM devices by name.
pub trait PcmBackend: Send + Sync {
    fn open(&self, name: &str, direction: StreamDirection) -> Result<Box<dyn PcmDevice>, PcmError>;
}

/// An opened PCM handle.
///
/// Dropping the handle closes the device.
pub trait PcmDevice: Send {
    fn name(&self) -> &str;

    /// Full parameter space of the device.
    fn hw_capabilities(&self) -> Result<HwCapabilities, PcmError>;

    fn commit_hw_params(&mut self, config: &PcmConfig) -> Result<(), PcmError>;

    /// Committed `(buffer_frames, period_frames)`.
    fn params(&self) -> Result<(usize, usize), PcmError>;

    fn commit_sw_params(&mut self, params: &SwParams) -> Result<(), PcmError>;

    /// Read interleaved frames into `buf`; returns frames read (may be 0).
    fn read_interleaved(&mut self, buf: &mut [i16]) -> Result<usize, PcmError>;

    /// Write interleaved frames from `buf`; returns frames written.
    fn write_interleaved(&mut self, buf: &[i16]) -> Result<usize, PcmError>;

    /// Put the stream back into the prepared state.
    fn prepare(&mut self) -> Result<(), PcmError>;

    /// Wait for queued playback frames to play out.
    fn drain(&mut self) -> Result<(), PcmError>;

    /// Recover from an I/O error.
    ///
    /// Xruns, suspends and interrupts are cleared by re-preparing the stream; anything
    /// else is handed back.
    fn recover(&mut self, err: PcmError, silent: bool) -> Result<(), PcmError> {
        match err {
            PcmError::Xrun | PcmError::Suspended | PcmError::Interrupted => {
                if !silent {
                    tracing::warn!(device = self.name(), error = %err, "recovering pcm stream");
                }
                self.prepare()
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> HwCapabilities {
        HwCapabilities {
            formats: vec![PcmFormat::S16Le],
            access: vec![PcmAccess::RwInterleaved],
            channels: 1..=2,
            rates: 8_000..=48_000,
            buffer_frames: 64..=8192,
            period_frames: 32..=4096,
        }
    }

    #[test]
    fn narrowing_rejects_unsupported_values() {
        let mut hw = HwParams::any(caps());
        assert!(hw.set_format(PcmFormat::U8).is_err());
        assert!(hw.set_access(PcmAccess::RwNonInterleaved).is_err());
        assert!(hw.set_channels(6).is_err());
        assert!(hw.set_buffer_size(16).is_err());
    }

    #[test]
    fn rate_near_clamps_into_range() {
        let mut hw = HwParams::any(caps());
        assert_eq!(hw.set_rate_near(96_000).unwrap(), 48_000);
        assert_eq!(hw.set_rate_near(44_100).unwrap(), 44_100);
    }

    #[test]
    fn period_near_clamps_into_range_and_buffer() {
        let mut hw = HwParams::any(caps());
        assert_eq!(hw.set_period_size_near(8).unwrap(), 32);
        hw.set_buffer_size(1024).unwrap();
        assert_eq!(hw.set_period_size_near(2048).unwrap(), 1024);
        assert_eq!(hw.finish().unwrap().period_frames, 1024);

        let mut narrow = caps();
        narrow.period_frames = 128..=4096;
        let mut hw = HwParams::any(narrow);
        hw.set_buffer_size(64).unwrap();
        assert!(hw.set_period_size_near(64).is_err());
    }

    #[test]
    fn finish_fills_open_parameters() {
        let mut hw = HwParams::any(caps());
        hw.set_channels(2).unwrap();
        let config = hw.finish().unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.rate, 8_000);
        assert_eq!(config.access, PcmAccess::RwInterleaved);
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(PcmError::BadFd.errno(), -77);
        assert_eq!(PcmError::Io(5).errno(), -5);
        assert_eq!(PcmError::Io(-5).errno(), -5);
    }
}
