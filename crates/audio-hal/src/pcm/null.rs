//! Bit-bucket PCM device.
//!
//! The last entry of every name fallback chain. Playback discards samples, capture yields
//! silence, and every parameter is accepted.

use audio_hal_types::StreamDirection;

use super::{HwCapabilities, PcmBackend, PcmConfig, PcmDevice, PcmError, SwParams};

pub const NULL_DEVICE_NAME: &str = "NULL_Device";

pub struct NullPcm {
    direction: StreamDirection,
    config: Option<PcmConfig>,
}

impl NullPcm {
    pub fn new(direction: StreamDirection) -> Self {
        Self {
            direction,
            config: None,
        }
    }

    fn channels(&self) -> usize {
        self.config.map(|c| c.channels as usize).unwrap_or(1).max(1)
    }
}

impl PcmDevice for NullPcm {
    fn name(&self) -> &str {
        NULL_DEVICE_NAME
    }

    fn hw_capabilities(&self) -> Result<HwCapabilities, PcmError> {
        Ok(HwCapabilities::permissive())
    }

    fn commit_hw_params(&mut self, config: &PcmConfig) -> Result<(), PcmError> {
        tracing::debug!(direction = ?self.direction, ?config, "null pcm configured");
        self.config = Some(*config);
        Ok(())
    }

    fn params(&self) -> Result<(usize, usize), PcmError> {
        self.config
            .map(|c| (c.buffer_frames, c.period_frames))
            .ok_or_else(|| PcmError::Invalid("hw params not committed".into()))
    }

    fn commit_sw_params(&mut self, _params: &SwParams) -> Result<(), PcmError> {
        Ok(())
    }

    fn read_interleaved(&mut self, buf: &mut [i16]) -> Result<usize, PcmError> {
        buf.fill(0);
        Ok(buf.len() / self.channels())
    }

    fn write_interleaved(&mut self, buf: &[i16]) -> Result<usize, PcmError> {
        Ok(buf.len() / self.channels())
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        Ok(())
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        Ok(())
    }
}

/// Backend whose every name resolves to the null device.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPcmBackend;

impl PcmBackend for NullPcmBackend {
    fn open(
        &self,
        _name: &str,
        direction: StreamDirection,
    ) -> Result<Box<dyn PcmDevice>, PcmError> {
        Ok(Box::new(NullPcm::new(direction)))
    }
}
