//! Capture stream, with optional downsampling below the 44.1 kHz hardware rate.

use std::sync::Arc;

use audio_hal_types::{AudioFormat, AudioMode, StreamStatus};
use parking_lot::Mutex;

use crate::downsampler::{BufferProvider, Downsampler};
use crate::error::{HalError, Result};
use crate::hardware::HardwareCore;
use crate::params::{AudioParameter, KEY_ROUTING, KEY_VR_MODE};
use crate::power::INPUT_WAKE_LOCK;
use crate::routes::RouteMask;
use crate::stream_ops::{DEFAULT_SAMPLE_RATE, StreamOps, StreamRequest};

pub struct InputStream {
    core: Arc<HardwareCore>,
    inner: Mutex<InputInner>,
}

struct InputInner {
    capture: CaptureSource,
    downsampler: Option<Downsampler>,
    power_lock: bool,
}

/// Device handle plus a one-period staging buffer feeding the downsampler.
struct CaptureSource {
    ops: StreamOps,
    pcm_in: Vec<i16>,
    /// Frames in `pcm_in` not yet handed out.
    staged: usize,
    period: usize,
}

impl BufferProvider for CaptureSource {
    fn next_buffer(&mut self, frames: usize) -> Result<&[i16]> {
        let channels = self.ops.channel_count();
        let handle = self.ops.handle_mut().ok_or(HalError::NotInitialized)?;

        if self.staged == 0 {
            let mut filled = 0;
            while filled < self.period {
                let window = &mut self.pcm_in[filled * channels..self.period * channels];
                match handle.read_interleaved(window) {
                    Ok(n) => filled += n,
                    Err(err) => {
                        tracing::debug!(error = %err, filled, "capture read failed");
                        return Err(err.into());
                    }
                }
            }
            self.staged = self.period;
        }

        let frames = frames.min(self.staged);
        let start = (self.period - self.staged) * channels;
        Ok(&self.pcm_in[start..start + frames * channels])
    }

    fn release_buffer(&mut self, frames: usize) {
        self.staged -= frames.min(self.staged);
    }
}

impl InputInner {
    /// Reopen the device and follow any period change the hardware negotiated.
    fn set_device(&mut self, mode: AudioMode, device: RouteMask) -> Result<()> {
        self.capture.ops.set_device(mode, device)?;
        self.sync_period()
    }

    /// Resize the staging buffer and rebuild the downsampler for the current default period.
    ///
    /// Nothing changes if the new period cannot be downsampled.
    fn sync_period(&mut self) -> Result<()> {
        let period = self.capture.ops.defaults().period_size;
        let previous = self.capture.period;
        if period == previous {
            return Ok(());
        }

        let rebuilt = match self.downsampler.as_ref() {
            Some(current) => {
                let rate = current.sample_rate();
                let channels = current.channel_count();
                match Downsampler::new(rate, channels, period) {
                    Ok(downsampler) => Some(downsampler),
                    Err(err) => {
                        tracing::error!(
                            rate,
                            period,
                            error = %err,
                            "cannot downsample renegotiated period"
                        );
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        if let Some(downsampler) = rebuilt {
            self.capture.pcm_in = vec![0; period * downsampler.channel_count()];
            self.downsampler = Some(downsampler);
        }
        self.capture.period = period;
        self.capture.staged = 0;
        tracing::info!(from = previous, to = period, "capture period renegotiated");
        Ok(())
    }
}

impl InputStream {
    pub(crate) fn new(core: Arc<HardwareCore>) -> Self {
        let ops = core.stream_ops(core.capture_defaults.clone());
        let period = ops.defaults().period_size;
        Self {
            core,
            inner: Mutex::new(InputInner {
                capture: CaptureSource {
                    ops,
                    pcm_in: Vec::new(),
                    staged: 0,
                    period,
                },
                downsampler: None,
                power_lock: false,
            }),
        }
    }

    /// Negotiate the client format; rates below 44.1 kHz get a downsampler.
    pub(crate) fn set(&self, request: &mut StreamRequest) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.capture.ops.set(request)?;

        let rate = inner.capture.ops.sample_rate();
        if rate == DEFAULT_SAMPLE_RATE {
            inner.downsampler = None;
            return Ok(());
        }

        let channels = inner.capture.ops.channel_count();
        let period = inner.capture.ops.defaults().period_size;
        inner.downsampler = Some(Downsampler::new(rate, channels, period)?);
        inner.capture.period = period;
        inner.capture.pcm_in = vec![0; period * channels];
        inner.capture.staged = 0;
        tracing::debug!(rate, channels, period, "capture downsampler ready");
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().capture.ops.sample_rate()
    }

    /// Exact read size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().capture.ops.buffer_size()
    }

    /// Channel mask.
    pub fn channels(&self) -> u32 {
        self.inner.lock().capture.ops.channels()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().capture.ops.channel_count()
    }

    pub fn format(&self) -> AudioFormat {
        self.inner.lock().capture.ops.format()
    }

    pub fn device(&self) -> RouteMask {
        self.inner.lock().capture.ops.device()
    }

    /// Fill `buffer` with interleaved samples, returning the number of bytes read.
    ///
    /// `buffer` must be exactly [`buffer_size`](Self::buffer_size) bytes long.
    pub fn read(&self, buffer: &mut [i16]) -> Result<usize> {
        let bytes = std::mem::size_of_val(buffer);
        let expected = self.buffer_size();
        if bytes != expected {
            tracing::warn!(bytes, expected, "bad read size");
            return Err(HalError::BadValue);
        }

        let state = self.core.state.lock();
        let mut inner = self.inner.lock();
        if !inner.power_lock {
            self.core.wake_lock.acquire(INPUT_WAKE_LOCK);
            let device = inner.capture.ops.device();
            tracing::debug!(device = %device, mode = ?state.mode, "configuring input");
            if let Err(err) = inner.set_device(state.mode, device) {
                tracing::warn!(device = %device, error = %err, "input reconfiguration failed");
            }
            if let Some(downsampler) = inner.downsampler.as_mut() {
                downsampler.reset();
            }
            inner.capture.staged = 0;
            inner.power_lock = true;

            let expected = inner.capture.ops.buffer_size();
            if bytes != expected {
                tracing::warn!(bytes, expected, "read size changed with the negotiated period");
                return Err(HalError::BadValue);
            }
        }
        drop(state);

        if !inner.capture.ops.is_open() {
            return Err(HalError::NotInitialized);
        }

        let channels = inner.capture.ops.channel_count().max(1);
        let bytes_per_frame = channels * inner.capture.ops.format().bytes_per_sample();
        let InputInner {
            capture,
            downsampler,
            ..
        } = &mut *inner;

        loop {
            let result = match downsampler.as_mut() {
                Some(downsampler) => downsampler.resample(capture, buffer),
                None => {
                    let handle = capture.ops.handle_mut().ok_or(HalError::NotInitialized)?;
                    handle.read_interleaved(buffer).map_err(HalError::from)
                }
            };

            match result {
                Ok(0) => continue,
                Ok(frames) => return Ok(frames * bytes_per_frame),
                Err(HalError::Device(err)) => {
                    tracing::debug!(error = %err, "read failed, recovering");
                    let handle = capture.ops.handle_mut().ok_or(HalError::NotInitialized)?;
                    handle.recover(err, false)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Close the device and drop the wake lock.
    pub fn standby(&self) -> Result<()> {
        let _state = self.core.state.lock();
        let mut inner = self.inner.lock();
        inner.capture.ops.close();
        if inner.power_lock {
            self.core.wake_lock.release(INPUT_WAKE_LOCK);
            inner.power_lock = false;
        }
        tracing::debug!("input standby");
        Ok(())
    }

    /// Reopen for `device`. Capture always reopens.
    pub fn set_device(&self, mode: AudioMode, device: RouteMask, _force: bool) -> Result<()> {
        self.inner.lock().set_device(mode, device)
    }

    /// Master capture gain.
    pub fn set_gain(&self, gain: f32) -> Result<()> {
        self.core.mixer.lock().set_master_gain(gain)
    }

    /// Apply `vr_mode=<0|1>` and `routing=<mask>`. Any other key makes the call fail with
    /// `BadValue`.
    pub fn set_parameters(&self, key_value_pairs: &str) -> Result<()> {
        tracing::debug!(params = key_value_pairs, "input set_parameters");
        let mut params = AudioParameter::parse(key_value_pairs);

        if let Some(value) = params.get_int(KEY_VR_MODE) {
            self.core.set_voice_record_gain(value != 0);
            params.remove(KEY_VR_MODE);
        }

        if let Some(value) = params.get_int(KEY_ROUTING) {
            let open = self.inner.lock().capture.ops.is_open();
            if open && value != 0 {
                let mode = self.core.mode();
                if let Err(err) = self.set_device(mode, RouteMask(value as u32), false) {
                    tracing::warn!(device = value, error = %err, "input routing failed");
                }
            }
            params.remove(KEY_ROUTING);
        }

        if params.is_empty() {
            Ok(())
        } else {
            Err(HalError::BadValue)
        }
    }

    pub fn get_parameters(&self, keys: &str) -> String {
        let mut params = AudioParameter::parse(keys);
        if params.contains(KEY_ROUTING) {
            params.add_int(KEY_ROUTING, i64::from(self.device().bits()));
        }
        params.to_string()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().power_lock
    }

    pub fn close(&self) {
        self.inner.lock().capture.ops.close();
    }

    pub fn status(&self) -> StreamStatus {
        let inner = self.inner.lock();
        inner.capture.ops.status(inner.power_lock)
    }

    pub fn name_candidates(&self, mode: AudioMode, device: RouteMask) -> Vec<String> {
        self.inner.lock().capture.ops.name_candidates(mode, device)
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        let _ = self.standby();
    }
}
