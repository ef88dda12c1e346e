//! Playback stream.
//!
//! The first write after open or standby reconfigures the routed device and takes the
//! output wake lock under the facade lock; the write loop itself runs under the stream
//! lock only.

use std::sync::Arc;

use audio_hal_types::{AudioFormat, AudioMode, StreamStatus};
use parking_lot::Mutex;

use crate::error::{HalError, Result};
use crate::hardware::HardwareCore;
use crate::params::{AudioParameter, KEY_ROUTING};
use crate::pcm::PcmError;
use crate::power::OUTPUT_WAKE_LOCK;
use crate::routes::RouteMask;
use crate::stream_ops::{StreamOps, StreamRequest, latency_ms};

pub struct OutputStream {
    core: Arc<HardwareCore>,
    inner: Mutex<OutputInner>,
}

struct OutputInner {
    ops: StreamOps,
    power_lock: bool,
}

impl OutputStream {
    pub(crate) fn new(core: Arc<HardwareCore>) -> Self {
        let ops = core.stream_ops(core.playback_defaults.clone());
        Self {
            core,
            inner: Mutex::new(OutputInner {
                ops,
                power_lock: false,
            }),
        }
    }

    pub(crate) fn set(&self, request: &mut StreamRequest) -> Result<()> {
        self.inner.lock().ops.set(request)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().ops.sample_rate()
    }

    /// Preferred write size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().ops.buffer_size()
    }

    /// Channel mask.
    pub fn channels(&self) -> u32 {
        self.inner.lock().ops.channels()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().ops.channel_count()
    }

    pub fn format(&self) -> AudioFormat {
        self.inner.lock().ops.format()
    }

    /// Output latency in milliseconds.
    pub fn latency(&self) -> u32 {
        latency_ms(self.inner.lock().ops.latency_us())
    }

    pub fn device(&self) -> RouteMask {
        self.inner.lock().ops.device()
    }

    /// Write interleaved samples, returning the number of bytes consumed.
    ///
    /// Trailing samples that do not make up a whole frame are ignored.
    pub fn write(&self, buffer: &[i16]) -> Result<usize> {
        let state = self.core.state.lock();
        let mut inner = self.inner.lock();
        let mode = state.mode;
        if !inner.power_lock {
            let device = inner.ops.device();
            tracing::debug!(device = %device, ?mode, "configuring output on first write");
            if let Err(err) = inner.ops.set_device(mode, device) {
                tracing::warn!(device = %device, error = %err, "output reconfiguration failed");
            }
            self.core.wake_lock.acquire(OUTPUT_WAKE_LOCK);
            inner.power_lock = true;
        }
        drop(state);

        let channels = inner.ops.channel_count().max(1);
        let total = buffer.len() / channels;
        let mut sent = 0;

        while sent < total {
            let device = inner.ops.device();
            let handle = inner.ops.handle_mut().ok_or(HalError::NotInitialized)?;
            match handle.write_interleaved(&buffer[sent * channels..total * channels]) {
                Ok(frames) => sent += frames,
                Err(PcmError::BadFd) => {
                    tracing::warn!(device = %device, "pcm handle in bad state, reconfiguring");
                    inner.ops.set_device(mode, device)?;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "write failed, recovering");
                    handle.recover(err, true)?;
                }
            }
        }

        Ok(sent * channels * inner.ops.format().bytes_per_sample())
    }

    /// Close the device unless a call is in progress, and drop the wake lock.
    pub fn standby(&self) -> Result<()> {
        let state = self.core.state.lock();
        let mut inner = self.inner.lock();
        if state.mode != AudioMode::InCall {
            inner.ops.close();
        }
        if inner.power_lock {
            self.core.wake_lock.release(OUTPUT_WAKE_LOCK);
            inner.power_lock = false;
        }
        tracing::debug!(mode = ?state.mode, "output standby");
        Ok(())
    }

    /// Reroute; a no-op unless `device` changed or `force` is set.
    pub fn set_device(&self, mode: AudioMode, device: RouteMask, force: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if device != inner.ops.device() || force {
            return inner.ops.set_device(mode, device);
        }
        Ok(())
    }

    /// Set the volume of the routed device from a stereo pair.
    pub fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        let device = self.device();
        if device.is_empty() {
            return Err(HalError::NotInitialized);
        }
        self.core.mixer.lock().set_volume(device, (left + right) / 2.0)
    }

    /// Apply `routing=<mask>`. Any other key makes the call fail with `BadValue`.
    pub fn set_parameters(&self, key_value_pairs: &str) -> Result<()> {
        tracing::debug!(params = key_value_pairs, "output set_parameters");
        let mut params = AudioParameter::parse(key_value_pairs);

        if let Some(device) = params.get_int(KEY_ROUTING) {
            if let Err(err) = self.core.do_routing(RouteMask(device as u32), false) {
                tracing::warn!(device, error = %err, "routing request failed");
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

    pub fn render_position(&self) -> Result<u32> {
        Err(HalError::InvalidOperation)
    }

    /// `true` between the first write and standby.
    pub fn is_active(&self) -> bool {
        self.inner.lock().power_lock
    }

    pub fn close(&self) {
        self.inner.lock().ops.close();
    }

    pub fn status(&self) -> StreamStatus {
        let inner = self.inner.lock();
        inner.ops.status(inner.power_lock)
    }

    /// PCM name fallback chain for `mode` and `device`.
    pub fn name_candidates(&self, mode: AudioMode, device: RouteMask) -> Vec<String> {
        self.inner.lock().ops.name_candidates(mode, device)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        let _ = self.standby();
    }
}

#[cfg(test)]
mod tests {
    use audio_hal_types::channel_mask;

    use super::*;
    use crate::mixer::MixerRoute;
    use crate::routes::Route;
    use crate::testing::{Rig, WriteStep};

    fn open(rig: &Rig, device: RouteMask) -> Arc<OutputStream> {
        let mut req = StreamRequest::default();
        rig.hw.open_output_stream(device, &mut req).unwrap()
    }

    #[test]
    fn first_write_configures_and_takes_wake_lock() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        let opened_before = rig.pcm.state().opened.len();
        assert!(!out.is_active());

        let samples = vec![7i16; 256 * 2];
        assert_eq!(out.write(&samples), Ok(256 * 2 * 2));

        assert!(out.is_active());
        assert!(rig.wake.held(OUTPUT_WAKE_LOCK));
        let st = rig.pcm.state();
        assert_eq!(st.opened.len(), opened_before + 1);
        assert_eq!(st.written, samples);
    }

    #[test]
    fn short_writes_are_resumed() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        rig.pcm
            .state()
            .write_script
            .extend([WriteStep::Accept(10), WriteStep::Accept(5)]);

        let samples: Vec<i16> = (0..64).collect();
        assert_eq!(out.write(&samples), Ok(128));
        let st = rig.pcm.state();
        assert_eq!(st.written, samples);
        assert_eq!(st.writes, 3);
    }

    #[test]
    fn bad_fd_reconfigures_and_retries() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        out.write(&[0; 8]).unwrap();
        let opened = rig.pcm.state().opened.len();

        rig.pcm.state().write_script.push_back(WriteStep::Fail(PcmError::BadFd));
        assert_eq!(out.write(&[1; 8]), Ok(16));

        let st = rig.pcm.state();
        assert_eq!(st.opened.len(), opened + 1);
        assert!(st.recovers.is_empty());
        assert_eq!(&st.written[8..], &[1; 8]);
    }

    #[test]
    fn underrun_is_recovered_silently() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        rig.pcm.state().write_script.push_back(WriteStep::Fail(PcmError::Xrun));

        assert_eq!(out.write(&[3; 4]), Ok(8));
        assert_eq!(rig.pcm.state().recovers, vec![(PcmError::Xrun, true)]);
    }

    #[test]
    fn unrecoverable_error_is_surfaced() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        rig.pcm.state().write_script.push_back(WriteStep::Fail(PcmError::Io(-5)));

        assert_eq!(out.write(&[3; 4]), Err(HalError::Device(PcmError::Io(-5))));
    }

    #[test]
    fn standby_closes_and_releases() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        out.write(&[0; 4]).unwrap();

        out.standby().unwrap();
        assert!(!out.is_active());
        assert!(!rig.wake.held(OUTPUT_WAKE_LOCK));
        assert!(out.status().pcm_name.is_none());
    }

    #[test]
    fn standby_keeps_device_open_during_call() {
        let rig = Rig::new();
        let out = open(&rig, Route::Earpiece.into());
        out.write(&[0; 4]).unwrap();
        rig.hw.set_mode(AudioMode::InCall).unwrap();

        out.standby().unwrap();
        assert!(out.status().pcm_name.is_some());
        assert!(!rig.wake.held(OUTPUT_WAKE_LOCK));
    }

    #[test]
    fn set_device_skips_unchanged_route_unless_forced() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        let opened = rig.pcm.state().opened.len();

        out.set_device(AudioMode::Normal, Route::Speaker.into(), false).unwrap();
        assert_eq!(rig.pcm.state().opened.len(), opened);
        out.set_device(AudioMode::Normal, Route::Speaker.into(), true).unwrap();
        assert_eq!(rig.pcm.state().opened.len(), opened + 1);
        out.set_device(AudioMode::Normal, Route::Earpiece.into(), false).unwrap();
        assert_eq!(out.device(), Route::Earpiece.into());
    }

    #[test]
    fn volume_needs_a_route() {
        let rig = Rig::new();
        let out = open(&rig, RouteMask::NONE);
        assert_eq!(out.set_volume(0.5, 0.5), Err(HalError::NotInitialized));

        out.set_device(AudioMode::Normal, Route::Speaker.into(), false).unwrap();
        out.set_volume(0.2, 0.4).unwrap();
        let mixer = rig.hw.mixer();
        let speaker = mixer
            .control(MixerRoute::Speaker, audio_hal_types::StreamDirection::Playback)
            .unwrap();
        assert_eq!(speaker.volume, 30);
    }

    #[test]
    fn parameters_route_and_report() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());

        out.set_parameters("routing=1").unwrap();
        assert_eq!(out.device(), Route::Earpiece.into());
        assert_eq!(out.get_parameters("routing"), "routing=1");
        assert_eq!(out.get_parameters("other"), "other=");

        assert_eq!(out.set_parameters("routing=2;volume=3"), Err(HalError::BadValue));
        assert_eq!(out.device(), Route::Speaker.into());
    }

    #[test]
    fn reports_format_and_latency() {
        let rig = Rig::new();
        let out = open(&rig, Route::Speaker.into());
        assert_eq!(out.channels(), channel_mask::OUT_STEREO);
        assert_eq!(out.format(), AudioFormat::Pcm16Bit);
        assert_eq!(out.sample_rate(), 44_100);
        assert_eq!(out.latency(), 93);
        assert_eq!(out.buffer_size(), 4096);
        assert_eq!(out.render_position(), Err(HalError::InvalidOperation));
    }
}
