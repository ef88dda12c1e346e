//! The hardware facade: one output and one input stream, audio mode, routing and the
//! call-audio side channel.

use std::sync::Arc;

use audio_hal_types::{AudioFormat, AudioMode, HardwareStatus};
use parking_lot::{Mutex, MutexGuard};

use crate::config::{DeviceNaming, HalConfig};
use crate::error::{HalError, Result};
use crate::input::InputStream;
use crate::mixer::{Mixer, MixerBackend, SoftMixerBackend};
use crate::output::OutputStream;
use crate::params::{AudioParameter, KEY_BT_NREC};
use crate::pcm::{HostPcmBackend, PcmBackend};
use crate::power::{TracingWakeLock, WakeLock};
use crate::routes::{Route, RouteMask};
use crate::stream_ops::{
    SUPPORTED_INPUT_RATES, StreamDefaults, StreamOps, StreamRequest, buffer_ratio,
};
use crate::telephony::{
    AbsentCallController, CallAudioController, ClockCondition, call_audio_path, call_sound_type,
    is_sco_route,
};

/// Value written to the recognition control.
const RECOGNITION_ON: i64 = 1;
const RECOGNITION_OFF: i64 = 0;
const RECOGNITION_CONTROL: &str = "Recognition Control";

/// State guarded by the facade lock.
pub(crate) struct FacadeState {
    pub(crate) mode: AudioMode,
    pub(crate) output: Option<Arc<OutputStream>>,
    pub(crate) input: Option<Arc<InputStream>>,
    /// Modem PCM clock started.
    activated_cp: bool,
    vr_mode: bool,
    bt_nrec_off: bool,
}

/// Everything streams share with the facade.
///
/// Lock order is `state`, then a stream's own lock, then `mixer`.
pub(crate) struct HardwareCore {
    pub(crate) state: Mutex<FacadeState>,
    pub(crate) mixer: Mutex<Mixer>,
    pub(crate) wake_lock: Arc<dyn WakeLock>,
    call: Arc<dyn CallAudioController>,
    backend: Arc<dyn PcmBackend>,
    naming: DeviceNaming,
    pub(crate) playback_defaults: StreamDefaults,
    pub(crate) capture_defaults: StreamDefaults,
}

impl HardwareCore {
    pub(crate) fn stream_ops(&self, defaults: StreamDefaults) -> StreamOps {
        StreamOps::new(defaults, self.backend.clone(), self.naming.clone())
    }

    pub(crate) fn mode(&self) -> AudioMode {
        self.state.lock().mode
    }

    pub(crate) fn do_routing(&self, device: RouteMask, force: bool) -> Result<()> {
        let state = self.state.lock();
        self.do_routing_locked(&state, device, force)
    }

    fn do_routing_locked(
        &self,
        state: &FacadeState,
        device: RouteMask,
        force: bool,
    ) -> Result<()> {
        let Some(output) = state.output.as_ref() else {
            return Err(HalError::NotInitialized);
        };
        let device = if device == RouteMask::OUT_DEFAULT {
            output.device()
        } else {
            device
        };
        tracing::debug!(device = %device, force, mode = ?state.mode, "routing output");

        if state.mode == AudioMode::InCall && self.call.connect_if_required() {
            match call_audio_path(device.bits(), state.bt_nrec_off) {
                Some(path) => {
                    tracing::info!(device = %device, ?path, "in-call audio path");
                    self.call.set_call_audio_path(path);
                }
                None => tracing::error!(device = %device, "no call audio path for route"),
            }
        }

        output.set_device(state.mode, device, force)
    }

    pub(crate) fn set_voice_record_gain(&self, enable: bool) {
        let mut state = self.state.lock();
        self.set_voice_record_gain_locked(&mut state, enable);
    }

    fn set_voice_record_gain_locked(&self, state: &mut FacadeState, enable: bool) {
        tracing::info!(enable, "voice record gain");
        if enable == state.vr_mode || (enable && state.mode == AudioMode::InCall) {
            return;
        }
        let value = if enable { RECOGNITION_ON } else { RECOGNITION_OFF };
        if let Err(err) = self.mixer.lock().set_control(RECOGNITION_CONTROL, value) {
            tracing::warn!(error = %err, "unable to set recognition control");
        }
        state.vr_mode = enable;
    }
}

/// Builds an [`AudioHardware`] with explicit collaborators.
pub struct HardwareBuilder {
    config: HalConfig,
    pcm: Option<Arc<dyn PcmBackend>>,
    mixer: Option<Arc<dyn MixerBackend>>,
    call: Option<Arc<dyn CallAudioController>>,
    wake_lock: Option<Arc<dyn WakeLock>>,
}

impl HardwareBuilder {
    /// PCM backend; defaults to host audio devices.
    pub fn pcm_backend(mut self, backend: Arc<dyn PcmBackend>) -> Self {
        self.pcm = Some(backend);
        self
    }

    /// Mixer backend; defaults to the soft mixer described by the config.
    pub fn mixer_backend(mut self, backend: Arc<dyn MixerBackend>) -> Self {
        self.mixer = Some(backend);
        self
    }

    pub fn call_controller(mut self, call: Arc<dyn CallAudioController>) -> Self {
        self.call = Some(call);
        self
    }

    pub fn wake_lock(mut self, wake_lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = Some(wake_lock);
        self
    }

    pub fn build(self) -> AudioHardware {
        let config = self.config;
        let naming = config.device_naming();
        let backend: Arc<dyn PcmBackend> = match self.pcm {
            Some(backend) => backend,
            None => Arc::new(HostPcmBackend::new(naming.generic.clone(), config.device_aliases())),
        };
        let mixer_backend: Arc<dyn MixerBackend> = match self.mixer {
            Some(backend) => backend,
            None => Arc::new(SoftMixerBackend::new(config.soft_elements(), config.soft_controls())),
        };
        let wake_lock: Arc<dyn WakeLock> = match self.wake_lock {
            Some(wake_lock) => wake_lock,
            None => Arc::new(TracingWakeLock),
        };
        let call: Arc<dyn CallAudioController> = match self.call {
            Some(call) => call,
            None => Arc::new(AbsentCallController),
        };
        let mixer = Mixer::new(mixer_backend.as_ref(), &config, &config.mixer_cards());
        if !mixer.is_valid() {
            tracing::error!("mixer cards unavailable");
        }

        let core = HardwareCore {
            state: Mutex::new(FacadeState {
                mode: AudioMode::Normal,
                output: None,
                input: None,
                activated_cp: false,
                vr_mode: false,
                bt_nrec_off: false,
            }),
            mixer: Mutex::new(mixer),
            wake_lock,
            call,
            backend,
            naming,
            playback_defaults: config.playback_defaults(),
            capture_defaults: config.capture_defaults(),
        };
        tracing::info!("audio hardware initialized");
        AudioHardware {
            core: Arc::new(core),
        }
    }
}

/// Entry point for the audio framework.
pub struct AudioHardware {
    core: Arc<HardwareCore>,
}

impl AudioHardware {
    /// Facade over host audio devices configured from `config`.
    pub fn new(config: HalConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: HalConfig) -> HardwareBuilder {
        HardwareBuilder {
            config,
            pcm: None,
            mixer: None,
            call: None,
            wake_lock: None,
        }
    }

    pub fn init_check(&self) -> Result<()> {
        if self.core.mixer.lock().is_valid() {
            Ok(())
        } else {
            Err(HalError::NotInitialized)
        }
    }

    /// Open the only output stream.
    ///
    /// `request` is negotiated in place; on `BadValue` it holds the accepted values.
    pub fn open_output_stream(
        &self,
        devices: RouteMask,
        request: &mut StreamRequest,
    ) -> Result<Arc<OutputStream>> {
        let mut state = self.core.state.lock();
        if state.output.is_some() {
            tracing::warn!("output stream already open");
            return Err(HalError::AlreadyExists);
        }

        let stream = Arc::new(OutputStream::new(self.core.clone()));
        if let Err(err) = stream.set(request) {
            drop(state);
            drop(stream);
            return Err(err);
        }
        state.output = Some(stream.clone());
        let mode = state.mode;
        drop(state);

        tracing::info!(devices = %devices, ?request, "output stream opened");
        if let Err(err) = stream.set_device(mode, devices, false) {
            tracing::warn!(devices = %devices, error = %err, "initial output routing failed");
        }
        Ok(stream)
    }

    pub fn close_output_stream(&self, stream: &Arc<OutputStream>) {
        let mut state = self.core.state.lock();
        let current = state.output.as_ref().is_some_and(|s| Arc::ptr_eq(s, stream));
        if !current {
            tracing::warn!("attempt to close invalid output stream");
            return;
        }
        let removed = state.output.take();
        drop(state);
        drop(removed);
    }

    /// Open the only input stream. `acoustics` is accepted and ignored.
    pub fn open_input_stream(
        &self,
        devices: RouteMask,
        request: &mut StreamRequest,
        acoustics: u32,
    ) -> Result<Arc<InputStream>> {
        let mut state = self.core.state.lock();
        if state.input.is_some() {
            tracing::warn!("input stream already open");
            return Err(HalError::AlreadyExists);
        }

        let stream = Arc::new(InputStream::new(self.core.clone()));
        if let Err(err) = stream.set(request) {
            drop(state);
            drop(stream);
            return Err(err);
        }
        state.input = Some(stream.clone());
        let mode = state.mode;
        drop(state);

        tracing::info!(devices = %devices, ?request, acoustics, "input stream opened");
        if let Err(err) = stream.set_device(mode, devices, false) {
            tracing::warn!(devices = %devices, error = %err, "initial input routing failed");
        }
        Ok(stream)
    }

    pub fn close_input_stream(&self, stream: &Arc<InputStream>) {
        let mut state = self.core.state.lock();
        let current = state.input.as_ref().is_some_and(|s| Arc::ptr_eq(s, stream));
        if !current {
            tracing::warn!("attempt to close invalid input stream");
            return;
        }
        let removed = state.input.take();
        drop(state);
        drop(removed);
    }

    pub fn mode(&self) -> AudioMode {
        self.core.mode()
    }

    /// Switch audio mode.
    ///
    /// Entering or leaving a call forces a reroute to the current output device even if
    /// it did not change.
    pub fn set_mode(&self, mode: AudioMode) -> Result<()> {
        let core = &self.core;
        let mut state = core.state.lock();
        let prev = state.mode;
        if prev == mode {
            return Err(HalError::AlreadyExists);
        }
        state.mode = mode;
        tracing::info!(?prev, ?mode, "audio mode");

        if matches!(mode, AudioMode::Ringtone | AudioMode::InCall)
            && !state.activated_cp
            && core.call.connect_if_required()
        {
            core.call.set_call_clock_sync(ClockCondition::Start);
            state.activated_cp = true;
        }

        if prev != AudioMode::InCall && mode == AudioMode::InCall {
            tracing::debug!("entering call");
            if let Err(err) = core.do_routing_locked(&state, RouteMask::OUT_DEFAULT, true) {
                tracing::warn!(error = %err, "call routing failed");
            }
            core.set_voice_record_gain_locked(&mut state, false);
        }
        if prev == AudioMode::InCall && mode != AudioMode::InCall {
            tracing::debug!("leaving call");
            if let Err(err) = core.do_routing_locked(&state, RouteMask::OUT_DEFAULT, true) {
                tracing::warn!(error = %err, "post-call routing failed");
            }
            if let Some(output) = state.output.as_ref() {
                if !output.is_active() {
                    output.close();
                }
            }
        }

        if mode == AudioMode::Normal {
            state.activated_cp = false;
        }
        Ok(())
    }

    /// Route the output. [`RouteMask::OUT_DEFAULT`] keeps the current device.
    pub fn do_routing(&self, device: RouteMask, force: bool) -> Result<()> {
        self.core.do_routing(device, force)
    }

    /// Voice call volume in `[0, 1]`.
    pub fn set_voice_volume(&self, volume: f32) -> Result<()> {
        let state = self.core.state.lock();
        if state.mode == AudioMode::InCall && self.core.call.connect_if_required() {
            let routes = state
                .output
                .as_ref()
                .map(|o| o.device())
                .unwrap_or_else(|| Route::Earpiece.into());
            let level = (volume * 5.0) as i32;
            match call_sound_type(routes.bits()) {
                Some(sound) => {
                    tracing::info!(routes = %routes, ?sound, level, "call volume");
                    self.core.call.set_call_volume(sound, level);
                }
                None => tracing::error!(routes = %routes, "no call volume for route"),
            }
        }
        self.core.mixer.lock().set_volume(Route::Earpiece.into(), volume)
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        self.core.mixer.lock().set_master_volume(volume)
    }

    pub fn set_mic_mute(&self, state: bool) -> Result<()> {
        self.core
            .mixer
            .lock()
            .set_capture_mute_state(Route::Earpiece.into(), state)
    }

    pub fn get_mic_mute(&self) -> Result<bool> {
        self.core
            .mixer
            .lock()
            .get_capture_mute_state(Route::Earpiece.into())
    }

    /// Apply `bt_headset_nrec=on|off`. Unknown keys are ignored.
    pub fn set_parameters(&self, key_value_pairs: &str) -> Result<()> {
        tracing::debug!(params = key_value_pairs, "hardware set_parameters");
        let params = AudioParameter::parse(key_value_pairs);
        if let Some(value) = params.get(KEY_BT_NREC) {
            self.set_bluetooth_nrec_off(value != "on");
        }
        Ok(())
    }

    fn set_bluetooth_nrec_off(&self, disable: bool) {
        let mut state = self.core.state.lock();
        if disable == state.bt_nrec_off {
            return;
        }
        state.bt_nrec_off = disable;
        tracing::debug!(nrec_off = disable, "bluetooth noise reduction");

        if state.mode != AudioMode::InCall {
            return;
        }
        let Some(output) = state.output.as_ref() else {
            return;
        };
        if !self.core.call.connect_if_required() {
            return;
        }
        let device = output.device();
        match call_audio_path(device.bits(), disable) {
            Some(path) if is_sco_route(device.bits()) => self.core.call.set_call_audio_path(path),
            _ => tracing::error!(device = %device, "bluetooth path is not active"),
        }
    }

    /// Toggle the voice-recognition capture gain. Enabling is ignored during a call.
    pub fn set_voice_record_gain(&self, enable: bool) {
        self.core.set_voice_record_gain(enable);
    }

    /// Bytes per capture read for the given client parameters, or 0 if unsupported.
    pub fn get_input_buffer_size(
        &self,
        sample_rate: u32,
        format: u32,
        channel_count: u32,
    ) -> usize {
        if !SUPPORTED_INPUT_RATES.contains(&sample_rate) {
            tracing::warn!(sample_rate, "input buffer size: bad sampling rate");
            return 0;
        }
        if format != AudioFormat::Pcm16Bit.code() {
            tracing::warn!(format, "input buffer size: bad format");
            return 0;
        }
        if channel_count != 1 {
            tracing::warn!(channel_count, "input buffer size: bad channel count");
            return 0;
        }
        let period = self.core.capture_defaults.period_size;
        (period / buffer_ratio(sample_rate)) * AudioFormat::Pcm16Bit.bytes_per_sample()
    }

    pub fn status(&self) -> HardwareStatus {
        // Streams take `state` before their own lock and the mixer last, never the reverse,
        // so this only waits out an in-flight read or write. No stream Arc is dropped here.
        let state = self.core.state.lock();
        let output = state.output.as_ref().map(|o| o.status());
        let input = state.input.as_ref().map(|i| i.status());
        let mixer = self.core.mixer.lock();
        HardwareStatus {
            mode: state.mode,
            output,
            input,
            mic_muted: mixer.get_capture_mute_state(Route::Earpiece.into()).ok(),
            voice_recognition: state.vr_mode,
            bluetooth_nrec_off: state.bt_nrec_off,
            mixer_valid: mixer.is_valid(),
        }
    }

    /// Direct access to the mixer.
    pub fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.core.mixer.lock()
    }
}

impl Drop for AudioHardware {
    fn drop(&mut self) {
        let (output, input) = {
            let mut state = self.core.state.lock();
            (state.output.take(), state.input.take())
        };
        drop(output);
        drop(input);
        tracing::debug!("audio hardware released");
    }
}
