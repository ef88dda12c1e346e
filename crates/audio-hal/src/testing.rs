//! Scripted collaborators for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use audio_hal_types::StreamDirection;
use parking_lot::{Mutex, MutexGuard};

use crate::config::HalConfig;
use crate::hardware::AudioHardware;
use crate::mixer::SoftMixerBackend;
use crate::pcm::{HwCapabilities, PcmBackend, PcmConfig, PcmDevice, PcmError, SwParams};
use crate::power::WakeLock;
use crate::telephony::{AudioPath, CallAudioController, ClockCondition, SoundType};

/// One scripted outcome for a `write_interleaved` call.
#[derive(Clone, Debug)]
pub enum WriteStep {
    Fail(PcmError),
    /// Accept at most this many frames.
    Accept(usize),
}

/// One scripted outcome for a `read_interleaved` call.
#[derive(Clone, Debug)]
pub enum ReadStep {
    Fail(PcmError),
    /// Deliver at most this many frames (0 allowed).
    Frames(usize),
}

pub struct FakeState {
    /// Names that open successfully; `None` opens everything.
    pub available: Option<HashSet<String>>,
    pub attempts: Vec<String>,
    pub opened: Vec<String>,
    pub caps: HwCapabilities,
    pub fail_sw_params: bool,
    pub committed: Vec<PcmConfig>,
    pub sw: Vec<SwParams>,
    pub write_script: VecDeque<WriteStep>,
    pub read_script: VecDeque<ReadStep>,
    pub written: Vec<i16>,
    /// Captured audio: a sine of `(frequency_hz, amplitude)` at 44100 Hz, or silence.
    pub capture_sine: Option<(f32, f32)>,
    pub capture_pos: u64,
    pub writes: usize,
    pub reads: usize,
    pub recovers: Vec<(PcmError, bool)>,
    pub closes: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            available: None,
            attempts: Vec::new(),
            opened: Vec::new(),
            caps: HwCapabilities::permissive(),
            fail_sw_params: false,
            committed: Vec::new(),
            sw: Vec::new(),
            write_script: VecDeque::new(),
            read_script: VecDeque::new(),
            written: Vec::new(),
            capture_sine: None,
            capture_pos: 0,
            writes: 0,
            reads: 0,
            recovers: Vec::new(),
            closes: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the listed PCM names open.
    pub fn with_available(names: &[&str]) -> Self {
        let backend = Self::new();
        backend.state().available = Some(names.iter().map(|n| n.to_string()).collect());
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    pub fn shared(&self) -> Arc<dyn PcmBackend> {
        Arc::new(self.clone())
    }
}

impl PcmBackend for FakeBackend {
    fn open(&self, name: &str, direction: StreamDirection) -> Result<Box<dyn PcmDevice>, PcmError> {
        let mut st = self.state.lock();
        st.attempts.push(name.to_string());
        if let Some(available) = &st.available {
            if !available.contains(name) {
                return Err(PcmError::NoDevice(name.to_string()));
            }
        }
        st.opened.push(name.to_string());
        Ok(Box::new(FakeDevice {
            name: name.to_string(),
            direction,
            channels: 1,
            config: None,
            state: self.state.clone(),
        }))
    }
}

struct FakeDevice {
    name: String,
    direction: StreamDirection,
    channels: usize,
    config: Option<PcmConfig>,
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.state.lock().closes += 1;
    }
}

impl PcmDevice for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn hw_capabilities(&self) -> Result<HwCapabilities, PcmError> {
        Ok(self.state.lock().caps.clone())
    }

    fn commit_hw_params(&mut self, config: &PcmConfig) -> Result<(), PcmError> {
        self.channels = config.channels as usize;
        self.config = Some(*config);
        self.state.lock().committed.push(*config);
        Ok(())
    }

    fn params(&self) -> Result<(usize, usize), PcmError> {
        self.config
            .map(|c| (c.buffer_frames, c.period_frames))
            .ok_or(PcmError::BadFd)
    }

    fn commit_sw_params(&mut self, params: &SwParams) -> Result<(), PcmError> {
        let mut st = self.state.lock();
        if st.fail_sw_params {
            return Err(PcmError::Invalid("sw params".into()));
        }
        st.sw.push(*params);
        Ok(())
    }

    fn read_interleaved(&mut self, buf: &mut [i16]) -> Result<usize, PcmError> {
        assert_eq!(self.direction, StreamDirection::Capture);
        let mut st = self.state.lock();
        st.reads += 1;
        let wanted = buf.len() / self.channels;
        let frames = match st.read_script.pop_front() {
            Some(ReadStep::Fail(err)) => return Err(err),
            Some(ReadStep::Frames(n)) => n.min(wanted),
            None => wanted,
        };
        for frame in 0..frames {
            let value = match st.capture_sine {
                Some((freq, amp)) => {
                    let t = st.capture_pos as f32 / 44_100.0;
                    (amp * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
                }
                None => 0,
            };
            st.capture_pos += 1;
            for ch in 0..self.channels {
                buf[frame * self.channels + ch] = value;
            }
        }
        Ok(frames)
    }

    fn write_interleaved(&mut self, buf: &[i16]) -> Result<usize, PcmError> {
        assert_eq!(self.direction, StreamDirection::Playback);
        let mut st = self.state.lock();
        st.writes += 1;
        let offered = buf.len() / self.channels;
        let frames = match st.write_script.pop_front() {
            Some(WriteStep::Fail(err)) => return Err(err),
            Some(WriteStep::Accept(n)) => n.min(offered),
            None => offered,
        };
        st.written.extend_from_slice(&buf[..frames * self.channels]);
        Ok(frames)
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        Ok(())
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        Ok(())
    }

    fn recover(&mut self, err: PcmError, silent: bool) -> Result<(), PcmError> {
        self.state.lock().recovers.push((err.clone(), silent));
        match err {
            PcmError::Xrun | PcmError::Suspended | PcmError::Interrupted => Ok(()),
            other => Err(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    Volume(SoundType, i32),
    Path(AudioPath),
    Clock(ClockCondition),
}

/// Records everything pushed to the modem.
#[derive(Clone, Default)]
pub struct RecordingCallController {
    pub events: Arc<Mutex<Vec<CallEvent>>>,
}

impl CallAudioController for RecordingCallController {
    fn connect_if_required(&self) -> bool {
        true
    }

    fn set_call_volume(&self, sound: SoundType, volume: i32) {
        self.events.lock().push(CallEvent::Volume(sound, volume));
    }

    fn set_call_audio_path(&self, path: AudioPath) {
        self.events.lock().push(CallEvent::Path(path));
    }

    fn set_call_clock_sync(&self, condition: ClockCondition) {
        self.events.lock().push(CallEvent::Clock(condition));
    }
}

/// Counts acquire/release per lock name.
#[derive(Clone, Default)]
pub struct RecordingWakeLock {
    pub events: Arc<Mutex<Vec<(String, bool)>>>,
}

impl RecordingWakeLock {
    pub fn held(&self, name: &str) -> bool {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, acquired)| *acquired)
            .unwrap_or(false)
    }
}

impl WakeLock for RecordingWakeLock {
    fn acquire(&self, name: &str) {
        self.events.lock().push((name.to_string(), true));
    }

    fn release(&self, name: &str) {
        self.events.lock().push((name.to_string(), false));
    }
}

/// A facade wired to scripted collaborators, with handles to inspect each of them.
pub struct Rig {
    pub pcm: FakeBackend,
    pub mixer: Arc<SoftMixerBackend>,
    pub call: RecordingCallController,
    pub wake: RecordingWakeLock,
    pub hw: AudioHardware,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_pcm(FakeBackend::new())
    }

    pub fn with_pcm(pcm: FakeBackend) -> Self {
        Self::with_config(HalConfig::default(), pcm)
    }

    pub fn with_config(config: HalConfig, pcm: FakeBackend) -> Self {
        let mixer = Arc::new(SoftMixerBackend::new(
            config.soft_elements(),
            config.soft_controls(),
        ));
        let call = RecordingCallController::default();
        let wake = RecordingWakeLock::default();
        let hw = AudioHardware::builder(config)
            .pcm_backend(pcm.shared())
            .mixer_backend(mixer.clone())
            .call_controller(Arc::new(call.clone()))
            .wake_lock(Arc::new(wake.clone()))
            .build();
        Self {
            pcm,
            mixer,
            call,
            wake,
            hw,
        }
    }
}
