//! Host PCM devices driven through CPAL.
//!
//! CPAL streams are callback driven and not `Send`, while HAL streams expect blocking
//! `read`/`write` on the caller's thread. Each committed device therefore owns:
//! - a worker thread that builds and holds the CPAL stream until shutdown
//! - a [`SampleRing`] sized to the negotiated buffer, bridging caller and callback
//!
//! Xruns seen by the callback are latched and reported by the next `read`/`write`, which
//! lets the stream layer run its usual recovery. A CPAL stream error marks the handle as
//! `BadFd` so the stream reopens it.
//!
//! PCM names are resolved through a configurable alias table; the generic fallback name
//! maps to the host default device and any other name is matched as a case-insensitive
//! substring of the host device name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use audio_hal_types::StreamDirection;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};

use super::ring::{SampleRing, Take};
use super::{
    HwCapabilities, PcmAccess, PcmBackend, PcmConfig, PcmDevice, PcmError, PcmFormat, SwParams,
};

/// Opens host audio devices by PCM name.
pub struct HostPcmBackend {
    generic_name: String,
    aliases: HashMap<String, String>,
}

impl HostPcmBackend {
    pub fn new(generic_name: impl Into<String>, aliases: HashMap<String, String>) -> Self {
        Self {
            generic_name: generic_name.into(),
            aliases,
        }
    }

    fn selector_for(&self, name: &str) -> DeviceSelector {
        if let Some(needle) = self.aliases.get(name) {
            return DeviceSelector::Named(needle.clone());
        }
        if name == self.generic_name {
            return DeviceSelector::Default;
        }
        DeviceSelector::Named(name.to_string())
    }
}

impl PcmBackend for HostPcmBackend {
    fn open(&self, name: &str, direction: StreamDirection) -> Result<Box<dyn PcmDevice>, PcmError> {
        let selector = self.selector_for(name);
        let host = cpal::default_host();
        let device = find_device(&host, &selector, direction)
            .ok_or_else(|| PcmError::NoDevice(name.to_string()))?;
        let ranges = supported_ranges(&device, direction)?;
        let caps = capabilities_from(&ranges)?;

        tracing::debug!(pcm = name, ?selector, ranges = ranges.len(), "opened host pcm");
        Ok(Box::new(HostPcm {
            name: name.to_string(),
            selector,
            direction,
            caps,
            ranges,
            config: None,
            worker: None,
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum DeviceSelector {
    Default,
    Named(String),
}

fn find_device(
    host: &cpal::Host,
    selector: &DeviceSelector,
    direction: StreamDirection,
) -> Option<cpal::Device> {
    match (selector, direction) {
        (DeviceSelector::Default, StreamDirection::Playback) => host.default_output_device(),
        (DeviceSelector::Default, StreamDirection::Capture) => host.default_input_device(),
        (DeviceSelector::Named(needle), StreamDirection::Playback) => host
            .output_devices()
            .ok()?
            .find(|d| device_matches(d, needle)),
        (DeviceSelector::Named(needle), StreamDirection::Capture) => host
            .input_devices()
            .ok()?
            .find(|d| device_matches(d, needle)),
    }
}

fn device_matches(device: &cpal::Device, needle: &str) -> bool {
    device
        .description()
        .ok()
        .map(|d| matches_device_name(&d.name(), needle))
        .unwrap_or(false)
}

/// Case-insensitive substring match of a host device name.
pub(crate) fn matches_device_name(name: &str, needle: &str) -> bool {
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

fn supported_ranges(
    device: &cpal::Device,
    direction: StreamDirection,
) -> Result<Vec<cpal::SupportedStreamConfigRange>, PcmError> {
    let ranges: Vec<_> = match direction {
        StreamDirection::Playback => device
            .supported_output_configs()
            .map_err(|e| PcmError::NoDevice(e.to_string()))?
            .collect(),
        StreamDirection::Capture => device
            .supported_input_configs()
            .map_err(|e| PcmError::NoDevice(e.to_string()))?
            .collect(),
    };
    if ranges.is_empty() {
        return Err(PcmError::NoDevice("no supported configs".into()));
    }
    Ok(ranges)
}

/// Collapse host config ranges into one parameter space.
///
/// The callback converts sample formats and maps channels, so the HAL side always sees
/// mono/stereo S16LE interleaved.
fn capabilities_from(ranges: &[cpal::SupportedStreamConfigRange]) -> Result<HwCapabilities, PcmError> {
    let min_rate = ranges.iter().map(|r| r.min_sample_rate()).min();
    let max_rate = ranges.iter().map(|r| r.max_sample_rate()).max();
    let (Some(min_rate), Some(max_rate)) = (min_rate, max_rate) else {
        return Err(PcmError::NoDevice("no sample rates".into()));
    };
    Ok(HwCapabilities {
        formats: vec![PcmFormat::S16Le],
        access: vec![PcmAccess::RwInterleaved],
        channels: 1..=2,
        rates: min_rate..=max_rate,
        buffer_frames: 64..=65_536,
        period_frames: 16..=16_384,
    })
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 4,
        cpal::SampleFormat::F32 => 3,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 1,
        _ => 0,
    }
}

/// Best host range for `config`: must cover the rate, then prefer matching channel count,
/// then the friendliest sample format.
fn pick_range(
    ranges: &[cpal::SupportedStreamConfigRange],
    config: &PcmConfig,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .iter()
        .filter(|r| r.min_sample_rate() <= config.rate && config.rate <= r.max_sample_rate())
        .filter(|r| sample_format_rank(r.sample_format()) > 0)
        .max_by_key(|r| {
            (
                u32::from(r.channels()) == config.channels,
                sample_format_rank(r.sample_format()),
            )
        })
        .map(|r| r.with_sample_rate(config.rate))
}

/// Flags shared between the caller side and the device callback.
#[derive(Default)]
struct CallbackState {
    started: AtomicBool,
    xrun: AtomicBool,
    failed: AtomicBool,
    start_threshold: AtomicUsize,
    xrun_events: AtomicU64,
}

struct StreamWorker {
    ring: Arc<SampleRing>,
    state: Arc<CallbackState>,
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl StreamWorker {
    fn shutdown(&mut self) {
        self.ring.close();
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        let xruns = self.state.xrun_events.load(Ordering::Relaxed);
        if xruns > 0 {
            tracing::debug!(xruns, "host pcm stream closed");
        }
    }
}

struct HostPcm {
    name: String,
    selector: DeviceSelector,
    direction: StreamDirection,
    caps: HwCapabilities,
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    config: Option<PcmConfig>,
    worker: Option<StreamWorker>,
}

impl HostPcm {
    fn worker(&self) -> Result<&StreamWorker, PcmError> {
        let worker = self.worker.as_ref().ok_or(PcmError::BadFd)?;
        if worker.state.failed.load(Ordering::Relaxed) {
            return Err(PcmError::BadFd);
        }
        if worker.state.xrun.swap(false, Ordering::AcqRel) {
            return Err(PcmError::Xrun);
        }
        Ok(worker)
    }

    fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for HostPcm {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl PcmDevice for HostPcm {
    fn name(&self) -> &str {
        &self.name
    }

    fn hw_capabilities(&self) -> Result<HwCapabilities, PcmError> {
        Ok(self.caps.clone())
    }

    fn commit_hw_params(&mut self, config: &PcmConfig) -> Result<(), PcmError> {
        self.stop_worker();

        let supported = pick_range(&self.ranges, config)
            .ok_or_else(|| PcmError::Invalid(format!("no host config at {} Hz", config.rate)))?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        stream_config.buffer_size = cpal::BufferSize::Fixed(config.period_frames as u32);

        let ring = Arc::new(SampleRing::new(config.channels as usize, config.buffer_frames));
        let state = Arc::new(CallbackState::default());
        state.start_threshold.store(1, Ordering::Relaxed);

        let worker = spawn_worker(
            self.selector.clone(),
            self.direction,
            stream_config,
            supported.sample_format(),
            ring,
            state,
        )?;

        tracing::info!(
            pcm = %self.name,
            rate = config.rate,
            channels = config.channels,
            device_channels = supported.channels(),
            sample_format = ?supported.sample_format(),
            period = config.period_frames,
            buffer = config.buffer_frames,
            "host pcm configured"
        );
        self.worker = Some(worker);
        self.config = Some(*config);
        Ok(())
    }

    fn params(&self) -> Result<(usize, usize), PcmError> {
        self.config
            .map(|c| (c.buffer_frames, c.period_frames))
            .ok_or_else(|| PcmError::Invalid("hw params not committed".into()))
    }

    fn commit_sw_params(&mut self, params: &SwParams) -> Result<(), PcmError> {
        let worker = self.worker.as_ref().ok_or(PcmError::BadFd)?;
        worker
            .state
            .start_threshold
            .store(params.start_threshold.max(1), Ordering::Relaxed);
        Ok(())
    }

    fn read_interleaved(&mut self, buf: &mut [i16]) -> Result<usize, PcmError> {
        let worker = self.worker()?;
        worker
            .ring
            .take_into(buf, Take::BlockingUpTo)
            .ok_or(PcmError::BadFd)
    }

    fn write_interleaved(&mut self, buf: &[i16]) -> Result<usize, PcmError> {
        let worker = self.worker()?;
        let frames = worker.ring.push_blocking(buf);
        if worker.ring.is_closed() {
            return Err(PcmError::BadFd);
        }
        Ok(frames)
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        let worker = self.worker.as_ref().ok_or(PcmError::BadFd)?;
        worker.ring.clear();
        worker.state.started.store(false, Ordering::Relaxed);
        worker.state.xrun.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        let (Some(worker), Some(config)) = (self.worker.as_ref(), self.config) else {
            return Ok(());
        };
        if self.direction == StreamDirection::Capture {
            return Ok(());
        }
        worker.state.started.store(true, Ordering::Relaxed);
        let pending_ms = worker.ring.len_frames() as u64 * 1000 / u64::from(config.rate.max(1));
        if !worker
            .ring
            .wait_until_empty(Duration::from_millis(pending_ms + 500))
        {
            tracing::warn!(pcm = %self.name, "drain timed out");
        }
        Ok(())
    }
}

fn spawn_worker(
    selector: DeviceSelector,
    direction: StreamDirection,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<SampleRing>,
    state: Arc<CallbackState>,
) -> Result<StreamWorker, PcmError> {
    let (ready_tx, ready_rx) = bounded::<Result<(), PcmError>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let ring_worker = ring.clone();
    let state_worker = state.clone();
    let join = thread::Builder::new()
        .name(format!("pcm-{}", direction.label().to_lowercase()))
        .spawn(move || {
            let host = cpal::default_host();
            let stream = find_device(&host, &selector, direction)
                .ok_or_else(|| PcmError::NoDevice(format!("{selector:?}")))
                .and_then(|device| {
                    build_stream(
                        &device,
                        direction,
                        &stream_config,
                        sample_format,
                        ring_worker,
                        state_worker,
                    )
                });
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(PcmError::Invalid(err.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| PcmError::Io(e.raw_os_error().unwrap_or(5)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamWorker {
            ring,
            state,
            stop_tx,
            join: Some(join),
        }),
        Ok(Err(err)) => {
            let _ = join.join();
            Err(err)
        }
        Err(_) => {
            let _ = join.join();
            Err(PcmError::Io(5))
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    direction: StreamDirection,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<SampleRing>,
    state: Arc<CallbackState>,
) -> Result<cpal::Stream, PcmError> {
    match (direction, sample_format) {
        (StreamDirection::Playback, cpal::SampleFormat::I16) => build_playback::<i16>(device, config, ring, state),
        (StreamDirection::Playback, cpal::SampleFormat::F32) => build_playback::<f32>(device, config, ring, state),
        (StreamDirection::Playback, cpal::SampleFormat::I32) => build_playback::<i32>(device, config, ring, state),
        (StreamDirection::Playback, cpal::SampleFormat::U16) => build_playback::<u16>(device, config, ring, state),
        (StreamDirection::Capture, cpal::SampleFormat::I16) => build_capture::<i16>(device, config, ring, state),
        (StreamDirection::Capture, cpal::SampleFormat::F32) => build_capture::<f32>(device, config, ring, state),
        (StreamDirection::Capture, cpal::SampleFormat::I32) => build_capture::<i32>(device, config, ring, state),
        (StreamDirection::Capture, cpal::SampleFormat::U16) => build_capture::<u16>(device, config, ring, state),
        (_, other) => Err(PcmError::Invalid(format!("unsupported sample format {other:?}"))),
    }
}

fn error_callback(state: Arc<CallbackState>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::warn!("pcm stream error: {err}");
        state.failed.store(true, Ordering::Relaxed);
    }
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<SampleRing>,
    state: Arc<CallbackState>,
) -> Result<cpal::Stream, PcmError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let device_channels = config.channels as usize;
    let ring_channels = ring.channels();
    let state_cb = state.clone();
    let mut scratch: Vec<i16> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let frames = data.len() / device_channels;

                if !state_cb.started.load(Ordering::Relaxed) {
                    let threshold = state_cb.start_threshold.load(Ordering::Relaxed);
                    if ring.len_frames() < threshold.min(ring.capacity_frames()) {
                        data.fill(<T as cpal::Sample>::from_sample(0i16));
                        return;
                    }
                    state_cb.started.store(true, Ordering::Relaxed);
                }

                scratch.resize(frames * ring_channels, 0);
                let got = ring
                    .take_into(&mut scratch, Take::NonBlocking)
                    .unwrap_or(0);

                for frame in 0..frames {
                    for ch in 0..device_channels {
                        let sample = if frame < got {
                            map_channel(&scratch, frame, ring_channels, device_channels, ch)
                        } else {
                            0
                        };
                        data[frame * device_channels + ch] = <T as cpal::Sample>::from_sample(sample);
                    }
                }

                if got < frames {
                    state_cb.started.store(false, Ordering::Relaxed);
                    state_cb.xrun.store(true, Ordering::Relaxed);
                    state_cb.xrun_events.fetch_add(1, Ordering::Relaxed);
                }
            },
            error_callback(state),
            None,
        )
        .map_err(|e| PcmError::Invalid(e.to_string()))
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<SampleRing>,
    state: Arc<CallbackState>,
) -> Result<cpal::Stream, PcmError>
where
    T: cpal::Sample + cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let device_channels = config.channels as usize;
    let ring_channels = ring.channels();
    let state_cb = state.clone();
    let mut scratch: Vec<i16> = Vec::new();
    let mut converted: Vec<i16> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                let frames = data.len() / device_channels;
                converted.clear();
                converted.extend(data.iter().map(|s| s.to_sample::<i16>()));

                scratch.resize(frames * ring_channels, 0);
                for frame in 0..frames {
                    for ch in 0..ring_channels {
                        scratch[frame * ring_channels + ch] =
                            map_channel(&converted, frame, device_channels, ring_channels, ch);
                    }
                }

                if ring.push_available(&scratch) < frames {
                    state_cb.xrun.store(true, Ordering::Relaxed);
                    state_cb.xrun_events.fetch_add(1, Ordering::Relaxed);
                }
            },
            error_callback(state),
            None,
        )
        .map_err(|e| PcmError::Invalid(e.to_string()))
}

/// Sample for output channel `ch` of `frame`, mapping between channel counts.
///
/// Mono is duplicated to every channel, stereo is averaged down to mono, and other layouts
/// take the matching channel or silence.
fn map_channel(src: &[i16], frame: usize, src_channels: usize, dst_channels: usize, ch: usize) -> i16 {
    let base = frame * src_channels;
    if src_channels == dst_channels {
        return src[base + ch];
    }
    match (src_channels, dst_channels) {
        (1, _) => src[base],
        (2, 1) => ((i32::from(src[base]) + i32::from(src[base + 1])) / 2) as i16,
        _ if ch < src_channels => src[base + ch],
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_matching_is_case_insensitive() {
        assert!(matches_device_name("USB Audio DAC", "usb"));
        assert!(!matches_device_name("Built-in Output", "usb"));
        assert!(!matches_device_name("Built-in Output", ""));
    }

    #[test]
    fn selector_prefers_aliases_then_generic() {
        let mut aliases = HashMap::new();
        aliases.insert("AndroidPlayback_Speaker".to_string(), "Speakers".to_string());
        let backend = HostPcmBackend::new("hw:00,1", aliases);

        assert_eq!(
            backend.selector_for("AndroidPlayback_Speaker"),
            DeviceSelector::Named("Speakers".into())
        );
        assert_eq!(backend.selector_for("hw:00,1"), DeviceSelector::Default);
        assert_eq!(
            backend.selector_for("AndroidRecord"),
            DeviceSelector::Named("AndroidRecord".into())
        );
    }

    #[test]
    fn channel_mapping_mono_and_stereo() {
        let mono = [100i16, 200];
        assert_eq!(map_channel(&mono, 1, 1, 2, 1), 200);

        let stereo = [100i16, 300, -10, 10];
        assert_eq!(map_channel(&stereo, 0, 2, 1, 0), 200);
        assert_eq!(map_channel(&stereo, 1, 2, 2, 0), -10);

        let quad = [1i16, 2, 3, 4];
        assert_eq!(map_channel(&stereo[..2], 0, 2, 4, 3), 0);
        assert_eq!(map_channel(&quad, 0, 4, 2, 1), 2);
    }
}
