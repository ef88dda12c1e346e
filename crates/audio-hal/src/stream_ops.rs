//! Behaviour shared by output and input streams.
//!
//! [`StreamOps`] negotiates the client-facing format, builds PCM device names from the
//! route mask and audio mode, opens devices along a fallback chain and pushes hardware and
//! software parameters to the opened handle.

use std::sync::Arc;

use audio_hal_types::{AudioFormat, AudioMode, StreamDirection, StreamStatus, channel_mask};

use crate::config::DeviceNaming;
use crate::error::{HalError, Result};
use crate::pcm::{HwParams, NullPcm, PcmAccess, PcmBackend, PcmDevice, PcmFormat, SwParams};
use crate::routes::RouteMask;

/// Rate the hardware always runs at; capture rates below it are produced in software.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Capture rates a client may ask for, ascending.
pub const SUPPORTED_INPUT_RATES: [u32; 5] = [8_000, 11_025, 16_000, 22_050, 44_100];

pub const BUFFER_SZ_PLAYBACK: usize = 4096;
pub const PERIOD_SZ_PLAYBACK: usize = 1024;
pub const BUFFER_SZ_CAPTURE: usize = 4096;
pub const PERIOD_SZ_CAPTURE: usize = 2048;
pub const LATENCY_PLAYBACK_US: u32 = 92_880;
pub const LATENCY_CAPTURE_US: u32 = 92_880;

/// Device names longer than this are not extended further.
pub const DEVICE_NAME_MAX: usize = 128;

/// Compiled-in parameters of one stream direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDefaults {
    pub direction: StreamDirection,
    pub device_prefix: String,
    pub format: AudioFormat,
    pub channels: u32,
    pub sample_rate: u32,
    /// Hardware rate / client rate, for buffer sizing.
    pub buffer_ratio: usize,
    pub latency_us: u32,
    /// Hardware buffer, frames.
    pub buffer_size: usize,
    /// Hardware period, frames.
    pub period_size: usize,
}

impl StreamDefaults {
    pub fn playback() -> Self {
        Self {
            direction: StreamDirection::Playback,
            device_prefix: "AndroidPlayback".to_string(),
            format: AudioFormat::Pcm16Bit,
            channels: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_ratio: 1,
            latency_us: LATENCY_PLAYBACK_US,
            buffer_size: BUFFER_SZ_PLAYBACK,
            period_size: PERIOD_SZ_PLAYBACK,
        }
    }

    pub fn capture() -> Self {
        Self {
            direction: StreamDirection::Capture,
            device_prefix: "AndroidRecord".to_string(),
            format: AudioFormat::Pcm16Bit,
            channels: 1,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_ratio: 1,
            latency_us: LATENCY_CAPTURE_US,
            buffer_size: BUFFER_SZ_CAPTURE,
            period_size: PERIOD_SZ_CAPTURE,
        }
    }
}

/// Client stream parameters, in and out. Zero means "use the default".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamRequest {
    /// Format code, see [`AudioFormat::code`].
    pub format: u32,
    /// Channel mask.
    pub channels: u32,
    pub sample_rate: u32,
}

impl StreamRequest {
    pub fn new(format: AudioFormat, channels: u32, sample_rate: u32) -> Self {
        Self {
            format: format.code(),
            channels,
            sample_rate,
        }
    }
}

/// Hardware rate divided by a client capture rate.
pub fn buffer_ratio(rate: u32) -> usize {
    match rate {
        8_000 | 11_025 => 4,
        16_000 | 22_050 => 2,
        _ => 1,
    }
}

/// Snap a requested capture rate to the closest supported one.
///
/// Scans the ascending table and stops once the distance stops shrinking, so an exact tie
/// resolves to the lower rate.
pub fn check_input_sample_rate(rate: u32) -> u32 {
    let mut prev_delta = u32::MAX;
    for (i, supported) in SUPPORTED_INPUT_RATES.iter().enumerate() {
        let delta = supported.abs_diff(rate);
        if delta >= prev_delta {
            return SUPPORTED_INPUT_RATES[i - 1];
        }
        prev_delta = delta;
    }
    SUPPORTED_INPUT_RATES[SUPPORTED_INPUT_RATES.len() - 1]
}

pub fn channel_count_to_mask(direction: StreamDirection, channels: u32) -> u32 {
    match (direction, channels) {
        (StreamDirection::Playback, 1) => channel_mask::OUT_MONO,
        (StreamDirection::Playback, 4) => channel_mask::OUT_QUAD,
        (StreamDirection::Playback, 6) => channel_mask::OUT_5POINT1,
        (StreamDirection::Playback, _) => channel_mask::OUT_STEREO,
        (StreamDirection::Capture, 1) => channel_mask::IN_MONO,
        (StreamDirection::Capture, _) => channel_mask::IN_STEREO,
    }
}

pub struct StreamOps {
    defaults: StreamDefaults,
    backend: Arc<dyn PcmBackend>,
    naming: DeviceNaming,
    handle: Option<Box<dyn PcmDevice>>,
    device: RouteMask,
}

impl StreamOps {
    pub fn new(
        defaults: StreamDefaults,
        backend: Arc<dyn PcmBackend>,
        naming: DeviceNaming,
    ) -> Self {
        Self {
            defaults,
            backend,
            naming,
            handle: None,
            device: RouteMask::NONE,
        }
    }

    pub fn direction(&self) -> StreamDirection {
        self.defaults.direction
    }

    pub fn defaults(&self) -> &StreamDefaults {
        &self.defaults
    }

    /// Negotiate client format, channels and rate.
    ///
    /// On `BadValue` the request is rewritten with the values the stream would accept.
    pub fn set(&mut self, request: &mut StreamRequest) -> Result<()> {
        let default_format = self.defaults.format.code();
        let default_channels = self.channels();

        let format = if request.format == 0 { default_format } else { request.format };
        let channels = if request.channels == 0 { default_channels } else { request.channels };
        let rate = if request.sample_rate == 0 {
            self.defaults.sample_rate
        } else {
            request.sample_rate
        };

        if format != default_format {
            tracing::error!(stream = self.stream_name(), format, "unsupported format");
            request.format = default_format;
            request.channels = default_channels;
            return Err(HalError::BadValue);
        }
        if channels != default_channels {
            tracing::error!(stream = self.stream_name(), channels, "unsupported channel mask");
            request.format = default_format;
            request.channels = default_channels;
            return Err(HalError::BadValue);
        }

        match self.direction() {
            StreamDirection::Capture => {
                let snapped = check_input_sample_rate(rate);
                if snapped != rate {
                    tracing::warn!(requested = rate, snapped, "unsupported capture rate");
                    request.sample_rate = snapped;
                    return Err(HalError::BadValue);
                }
            }
            StreamDirection::Playback => {
                if rate != DEFAULT_SAMPLE_RATE {
                    tracing::error!(rate, "playback rate must be {DEFAULT_SAMPLE_RATE}");
                    request.sample_rate = DEFAULT_SAMPLE_RATE;
                    return Err(HalError::BadValue);
                }
            }
        }

        self.defaults.buffer_ratio = buffer_ratio(rate);
        self.defaults.sample_rate = rate;

        request.format = format;
        request.channels = channels;
        request.sample_rate = rate;
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.defaults.sample_rate
    }

    /// Client read/write size in bytes.
    pub fn buffer_size(&self) -> usize {
        let frames = self.defaults.period_size / self.defaults.buffer_ratio.max(1);
        frames * self.channel_count() * self.defaults.format.bytes_per_sample()
    }

    pub fn format(&self) -> AudioFormat {
        self.defaults.format
    }

    /// Channel mask.
    pub fn channels(&self) -> u32 {
        channel_count_to_mask(self.direction(), self.defaults.channels)
    }

    pub fn channel_count(&self) -> usize {
        self.defaults.channels as usize
    }

    pub fn latency_us(&self) -> u32 {
        self.defaults.latency_us
    }

    /// Route mask of the last `open`.
    pub fn device(&self) -> RouteMask {
        self.device
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn pcm_name(&self) -> Option<&str> {
        self.handle.as_deref().map(|h| h.name())
    }

    pub fn handle_mut(&mut self) -> Option<&mut (dyn PcmDevice + 'static)> {
        self.handle.as_deref_mut()
    }

    pub fn stream_name(&self) -> &'static str {
        self.direction().label()
    }

    /// PCM name for `mode` and `device`: prefix, one suffix per route bit, then the mode
    /// suffix if any route matched.
    pub fn device_name(&self, mode: AudioMode, device: RouteMask) -> String {
        let mut name = self.defaults.device_prefix.clone();
        let mut has_route = false;

        for route in device.routes() {
            push_bounded(&mut name, route.descriptor().suffix);
            has_route = true;
        }
        if has_route {
            push_bounded(&mut name, mode.name_suffix());
        }
        name
    }

    /// Fallback chain `open` walks for `mode` and `device`.
    pub fn name_candidates(&self, mode: AudioMode, device: RouteMask) -> Vec<String> {
        let mut name = self.device_name(mode, device);
        let mut chain = vec![name.clone()];
        while let Some(pos) = name.rfind('_') {
            name.truncate(pos);
            chain.push(name.clone());
        }
        chain.push(self.naming.generic.clone());
        chain.push(self.naming.null.clone());
        chain
    }

    /// Open the best-matching PCM device for `mode` and `device`.
    ///
    /// Tries the full name, then the name truncated at each `_`, then the generic name,
    /// and finally the null device, which always opens.
    pub fn open(&mut self, mode: AudioMode, device: RouteMask) {
        self.close();
        let direction = self.direction();
        let mut name = self.device_name(mode, device);

        let mut handle = loop {
            match self.backend.open(&name, direction) {
                Ok(handle) => break Some(handle),
                Err(err) => {
                    tracing::debug!(pcm = %name, error = %err, "pcm open failed");
                    match name.rfind('_') {
                        Some(pos) => name.truncate(pos),
                        None => break None,
                    }
                }
            }
        };

        if handle.is_none() {
            tracing::warn!(
                stream = self.stream_name(),
                pcm = %self.naming.generic,
                "no routed pcm device, trying generic"
            );
            handle = self.backend.open(&self.naming.generic, direction).ok();
        }

        let handle = handle.unwrap_or_else(|| {
            tracing::error!(stream = self.stream_name(), "falling back to null device");
            Box::new(NullPcm::new(direction))
        });

        tracing::info!(
            stream = self.stream_name(),
            pcm = handle.name(),
            device = %device,
            ?mode,
            "opened pcm device"
        );
        self.handle = Some(handle);
        self.device = device;
    }

    /// Drain and release the handle. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.drain() {
                tracing::debug!(pcm = handle.name(), error = %err, "drain on close failed");
            }
            tracing::debug!(stream = self.stream_name(), pcm = handle.name(), "closed pcm device");
        }
    }

    /// Reopen for `mode` and `device` and push hardware then software parameters.
    pub fn set_device(&mut self, mode: AudioMode, device: RouteMask) -> Result<()> {
        self.open(mode, device);
        self.set_hardware_params()?;
        self.set_software_params()
    }

    fn set_hardware_params(&mut self) -> Result<()> {
        let stream = self.stream_name();
        let channels = self.defaults.channels;
        let buffer = self.defaults.buffer_size;
        let period = self.defaults.period_size;
        let handle = self.handle.as_deref_mut().ok_or(HalError::NotInitialized)?;

        let caps = handle.hw_capabilities().map_err(|err| {
            tracing::error!(stream, error = %err, "failed to query hardware parameters");
            HalError::NotInitialized
        })?;
        let mut hw = HwParams::any(caps);

        hw.set_format(PcmFormat::S16Le)
            .and_then(|_| hw.set_access(PcmAccess::RwInterleaved))
            .and_then(|_| hw.set_channels(channels))
            .map_err(|err| {
                tracing::error!(stream, channels, error = %err, "hardware rejected stream format");
                HalError::NotInitialized
            })?;

        match hw.set_rate_near(DEFAULT_SAMPLE_RATE) {
            Ok(rate) if rate != DEFAULT_SAMPLE_RATE => {
                tracing::warn!(
                    stream,
                    requested = DEFAULT_SAMPLE_RATE,
                    rate,
                    "hardware rate differs"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::error!(stream, error = %err, "unable to set sample rate"),
        }

        let requested = period;
        let period = hw
            .set_buffer_size(buffer)
            .and_then(|_| hw.set_period_size_near(requested))
            .map_err(|err| {
                tracing::error!(
                    stream,
                    buffer,
                    period = requested,
                    error = %err,
                    "unable to set buffer/period"
                );
                HalError::NotInitialized
            })?;
        if period != requested {
            tracing::warn!(stream, requested, period, "hardware period differs");
        }

        let config = hw
            .finish()
            .and_then(|config| handle.commit_hw_params(&config).map(|_| config))
            .map_err(|err| {
                tracing::error!(stream, error = %err, "unable to commit hardware parameters");
                HalError::NotInitialized
            })?;

        tracing::debug!(stream, ?config, "hardware parameters committed");
        self.defaults.buffer_size = buffer;
        self.defaults.period_size = period;
        Ok(())
    }

    fn set_software_params(&mut self) -> Result<()> {
        let direction = self.direction();
        let stream = self.stream_name();
        let handle = self.handle.as_deref_mut().ok_or(HalError::NotInitialized)?;

        let (buffer, period) = handle.params().map_err(|err| {
            tracing::error!(stream, error = %err, "unable to read back parameters");
            HalError::NotInitialized
        })?;

        let start_threshold = match direction {
            StreamDirection::Playback => (buffer / period.max(1)) * period,
            StreamDirection::Capture => 1,
        };
        let params = SwParams {
            start_threshold,
            stop_threshold: buffer,
            avail_min: period,
        };

        handle.commit_sw_params(&params).map_err(|err| {
            tracing::error!(stream, error = %err, "unable to commit software parameters");
            HalError::NotInitialized
        })
    }

    pub fn status(&self, active: bool) -> StreamStatus {
        StreamStatus {
            direction: self.direction(),
            device_mask: self.device.bits(),
            pcm_name: self.pcm_name().map(str::to_string),
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            format: self.format(),
            buffer_size_bytes: self.buffer_size(),
            latency_ms: (self.direction() == StreamDirection::Playback)
                .then(|| latency_ms(self.latency_us())),
            active,
        }
    }
}

/// Microseconds to milliseconds, rounded up.
pub fn latency_ms(latency_us: u32) -> u32 {
    latency_us.div_ceil(1000)
}

fn push_bounded(name: &mut String, suffix: &str) {
    if name.len() + suffix.len() < DEVICE_NAME_MAX {
        name.push_str(suffix);
    }
}
