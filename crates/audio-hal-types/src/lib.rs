use serde::{Deserialize, Serialize};

/// System audio mode.
///
/// The integer values match the framework's mode constants so they can be
/// passed through from callers that still speak raw integers.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// Regular media playback and recording.
    #[default]
    Normal,
    /// Incoming call is ringing.
    Ringtone,
    /// Voice call in progress; the modem owns the voice path.
    InCall,
}

impl AudioMode {
    /// Suffix appended to a PCM device name for this mode.
    pub fn name_suffix(self) -> &'static str {
        match self {
            AudioMode::Normal => "_normal",
            AudioMode::Ringtone => "_ringtone",
            AudioMode::InCall => "_incall",
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            AudioMode::Normal => 0,
            AudioMode::Ringtone => 1,
            AudioMode::InCall => 2,
        }
    }
}

impl TryFrom<i32> for AudioMode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioMode::Normal),
            1 => Ok(AudioMode::Ringtone),
            2 => Ok(AudioMode::InCall),
            other => Err(other),
        }
    }
}

/// Which way samples flow through a PCM stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    Playback,
    Capture,
}

impl StreamDirection {
    pub fn label(self) -> &'static str {
        match self {
            StreamDirection::Playback => "PLAYBACK",
            StreamDirection::Capture => "CAPTURE",
        }
    }
}

/// Framework sample format code.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Signed 16-bit little-endian linear PCM.
    Pcm16Bit,
    /// Unsigned 8-bit linear PCM. Never accepted by the HAL, only reported back.
    Pcm8Bit,
}

impl AudioFormat {
    pub fn code(self) -> u32 {
        match self {
            AudioFormat::Pcm16Bit => 1,
            AudioFormat::Pcm8Bit => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(AudioFormat::Pcm16Bit),
            2 => Some(AudioFormat::Pcm8Bit),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Pcm16Bit => 2,
            AudioFormat::Pcm8Bit => 1,
        }
    }
}

/// Framework channel-mask constants.
pub mod channel_mask {
    pub const OUT_MONO: u32 = 0x4;
    pub const OUT_STEREO: u32 = 0xC;
    pub const OUT_QUAD: u32 = 0xCC;
    pub const OUT_5POINT1: u32 = 0xFC;
    pub const IN_MONO: u32 = 0x10;
    pub const IN_STEREO: u32 = 0xC;
}

/// Snapshot of one open stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamStatus {
    pub direction: StreamDirection,
    /// Route bit mask the stream is currently opened for.
    pub device_mask: u32,
    /// PCM device name actually opened, if a handle is held.
    pub pcm_name: Option<String>,
    /// Client-facing sample rate (Hz).
    pub sample_rate: u32,
    pub channels: u32,
    pub format: AudioFormat,
    /// Client read/write size in bytes.
    pub buffer_size_bytes: usize,
    /// Output latency in milliseconds (playback only).
    pub latency_ms: Option<u32>,
    /// `true` while the stream holds its power lock.
    pub active: bool,
}

/// Snapshot of the whole hardware facade.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareStatus {
    pub mode: AudioMode,
    pub output: Option<StreamStatus>,
    pub input: Option<StreamStatus>,
    /// `None` when no capture route is bound in the mixer.
    pub mic_muted: Option<bool>,
    pub voice_recognition: bool,
    pub bluetooth_nrec_off: bool,
    pub mixer_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_mode_round_trips_framework_codes() {
        for mode in [AudioMode::Normal, AudioMode::Ringtone, AudioMode::InCall] {
            assert_eq!(AudioMode::try_from(mode.as_i32()), Ok(mode));
        }
        assert_eq!(AudioMode::try_from(7), Err(7));
    }

    #[test]
    fn audio_mode_serializes_snake_case() {
        let json = serde_json::to_string(&AudioMode::InCall).unwrap();
        assert_eq!(json, "\"in_call\"");
    }

    #[test]
    fn format_codes() {
        assert_eq!(AudioFormat::from_code(1), Some(AudioFormat::Pcm16Bit));
        assert_eq!(AudioFormat::from_code(0), None);
        assert_eq!(AudioFormat::Pcm16Bit.bytes_per_sample(), 2);
    }
}
