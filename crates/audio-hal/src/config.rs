//! Configuration loading and parsing.
//!
//! Every field is optional; anything left out resolves to the built-in defaults for the
//! playback/capture streams, PCM device names and mixer cards.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use audio_hal_types::StreamDirection;
use serde::Deserialize;

use crate::downsampler::MIN_FRAME_COUNT;
use crate::pcm::NULL_DEVICE_NAME;
use crate::stream_ops::StreamDefaults;

/// PCM name tried when every routed name failed to open.
pub const GENERIC_DEVICE_NAME: &str = "hw:00,1";

pub const PLAYBACK_CARD: &str = "AndroidPlayback";
pub const CAPTURE_CARD: &str = "AndroidRecord";
pub const FALLBACK_CARD: &str = "hw:00";

/// Top-level HAL configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct HalConfig {
    /// Playback stream overrides.
    pub playback: Option<StreamSection>,
    /// Capture stream overrides.
    pub capture: Option<StreamSection>,
    /// PCM device naming.
    pub devices: Option<DevicesSection>,
    /// Mixer cards, control names and soft mixer elements.
    pub mixer: Option<MixerSection>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamSection {
    /// PCM name prefix, route and mode suffixes are appended to it.
    pub device_prefix: Option<String>,
    /// Hardware channel count (1 or 2).
    pub channels: Option<u32>,
    /// Hardware buffer size in frames.
    pub buffer_frames: Option<usize>,
    /// Hardware period size in frames.
    pub period_frames: Option<usize>,
    /// Reported latency in microseconds.
    pub latency_us: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DevicesSection {
    /// Generic fallback PCM name (default `hw:00,1`).
    pub generic: Option<String>,
    /// PCM name -> host device name substring.
    pub aliases: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MixerSection {
    pub playback_card: Option<String>,
    pub capture_card: Option<String>,
    /// Card attached when a named card is missing (default `hw:00`).
    pub fallback_card: Option<String>,
    /// Property overrides for control names, e.g. `alsa.mixer.playback.master`.
    pub properties: Option<HashMap<String, String>>,
    /// Elements exposed by the soft mixer.
    pub elements: Option<Vec<SoftElementConfig>>,
    /// Named integer controls exposed by the soft mixer.
    pub controls: Option<Vec<String>>,
}

/// One soft mixer element.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SoftElementConfig {
    pub name: String,
    /// `[min, max]` playback volume range.
    pub playback_volume: Option<[i64; 2]>,
    /// `[min, max]` capture volume range.
    pub capture_volume: Option<[i64; 2]>,
    #[serde(default)]
    pub playback_switch: bool,
    #[serde(default)]
    pub capture_switch: bool,
    /// Inactive elements are never bound.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Channels per element (default 2).
    pub channels: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Mixer card names to attach, per direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerCardNames {
    pub playback: String,
    pub capture: String,
    pub fallback: String,
}

impl Default for MixerCardNames {
    fn default() -> Self {
        Self {
            playback: PLAYBACK_CARD.to_string(),
            capture: CAPTURE_CARD.to_string(),
            fallback: FALLBACK_CARD.to_string(),
        }
    }
}

impl MixerCardNames {
    pub fn card(&self, direction: StreamDirection) -> &str {
        match direction {
            StreamDirection::Playback => &self.playback,
            StreamDirection::Capture => &self.capture,
        }
    }
}

/// PCM names used outside the routed name chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNaming {
    pub generic: String,
    pub null: String,
}

impl Default for DeviceNaming {
    fn default() -> Self {
        Self {
            generic: GENERIC_DEVICE_NAME.to_string(),
            null: NULL_DEVICE_NAME.to_string(),
        }
    }
}

/// Read-only key/value lookup for mixer control names.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl PropertyStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl PropertyStore for HalConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.mixer
            .as_ref()
            .and_then(|m| m.properties.as_ref())
            .and_then(|p| p.get(key).cloned())
    }
}

impl HalConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<HalConfig>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        for (label, section) in [("playback", &self.playback), ("capture", &self.capture)] {
            let Some(section) = section else { continue };
            if let Some(channels) = section.channels {
                if !(1..=2).contains(&channels) {
                    return Err(anyhow!("{label}.channels must be 1 or 2, got {channels}"));
                }
            }
            if let (Some(buffer), Some(period)) = (section.buffer_frames, section.period_frames) {
                if period == 0 || period > buffer {
                    return Err(anyhow!(
                        "{label}.period_frames ({period}) must be in 1..={buffer}"
                    ));
                }
            }
        }
        if let Some(period) = self.capture.as_ref().and_then(|c| c.period_frames) {
            if period % 4 != 0 {
                return Err(anyhow!("capture.period_frames must be a multiple of 4"));
            }
            if period < MIN_FRAME_COUNT {
                return Err(anyhow!(
                    "capture.period_frames ({period}) must be at least {MIN_FRAME_COUNT}"
                ));
            }
        }
        Ok(())
    }

    pub fn playback_defaults(&self) -> StreamDefaults {
        apply_section(StreamDefaults::playback(), self.playback.as_ref())
    }

    pub fn capture_defaults(&self) -> StreamDefaults {
        apply_section(StreamDefaults::capture(), self.capture.as_ref())
    }

    pub fn device_naming(&self) -> DeviceNaming {
        let mut naming = DeviceNaming::default();
        if let Some(generic) = self.devices.as_ref().and_then(|d| d.generic.clone()) {
            naming.generic = generic;
        }
        naming
    }

    pub fn device_aliases(&self) -> HashMap<String, String> {
        self.devices
            .as_ref()
            .and_then(|d| d.aliases.clone())
            .unwrap_or_default()
    }

    pub fn mixer_cards(&self) -> MixerCardNames {
        let mut cards = MixerCardNames::default();
        if let Some(mixer) = self.mixer.as_ref() {
            if let Some(name) = mixer.playback_card.clone() {
                cards.playback = name;
            }
            if let Some(name) = mixer.capture_card.clone() {
                cards.capture = name;
            }
            if let Some(name) = mixer.fallback_card.clone() {
                cards.fallback = name;
            }
        }
        cards
    }

    /// Soft mixer elements, or a default set matching the stock control names.
    pub fn soft_elements(&self) -> Vec<SoftElementConfig> {
        self.mixer
            .as_ref()
            .and_then(|m| m.elements.clone())
            .unwrap_or_else(default_soft_elements)
    }

    pub fn soft_controls(&self) -> Vec<String> {
        self.mixer
            .as_ref()
            .and_then(|m| m.controls.clone())
            .unwrap_or_else(|| vec!["Recognition Control".to_string()])
    }
}

fn apply_section(mut defaults: StreamDefaults, section: Option<&StreamSection>) -> StreamDefaults {
    let Some(section) = section else {
        return defaults;
    };
    if let Some(prefix) = section.device_prefix.clone() {
        defaults.device_prefix = prefix;
    }
    if let Some(channels) = section.channels {
        defaults.channels = channels;
    }
    if let Some(frames) = section.buffer_frames {
        defaults.buffer_size = frames;
    }
    if let Some(frames) = section.period_frames {
        defaults.period_size = frames;
    }
    if let Some(us) = section.latency_us {
        defaults.latency_us = us;
    }
    defaults
}

fn element(name: &str, playback: bool, capture: bool) -> SoftElementConfig {
    SoftElementConfig {
        name: name.to_string(),
        playback_volume: playback.then_some([0, 100]),
        capture_volume: capture.then_some([0, 100]),
        playback_switch: playback,
        capture_switch: capture,
        active: true,
        channels: None,
    }
}

fn default_soft_elements() -> Vec<SoftElementConfig> {
    vec![
        element("PCM", true, false),
        element("Earpiece", true, false),
        element("Speaker", true, false),
        element("Headphone", true, false),
        element("Bluetooth", true, false),
        element("Bluetooth A2DP", true, false),
        element("Capture", false, true),
        element("Bluetooth Capture", false, true),
        element("Bluetooth A2DP Capture", false, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_resolves_defaults() {
        let cfg = HalConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.playback_defaults(), StreamDefaults::playback());
        assert_eq!(cfg.device_naming().generic, GENERIC_DEVICE_NAME);
        assert_eq!(cfg.mixer_cards(), MixerCardNames::default());
        assert!(cfg.device_aliases().is_empty());
        assert_eq!(cfg.soft_elements().len(), 9);
    }

    #[test]
    fn stream_sections_override_defaults() {
        let cfg = HalConfig::from_toml_str(
            r#"
            [playback]
            device_prefix = "Out"
            period_frames = 512

            [devices]
            generic = "default"

            [devices.aliases]
            "Out_Speaker" = "USB"
            "#,
        )
        .unwrap();
        let playback = cfg.playback_defaults();
        assert_eq!(playback.device_prefix, "Out");
        assert_eq!(playback.period_size, 512);
        assert_eq!(playback.channels, 2);
        assert_eq!(cfg.device_naming().generic, "default");
        assert_eq!(cfg.device_aliases().get("Out_Speaker").unwrap(), "USB");
    }

    #[test]
    fn mixer_properties_act_as_property_store() {
        let cfg = HalConfig::from_toml_str(
            r#"
            [mixer]
            playback_card = "card0"

            [mixer.properties]
            "alsa.mixer.playback.master" = "Master"

            [[mixer.elements]]
            name = "Master"
            playback_volume = [0, 31]
            "#,
        )
        .unwrap();
        assert_eq!(PropertyStore::get(&cfg, "alsa.mixer.playback.master").unwrap(), "Master");
        assert!(PropertyStore::get(&cfg, "alsa.mixer.capture.master").is_none());
        assert_eq!(cfg.mixer_cards().playback, "card0");
        let elements = cfg.soft_elements();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].active);
        assert!(!elements[0].playback_switch);
    }

    #[test]
    fn rejects_bad_channel_count() {
        assert!(HalConfig::from_toml_str("[capture]\nchannels = 6\n").is_err());
    }

    #[test]
    fn rejects_period_larger_than_buffer() {
        let raw = "[playback]\nbuffer_frames = 256\nperiod_frames = 1024\n";
        assert!(HalConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn rejects_capture_period_not_divisible_by_ratio() {
        assert!(HalConfig::from_toml_str("[capture]\nperiod_frames = 1026\n").is_err());
    }

    #[test]
    fn rejects_capture_period_too_short_to_downsample() {
        assert!(HalConfig::from_toml_str("[capture]\nperiod_frames = 16\n").is_err());
        let cfg = HalConfig::from_toml_str("[capture]\nperiod_frames = 20\n").unwrap();
        assert_eq!(cfg.capture_defaults().period_size, 20);
    }
}
