//! In-memory mixer whose elements come from configuration.
//!
//! Used on hosts without a hardware mixer so volume and mute requests still have somewhere
//! to land, and by tests to observe what the mixer pushed.

use std::collections::HashMap;
use std::sync::Arc;

use audio_hal_types::StreamDirection;
use parking_lot::Mutex;

use super::{ElemId, ElemInfo, MixerBackend, MixerCard, MixerError};
use crate::config::SoftElementConfig;

const DEFAULT_ELEMENT_CHANNELS: usize = 2;

#[derive(Clone, Debug)]
struct SoftElement {
    config: SoftElementConfig,
    playback_volume: Vec<i64>,
    capture_volume: Vec<i64>,
    playback_switch: Vec<bool>,
    capture_switch: Vec<bool>,
}

impl SoftElement {
    fn new(config: SoftElementConfig) -> Self {
        let channels = config.channels.unwrap_or(DEFAULT_ELEMENT_CHANNELS).max(1);
        let low = |range: Option<[i64; 2]>| range.map(|[min, _]| min).unwrap_or(0);
        Self {
            playback_volume: vec![low(config.playback_volume); channels],
            capture_volume: vec![low(config.capture_volume); channels],
            playback_switch: vec![false; channels],
            capture_switch: vec![false; channels],
            config,
        }
    }

    fn range(&self, direction: StreamDirection) -> Option<[i64; 2]> {
        match direction {
            StreamDirection::Playback => self.config.playback_volume,
            StreamDirection::Capture => self.config.capture_volume,
        }
    }

    fn volume_mut(&mut self, direction: StreamDirection) -> &mut Vec<i64> {
        match direction {
            StreamDirection::Playback => &mut self.playback_volume,
            StreamDirection::Capture => &mut self.capture_volume,
        }
    }

    fn switch_mut(&mut self, direction: StreamDirection) -> Option<&mut Vec<bool>> {
        match direction {
            StreamDirection::Playback if self.config.playback_switch => {
                Some(&mut self.playback_switch)
            }
            StreamDirection::Capture if self.config.capture_switch => {
                Some(&mut self.capture_switch)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct SoftCardState {
    elements: Vec<SoftElement>,
    controls: HashMap<String, i64>,
}

type Cards = Arc<Mutex<HashMap<String, SoftCardState>>>;

/// Backend handing out soft cards with identical element sets.
pub struct SoftMixerBackend {
    elements: Vec<SoftElementConfig>,
    controls: Vec<String>,
    /// Card names that attach; `None` attaches any name.
    attachable: Option<Vec<String>>,
    cards: Cards,
}

impl SoftMixerBackend {
    pub fn new(elements: Vec<SoftElementConfig>, controls: Vec<String>) -> Self {
        Self {
            elements,
            controls,
            attachable: None,
            cards: Arc::default(),
        }
    }

    /// Restrict which card names attach.
    pub fn with_cards(mut self, names: &[&str]) -> Self {
        self.attachable = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Per-channel volume of the first element called `name` on `card`.
    pub fn volume(&self, card: &str, name: &str, direction: StreamDirection) -> Option<Vec<i64>> {
        let cards = self.cards.lock();
        let elem = cards.get(card)?.elements.iter().find(|e| e.config.name == name)?;
        Some(match direction {
            StreamDirection::Playback => elem.playback_volume.clone(),
            StreamDirection::Capture => elem.capture_volume.clone(),
        })
    }

    pub fn switch(&self, card: &str, name: &str, direction: StreamDirection) -> Option<Vec<bool>> {
        let cards = self.cards.lock();
        let elem = cards.get(card)?.elements.iter().find(|e| e.config.name == name)?;
        Some(match direction {
            StreamDirection::Playback => elem.playback_switch.clone(),
            StreamDirection::Capture => elem.capture_switch.clone(),
        })
    }

    pub fn control(&self, card: &str, name: &str) -> Option<i64> {
        self.cards.lock().get(card)?.controls.get(name).copied()
    }
}

impl MixerBackend for SoftMixerBackend {
    fn attach(&self, card: &str) -> Option<Box<dyn MixerCard>> {
        if let Some(allowed) = &self.attachable {
            if !allowed.iter().any(|n| n == card) {
                return None;
            }
        }
        self.cards
            .lock()
            .entry(card.to_string())
            .or_insert_with(|| SoftCardState {
                elements: self.elements.iter().cloned().map(SoftElement::new).collect(),
                controls: self.controls.iter().map(|c| (c.clone(), 0)).collect(),
            });
        tracing::debug!(card, elements = self.elements.len(), "soft mixer card attached");
        Some(Box::new(SoftCard {
            name: card.to_string(),
            cards: self.cards.clone(),
        }))
    }
}

struct SoftCard {
    name: String,
    cards: Cards,
}

impl SoftCard {
    fn with_element<T>(
        &self,
        elem: ElemId,
        f: impl FnOnce(&mut SoftElement) -> Result<T, MixerError>,
    ) -> Result<T, MixerError> {
        let mut cards = self.cards.lock();
        let element = cards
            .get_mut(&self.name)
            .and_then(|card| card.elements.get_mut(elem.0))
            .ok_or(MixerError::UnknownElement(elem))?;
        f(element)
    }
}

impl MixerCard for SoftCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn elements(&self) -> Vec<ElemInfo> {
        let cards = self.cards.lock();
        let Some(card) = cards.get(&self.name) else {
            return Vec::new();
        };
        card.elements
            .iter()
            .enumerate()
            .map(|(i, e)| ElemInfo {
                id: ElemId(i),
                name: e.config.name.clone(),
                active: e.config.active,
                playback_volume: e.config.playback_volume.is_some(),
                capture_volume: e.config.capture_volume.is_some(),
                playback_switch: e.config.playback_switch,
                capture_switch: e.config.capture_switch,
            })
            .collect()
    }

    fn volume_range(
        &self,
        elem: ElemId,
        direction: StreamDirection,
    ) -> Result<(i64, i64), MixerError> {
        self.with_element(elem, |e| {
            e.range(direction)
                .map(|[min, max]| (min, max))
                .ok_or(MixerError::Unsupported("volume"))
        })
    }

    fn set_volume_all(
        &mut self,
        elem: ElemId,
        direction: StreamDirection,
        value: i64,
    ) -> Result<(), MixerError> {
        self.with_element(elem, |e| {
            let [min, max] = e.range(direction).ok_or(MixerError::Unsupported("volume"))?;
            e.volume_mut(direction).fill(value.clamp(min, max));
            Ok(())
        })
    }

    fn set_switch_all(
        &mut self,
        elem: ElemId,
        direction: StreamDirection,
        on: bool,
    ) -> Result<(), MixerError> {
        self.with_element(elem, |e| {
            e.switch_mut(direction)
                .ok_or(MixerError::Unsupported("switch"))?
                .fill(on);
            Ok(())
        })
    }

    fn set_control(&mut self, name: &str, value: i64) -> Result<(), MixerError> {
        let mut cards = self.cards.lock();
        let slot = cards
            .get_mut(&self.name)
            .and_then(|card| card.controls.get_mut(name))
            .ok_or_else(|| MixerError::UnknownControl(name.to_string()))?;
        *slot = value;
        Ok(())
    }
}
