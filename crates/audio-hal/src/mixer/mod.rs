//! Route-to-control mapping over a hardware mixer.
//!
//! One card is attached per direction. At construction every logical control (a master
//! plus one per physical route bucket) is bound to the first active element whose name
//! matches and which has volume for that direction. Unbound controls degrade to
//! `InvalidOperation` on use; the mixer as a whole keeps working.

mod soft;

use std::collections::HashMap;

use audio_hal_types::StreamDirection;

pub use soft::SoftMixerBackend;

use crate::config::{MixerCardNames, PropertyStore};
use crate::error::{HalError, Result};
use crate::routes::{Route, RouteMask};

/// Range assumed for a control until an element is bound.
pub const DEFAULT_VOLUME_RANGE: (i64, i64) = (0, 100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MixerError {
    #[error("no mixer element {0:?}")]
    UnknownElement(ElemId),
    #[error("no mixer control named {0:?}")]
    UnknownControl(String),
    #[error("element has no {0}")]
    Unsupported(&'static str),
}

/// Index of an element inside the card that reported it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElemId(pub usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElemInfo {
    pub id: ElemId,
    pub name: String,
    pub active: bool,
    pub playback_volume: bool,
    pub capture_volume: bool,
    pub playback_switch: bool,
    pub capture_switch: bool,
}

impl ElemInfo {
    pub fn has_volume(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Playback => self.playback_volume,
            StreamDirection::Capture => self.capture_volume,
        }
    }

    pub fn has_switch(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Playback => self.playback_switch,
            StreamDirection::Capture => self.capture_switch,
        }
    }
}

/// Opens mixer cards by name.
pub trait MixerBackend: Send + Sync {
    fn attach(&self, card: &str) -> Option<Box<dyn MixerCard>>;
}

/// An attached mixer card.
pub trait MixerCard: Send {
    fn name(&self) -> &str;
    /// Elements in enumeration order.
    fn elements(&self) -> Vec<ElemInfo>;
    fn volume_range(&self, elem: ElemId, direction: StreamDirection)
    -> std::result::Result<(i64, i64), MixerError>;
    /// Set every channel of `elem` to `value`.
    fn set_volume_all(
        &mut self,
        elem: ElemId,
        direction: StreamDirection,
        value: i64,
    ) -> std::result::Result<(), MixerError>;
    fn set_switch_all(
        &mut self,
        elem: ElemId,
        direction: StreamDirection,
        on: bool,
    ) -> std::result::Result<(), MixerError>;
    /// Write a named integer control on every index.
    fn set_control(&mut self, name: &str, value: i64) -> std::result::Result<(), MixerError>;
}

/// Logical mixer controls. `Master` covers every output route; the others are route buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MixerRoute {
    Master,
    Earpiece,
    Speaker,
    BluetoothSco,
    Headset,
    BluetoothA2dp,
}

impl MixerRoute {
    /// Route buckets in matching order.
    pub const BUCKETS: [MixerRoute; 5] = [
        MixerRoute::Earpiece,
        MixerRoute::Speaker,
        MixerRoute::BluetoothSco,
        MixerRoute::Headset,
        MixerRoute::BluetoothA2dp,
    ];

    pub fn mask(self) -> RouteMask {
        match self {
            MixerRoute::Master => RouteMask::OUT_ALL,
            MixerRoute::Earpiece => Route::Earpiece.into(),
            MixerRoute::Speaker => Route::Speaker.into(),
            MixerRoute::BluetoothSco => Route::BluetoothSco.into(),
            MixerRoute::Headset => Route::WiredHeadset.into(),
            MixerRoute::BluetoothA2dp => Route::BluetoothA2dp.into(),
        }
    }

    /// Property key naming the element, and the element name used when it is unset.
    pub fn property(self, direction: StreamDirection) -> (&'static str, &'static str) {
        use StreamDirection::{Capture, Playback};
        match (self, direction) {
            (MixerRoute::Master, Playback) => ("alsa.mixer.playback.master", "PCM"),
            (MixerRoute::Master, Capture) => ("alsa.mixer.capture.master", "Capture"),
            (MixerRoute::Earpiece, Playback) => ("alsa.mixer.playback.earpiece", "Earpiece"),
            (MixerRoute::Earpiece, Capture) => ("alsa.mixer.capture.earpiece", "Capture"),
            (MixerRoute::Speaker, Playback) => ("alsa.mixer.playback.speaker", "Speaker"),
            (MixerRoute::Speaker, Capture) => ("alsa.mixer.capture.speaker", ""),
            (MixerRoute::BluetoothSco, Playback) => {
                ("alsa.mixer.playback.bluetooth.sco", "Bluetooth")
            }
            (MixerRoute::BluetoothSco, Capture) => {
                ("alsa.mixer.capture.bluetooth.sco", "Bluetooth Capture")
            }
            (MixerRoute::Headset, Playback) => ("alsa.mixer.playback.headset", "Headphone"),
            (MixerRoute::Headset, Capture) => ("alsa.mixer.capture.headset", "Capture"),
            (MixerRoute::BluetoothA2dp, Playback) => {
                ("alsa.mixer.playback.bluetooth.a2dp", "Bluetooth A2DP")
            }
            (MixerRoute::BluetoothA2dp, Capture) => {
                ("alsa.mixer.capture.bluetooth.a2dp", "Bluetooth A2DP Capture")
            }
        }
    }
}

/// Stable index into the mixer's control arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControlId(usize);

/// Cached state of one logical control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MixerControl {
    pub name: String,
    pub route: MixerRoute,
    pub direction: StreamDirection,
    /// Bound element on the direction's card.
    pub elem: Option<ElemId>,
    pub min: i64,
    pub max: i64,
    pub volume: i64,
    pub mute: bool,
}

impl MixerControl {
    pub fn is_bound(&self) -> bool {
        self.elem.is_some()
    }

    /// Map `level` in `[0, 1]` onto `[min, max]`, clamping out-of-range input.
    pub fn scale(&self, level: f32) -> i64 {
        let span = (self.max - self.min) as f64;
        let vol = (self.min as f64 + f64::from(level) * span) as i64;
        vol.clamp(self.min, self.max)
    }
}

pub struct Mixer {
    playback: Option<Box<dyn MixerCard>>,
    capture: Option<Box<dyn MixerCard>>,
    controls: Vec<MixerControl>,
    index: HashMap<(MixerRoute, StreamDirection), ControlId>,
}

impl Mixer {
    /// Attach both cards and bind every logical control.
    pub fn new(
        backend: &dyn MixerBackend,
        props: &dyn PropertyStore,
        cards: &MixerCardNames,
    ) -> Self {
        let mut mixer = Self {
            playback: attach(backend, cards, StreamDirection::Playback),
            capture: attach(backend, cards, StreamDirection::Capture),
            controls: Vec::new(),
            index: HashMap::new(),
        };

        for direction in [StreamDirection::Playback, StreamDirection::Capture] {
            let routes = std::iter::once(MixerRoute::Master).chain(MixerRoute::BUCKETS);
            for route in routes {
                let control = mixer.bind(route, direction, props);
                let id = ControlId(mixer.controls.len());
                mixer.controls.push(control);
                mixer.index.insert((route, direction), id);
            }
        }
        tracing::debug!(controls = mixer.controls.len(), "mixer initialized");
        mixer
    }

    fn bind(
        &mut self,
        route: MixerRoute,
        direction: StreamDirection,
        props: &dyn PropertyStore,
    ) -> MixerControl {
        let (key, default_name) = route.property(direction);
        let name = props.get(key).unwrap_or_else(|| default_name.to_string());
        let (min, max) = DEFAULT_VOLUME_RANGE;
        let mut control = MixerControl {
            name,
            route,
            direction,
            elem: None,
            min,
            max,
            volume: max,
            mute: false,
        };

        let Some(card) = self.card_mut(direction) else {
            return control;
        };
        let found = card
            .elements()
            .into_iter()
            .filter(|e| e.active)
            .find(|e| e.name == control.name && e.has_volume(direction));

        if let Some(elem) = found {
            match card.volume_range(elem.id, direction) {
                Ok((min, max)) => {
                    control.min = min;
                    control.max = max;
                }
                Err(err) => tracing::warn!(element = %elem.name, error = %err, "no volume range"),
            }
            control.volume = control.max;
            control.elem = Some(elem.id);
            if let Err(err) = card.set_volume_all(elem.id, direction, control.volume) {
                tracing::warn!(element = %elem.name, error = %err, "unable to set initial volume");
            }
            if direction == StreamDirection::Playback && elem.playback_switch {
                if let Err(err) = card.set_switch_all(elem.id, direction, true) {
                    tracing::warn!(element = %elem.name, error = %err, "unable to enable switch");
                }
            }
        }

        tracing::debug!(
            ?route,
            ?direction,
            element = %control.name,
            found = control.is_bound(),
            "mixer control"
        );
        control
    }

    fn card_mut(&mut self, direction: StreamDirection) -> Option<&mut Box<dyn MixerCard>> {
        match direction {
            StreamDirection::Playback => self.playback.as_mut(),
            StreamDirection::Capture => self.capture.as_mut(),
        }
    }

    /// Both cards attached.
    pub fn is_valid(&self) -> bool {
        self.playback.is_some() && self.capture.is_some()
    }

    pub fn control(&self, route: MixerRoute, direction: StreamDirection) -> Option<&MixerControl> {
        self.index.get(&(route, direction)).map(|id| &self.controls[id.0])
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<()> {
        self.apply_volume(MixerRoute::Master, StreamDirection::Playback, volume)
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        self.apply_volume(MixerRoute::Master, StreamDirection::Capture, gain)
    }

    /// Set playback volume on every route bucket matching `device`.
    pub fn set_volume(&mut self, device: RouteMask, volume: f32) -> Result<()> {
        self.for_each_bucket(device, StreamDirection::Playback, |mixer, route, dir| {
            mixer.apply_volume(route, dir, volume)
        })
    }

    /// Set capture gain on every route bucket matching `device`.
    pub fn set_gain(&mut self, device: RouteMask, gain: f32) -> Result<()> {
        self.for_each_bucket(device, StreamDirection::Capture, |mixer, route, dir| {
            mixer.apply_volume(route, dir, gain)
        })
    }

    pub fn set_capture_mute_state(&mut self, device: RouteMask, state: bool) -> Result<()> {
        self.for_each_bucket(device, StreamDirection::Capture, |mixer, route, dir| {
            mixer.apply_mute(route, dir, state)
        })
    }

    pub fn set_playback_mute_state(&mut self, device: RouteMask, state: bool) -> Result<()> {
        self.for_each_bucket(device, StreamDirection::Playback, |mixer, route, dir| {
            mixer.apply_mute(route, dir, state)
        })
    }

    pub fn get_capture_mute_state(&self, device: RouteMask) -> Result<bool> {
        self.mute_state(device, StreamDirection::Capture)
    }

    pub fn get_playback_mute_state(&self, device: RouteMask) -> Result<bool> {
        self.mute_state(device, StreamDirection::Playback)
    }

    /// Write a named integer control, trying the playback card first.
    pub fn set_control(&mut self, name: &str, value: i64) -> Result<()> {
        if self.playback.is_none() && self.capture.is_none() {
            return Err(HalError::NotInitialized);
        }
        let mut last = None;
        for direction in [StreamDirection::Playback, StreamDirection::Capture] {
            let Some(card) = self.card_mut(direction) else { continue };
            match card.set_control(name, value) {
                Ok(()) => {
                    tracing::info!(control = name, value, card = card.name(), "mixer control set");
                    return Ok(());
                }
                Err(err) => last = Some(err),
            }
        }
        if let Some(err) = last {
            tracing::warn!(control = name, value, error = %err, "unable to set mixer control");
        }
        Err(HalError::BadValue)
    }

    fn for_each_bucket(
        &mut self,
        device: RouteMask,
        direction: StreamDirection,
        mut apply: impl FnMut(&mut Self, MixerRoute, StreamDirection) -> Result<()>,
    ) -> Result<()> {
        for route in MixerRoute::BUCKETS {
            if route.mask().intersects(device) {
                apply(self, route, direction)?;
            }
        }
        Ok(())
    }

    fn apply_volume(
        &mut self,
        route: MixerRoute,
        direction: StreamDirection,
        level: f32,
    ) -> Result<()> {
        let id = self.bound(route, direction)?;
        let control = &mut self.controls[id.0];
        let vol = control.scale(level);
        control.volume = vol;
        let elem = control.elem.ok_or(HalError::InvalidOperation)?;

        let card = self.card_mut(direction).ok_or(HalError::InvalidOperation)?;
        if let Err(err) = card.set_volume_all(elem, direction, vol) {
            tracing::warn!(?route, ?direction, error = %err, "unable to set volume");
        }
        tracing::debug!(?route, ?direction, volume = vol, "mixer volume");
        Ok(())
    }

    fn apply_mute(
        &mut self,
        route: MixerRoute,
        direction: StreamDirection,
        state: bool,
    ) -> Result<()> {
        let id = self.bound(route, direction)?;
        let elem = self.controls[id.0].elem.ok_or(HalError::InvalidOperation)?;
        let card = self.card_mut(direction).ok_or(HalError::InvalidOperation)?;

        let has_switch = card
            .elements()
            .iter()
            .any(|e| e.id == elem && e.has_switch(direction));
        if has_switch {
            card.set_switch_all(elem, direction, !state).map_err(|err| {
                tracing::error!(?route, ?direction, error = %err, "unable to set mute switch");
                HalError::InvalidOperation
            })?;
        }
        self.controls[id.0].mute = state;
        Ok(())
    }

    fn mute_state(&self, device: RouteMask, direction: StreamDirection) -> Result<bool> {
        let route = MixerRoute::BUCKETS
            .into_iter()
            .find(|route| route.mask().intersects(device))
            .ok_or(HalError::BadValue)?;
        let control = self.control(route, direction).ok_or(HalError::InvalidOperation)?;
        if !control.is_bound() {
            return Err(HalError::InvalidOperation);
        }
        Ok(control.mute)
    }

    fn bound(&self, route: MixerRoute, direction: StreamDirection) -> Result<ControlId> {
        let id = *self
            .index
            .get(&(route, direction))
            .ok_or(HalError::InvalidOperation)?;
        if self.controls[id.0].is_bound() {
            Ok(id)
        } else {
            Err(HalError::InvalidOperation)
        }
    }
}

fn attach(
    backend: &dyn MixerBackend,
    cards: &MixerCardNames,
    direction: StreamDirection,
) -> Option<Box<dyn MixerCard>> {
    let name = cards.card(direction);
    if let Some(card) = backend.attach(name) {
        return Some(card);
    }
    tracing::error!(card = name, fallback = %cards.fallback, "unable to attach mixer card");
    let card = backend.attach(&cards.fallback);
    if card.is_none() {
        tracing::error!(card = %cards.fallback, "unable to attach fallback mixer card");
    }
    card
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{HalConfig, SoftElementConfig};

    fn soft_backend() -> SoftMixerBackend {
        let cfg = HalConfig::default();
        SoftMixerBackend::new(cfg.soft_elements(), cfg.soft_controls())
    }

    fn new_mixer(backend: &SoftMixerBackend) -> Mixer {
        Mixer::new(backend, &HashMap::<String, String>::new(), &MixerCardNames::default())
    }

    #[test]
    fn binds_default_controls_at_max() {
        let backend = soft_backend();
        let mixer = new_mixer(&backend);
        assert!(mixer.is_valid());

        let master = mixer.control(MixerRoute::Master, StreamDirection::Playback).unwrap();
        assert_eq!(master.name, "PCM");
        assert!(master.is_bound());
        assert_eq!(master.volume, 100);
        assert_eq!(
            backend.volume("AndroidPlayback", "PCM", StreamDirection::Playback),
            Some(vec![100, 100])
        );
        assert_eq!(
            backend.switch("AndroidPlayback", "PCM", StreamDirection::Playback),
            Some(vec![true, true])
        );

        let speaker_in = mixer.control(MixerRoute::Speaker, StreamDirection::Capture).unwrap();
        assert!(!speaker_in.is_bound());
    }

    #[test]
    fn master_volume_scales_and_clamps() {
        let backend = SoftMixerBackend::new(
            vec![SoftElementConfig {
                name: "PCM".into(),
                playback_volume: Some([-10, 30]),
                capture_volume: None,
                playback_switch: false,
                capture_switch: false,
                active: true,
                channels: Some(1),
            }],
            Vec::new(),
        );
        let mut mixer = new_mixer(&backend);
        let read = || backend.volume("AndroidPlayback", "PCM", StreamDirection::Playback);

        mixer.set_master_volume(0.0).unwrap();
        assert_eq!(read(), Some(vec![-10]));
        mixer.set_master_volume(1.0).unwrap();
        assert_eq!(read(), Some(vec![30]));
        mixer.set_master_volume(0.5).unwrap();
        assert_eq!(read(), Some(vec![10]));
        mixer.set_master_volume(-3.0).unwrap();
        assert_eq!(read(), Some(vec![-10]));
        mixer.set_master_volume(7.5).unwrap();
        assert_eq!(read(), Some(vec![30]));
        let master = mixer.control(MixerRoute::Master, StreamDirection::Playback).unwrap();
        assert_eq!(master.volume, 30);
    }

    #[test]
    fn unbound_master_gain_is_invalid_operation() {
        let backend = SoftMixerBackend::new(Vec::new(), Vec::new());
        let mut mixer = new_mixer(&backend);
        assert!(mixer.is_valid());
        assert_eq!(mixer.set_master_gain(0.5), Err(HalError::InvalidOperation));
    }

    #[test]
    fn volume_applies_to_every_matching_bucket() {
        let backend = soft_backend();
        let mut mixer = new_mixer(&backend);

        let mask = RouteMask::from(Route::Earpiece) | RouteMask::from(Route::Speaker);
        mixer.set_volume(mask, 0.25).unwrap();

        for name in ["Earpiece", "Speaker"] {
            assert_eq!(
                backend.volume("AndroidPlayback", name, StreamDirection::Playback),
                Some(vec![25, 25])
            );
        }
        assert_eq!(
            backend.volume("AndroidPlayback", "Headphone", StreamDirection::Playback),
            Some(vec![100, 100])
        );
    }

    #[test]
    fn unmatched_device_is_a_no_op_for_volume() {
        let backend = soft_backend();
        let mut mixer = new_mixer(&backend);
        mixer.set_volume(Route::TvOut.into(), 0.0).unwrap();
        assert_eq!(
            backend.volume("AndroidPlayback", "PCM", StreamDirection::Playback),
            Some(vec![100, 100])
        );
    }

    #[test]
    fn unbound_bucket_stops_volume_with_invalid_operation() {
        let backend = soft_backend();
        let mut mixer = new_mixer(&backend);
        let mask = RouteMask::from(Route::Earpiece) | RouteMask::from(Route::Speaker);
        assert_eq!(mixer.set_gain(mask, 0.5), Err(HalError::InvalidOperation));
        assert_eq!(
            backend.volume("AndroidRecord", "Capture", StreamDirection::Capture),
            Some(vec![50, 50])
        );
    }

    #[test]
    fn mute_state_is_cached_and_drives_switch() {
        let backend = soft_backend();
        let mut mixer = new_mixer(&backend);
        let earpiece = RouteMask::from(Route::Earpiece);

        assert_eq!(mixer.get_capture_mute_state(earpiece), Ok(false));
        mixer.set_capture_mute_state(earpiece, true).unwrap();
        assert_eq!(mixer.get_capture_mute_state(earpiece), Ok(true));
        assert_eq!(
            backend.switch("AndroidRecord", "Capture", StreamDirection::Capture),
            Some(vec![false, false])
        );

        mixer.set_playback_mute_state(earpiece, true).unwrap();
        assert_eq!(mixer.get_playback_mute_state(earpiece), Ok(true));
    }

    #[test]
    fn mute_query_without_match_is_bad_value() {
        let backend = soft_backend();
        let mixer = new_mixer(&backend);
        assert_eq!(mixer.get_capture_mute_state(RouteMask::NONE), Err(HalError::BadValue));
        assert_eq!(
            mixer.get_capture_mute_state(Route::Speaker.into()),
            Err(HalError::InvalidOperation)
        );
    }

    #[test]
    fn property_store_overrides_control_names() {
        let backend = SoftMixerBackend::new(
            vec![SoftElementConfig {
                name: "Master".into(),
                playback_volume: Some([0, 31]),
                capture_volume: None,
                playback_switch: true,
                capture_switch: false,
                active: true,
                channels: None,
            }],
            Vec::new(),
        );
        let props: HashMap<String, String> =
            [("alsa.mixer.playback.master".to_string(), "Master".to_string())].into();
        let mixer = Mixer::new(&backend, &props, &MixerCardNames::default());
        let master = mixer.control(MixerRoute::Master, StreamDirection::Playback).unwrap();
        assert_eq!(master.name, "Master");
        assert_eq!((master.min, master.max, master.volume), (0, 31, 31));
    }

    #[test]
    fn inactive_and_volumeless_elements_are_skipped() {
        let inactive = SoftElementConfig {
            name: "PCM".into(),
            playback_volume: Some([0, 10]),
            capture_volume: None,
            playback_switch: false,
            capture_switch: false,
            active: false,
            channels: None,
        };
        let switch_only = SoftElementConfig {
            playback_volume: None,
            playback_switch: true,
            active: true,
            ..inactive.clone()
        };
        let live = SoftElementConfig {
            playback_volume: Some([0, 64]),
            active: true,
            ..inactive.clone()
        };
        let backend = SoftMixerBackend::new(vec![inactive, switch_only, live], Vec::new());
        let mixer = new_mixer(&backend);
        let master = mixer.control(MixerRoute::Master, StreamDirection::Playback).unwrap();
        assert_eq!(master.elem, Some(ElemId(2)));
        assert_eq!(master.max, 64);
    }

    #[test]
    fn falls_back_to_fallback_card() {
        let backend = soft_backend().with_cards(&["hw:00"]);
        let mixer = new_mixer(&backend);
        assert!(mixer.is_valid());

        let backend = soft_backend().with_cards(&["AndroidPlayback"]);
        let mixer = new_mixer(&backend);
        assert!(!mixer.is_valid());
        let gain = mixer.control(MixerRoute::Master, StreamDirection::Capture).unwrap();
        assert!(!gain.is_bound());
    }

    #[test]
    fn named_controls_are_written() {
        let backend = soft_backend();
        let mut mixer = new_mixer(&backend);
        mixer.set_control("Recognition Control", 1).unwrap();
        assert_eq!(backend.control("AndroidPlayback", "Recognition Control"), Some(1));
        assert_eq!(mixer.set_control("Nope", 1), Err(HalError::BadValue));
    }
}
