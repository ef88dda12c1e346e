//! Audio routes and the device bit mask that selects them.
//!
//! Bits 0..=15 are output routes, 16..=24 input routes. Each route carries the suffix used
//! when building a PCM device name (several routes share one suffix).

use std::fmt;

use audio_hal_types::StreamDirection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Earpiece,
    Speaker,
    WiredHeadset,
    WiredHeadphone,
    BluetoothSco,
    BluetoothScoHeadset,
    BluetoothScoCarkit,
    BluetoothA2dp,
    BluetoothA2dpHeadphones,
    BluetoothA2dpSpeaker,
    AuxDigital,
    TvOut,
    ExtraDockSpeaker,
    OutNull1,
    OutNull2,
    OutDefault,
    Communication,
    Ambient,
    BuiltinMic,
    BluetoothScoIn,
    WiredHeadsetIn,
    AuxDigitalIn,
    VoiceCall,
    BackMic,
    InDefault,
}

/// Static facts about one route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub bit: u32,
    pub suffix: &'static str,
    pub direction: StreamDirection,
}

impl Route {
    /// Every route, in bit order.
    pub const ALL: [Route; 25] = [
        Route::Earpiece,
        Route::Speaker,
        Route::WiredHeadset,
        Route::WiredHeadphone,
        Route::BluetoothSco,
        Route::BluetoothScoHeadset,
        Route::BluetoothScoCarkit,
        Route::BluetoothA2dp,
        Route::BluetoothA2dpHeadphones,
        Route::BluetoothA2dpSpeaker,
        Route::AuxDigital,
        Route::TvOut,
        Route::ExtraDockSpeaker,
        Route::OutNull1,
        Route::OutNull2,
        Route::OutDefault,
        Route::Communication,
        Route::Ambient,
        Route::BuiltinMic,
        Route::BluetoothScoIn,
        Route::WiredHeadsetIn,
        Route::AuxDigitalIn,
        Route::VoiceCall,
        Route::BackMic,
        Route::InDefault,
    ];

    pub fn descriptor(self) -> RouteDescriptor {
        use StreamDirection::{Capture, Playback};
        let (bit, suffix, direction) = match self {
            Route::Earpiece => (0, "_Earpiece", Playback),
            Route::Speaker => (1, "_Speaker", Playback),
            Route::WiredHeadset => (2, "_Headset", Playback),
            Route::WiredHeadphone => (3, "_Headset", Playback),
            Route::BluetoothSco => (4, "_Bluetooth", Playback),
            Route::BluetoothScoHeadset => (5, "_Bluetooth", Playback),
            Route::BluetoothScoCarkit => (6, "_Bluetooth", Playback),
            Route::BluetoothA2dp => (7, "_Bluetooth", Playback),
            Route::BluetoothA2dpHeadphones => (8, "_Bluetooth", Playback),
            Route::BluetoothA2dpSpeaker => (9, "_Bluetooth", Playback),
            Route::AuxDigital => (10, "_AuxDigital", Playback),
            Route::TvOut => (11, "_TvOut", Playback),
            Route::ExtraDockSpeaker => (12, "_ExtraDockSpeaker", Playback),
            Route::OutNull1 => (13, "_Null", Playback),
            Route::OutNull2 => (14, "_Null", Playback),
            Route::OutDefault => (15, "_OutDefault", Playback),
            Route::Communication => (16, "_Communication", Capture),
            Route::Ambient => (17, "_Ambient", Capture),
            Route::BuiltinMic => (18, "_Speaker", Capture),
            Route::BluetoothScoIn => (19, "_Bluetooth", Capture),
            Route::WiredHeadsetIn => (20, "_Headset", Capture),
            Route::AuxDigitalIn => (21, "_AuxDigital", Capture),
            Route::VoiceCall => (22, "_VoiceCall", Capture),
            Route::BackMic => (23, "_BackMic", Capture),
            Route::InDefault => (24, "_InDefault", Capture),
        };
        RouteDescriptor {
            bit,
            suffix,
            direction,
        }
    }

    pub fn mask(self) -> u32 {
        1 << self.descriptor().bit
    }

    pub fn from_bit(bit: u32) -> Option<Route> {
        Route::ALL.get(bit as usize).copied()
    }
}

/// Bit mask of [`Route`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RouteMask(pub u32);

impl RouteMask {
    pub const NONE: RouteMask = RouteMask(0);
    /// "Whatever the output is currently routed to".
    pub const OUT_DEFAULT: RouteMask = RouteMask(1 << 15);
    pub const OUT_ALL: RouteMask = RouteMask(0xFFFF);
    pub const IN_ALL: RouteMask = RouteMask(0x01FF_0000);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: RouteMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, route: Route) -> bool {
        self.0 & route.mask() != 0
    }

    /// Routes set in the mask, lowest bit first.
    ///
    /// Stops at the first set bit with no known route.
    pub fn routes(self) -> impl Iterator<Item = Route> {
        let mut remaining = self.0;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let bit = remaining.trailing_zeros();
            remaining &= !(1 << bit);
            let route = Route::from_bit(bit);
            if route.is_none() {
                remaining = 0;
            }
            route
        })
    }
}

impl From<u32> for RouteMask {
    fn from(bits: u32) -> Self {
        RouteMask(bits)
    }
}

impl From<Route> for RouteMask {
    fn from(route: Route) -> Self {
        RouteMask(route.mask())
    }
}

impl std::ops::BitOr for RouteMask {
    type Output = RouteMask;

    fn bitor(self, rhs: RouteMask) -> RouteMask {
        RouteMask(self.0 | rhs.0)
    }
}

impl fmt::Debug for RouteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteMask({:#x})", self.0)
    }
}

impl fmt::Display for RouteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_follow_bit_order() {
        for (i, route) in Route::ALL.iter().enumerate() {
            assert_eq!(route.descriptor().bit as usize, i);
        }
        assert_eq!(Route::Speaker.mask(), 0x2);
        assert_eq!(Route::BuiltinMic.mask(), 0x40000);
        assert_eq!(Route::BuiltinMic.descriptor().suffix, "_Speaker");
    }

    #[test]
    fn mask_iterates_low_bit_first() {
        let mask = RouteMask(0x3);
        let routes: Vec<_> = mask.routes().collect();
        assert_eq!(routes, vec![Route::Earpiece, Route::Speaker]);
    }

    #[test]
    fn mask_stops_at_unknown_bits() {
        let mask = RouteMask(0x1 | (1 << 30) | (1 << 31));
        let routes: Vec<_> = mask.routes().collect();
        assert_eq!(routes, vec![Route::Earpiece]);
        assert_eq!(RouteMask(1 << 28).routes().count(), 0);
    }

    #[test]
    fn directions_split_at_bit_16() {
        assert!(
            Route::ALL
                .iter()
                .all(|r| (r.descriptor().bit < 16) == (r.descriptor().direction == StreamDirection::Playback))
        );
    }
}
