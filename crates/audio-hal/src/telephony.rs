//! Modem-side call audio control.
//!
//! During a voice call the modem owns the voice path; the HAL only tells it which
//! physical path to use, how loud, and when to start its PCM clock.

use crate::routes::Route;

/// Call volume channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundType {
    Voice,
    Speaker,
    Headset,
    BluetoothVoice,
}

/// Physical path for call audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioPath {
    Handset,
    Headset,
    Handsfree,
    Bluetooth,
    BluetoothNoNrEc,
    Speaker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockCondition {
    Stop,
    Start,
}

pub trait CallAudioController: Send + Sync {
    /// Make sure the modem link is up. `false` means every other call is pointless.
    fn connect_if_required(&self) -> bool;
    fn set_call_volume(&self, sound: SoundType, volume: i32);
    fn set_call_audio_path(&self, path: AudioPath);
    fn set_call_clock_sync(&self, condition: ClockCondition);
}

/// Controller used when the device has no modem.
#[derive(Clone, Copy, Debug, Default)]
pub struct AbsentCallController;

impl CallAudioController for AbsentCallController {
    fn connect_if_required(&self) -> bool {
        false
    }

    fn set_call_volume(&self, _sound: SoundType, _volume: i32) {}

    fn set_call_audio_path(&self, _path: AudioPath) {}

    fn set_call_clock_sync(&self, _condition: ClockCondition) {}
}

/// Call path for an output route mask, or `None` for routes the modem cannot use.
///
/// Only exact single-route masks are recognised.
pub fn call_audio_path(device: u32, bt_nrec_off: bool) -> Option<AudioPath> {
    let bluetooth = if bt_nrec_off {
        AudioPath::BluetoothNoNrEc
    } else {
        AudioPath::Bluetooth
    };
    match single_route(device)? {
        Route::Earpiece => Some(AudioPath::Handset),
        Route::Speaker => Some(AudioPath::Speaker),
        Route::BluetoothSco | Route::BluetoothScoHeadset | Route::BluetoothScoCarkit => {
            Some(bluetooth)
        }
        Route::WiredHeadset | Route::WiredHeadphone => Some(AudioPath::Headset),
        Route::BluetoothA2dp => Some(AudioPath::Bluetooth),
        _ => None,
    }
}

/// Volume channel for an output route mask.
pub fn call_sound_type(device: u32) -> Option<SoundType> {
    match single_route(device)? {
        Route::Earpiece | Route::WiredHeadphone => Some(SoundType::Voice),
        Route::Speaker => Some(SoundType::Speaker),
        Route::BluetoothSco
        | Route::BluetoothScoHeadset
        | Route::BluetoothScoCarkit
        | Route::BluetoothA2dp => Some(SoundType::BluetoothVoice),
        Route::WiredHeadset => Some(SoundType::Headset),
        _ => None,
    }
}

/// `true` for the SCO routes whose path depends on the NR/EC setting.
pub fn is_sco_route(device: u32) -> bool {
    matches!(
        single_route(device),
        Some(Route::BluetoothSco | Route::BluetoothScoHeadset | Route::BluetoothScoCarkit)
    )
}

fn single_route(device: u32) -> Option<Route> {
    if device.count_ones() != 1 {
        return None;
    }
    Route::from_bit(device.trailing_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_for_routes() {
        assert_eq!(call_audio_path(0x1, false), Some(AudioPath::Handset));
        assert_eq!(call_audio_path(0x2, false), Some(AudioPath::Speaker));
        assert_eq!(call_audio_path(0x20, false), Some(AudioPath::Bluetooth));
        assert_eq!(call_audio_path(0x20, true), Some(AudioPath::BluetoothNoNrEc));
        assert_eq!(call_audio_path(0x8, false), Some(AudioPath::Headset));
        assert_eq!(call_audio_path(0x80, true), Some(AudioPath::Bluetooth));
        assert_eq!(call_audio_path(0x3, false), None);
        assert_eq!(call_audio_path(0x400, false), None);
    }

    #[test]
    fn sound_types_for_routes() {
        assert_eq!(call_sound_type(0x1), Some(SoundType::Voice));
        assert_eq!(call_sound_type(0x8), Some(SoundType::Voice));
        assert_eq!(call_sound_type(0x4), Some(SoundType::Headset));
        assert_eq!(call_sound_type(0x40), Some(SoundType::BluetoothVoice));
        assert_eq!(call_sound_type(0), None);
    }
}
