use std::path::PathBuf;

use audio_hal::types::AudioMode;
use clap::{Parser, Subcommand, ValueEnum};

/// Speaker.
pub const DEFAULT_PLAY_MASK: u32 = 1 << 1;
/// Built-in microphone.
pub const DEFAULT_RECORD_MASK: u32 = 1 << 18;

#[derive(Parser, Debug)]
#[command(name = "halctl", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// HAL configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Send playback to the null sink and capture silence instead of using host devices
    #[arg(long, global = true)]
    pub null: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List host output and input devices
    Devices,

    /// Print the PCM names tried, in order, for a route
    Route {
        #[arg(long, value_enum, default_value_t = ModeArg::Normal)]
        mode: ModeArg,

        /// Route bit mask
        #[arg(long)]
        mask: u32,

        /// Resolve capture names instead of playback names
        #[arg(long)]
        capture: bool,
    },

    /// Play an audio file through the output stream
    Play {
        path: PathBuf,

        #[arg(long, default_value_t = DEFAULT_PLAY_MASK)]
        mask: u32,

        /// Resampler input chunk size in frames
        #[arg(long, default_value_t = 1024)]
        chunk_frames: usize,
    },

    /// Record from the input stream into a WAV file
    Record {
        path: PathBuf,

        /// Client sample rate; rates below 44100 go through the downsampler
        #[arg(long, default_value_t = 16_000)]
        rate: u32,

        #[arg(long, default_value_t = 1)]
        channels: u32,

        #[arg(long, default_value_t = 5.0)]
        seconds: f32,

        #[arg(long, default_value_t = DEFAULT_RECORD_MASK)]
        mask: u32,
    },

    /// Print the hardware status as JSON
    Status,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Normal,
    Ringtone,
    InCall,
}

impl From<ModeArg> for AudioMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => AudioMode::Normal,
            ModeArg::Ringtone => AudioMode::Ringtone,
            ModeArg::InCall => AudioMode::InCall,
        }
    }
}
