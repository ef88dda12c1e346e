//! halctl: drive the audio HAL from the command line.
//!
//! Builds an [`AudioHardware`] over the host's audio devices (or the null sink with
//! `--null`) and exercises it the way an audio framework would:
//! - `play` decodes a file with Symphonia, converts it to 44.1 kHz stereo with Rubato and
//!   writes it through the output stream one buffer at a time
//! - `record` reads the input stream, downsampled to the requested rate, into a WAV file
//! - `route` prints the PCM names a stream would try for a mode and route mask
//! - `status` dumps the facade state as JSON

mod cli;
mod decode;
mod devices;
mod play;
mod record;
mod resample;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use audio_hal::types::AudioMode;
use audio_hal::{AudioHardware, HalConfig, NullPcmBackend, RouteMask, StreamRequest};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,halctl=info,audio_hal=info")
        }))
        .init();

    let config = match &args.config {
        Some(path) => HalConfig::load(path)?,
        None => HalConfig::default(),
    };

    match args.cmd {
        cli::Command::Devices => devices::list_devices(&config)?,
        cli::Command::Route {
            mode,
            mask,
            capture,
        } => {
            for name in route_names(config, mode.into(), RouteMask(mask), capture)? {
                println!("{name}");
            }
        }
        cli::Command::Play {
            path,
            mask,
            chunk_frames,
        } => {
            let hw = build_hardware(config, args.null);
            let stop = stop_flag()?;
            play::play(&hw, &path, mask, chunk_frames, &stop)?;
        }
        cli::Command::Record {
            path,
            rate,
            channels,
            seconds,
            mask,
        } => {
            let hw = build_hardware(config, args.null);
            let stop = stop_flag()?;
            let opts = record::RecordOptions {
                rate,
                channels,
                seconds,
                mask,
            };
            record::record(&hw, &path, &opts, &stop)?;
        }
        cli::Command::Status => {
            let hw = build_hardware(config, args.null);
            println!("{}", serde_json::to_string_pretty(&hw.status())?);
        }
    }
    Ok(())
}

fn build_hardware(config: HalConfig, null: bool) -> AudioHardware {
    let mut builder = AudioHardware::builder(config);
    if null {
        builder = builder.pcm_backend(Arc::new(NullPcmBackend));
    }
    let hw = builder.build();
    if let Err(err) = hw.init_check() {
        tracing::warn!(error = %err, "mixer unavailable; volume and mute requests will fail");
    }
    hw
}

/// PCM names tried for `mask` in `mode`, most specific first.
///
/// Streams are opened on the null sink, so no host device is touched.
fn route_names(
    config: HalConfig,
    mode: AudioMode,
    mask: RouteMask,
    capture: bool,
) -> Result<Vec<String>> {
    let hw = build_hardware(config, true);
    let mut request = StreamRequest::default();
    let names = if capture {
        let stream = hw
            .open_input_stream(RouteMask::NONE, &mut request, 0)
            .context("open input stream")?;
        let names = stream.name_candidates(mode, mask);
        hw.close_input_stream(&stream);
        names
    } else {
        let stream = hw
            .open_output_stream(RouteMask::NONE, &mut request)
            .context("open output stream")?;
        let names = stream.name_candidates(mode, mask);
        hw.close_output_stream(&stream);
        names
    };
    Ok(names)
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupted");
        flag.store(true, Ordering::Relaxed);
    })
    .context("install ctrl-c handler")?;
    Ok(stop)
}
