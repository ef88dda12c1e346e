//! Host device listing.

use anyhow::{Context, Result};
use audio_hal::HalConfig;
use cpal::traits::{DeviceTrait, HostTrait};

/// Print host output and input devices, then the configured PCM name aliases.
pub fn list_devices(config: &HalConfig) -> Result<()> {
    let host = cpal::default_host();

    println!("output devices:");
    for (i, d) in host.output_devices().context("No output devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    println!("input devices:");
    for (i, d) in host.input_devices().context("No input devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }

    let mut aliases: Vec<_> = config.device_aliases().into_iter().collect();
    if !aliases.is_empty() {
        aliases.sort();
        println!("aliases:");
        for (pcm, device) in aliases {
            println!("  {pcm} -> {device}");
        }
    }
    Ok(())
}
