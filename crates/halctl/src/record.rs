//! `record`: read the HAL input stream into a WAV file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use audio_hal::stream_ops::channel_count_to_mask;
use audio_hal::types::{AudioFormat, StreamDirection};
use audio_hal::{AudioHardware, InputStream, RouteMask, StreamRequest};

pub struct RecordOptions {
    pub rate: u32,
    pub channels: u32,
    pub seconds: f32,
    pub mask: u32,
}

pub fn record(
    hw: &AudioHardware,
    path: &Path,
    opts: &RecordOptions,
    stop: &AtomicBool,
) -> Result<()> {
    let mut request = StreamRequest::new(
        AudioFormat::Pcm16Bit,
        channel_count_to_mask(StreamDirection::Capture, opts.channels),
        opts.rate,
    );
    let stream = hw
        .open_input_stream(RouteMask(opts.mask), &mut request, 0)
        .with_context(|| {
            format!(
                "open input stream at {} Hz (closest supported: {} Hz)",
                opts.rate, request.sample_rate
            )
        })?;

    let result = capture_to_wav(&stream, path, opts.seconds, stop);

    if let Err(err) = stream.standby() {
        tracing::warn!(error = %err, "input standby failed");
    }
    hw.close_input_stream(&stream);
    result
}

fn capture_to_wav(
    stream: &InputStream,
    path: &Path,
    seconds: f32,
    stop: &AtomicBool,
) -> Result<()> {
    let channels = stream.channel_count();
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate: stream.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("create {:?}", path))?;

    let bytes_per_sample = AudioFormat::Pcm16Bit.bytes_per_sample();
    let mut buf = vec![0i16; stream.buffer_size() / bytes_per_sample];
    let target = (seconds.max(0.0) * stream.sample_rate() as f32) as usize;
    let mut frames = 0;
    while frames < target && !stop.load(Ordering::Relaxed) {
        let samples = stream.read(&mut buf)? / bytes_per_sample;
        for &sample in &buf[..samples] {
            writer.write_sample(sample)?;
        }
        frames += samples / channels;
    }
    writer.finalize()?;
    tracing::info!(path = %path.display(), frames, "recording finished");
    Ok(())
}
