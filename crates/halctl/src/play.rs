//! `play`: decode a file and push it through the HAL output stream.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use audio_hal::stream_ops::DEFAULT_SAMPLE_RATE;
use audio_hal::types::{AudioFormat, channel_mask};
use audio_hal::{AudioHardware, OutputStream, RouteMask, StreamRequest};

use crate::decode::DecodedFile;
use crate::resample::{RateConverter, to_stereo_i16};

pub fn play(
    hw: &AudioHardware,
    path: &Path,
    mask: u32,
    chunk_frames: usize,
    stop: &AtomicBool,
) -> Result<()> {
    let mut source = DecodedFile::open(path)?;
    tracing::info!(
        path = %path.display(),
        rate = source.sample_rate,
        channels = source.channels,
        "decoding"
    );

    let mut request = StreamRequest::new(
        AudioFormat::Pcm16Bit,
        channel_mask::OUT_STEREO,
        DEFAULT_SAMPLE_RATE,
    );
    let stream = hw
        .open_output_stream(RouteMask(mask), &mut request)
        .context("open output stream")?;

    let result = stream_file(&mut source, &stream, chunk_frames, stop);

    if let Err(err) = stream.standby() {
        tracing::warn!(error = %err, "output standby failed");
    }
    hw.close_output_stream(&stream);
    result
}

fn stream_file(
    source: &mut DecodedFile,
    stream: &OutputStream,
    chunk_frames: usize,
    stop: &AtomicBool,
) -> Result<()> {
    let mut converter = RateConverter::new(
        source.sample_rate,
        stream.sample_rate(),
        source.channels,
        chunk_frames,
    )?;
    let mut writer = ChunkWriter::new(stream, source.channels);
    while !stop.load(Ordering::Relaxed) {
        let Some(samples) = source.next_samples() else {
            break;
        };
        converter.push(&samples, &mut |s| writer.accept(s))?;
    }
    if !stop.load(Ordering::Relaxed) {
        converter.finish(&mut |s| writer.accept(s))?;
        writer.flush()?;
    }
    tracing::info!(bytes = writer.written, "playback finished");
    Ok(())
}

/// Gathers converted audio into writes of exactly one stream buffer.
struct ChunkWriter<'a> {
    stream: &'a OutputStream,
    source_channels: usize,
    chunk: usize,
    pending: Vec<i16>,
    written: usize,
}

impl<'a> ChunkWriter<'a> {
    fn new(stream: &'a OutputStream, source_channels: usize) -> Self {
        let chunk = (stream.buffer_size() / AudioFormat::Pcm16Bit.bytes_per_sample()).max(2);
        Self {
            stream,
            source_channels,
            chunk,
            pending: Vec::with_capacity(chunk * 2),
            written: 0,
        }
    }

    fn accept(&mut self, samples: &[f32]) -> Result<()> {
        self.pending.extend(to_stereo_i16(samples, self.source_channels));
        while self.pending.len() >= self.chunk {
            self.written += self.stream.write(&self.pending[..self.chunk])?;
            self.pending.drain(..self.chunk);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.written += self.stream.write(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }
}
