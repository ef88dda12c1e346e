//! Conversion of decoded audio to the HAL's fixed 44.1 kHz playback rate.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Streaming rate converter. A pass-through when the source already runs at the target rate.
pub struct RateConverter {
    resampler: Option<Box<dyn Resampler<f32>>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
    indexing: Indexing,
}

impl RateConverter {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let resampler: Option<Box<dyn Resampler<f32>>> = if src_rate == dst_rate {
            None
        } else {
            let sinc_len = 128;
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: calculate_cutoff(sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window,
            };
            let ratio = dst_rate as f64 / src_rate as f64;
            Some(Box::new(Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            )?))
        };
        tracing::debug!(src_rate, dst_rate, channels, "rate converter");

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::new(),
            out: vec![0.0; channels * chunk_frames * 3],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Feed interleaved samples; converted samples are handed to `sink` as they become ready.
    pub fn push(
        &mut self,
        samples: &[f32],
        sink: &mut impl FnMut(&[f32]) -> Result<()>,
    ) -> Result<()> {
        if self.resampler.is_none() {
            return sink(samples);
        }
        self.pending.extend_from_slice(samples);
        let chunk = self.chunk_frames * self.channels;
        while self.pending.len() >= chunk {
            let input: Vec<f32> = self.pending.drain(..chunk).collect();
            self.process(&input, None, sink)?;
        }
        Ok(())
    }

    /// Flush whatever is still buffered.
    pub fn finish(&mut self, sink: &mut impl FnMut(&[f32]) -> Result<()>) -> Result<()> {
        if self.resampler.is_none() || self.pending.is_empty() {
            return Ok(());
        }
        let frames = self.pending.len() / self.channels;
        let mut input = std::mem::take(&mut self.pending);
        input.resize(self.chunk_frames * self.channels, 0.0);
        self.process(&input, Some(frames), sink)
    }

    fn process(
        &mut self,
        input: &[f32],
        partial_len: Option<usize>,
        sink: &mut impl FnMut(&[f32]) -> Result<()>,
    ) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return sink(input);
        };
        let input_adapter = InterleavedSlice::new(input, self.channels, self.chunk_frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let out_frames = self.out.len() / self.channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
            .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial_len;
        let (_consumed, produced) = resampler.process_into_buffer(
            &input_adapter,
            &mut output_adapter,
            Some(&self.indexing),
        )?;
        if produced > 0 {
            sink(&self.out[..produced * self.channels])?;
        }
        Ok(())
    }
}

/// Interleaved `f32` at any channel count to interleaved stereo `i16`.
///
/// Mono is duplicated to both sides; channels beyond the first two are dropped.
pub fn to_stereo_i16(samples: &[f32], channels: usize) -> Vec<i16> {
    let channels = channels.max(1);
    let quantize = |s: f32| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
    let mut out = Vec::with_capacity(samples.len() / channels * 2);
    for frame in samples.chunks_exact(channels) {
        let left = quantize(frame[0]);
        let right = frame.get(1).copied().map(quantize).unwrap_or(left);
        out.push(left);
        out.push(right);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_passes_samples_through() {
        let mut converter = RateConverter::new(44_100, 44_100, 2, 256).unwrap();
        let mut seen = Vec::new();
        converter
            .push(&[0.1, 0.2, 0.3, 0.4], &mut |s| {
                seen.extend_from_slice(s);
                Ok(())
            })
            .unwrap();
        converter.finish(&mut |_| unreachable!()).unwrap();
        assert_eq!(seen, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn resampling_holds_input_until_a_chunk_is_full() {
        let mut converter = RateConverter::new(48_000, 44_100, 1, 256).unwrap();
        let mut produced = 0;
        converter
            .push(&[0.0; 100], &mut |s| {
                produced += s.len();
                Ok(())
            })
            .unwrap();
        assert_eq!(produced, 0);
        for _ in 0..8 {
            converter
                .push(&[0.0; 256], &mut |s| {
                    produced += s.len();
                    Ok(())
                })
                .unwrap();
        }
        assert!(produced > 0);
    }

    #[test]
    fn mono_is_duplicated_and_extra_channels_dropped() {
        assert_eq!(to_stereo_i16(&[1.0, -1.0], 1), vec![32767, 32767, -32767, -32767]);
        assert_eq!(to_stereo_i16(&[0.0, 0.5, 0.9], 3), vec![0, 16384]);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(to_stereo_i16(&[2.0, -3.0], 2), vec![32767, -32767]);
    }
}
