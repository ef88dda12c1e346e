//! Capture-side rate conversion from the 44.1 kHz hardware rate.
//!
//! Cascades of the fixed-point primitives in [`crate::resample`]:
//!
//! | target | stages |
//! |---|---|
//! | 22050 | 2:1 |
//! | 11025 | 2:1, 2:1 |
//! | 16000 | 2:1, 441:320 |
//! | 8000 | 2:1, 2:1, 441:320 |
//!
//! Input is pulled on demand from a [`BufferProvider`]. Channels are de-interleaved into
//! per-channel stage buffers; every stage keeps its unconsumed tail so no samples are lost
//! between calls, and converted samples the caller did not ask for yet are handed out
//! first on the next call.

use crate::error::{HalError, Result};
use crate::resample::{
    FILTER_22KHZ_COEFF, OVERLAP_16KHZ, RESAMPLE_16KHZ_SAMPLES_IN, resample_2_1,
    resample_441_320,
};

/// Smallest `frame_count` the cascade can make progress with: one 2:1 filter span.
pub const MIN_FRAME_COUNT: usize = FILTER_22KHZ_COEFF.len();

/// Samples a 441:320 stage may leave behind: just short of one block plus its overlap.
const BLOCK_CARRY: usize = RESAMPLE_16KHZ_SAMPLES_IN + OVERLAP_16KHZ - 1;

/// Source of interleaved 16-bit frames at the hardware rate.
pub trait BufferProvider {
    /// Borrow up to `frames` interleaved frames. The slice may be shorter than asked.
    fn next_buffer(&mut self, frames: usize) -> Result<&[i16]>;

    /// Mark `frames` frames of the last buffer as consumed.
    fn release_buffer(&mut self, frames: usize);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cascade {
    /// 44100 → 22050
    Half,
    /// 44100 → 22050 → 11025
    Quarter,
    /// 44100 → 22050 → 16000
    HalfThen441,
    /// 44100 → 22050 → 11025 → 8000
    QuarterThen441,
}

impl Cascade {
    fn for_rate(rate: u32) -> Option<Cascade> {
        match rate {
            22_050 => Some(Cascade::Half),
            11_025 => Some(Cascade::Quarter),
            16_000 => Some(Cascade::HalfThen441),
            8_000 => Some(Cascade::QuarterThen441),
            _ => None,
        }
    }
}

/// Per-channel stage buffers.
///
/// Intermediate stages append a whole input period's worth behind their carry, so they get
/// room for a full block carry on top of `frames`.
#[derive(Clone, Debug)]
struct ChannelBuffers {
    input: Vec<i16>,
    tmp: Vec<i16>,
    tmp2: Vec<i16>,
    out: Vec<i16>,
}

impl ChannelBuffers {
    fn new(frames: usize) -> Self {
        let stage = frames + BLOCK_CARRY + 1;
        Self {
            input: vec![0; frames],
            tmp: vec![0; stage],
            tmp2: vec![0; stage],
            out: vec![0; stage],
        }
    }
}

/// Samples carried over between [`Downsampler::resample`] calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CarryOver {
    /// Unconsumed hardware-rate samples in the input buffer.
    pub input: usize,
    /// Unconsumed samples in the first intermediate buffer.
    pub tmp: usize,
    /// Unconsumed samples in the second intermediate buffer.
    pub tmp2: usize,
    /// Converted samples not yet handed to the caller.
    pub output: usize,
}

pub struct Downsampler {
    sample_rate: u32,
    channel_count: usize,
    frame_count: usize,
    cascade: Cascade,
    left: ChannelBuffers,
    right: Option<ChannelBuffers>,
    in_in_buf: usize,
    in_tmp_buf: usize,
    in_tmp2_buf: usize,
    out_buf_pos: usize,
    in_out_buf: usize,
}

impl Downsampler {
    /// `frame_count` is the most the provider is asked for at once and sizes every stage.
    ///
    /// Fails with `NotInitialized` for a rate outside {8000, 11025, 16000, 22050}, a
    /// channel count other than 1 or 2, or a `frame_count` below [`MIN_FRAME_COUNT`].
    pub fn new(sample_rate: u32, channel_count: usize, frame_count: usize) -> Result<Self> {
        let cascade = Cascade::for_rate(sample_rate).ok_or_else(|| {
            tracing::error!(sample_rate, "unsupported downsampler rate");
            HalError::NotInitialized
        })?;
        if !(1..=2).contains(&channel_count) || frame_count < MIN_FRAME_COUNT {
            tracing::error!(channel_count, frame_count, "unsupported downsampler layout");
            return Err(HalError::NotInitialized);
        }

        Ok(Self {
            sample_rate,
            channel_count,
            frame_count,
            cascade,
            left: ChannelBuffers::new(frame_count),
            right: (channel_count == 2).then(|| ChannelBuffers::new(frame_count)),
            in_in_buf: 0,
            in_tmp_buf: 0,
            in_tmp2_buf: 0,
            out_buf_pos: 0,
            in_out_buf: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Forget all carried samples.
    pub fn reset(&mut self) {
        self.in_in_buf = 0;
        self.in_tmp_buf = 0;
        self.in_tmp2_buf = 0;
        self.out_buf_pos = 0;
        self.in_out_buf = 0;
    }

    pub fn carry_over(&self) -> CarryOver {
        CarryOver {
            input: self.in_in_buf,
            tmp: self.in_tmp_buf,
            tmp2: self.in_tmp2_buf,
            output: self.in_out_buf,
        }
    }

    /// Fill `out` (interleaved) with converted frames.
    ///
    /// Returns the number of frames written, which is always `out.len() / channels` on
    /// success. A provider error aborts the call and is returned as is.
    pub fn resample(
        &mut self,
        provider: &mut dyn BufferProvider,
        out: &mut [i16],
    ) -> Result<usize> {
        let wanted = out.len() / self.channel_count;
        let mut written = 0;

        if self.in_out_buf > 0 {
            let frames = wanted.min(self.in_out_buf);
            self.copy_out(out, 0, self.out_buf_pos, frames);
            self.out_buf_pos += frames;
            self.in_out_buf -= frames;
            written += frames;
        }

        while written < wanted {
            let request = self.frame_count - self.in_in_buf;
            let chunk = provider.next_buffer(request)?;
            let frames = (chunk.len() / self.channel_count).min(request);
            self.deinterleave(chunk, frames);
            provider.release_buffer(frames);
            self.in_in_buf += frames;

            self.run_cascade();

            let frames = (wanted - written).min(self.in_out_buf);
            self.copy_out(out, written, 0, frames);
            written += frames;
            self.out_buf_pos = frames;
            self.in_out_buf -= frames;
        }

        Ok(written)
    }

    fn deinterleave(&mut self, chunk: &[i16], frames: usize) {
        let start = self.in_in_buf;
        match self.right.as_mut() {
            None => self.left.input[start..start + frames].copy_from_slice(&chunk[..frames]),
            Some(right) => {
                for (i, frame) in chunk.chunks_exact(2).take(frames).enumerate() {
                    self.left.input[start + i] = frame[0];
                    right.input[start + i] = frame[1];
                }
            }
        }
    }

    fn run_cascade(&mut self) {
        // 44100 -> 22050
        let available = self.in_in_buf;
        let tmp_pos = self.in_tmp_buf;
        let (carry, produced) = half_stage(&mut self.left, self.right.as_mut(), available, |b| {
            (&mut b.input[..], &mut b.tmp[tmp_pos..])
        });
        self.in_in_buf = carry;
        self.in_tmp_buf += produced;
        self.in_out_buf = produced;

        match self.cascade {
            Cascade::Half => self.in_tmp_buf = 0,
            Cascade::Quarter | Cascade::QuarterThen441 => {
                // 22050 -> 11025
                let available = self.in_tmp_buf;
                let tmp2_pos = self.in_tmp2_buf;
                let (carry, produced) =
                    half_stage(&mut self.left, self.right.as_mut(), available, |b| {
                        (&mut b.tmp[..], &mut b.tmp2[tmp2_pos..])
                    });
                self.in_tmp_buf = carry;
                self.in_tmp2_buf += produced;
                self.in_out_buf = produced;

                if self.cascade == Cascade::QuarterThen441 {
                    // 11025 -> 8000
                    let available = self.in_tmp2_buf;
                    let (carry, produced) =
                        ratio_stage(&mut self.left, self.right.as_mut(), available, |b| {
                            (&mut b.tmp2[..], &mut b.out[..])
                        });
                    self.in_tmp2_buf = carry;
                    self.in_out_buf = produced;
                } else {
                    self.in_tmp2_buf = 0;
                }
            }
            Cascade::HalfThen441 => {
                // 22050 -> 16000
                let available = self.in_tmp_buf;
                let (carry, produced) =
                    ratio_stage(&mut self.left, self.right.as_mut(), available, |b| {
                        (&mut b.tmp[..], &mut b.tmp2[..])
                    });
                self.in_tmp_buf = carry;
                self.in_out_buf = produced;
            }
        }
    }

    fn output_buffer(cascade: Cascade, buffers: &ChannelBuffers) -> &[i16] {
        match cascade {
            Cascade::Half => &buffers.tmp,
            Cascade::Quarter | Cascade::HalfThen441 => &buffers.tmp2,
            Cascade::QuarterThen441 => &buffers.out,
        }
    }

    /// Copy `frames` converted frames starting at `src_pos` into `out` at frame `dst_frame`.
    fn copy_out(&self, out: &mut [i16], dst_frame: usize, src_pos: usize, frames: usize) {
        let left = &Self::output_buffer(self.cascade, &self.left)[src_pos..src_pos + frames];
        match self.right.as_ref() {
            None => out[dst_frame..dst_frame + frames].copy_from_slice(left),
            Some(right) => {
                let right = &Self::output_buffer(self.cascade, right)[src_pos..src_pos + frames];
                let dst = &mut out[dst_frame * 2..(dst_frame + frames) * 2];
                for (i, frame) in dst.chunks_exact_mut(2).enumerate() {
                    frame[0] = left[i];
                    frame[1] = right[i];
                }
            }
        }
    }
}

/// Run a 2:1 stage on both channels; returns `(carry, produced)` of the left channel.
fn half_stage<F>(
    left: &mut ChannelBuffers,
    right: Option<&mut ChannelBuffers>,
    available: usize,
    select: F,
) -> (usize, usize)
where
    F: Fn(&mut ChannelBuffers) -> (&mut [i16], &mut [i16]),
{
    run_stage(left, right, available, select, resample_2_1)
}

/// Run a 441:320 stage on both channels; returns `(carry, produced)` of the left channel.
fn ratio_stage<F>(
    left: &mut ChannelBuffers,
    right: Option<&mut ChannelBuffers>,
    available: usize,
    select: F,
) -> (usize, usize)
where
    F: Fn(&mut ChannelBuffers) -> (&mut [i16], &mut [i16]),
{
    run_stage(left, right, available, select, resample_441_320)
}

fn run_stage<F>(
    left: &mut ChannelBuffers,
    right: Option<&mut ChannelBuffers>,
    available: usize,
    select: F,
    stage: fn(&mut [i16], &mut [i16], &mut usize) -> usize,
) -> (usize, usize)
where
    F: Fn(&mut ChannelBuffers) -> (&mut [i16], &mut [i16]),
{
    let mut carry = available;
    let (input, output) = select(left);
    let produced = stage(input, output, &mut carry);

    if let Some(right) = right {
        let mut right_carry = available;
        let (input, output) = select(right);
        stage(input, output, &mut right_carry);
    }
    (carry, produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::OVERLAP_22KHZ;
    use crate::stream_ops::buffer_ratio;

    const RATES: [u32; 4] = [8_000, 11_025, 16_000, 22_050];
    const FRAME_COUNTS: [usize; 4] = [256, 512, 1024, 2048];

    /// Serves a fixed interleaved signal in provider-sized pieces.
    struct VecProvider {
        data: Vec<i16>,
        channels: usize,
        pos: usize,
        requests: usize,
    }

    impl VecProvider {
        fn new(data: Vec<i16>, channels: usize) -> Self {
            Self {
                data,
                channels,
                pos: 0,
                requests: 0,
            }
        }
    }

    impl BufferProvider for VecProvider {
        fn next_buffer(&mut self, frames: usize) -> Result<&[i16]> {
            self.requests += 1;
            if self.pos >= self.data.len() {
                return Err(HalError::NotInitialized);
            }
            let end = (self.pos + frames * self.channels).min(self.data.len());
            Ok(&self.data[self.pos..end])
        }

        fn release_buffer(&mut self, frames: usize) {
            self.pos += frames * self.channels;
        }
    }

    fn sine(frames: usize, freq: f32, amp: f32) -> Vec<i16> {
        (0..frames)
            .map(|i| (amp * (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin()) as i16)
            .collect()
    }

    /// Pull `chunk`-frame blocks until the provider runs dry; returns frames produced.
    fn drain(ds: &mut Downsampler, provider: &mut VecProvider, chunk: usize) -> (usize, Vec<i16>) {
        let mut out = vec![0i16; chunk * ds.channel_count()];
        let mut collected = Vec::new();
        let mut total = 0;
        while let Ok(frames) = ds.resample(provider, &mut out) {
            total += frames;
            collected.extend_from_slice(&out);
        }
        (total, collected)
    }

    /// Largest carry each intermediate buffer may hold between calls: `(tmp, tmp2)`.
    fn stage_carry_limits(rate: u32) -> (usize, usize) {
        match rate {
            22_050 => (0, 0),
            11_025 => (OVERLAP_22KHZ + 1, 0),
            16_000 => (BLOCK_CARRY, 0),
            _ => (OVERLAP_22KHZ + 1, BLOCK_CARRY),
        }
    }

    #[test]
    fn rejects_unsupported_layouts() {
        assert!(matches!(Downsampler::new(44_100, 1, 2048), Err(HalError::NotInitialized)));
        assert!(matches!(Downsampler::new(48_000, 1, 2048), Err(HalError::NotInitialized)));
        assert!(matches!(Downsampler::new(16_000, 3, 2048), Err(HalError::NotInitialized)));
        assert!(matches!(
            Downsampler::new(16_000, 1, MIN_FRAME_COUNT - 1),
            Err(HalError::NotInitialized)
        ));
        assert!(Downsampler::new(16_000, 1, MIN_FRAME_COUNT).is_ok());
    }

    #[test]
    fn one_second_at_22050_yields_one_second_of_frames() {
        let mut ds = Downsampler::new(22_050, 1, 2048).unwrap();
        let mut provider = VecProvider::new(sine(44_100, 1_000.0, 8_000.0), 1);

        let (frames, _) = drain(&mut ds, &mut provider, 256);

        assert!(frames.abs_diff(22_050) <= 2048, "frames = {frames}");
        assert!(frames <= 22_050);
    }

    #[test]
    fn frame_counts_track_each_target_rate() {
        let chunk = 160;
        for frame_count in FRAME_COUNTS {
            for rate in RATES {
                let mut ds = Downsampler::new(rate, 1, frame_count).unwrap();
                let mut provider = VecProvider::new(vec![500; 2 * 44_100], 1);

                let (frames, _) = drain(&mut ds, &mut provider, chunk);

                let expected = 2 * rate as usize;
                let slack = frame_count + 2 * BLOCK_CARRY + chunk;
                assert!(frames <= expected, "rate {rate}/{frame_count}: {frames}");
                assert!(expected - frames <= slack, "rate {rate}/{frame_count}: {frames}");
            }
        }
    }

    #[test]
    fn carry_over_stays_bounded() {
        for frame_count in FRAME_COUNTS {
            for rate in RATES {
                let (tmp_max, tmp2_max) = stage_carry_limits(rate);
                let mut ds = Downsampler::new(rate, 2, frame_count).unwrap();
                let mut provider = VecProvider::new(vec![100; 2 * 2 * 44_100], 2);
                let mut out = vec![0i16; 2 * 333];

                while ds.resample(&mut provider, &mut out).is_ok() {
                    let carry = ds.carry_over();
                    let ctx = format!("rate {rate}, frames {frame_count}: {carry:?}");
                    assert!(carry.input <= OVERLAP_22KHZ + 1, "{ctx}");
                    assert!(carry.tmp <= tmp_max, "{ctx}");
                    assert!(carry.tmp2 <= tmp2_max, "{ctx}");
                    assert!(carry.output <= frame_count / 2 + BLOCK_CARRY, "{ctx}");
                }
            }
        }
    }

    #[test]
    fn short_periods_run_every_cascade() {
        for frame_count in [MIN_FRAME_COUNT, 64, 100, 512] {
            for rate in RATES {
                for channels in [1, 2] {
                    let mut ds = Downsampler::new(rate, channels, frame_count).unwrap();
                    let mut provider = VecProvider::new(vec![700; channels * 44_100], channels);
                    let chunk = (frame_count / buffer_ratio(rate)).max(1);

                    let (frames, samples) = drain(&mut ds, &mut provider, chunk);

                    assert!(frames > rate as usize / 2, "rate {rate}/{frame_count}: {frames}");
                    let settled = &samples[frames * channels / 2..frames * channels];
                    assert!(
                        settled.iter().all(|s| (*s - 700).abs() <= 2),
                        "rate {rate}/{frame_count}/{channels}"
                    );
                }
            }
        }
    }

    #[test]
    fn dc_level_survives_conversion() {
        let mut ds = Downsampler::new(16_000, 1, 2048).unwrap();
        let mut provider = VecProvider::new(vec![1_000; 44_100], 1);

        let (frames, samples) = drain(&mut ds, &mut provider, 256);

        assert!(frames > 0);
        // Skip the filter warm-up.
        assert!(samples[64..frames].iter().all(|s| (*s - 1_000).abs() <= 2));
    }

    #[test]
    fn stereo_channels_stay_separate() {
        let frames = 44_100 / 2;
        let mut data = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            data.push(1_000);
            data.push(-1_000);
        }
        for frame_count in [256, 2048] {
            for rate in RATES {
                let mut ds = Downsampler::new(rate, 2, frame_count).unwrap();
                let mut provider = VecProvider::new(data.clone(), 2);

                let (produced, samples) = drain(&mut ds, &mut provider, 128);

                assert!(produced > 256);
                for frame in samples[..produced * 2].chunks_exact(2).skip(64) {
                    assert!(frame[0] > 900, "rate {rate}: left {}", frame[0]);
                    assert!(frame[1] < -900, "rate {rate}: right {}", frame[1]);
                }
            }
        }
    }

    #[test]
    fn leftover_output_is_served_before_pulling() {
        let mut ds = Downsampler::new(22_050, 1, 2048).unwrap();
        let mut provider = VecProvider::new(vec![0; 44_100], 1);
        let mut small = vec![0i16; 10];

        ds.resample(&mut provider, &mut small).unwrap();
        let requests = provider.requests;
        assert!(ds.carry_over().output > 10);

        ds.resample(&mut provider, &mut small).unwrap();
        assert_eq!(provider.requests, requests);
    }

    #[test]
    fn provider_error_is_returned() {
        let mut ds = Downsampler::new(8_000, 1, 2048).unwrap();
        let mut provider = VecProvider::new(Vec::new(), 1);
        let mut out = vec![0i16; 64];
        assert_eq!(ds.resample(&mut provider, &mut out), Err(HalError::NotInitialized));
    }

    #[test]
    fn reset_clears_carry() {
        let mut ds = Downsampler::new(11_025, 1, 2048).unwrap();
        let mut provider = VecProvider::new(vec![0; 8_192], 1);
        let mut out = vec![0i16; 100];
        ds.resample(&mut provider, &mut out).unwrap();
        assert_ne!(ds.carry_over(), CarryOver::default());

        ds.reset();
        assert_eq!(ds.carry_over(), CarryOver::default());
    }
}
