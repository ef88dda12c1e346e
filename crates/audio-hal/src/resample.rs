//! Fixed-point FIR decimation primitives.
//!
//! Two mono building blocks feed the capture [`Downsampler`](crate::downsampler::Downsampler):
//! - [`resample_2_1`]: halve the rate (44100 → 22050, 22050 → 11025)
//! - [`resample_441_320`]: 441 → 320 (22050 → 16000, 11025 → 8000)
//!
//! Both work in place on a caller-owned input buffer: consumed samples are dropped and the
//! unconsumed tail (the filter overlap) is shifted to the front so the next call can append
//! fresh samples behind it.

/// 2.30 fixed-point low-pass taps for 2:1 decimation.
///
/// Symmetric (linear phase), cutoff at half band.
pub const FILTER_22KHZ_COEFF: [i32; 20] = [
    2089257, 2898328, -5820678, -10484531, 19038724, 30542725, -50469415, -81505260, 152544464,
    478517512, 478517512, 152544464, -81505260, -50469415, 30542725, 19038724, -10484531,
    -5820678, 2898328, 2089257,
];

/// Samples the 2:1 stage must keep between calls.
pub const OVERLAP_22KHZ: usize = FILTER_22KHZ_COEFF.len() - 2;

/// 2.30 fixed-point low-pass taps for the 441:320 stage.
pub const FILTER_16KHZ_COEFF: [i32; 24] = [
    2057290, -2973608, 1880478, 4362037, -14639744, 18523609, -1609189, -38502470, 78073125,
    -68353935, -59103896, 617555440, 617555440, -59103896, -68353935, 78073125, -38502470,
    -1609189, 18523609, -14639744, 4362037, 1880478, -2973608, 2057290,
];

/// Samples the 441:320 stage must keep between calls.
pub const OVERLAP_16KHZ: usize = FILTER_16KHZ_COEFF.len() - 1;

pub const RESAMPLE_16KHZ_SAMPLES_IN: usize = 441;
pub const RESAMPLE_16KHZ_SAMPLES_OUT: usize = 320;

/// Dot product of `samples` with the high 16 bits of each tap, rounded back to 16.16.
///
/// `samples` must hold at least `taps.len()` values.
pub fn fir_convolve(samples: &[i16], taps: &[i32]) -> i32 {
    let mut sum: i64 = 1 << 13;
    for (sample, tap) in samples.iter().zip(taps) {
        sum += i64::from(*sample) * i64::from(*tap >> 16);
    }
    (sum >> 14) as i32
}

/// Saturate to the signed 16-bit range.
pub fn clip(x: i32) -> i16 {
    x.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Halve the sample rate of `input[..*samples_in]` into `output`.
///
/// Returns the number of samples written. On return `*samples_in` holds the number of
/// samples carried over at the front of `input` (`OVERLAP_22KHZ` plus one if the input
/// count was odd). With fewer than 20 input samples nothing happens and 0 is returned.
pub fn resample_2_1(input: &mut [i16], output: &mut [i16], samples_in: &mut usize) -> usize {
    let available = *samples_in;
    if available < FILTER_22KHZ_COEFF.len() {
        return 0;
    }

    let odd = available & 1;
    let consumed = available - odd - OVERLAP_22KHZ;

    for i in (0..consumed).step_by(2) {
        output[i / 2] = clip(fir_convolve(&input[i..], &FILTER_22KHZ_COEFF));
    }

    let carry = OVERLAP_22KHZ + odd;
    input.copy_within(consumed..consumed + carry, 0);
    *samples_in = carry;
    consumed / 2
}

/// Convert `input[..*samples_in]` by 441:320 into `output`, whole 441-sample blocks only.
///
/// Each block is filtered, then linearly interpolated at a 16.16 fixed-point step of
/// `441/320`. Returns the number of samples written (`320` per block); `*samples_in` is
/// reduced by the samples consumed and the remainder moved to the front of `input`.
pub fn resample_441_320(input: &mut [i16], output: &mut [i16], samples_in: &mut usize) -> usize {
    let available = *samples_in;
    let blocks = available.saturating_sub(OVERLAP_16KHZ) / RESAMPLE_16KHZ_SAMPLES_IN;
    if blocks < 1 {
        return 0;
    }

    let step = interpolation_step();
    let mut filtered = [0i32; RESAMPLE_16KHZ_SAMPLES_IN];
    let mut out_pos = 0;

    for block in 0..blocks {
        let base = block * RESAMPLE_16KHZ_SAMPLES_IN;
        for (j, slot) in filtered.iter_mut().enumerate() {
            *slot = fir_convolve(&input[base + j..], &FILTER_16KHZ_COEFF);
        }

        let mut position: u32 = 0;
        for _ in 0..RESAMPLE_16KHZ_SAMPLES_OUT {
            let whole = (position >> 16) as usize;
            let frac = i64::from(position & 0xffff);
            let s1 = i64::from(filtered[whole]);
            let s2 = i64::from(filtered[whole + 1]);
            output[out_pos] = clip((s1 + (((s2 - s1) * frac) >> 16)) as i32);
            out_pos += 1;
            position += step;
        }
    }

    let consumed = blocks * RESAMPLE_16KHZ_SAMPLES_IN;
    input.copy_within(consumed..available, 0);
    *samples_in = available - consumed;
    out_pos
}

/// `441/320` in 16.16 fixed point, rounded.
fn interpolation_step() -> u32 {
    let ratio = RESAMPLE_16KHZ_SAMPLES_IN as f32 / RESAMPLE_16KHZ_SAMPLES_OUT as f32;
    (ratio * 65536.0 + 0.5) as u32
}
