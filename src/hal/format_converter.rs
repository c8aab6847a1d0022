//! Conversion between signed 16-bit device samples and normalized floats.

use super::channel_mapper::ChannelMapper;

/// Divisor used when normalizing captured samples
pub const CAPTURE_SCALE: f32 = 32768.0;

/// Multiplier used when converting playback samples
pub const PLAYBACK_SCALE: f32 = 32767.0;

/// Saturation bound for mixed output (symmetric, so -32768 is never produced)
pub const PCM_LIMIT: i16 = 32767;

/// Normalize raw samples into `out`, returning how many were converted
pub fn pcm_to_float(raw: &[i16], out: &mut [f32]) -> usize {
    let count = raw.len().min(out.len());
    for (dst, &src) in out[..count].iter_mut().zip(&raw[..count]) {
        *dst = src as f32 / CAPTURE_SCALE;
    }
    count
}

/// Add `sample` (nominally in [-1, 1]) onto an already mixed value,
/// clamping the sum to ±`PCM_LIMIT`. Inputs are not clamped before summing.
pub fn mix_sample(acc: i16, sample: f32) -> i16 {
    let sum = PLAYBACK_SCALE * sample + acc as f32;
    if sum > PCM_LIMIT as f32 {
        PCM_LIMIT
    } else if sum < -(PCM_LIMIT as f32) {
        -PCM_LIMIT
    } else {
        sum as i16
    }
}

/// Accumulate a mono stream into one channel of an interleaved mix buffer.
/// Frames that do not fit in `mix` are ignored.
pub fn mix_channel(mix: &mut [i16], src: &[f32], channels: usize, channel: usize) {
    for (frame, &sample) in src.iter().enumerate() {
        let slot = ChannelMapper::slot(frame, channels, channel);
        match mix.get_mut(slot) {
            Some(acc) => *acc = mix_sample(*acc, sample),
            None => break,
        }
    }
}
