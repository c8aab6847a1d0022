/// Index arithmetic for interleaved multi-channel buffers
pub struct ChannelMapper;

impl ChannelMapper {
    /// Position of `channel` in `frame` of an interleaved buffer
    pub fn slot(frame: usize, channels: usize, channel: usize) -> usize {
        frame * channels + channel
    }

    /// Number of whole frames in `samples` interleaved samples
    pub fn frames(samples: usize, channels: usize) -> usize {
        if channels == 0 {
            return 0;
        }
        samples / channels
    }

    /// Copy every sample of `channel` out of `interleaved` into `out`.
    /// Returns the number of samples extracted.
    pub fn deinterleave(interleaved: &[f32], channels: usize, channel: usize, out: &mut [f32]) -> usize {
        if channel >= channels {
            return 0;
        }
        let mut count = 0;
        for (dst, &src) in out
            .iter_mut()
            .zip(interleaved.iter().skip(channel).step_by(channels))
        {
            *dst = src;
            count += 1;
        }
        count
    }
}
