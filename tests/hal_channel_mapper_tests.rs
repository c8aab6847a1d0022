use audiomux::hal::format_converter::{mix_channel, pcm_to_float};
use audiomux::hal::ChannelMapper;

#[test]
fn test_deinterleave_each_channel() {
    let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    let mut out = vec![0.0; 3];

    assert_eq!(ChannelMapper::deinterleave(&interleaved, 3, 0, &mut out), 3);
    assert_eq!(out, vec![1.0, 4.0, 7.0]);

    assert_eq!(ChannelMapper::deinterleave(&interleaved, 3, 2, &mut out), 3);
    assert_eq!(out, vec![3.0, 6.0, 9.0]);
}

#[test]
fn test_deinterleave_out_of_range_channel() {
    let mut out = vec![0.0; 2];
    assert_eq!(ChannelMapper::deinterleave(&[1.0, 2.0, 3.0, 4.0], 2, 2, &mut out), 0);
}

#[test]
fn test_mix_then_split_stereo() {
    let mut mix = vec![0i16; 8];
    mix_channel(&mut mix, &[0.5, 0.5, 0.5, 0.5], 2, 1);
    assert_eq!(mix, vec![0, 16383, 0, 16383, 0, 16383, 0, 16383]);

    let mut floats = vec![0.0; 8];
    assert_eq!(pcm_to_float(&mix, &mut floats), 8);

    let mut right = vec![0.0; 4];
    ChannelMapper::deinterleave(&floats, 2, 1, &mut right);
    for sample in right {
        assert!((sample - 0.5).abs() < 1e-4);
    }
}

#[test]
fn test_frame_count_ignores_partial_frame() {
    assert_eq!(ChannelMapper::frames(7, 2), 3);
    assert_eq!(ChannelMapper::frames(7, 0), 0);
    assert_eq!(ChannelMapper::slot(3, 2, 1), 7);
}
