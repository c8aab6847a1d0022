//! Capture side: read whatever the device has and fan it out per channel.

use log::{error, trace, warn};

use super::device::AudioDevice;
use crate::hal::format_converter::pcm_to_float;
use crate::hal::ChannelMapper;

impl AudioDevice {
    /// Input readiness handler. Reads up to `buffer_fragments` whole
    /// fragments and hands channel `c` to every reading client on `c`.
    pub(super) fn read_input(&mut self) {
        let channels = self.defaults.channels;
        let (Some(handle), Some(buffers)) = (self.handle.as_mut(), self.buffers.as_mut()) else {
            return;
        };

        let space = match handle.input_space() {
            Ok(space) => space,
            Err(e) => {
                error!("Input space query on {} failed: {:#}", self.name, e);
                return;
            }
        };
        if space.fragments == 0 {
            return;
        }

        let fragments = space.fragments.min(self.defaults.buffer_fragments);
        let wanted = (fragments * space.fragment_bytes / 2).min(buffers.raw.len());
        let wanted = wanted - wanted % channels;

        let count = match handle.read(&mut buffers.raw[..wanted]) {
            Ok(count) => count,
            Err(e) => {
                error!("Read from {} failed: {:#}", self.name, e);
                return;
            }
        };
        let count = pcm_to_float(&buffers.raw[..count], &mut buffers.samples);
        let frames = ChannelMapper::frames(count, channels);
        trace!("{}: captured {} frames", self.name, frames);

        for channel in 0..channels {
            let extracted = ChannelMapper::deinterleave(
                &buffers.samples[..frames * channels],
                channels,
                channel,
                &mut buffers.channel[..frames],
            );
            let samples = &buffers.channel[..extracted];

            for entry in &self.clients {
                let Some(client) = entry.client.upgrade() else {
                    continue;
                };
                let mut client = client.borrow_mut();
                if !client.mode().reads() || client.channel() != channel {
                    continue;
                }
                let accepted = client.push_samples(samples);
                if accepted < samples.len() {
                    warn!(
                        "{} dropped {} captured samples from {}",
                        entry.id,
                        samples.len() - accepted,
                        self.name
                    );
                }
            }
        }
    }
}
