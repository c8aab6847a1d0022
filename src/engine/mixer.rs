//! Playback side: mix every producing client into one interleaved stream.
//!
//! Each pass writes whole fragments only, unless every producer asked for a
//! flush and all their queued audio fits, in which case the short tail is
//! written padded with silence. A producer that is not flushing limits the
//! pass to what it has queued, so no producer falls behind the others.

use log::{error, trace, warn};

use super::device::AudioDevice;
use crate::client::SharedClient;
use crate::hal::format_converter::mix_channel;

impl AudioDevice {
    fn producers(&self) -> Vec<SharedClient> {
        let channels = self.defaults.channels;
        self.clients
            .iter()
            .filter_map(|entry| entry.client.upgrade())
            .filter(|client| {
                let client = client.borrow();
                if !client.mode().writes() {
                    return false;
                }
                if client.channel() >= channels {
                    warn!(
                        "Skipping producer on channel {} of {}-channel {}",
                        client.channel(),
                        channels,
                        self.name
                    );
                    return false;
                }
                true
            })
            .collect()
    }

    /// Output readiness handler
    pub(super) fn write_output(&mut self) {
        let producers = self.producers();
        let channels = self.defaults.channels;
        let prebuffer = self.defaults.prebuffer_fragments;

        let (Some(handle), Some(buffers)) = (self.handle.as_mut(), self.buffers.as_mut()) else {
            return;
        };
        let capacity = buffers.frames;

        loop {
            let space = match handle.output_space() {
                Ok(space) => space,
                Err(e) => {
                    error!("Output space query on {} failed: {:#}", self.name, e);
                    return;
                }
            };
            let fragsize = space.fragment_frames(channels);
            if fragsize == 0 {
                error!("{} reported an empty output fragment", self.name);
                return;
            }
            let free = space.fragments * fragsize;
            let mut frames = capacity.min(free);
            if frames == 0 {
                // Device full; wait for the next writable edge
                break;
            }

            let mut do_flush = true;
            let mut max_avail = 0;
            for producer in &producers {
                let producer = producer.borrow();
                let avail = producer.frames_available();
                max_avail = max_avail.max(avail);
                if !producer.flush_requested() {
                    do_flush = false;
                    frames = frames.min(avail);
                }
            }
            do_flush &= max_avail <= frames;
            frames = frames.min(max_avail);

            if !do_flush {
                frames -= frames % fragsize;

                if self.prebuf && frames < prebuffer * fragsize {
                    if space.fragments < prebuffer {
                        break;
                    }
                    if let Some(watch) = self.write_watch.as_mut() {
                        watch.set_enabled(false);
                    }
                    return;
                }
            }
            self.prebuf = do_flush;

            if frames == 0 {
                if let Some(watch) = self.write_watch.as_mut() {
                    watch.set_enabled(false);
                }
                return;
            }

            let padded = if do_flush && frames % fragsize != 0 {
                (frames / fragsize + 1) * fragsize
            } else {
                frames
            }
            .min(capacity);
            // Capacity is a whole number of the fragments negotiated at open
            debug_assert_eq!(padded % fragsize, 0, "unaligned write on {}", self.name);

            let mix = &mut buffers.mix[..padded * channels];
            mix.fill(0);
            for producer in &producers {
                let mut producer = producer.borrow_mut();
                let channel = producer.channel();
                let pulled = producer.pull_samples(&mut buffers.pull[..frames]);
                mix_channel(
                    &mut mix[..frames * channels],
                    &buffers.pull[..pulled],
                    channels,
                    channel,
                );
            }

            trace!("{}: writing {} frames ({} mixed)", self.name, padded, frames);
            let samples = &buffers.mix[..padded * channels];
            match handle.write(samples) {
                Ok(written) if written == samples.len() => {}
                Ok(written) => {
                    error!(
                        "Short write to {}: {} of {} samples",
                        self.name,
                        written,
                        samples.len()
                    );
                    return;
                }
                Err(e) => {
                    error!("Write to {} failed: {:#}", self.name, e);
                    return;
                }
            }

            if padded != free {
                break;
            }
        }

        self.audio_to_write_available();
    }
}
