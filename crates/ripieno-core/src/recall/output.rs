//! Output recall: folds channel mixes into the output stage and copies
//! the master mix to the soundcard sink.

use crate::error::Result;
use crate::graph::channel::{ChannelRef, Direction};
use crate::recall::{ProcessCx, RecallProcessor};

struct InputTap {
    pad: usize,
    audio_channel: usize,
    data: Vec<f32>,
}

/// Audio-scope recall running in the post phase, after every stream and
/// native recall of the tic. Gathers the input-stage mixes (own
/// recyclings, or the linked upstream audio's output recyclings), folds
/// them into this audio's output channel mixes, and, for the master
/// output, sums the result into the interleaved sink frame.
pub struct OutputProcessor {
    master: bool,
}

impl OutputProcessor {
    pub fn new(master: bool) -> Self {
        Self { master }
    }
}

impl RecallProcessor for OutputProcessor {
    fn post(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let audio_id = cx.audio;
        let root = cx.root;
        let tic = cx.tic_index;
        let buffer_size = cx.config.buffer_size;

        let mut taps: Vec<InputTap> = Vec::new();
        let (in_pads, out_pads, channels);
        {
            let Some(runtime) = cx.strand.get(audio_id) else {
                return Ok(());
            };
            in_pads = runtime.pads(Direction::Input);
            out_pads = runtime.pads(Direction::Output);
            channels = runtime.audio_channels;

            let mut links: Vec<(usize, usize, ChannelRef)> = Vec::new();
            for pad in 0..in_pads {
                for audio_channel in 0..channels {
                    let Some(id) = runtime.channel_at(Direction::Input, pad, audio_channel)
                    else {
                        continue;
                    };
                    match runtime.channel(id).and_then(|c| c.link) {
                        Some(peer) => links.push((pad, audio_channel, peer)),
                        None => {
                            if let Some(mix) = runtime
                                .recycling_of(id)
                                .and_then(|r| r.mix_if_current(root, tic))
                            {
                                taps.push(InputTap {
                                    pad,
                                    audio_channel,
                                    data: mix.to_vec(),
                                });
                            }
                        }
                    }
                }
            }

            // Linked inputs see the upstream audio's output recycling.
            // Strand order puts the upstream audio earlier in this same
            // post phase, so its fold is already complete.
            for (pad, audio_channel, peer) in links {
                if let Some(mix) = cx
                    .strand
                    .get(peer.audio)
                    .and_then(|rt| rt.recycling_of(peer.channel))
                    .and_then(|r| r.mix_if_current(root, tic))
                {
                    taps.push(InputTap {
                        pad,
                        audio_channel,
                        data: mix.to_vec(),
                    });
                }
            }
        }

        if out_pads == 0 || channels == 0 || taps.is_empty() {
            return Ok(());
        }

        // Fold input pads onto output pads; surplus input lines collapse
        // modulo the output pad count.
        let mut folded = vec![vec![0.0f32; buffer_size]; out_pads * channels];
        for tap in &taps {
            let out_pad = tap.pad % out_pads;
            let acc = &mut folded[out_pad * channels + tap.audio_channel];
            for (a, s) in acc.iter_mut().zip(tap.data.iter()) {
                *a += *s;
            }
        }

        {
            let Some(runtime) = cx.strand.get_mut(audio_id) else {
                return Ok(());
            };
            for pad in 0..out_pads {
                for audio_channel in 0..channels {
                    let Some(id) = runtime.channel_at(Direction::Output, pad, audio_channel)
                    else {
                        continue;
                    };
                    if let Some(recycling) = runtime.recycling_of_mut(id) {
                        let mix = recycling.mix_for(root, tic, buffer_size);
                        let src = &folded[pad * channels + audio_channel];
                        for (m, s) in mix.iter_mut().zip(src.iter()) {
                            *m += *s;
                        }
                    }
                }
            }
        }

        if self.master {
            let sink_channels = cx.config.audio_channels;
            let frame_len = buffer_size * sink_channels;
            if cx.sink_frame.len() < frame_len {
                cx.sink_frame.resize(frame_len, 0.0);
            }
            for pad in 0..out_pads {
                for audio_channel in 0..channels.min(sink_channels) {
                    let src = &folded[pad * channels + audio_channel];
                    for (i, s) in src.iter().enumerate() {
                        cx.sink_frame[i * sink_channels + audio_channel] += *s;
                    }
                }
            }
        }
        Ok(())
    }
}
