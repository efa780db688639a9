//! Audios: containers of channels, recall templates, and playback state.

use crate::arena::{Arena, Id};
use crate::config::EngineConfig;
use crate::error::StructuralError;
use crate::graph::channel::{Channel, ChannelId, Direction};
use crate::graph::recycling::{Recycling, RecyclingId};
use crate::recall::template::TemplateRegistry;
use crate::recall::InstanceStore;
use crate::signal::AudioSignal;

/// Engine-level slot for one audio. `runtime` is `None` while the
/// subtree is checked out by an active scheduler; structural mutation of
/// a checked-out audio fails with `LockContention`.
pub struct AudioEntry {
    pub runtime: Option<AudioRuntime>,
}

pub type AudioId = Id<AudioEntry>;

/// Counters observable across threads after a pass ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    /// Tics processed over the lifetime of the audio.
    pub tics: u64,
    /// Tic index of every beat fired, in order.
    pub beats: Vec<u64>,
}

/// One audio's complete runtime: the channel grid, recyclings with their
/// sounding signals, the recall template list, and per-context recall
/// instances. Owned by the engine graph while idle and moved into the
/// scheduler for the duration of a playback pass.
pub struct AudioRuntime {
    pub id: AudioId,
    pub audio_channels: usize,
    pub channels: Arena<Channel>,
    pub recyclings: Arena<Recycling>,
    input_layout: Vec<ChannelId>,
    output_layout: Vec<ChannelId>,
    pub templates: TemplateRegistry,
    pub instances: InstanceStore,
    pub stats: PlaybackStats,
}

impl AudioRuntime {
    pub fn new(id: AudioId, config: &EngineConfig) -> Self {
        Self {
            id,
            audio_channels: config.audio_channels,
            channels: Arena::new(),
            recyclings: Arena::new(),
            input_layout: Vec::new(),
            output_layout: Vec::new(),
            templates: TemplateRegistry::new(),
            instances: InstanceStore::new(),
            stats: PlaybackStats::default(),
        }
    }

    pub fn pads(&self, direction: Direction) -> usize {
        let layout = self.layout(direction);
        if self.audio_channels == 0 {
            0
        } else {
            layout.len() / self.audio_channels
        }
    }

    fn layout(&self, direction: Direction) -> &Vec<ChannelId> {
        match direction {
            Direction::Input => &self.input_layout,
            Direction::Output => &self.output_layout,
        }
    }

    fn layout_mut(&mut self, direction: Direction) -> &mut Vec<ChannelId> {
        match direction {
            Direction::Input => &mut self.input_layout,
            Direction::Output => &mut self.output_layout,
        }
    }

    pub fn channel_at(
        &self,
        direction: Direction,
        pad: usize,
        audio_channel: usize,
    ) -> Option<ChannelId> {
        if audio_channel >= self.audio_channels {
            return None;
        }
        self.layout(direction)
            .get(pad * self.audio_channels + audio_channel)
            .copied()
    }

    pub fn channel_ids(&self, direction: Direction) -> &[ChannelId] {
        self.layout(direction)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    pub fn recycling_of(&self, channel: ChannelId) -> Option<&Recycling> {
        let recycling = self.channels.get(channel)?.recycling;
        self.recyclings.get(recycling)
    }

    pub fn recycling_of_mut(&mut self, channel: ChannelId) -> Option<&mut Recycling> {
        let recycling = self.channels.get(channel)?.recycling;
        self.recyclings.get_mut(recycling)
    }

    fn make_channel(
        &mut self,
        direction: Direction,
        pad: usize,
        audio_channel: usize,
        config: &EngineConfig,
    ) -> ChannelId {
        let template = AudioSignal::template(config.buffer_size, config.format, config.samplerate);
        let recycling: RecyclingId = self.recyclings.insert(Recycling::new(template));
        self.channels
            .insert(Channel::new(direction, pad, audio_channel, recycling))
    }

    fn remove_channel(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.remove(id) {
            self.recyclings.remove(channel.recycling);
        }
    }

    /// Grow or shrink the pad count of one direction. `old` must match the
    /// current count; shrinking below a channel a recall template is
    /// scoped to is rejected before any mutation.
    pub fn resize_pads(
        &mut self,
        direction: Direction,
        new: usize,
        old: usize,
        config: &EngineConfig,
    ) -> core::result::Result<(), StructuralError> {
        let current = self.pads(direction);
        if current != old {
            return Err(StructuralError::StaleResize {
                what: "pad",
                expected: old,
                found: current,
            });
        }
        if new < old {
            let doomed: Vec<ChannelId> =
                self.layout(direction)[new * self.audio_channels..].to_vec();
            if let Some(template) = self.templates.scope_referencing(&doomed) {
                return Err(StructuralError::ShrinkBelowRecallScope {
                    what: "pads",
                    template,
                });
            }
            for id in doomed {
                self.remove_channel(id);
            }
            let new_len = new * self.audio_channels;
            self.layout_mut(direction).truncate(new_len);
        } else {
            for pad in old..new {
                for audio_channel in 0..self.audio_channels {
                    let id = self.make_channel(direction, pad, audio_channel, config);
                    self.layout_mut(direction).push(id);
                }
            }
        }
        Ok(())
    }

    /// Grow or shrink the audio-channel count across both directions.
    pub fn resize_audio_channels(
        &mut self,
        new: usize,
        old: usize,
        config: &EngineConfig,
    ) -> core::result::Result<(), StructuralError> {
        if self.audio_channels != old {
            return Err(StructuralError::StaleResize {
                what: "audio channel",
                expected: old,
                found: self.audio_channels,
            });
        }
        if new == 0 {
            return Err(StructuralError::InvalidChannelCount(new));
        }
        if new < old {
            let mut doomed = Vec::new();
            for direction in [Direction::Input, Direction::Output] {
                let pads = self.pads(direction);
                for pad in 0..pads {
                    for audio_channel in new..old {
                        if let Some(id) = self.channel_at(direction, pad, audio_channel) {
                            doomed.push(id);
                        }
                    }
                }
            }
            if let Some(template) = self.templates.scope_referencing(&doomed) {
                return Err(StructuralError::ShrinkBelowRecallScope {
                    what: "audio channels",
                    template,
                });
            }
        }

        for direction in [Direction::Input, Direction::Output] {
            let pads = self.pads(direction);
            let old_layout = self.layout(direction).clone();
            let mut next = Vec::with_capacity(pads * new);
            for pad in 0..pads {
                for audio_channel in 0..new {
                    if audio_channel < old {
                        next.push(old_layout[pad * old + audio_channel]);
                    } else {
                        next.push(self.make_channel(direction, pad, audio_channel, config));
                    }
                }
                for audio_channel in new..old {
                    self.remove_channel(old_layout[pad * old + audio_channel]);
                }
            }
            *self.layout_mut(direction) = next;
        }
        self.audio_channels = new;
        Ok(())
    }

    /// Structural shape, for topology comparisons.
    pub fn topology(&self) -> AudioTopology {
        let describe = |layout: &Vec<ChannelId>| {
            layout
                .iter()
                .filter_map(|id| self.channels.get(*id))
                .map(|c| (c.pad, c.audio_channel))
                .collect()
        };
        AudioTopology {
            audio_channels: self.audio_channels,
            input: describe(&self.input_layout),
            output: describe(&self.output_layout),
            recyclings: self.recyclings.len(),
        }
    }
}

/// Comparable structural description of one audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTopology {
    pub audio_channels: usize,
    pub input: Vec<(usize, usize)>,
    pub output: Vec<(usize, usize)>,
    pub recyclings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> AudioRuntime {
        let mut arena: Arena<AudioEntry> = Arena::new();
        let id = arena.insert(AudioEntry { runtime: None });
        AudioRuntime::new(id, &EngineConfig::default())
    }

    #[test]
    fn test_channel_grid_addressing() {
        let config = EngineConfig::default();
        let mut audio = runtime();
        audio.resize_pads(Direction::Input, 3, 0, &config).unwrap();
        audio.resize_pads(Direction::Output, 1, 0, &config).unwrap();

        assert_eq!(audio.pads(Direction::Input), 3);
        assert_eq!(audio.channel_ids(Direction::Input).len(), 6);

        let id = audio.channel_at(Direction::Input, 2, 1).unwrap();
        let channel = audio.channel(id).unwrap();
        assert_eq!((channel.pad, channel.audio_channel), (2, 1));
        assert!(audio.channel_at(Direction::Input, 3, 0).is_none());
        assert!(audio.channel_at(Direction::Input, 0, 2).is_none());
    }

    #[test]
    fn test_stale_resize_rejected() {
        let config = EngineConfig::default();
        let mut audio = runtime();
        audio.resize_pads(Direction::Input, 2, 0, &config).unwrap();

        let err = audio.resize_pads(Direction::Input, 4, 3, &config).unwrap_err();
        assert!(matches!(err, StructuralError::StaleResize { .. }));
        assert_eq!(audio.pads(Direction::Input), 2);
    }

    #[test]
    fn test_channel_resize_round_trip_restores_topology() {
        let config = EngineConfig::default();
        let mut audio = runtime();
        audio.resize_pads(Direction::Input, 2, 0, &config).unwrap();
        audio.resize_pads(Direction::Output, 1, 0, &config).unwrap();

        let before = audio.topology();
        audio.resize_audio_channels(5, 2, &config).unwrap();
        assert_eq!(audio.pads(Direction::Input), 2);
        assert_eq!(audio.channel_ids(Direction::Input).len(), 10);
        audio.resize_audio_channels(2, 5, &config).unwrap();

        assert_eq!(audio.topology(), before);
    }
}
