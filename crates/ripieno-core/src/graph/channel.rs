//! Channels: the input/output slots of an audio.

use serde::{Deserialize, Serialize};

use crate::arena::Id;
use crate::graph::audio::AudioId;
use crate::graph::recycling::RecyclingId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

pub type ChannelId = Id<Channel>;

/// Fully-qualified channel address, usable across audios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub audio: AudioId,
    pub channel: ChannelId,
}

/// One input/output slot of an audio, unique per
/// (direction, pad, audio-channel) triple. Owns exactly one recycling and
/// may be linked to one peer channel of the opposite direction.
pub struct Channel {
    pub direction: Direction,
    pub pad: usize,
    pub audio_channel: usize,
    pub recycling: RecyclingId,
    pub link: Option<ChannelRef>,
}

impl Channel {
    pub fn new(
        direction: Direction,
        pad: usize,
        audio_channel: usize,
        recycling: RecyclingId,
    ) -> Self {
        Self {
            direction,
            pad,
            audio_channel,
            recycling,
            link: None,
        }
    }
}
