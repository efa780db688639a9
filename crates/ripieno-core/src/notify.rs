//! Change notifications surfaced to the UI/session layer.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::context::ContextId;
use crate::graph::audio::AudioId;
use crate::graph::channel::Direction;
use crate::note::Note;
use crate::recall::template::TemplateId;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    AudioChannelsResized {
        audio: AudioId,
        old: usize,
        new: usize,
    },
    PadsResized {
        audio: AudioId,
        direction: Direction,
        old: usize,
        new: usize,
    },
    RecallDone {
        audio: AudioId,
        template: TemplateId,
        context: ContextId,
        /// Present when the instance was forced down by a failure
        /// (unresolved dependency, plugin load).
        diagnostic: Option<String>,
    },
    NoteFired {
        audio: AudioId,
        context: ContextId,
        pad: usize,
        note: Note,
    },
}

/// Fan-in side of the notification channel. Cheap to clone; send never
/// blocks.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<EngineEvent>,
}

impl Notifier {
    pub fn channel() -> (Notifier, Receiver<EngineEvent>) {
        let (tx, rx) = unbounded();
        (Notifier { tx }, rx)
    }

    pub fn send(&self, event: EngineEvent) {
        // Receiver dropped means nobody is listening; that is fine.
        let _ = self.tx.send(event);
    }
}
