//! Recyclings: per-channel sub-mix buses holding concurrent audio signals.

use crate::arena::{Arena, Id};
use crate::context::ContextId;
use crate::signal::AudioSignal;

pub type RecyclingId = Id<Recycling>;
pub type SignalId = Id<AudioSignal>;

/// Per-pass mix accumulation buffer. Stamped with the tic it was last
/// zeroed for, so any number of contributors can lazily zero-then-add.
struct MixBuffer {
    root: ContextId,
    tic: u64,
    data: Vec<f32>,
}

/// Owned by exactly one channel; holds the set of audio signals currently
/// sounding through it, each tagged with its producing context, plus the
/// template signal new notes are stamped from.
pub struct Recycling {
    pub template: AudioSignal,
    signals: Arena<AudioSignal>,
    /// Drained signal shells kept for reuse when signal reuse is enabled.
    pool: Vec<AudioSignal>,
    mixes: Vec<MixBuffer>,
}

impl Recycling {
    pub fn new(template: AudioSignal) -> Self {
        debug_assert!(template.is_template());
        Self {
            template,
            signals: Arena::new(),
            pool: Vec::new(),
            mixes: Vec::new(),
        }
    }

    /// Create a sounding signal for `context`, stamped from the template
    /// shape, reusing a pooled shell when `reuse` is set.
    pub fn add_note_signal(&mut self, context: ContextId, reuse: bool) -> SignalId {
        let signal = if reuse {
            match self.pool.pop() {
                Some(mut shell) => {
                    shell.reset_for_reuse(context);
                    shell.loop_start = self.template.loop_start;
                    shell.loop_end = self.template.loop_end;
                    shell.looping = self.template.looping;
                    shell
                }
                None => AudioSignal::from_template(&self.template, context),
            }
        } else {
            AudioSignal::from_template(&self.template, context)
        };
        self.signals.insert(signal)
    }

    pub fn signal(&self, id: SignalId) -> Option<&AudioSignal> {
        self.signals.get(id)
    }

    pub fn signal_mut(&mut self, id: SignalId) -> Option<&mut AudioSignal> {
        self.signals.get_mut(id)
    }

    pub fn signals(&self) -> impl Iterator<Item = (SignalId, &AudioSignal)> {
        self.signals.iter()
    }

    pub fn signals_mut(&mut self) -> impl Iterator<Item = (SignalId, &mut AudioSignal)> {
        self.signals.iter_mut()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn signal_ids_for(&self, context: ContextId) -> Vec<SignalId> {
        self.signals
            .iter()
            .filter(|(_, s)| s.context() == Some(context))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn has_signals_for(&self, context: ContextId) -> bool {
        self.signals.iter().any(|(_, s)| s.context() == Some(context))
    }

    pub fn remove_signal(&mut self, id: SignalId, reuse: bool) {
        if let Some(signal) = self.signals.remove(id) {
            if reuse {
                self.pool.push(signal);
            }
        }
    }

    /// Drop every signal tagged with `context`.
    pub fn remove_context_signals(&mut self, context: ContextId, reuse: bool) {
        let removed = self.signals.retain(|_, s| s.context() != Some(context));
        if reuse {
            self.pool.extend(removed);
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    /// Mix buffer for the given pass root, zeroed on first access per tic.
    pub fn mix_for(&mut self, root: ContextId, tic: u64, buffer_size: usize) -> &mut [f32] {
        let position = self.mixes.iter().position(|m| m.root == root);
        let index = match position {
            Some(index) => index,
            None => {
                self.mixes.push(MixBuffer {
                    root,
                    tic: 0,
                    data: vec![0.0; buffer_size],
                });
                self.mixes.len() - 1
            }
        };
        let buffer = &mut self.mixes[index];
        buffer.data.resize(buffer_size, 0.0);
        if buffer.tic != tic {
            buffer.data.fill(0.0);
            buffer.tic = tic;
        }
        &mut buffer.data
    }

    /// Read the pass mix only if it was produced during `tic`.
    pub fn mix_if_current(&self, root: ContextId, tic: u64) -> Option<&[f32]> {
        self.mixes
            .iter()
            .find(|m| m.root == root && m.tic == tic)
            .map(|m| m.data.as_slice())
    }

    /// Drop pass-scoped state when a playback pass ends.
    pub fn end_pass(&mut self, root: ContextId) {
        self.mixes.retain(|m| m.root != root);
    }
}
