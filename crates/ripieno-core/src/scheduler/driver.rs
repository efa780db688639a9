//! Playback driver: steps one strand of audios through tics.
//!
//! The driver owns the checked-out runtimes of one link-connected strand
//! plus the context tree of its playback passes. Each tic runs the three
//! phases (pre, run, post) over every live recall instance in kind-rank
//! order, audios upstream-first, then sweeps settled instances and empty
//! note contexts. The driver itself is single-threaded; the tic pump
//! decides whether one thread steps all strands or each strand gets its
//! own worker.

use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF64;

use crate::config::EngineConfig;
use crate::context::{ContextId, ContextTree, SoundScope};
use crate::error::Error;
use crate::graph::{AudioId, Strand};
use crate::notify::{EngineEvent, Notifier};
use crate::recall::template::TemplateKind;
use crate::recall::{InstanceKey, Phase, ProcessCx, RecallState, PHASES};
use crate::scheduler::fsm::{PlaybackEvent, PlaybackFsm, PlaybackState};
use crate::scheduler::tic::TicState;

/// Cross-thread view of a driver's progress, published once per tic.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub state: u8,
    pub tic: u64,
    pub beats: u64,
    pub passes: usize,
}

impl PlaybackSnapshot {
    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state)
    }
}

struct PassState {
    root: ContextId,
    tic: TicState,
}

pub struct Driver {
    config: EngineConfig,
    notifier: Notifier,
    bpm: Arc<AtomicF64>,
    strand: Strand,
    contexts: ContextTree,
    passes: Vec<PassState>,
    tic_count: u64,
    fsm: PlaybackFsm,
    snapshot: Arc<ArcSwap<PlaybackSnapshot>>,
    frame: Vec<f32>,
}

impl Driver {
    pub fn new(
        strand: Strand,
        config: EngineConfig,
        notifier: Notifier,
        bpm: Arc<AtomicF64>,
    ) -> Self {
        Self {
            config,
            notifier,
            bpm,
            strand,
            contexts: ContextTree::new(),
            passes: Vec::new(),
            tic_count: 0,
            fsm: PlaybackFsm::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(PlaybackSnapshot::default())),
            frame: Vec::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.fsm.state()
    }

    pub fn snapshot_handle(&self) -> Arc<ArcSwap<PlaybackSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub fn contexts(&self) -> &ContextTree {
        &self.contexts
    }

    pub fn audio_ids(&self) -> Vec<AudioId> {
        self.strand.ids()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Start a playback pass: create its root context and duplicate the
    /// audio-scope templates the pass scope activates.
    pub fn begin_pass(&mut self, sound_scope: SoundScope) -> ContextId {
        self.fsm.transition(PlaybackEvent::Start);
        let root = self.contexts.new_root(sound_scope);

        for (_, runtime) in self.strand.iter_mut() {
            for template_id in runtime.templates.audio_scope() {
                let Some(template) = runtime.templates.get(template_id) else {
                    continue;
                };
                let activates = match &template.kind {
                    TemplateKind::Pattern(_) => sound_scope == SoundScope::Sequencer,
                    TemplateKind::Notation(_) => sound_scope == SoundScope::Notation,
                    _ => true,
                };
                if activates {
                    runtime
                        .instances
                        .duplicate(template, root, &self.contexts, &self.config, &self.bpm);
                }
            }
        }

        self.passes.push(PassState {
            root,
            tic: TicState::default(),
        });
        self.fsm.transition(PlaybackEvent::Ready);
        root
    }

    /// Process one tic: three phases over every pass and audio, then the
    /// settled-instance sweep. Returns the interleaved master frame.
    ///
    /// Single-strand convenience; the tic pump drives
    /// [`Driver::begin_tic`] / [`Driver::run_phase`] / [`Driver::end_tic`]
    /// directly so the phase barrier spans every strand.
    pub fn run_tic(&mut self) -> &[f32] {
        self.begin_tic();
        for phase in PHASES {
            self.run_phase(phase);
        }
        self.end_tic()
    }

    pub fn begin_tic(&mut self) {
        let frame_len = self.config.buffer_size * self.config.audio_channels;
        self.frame.clear();
        self.frame.resize(frame_len, 0.0);
        if self.fsm.state() != PlaybackState::Running {
            return;
        }
        self.tic_count += 1;
        for pass in &mut self.passes {
            pass.tic.tic = self.tic_count;
            pass.tic.beat = None;
        }
        for (_, runtime) in self.strand.iter_mut() {
            runtime.stats.tics += 1;
        }
    }

    pub fn end_tic(&mut self) -> &[f32] {
        if self.fsm.state() == PlaybackState::Running {
            self.sweep();
            self.publish_snapshot();
        }
        &self.frame
    }

    pub fn run_phase(&mut self, phase: Phase) {
        if self.fsm.state() != PlaybackState::Running {
            return;
        }
        for pass_index in 0..self.passes.len() {
            let root = self.passes[pass_index].root;
            for audio_id in self.strand.ids() {
                let keys: Vec<InstanceKey> = match self.strand.get(audio_id) {
                    Some(runtime) => runtime.instances.ordered(&runtime.templates, root),
                    None => continue,
                };
                for key in keys {
                    self.dispatch(phase, pass_index, audio_id, key);
                }
            }
        }
    }

    fn dispatch(&mut self, phase: Phase, pass_index: usize, audio_id: AudioId, key: InstanceKey) {
        let (scope, context, root, mut processor) = {
            let Some(runtime) = self.strand.get_mut(audio_id) else {
                return;
            };
            let Some(instance) = runtime.instances.get_mut(key) else {
                return;
            };
            if !instance.state.is_live() {
                return;
            }
            if instance.state == RecallState::Init {
                // Resolution must complete before Running; an edge still
                // dangling at first run fails the instance, not the tic.
                if let Some(kind) = instance.unresolved_dep() {
                    let error = Error::DependencyUnresolved { kind };
                    tracing::warn!(?key, %error, "forcing recall to Done");
                    instance.diagnostic = Some(error.to_string());
                    instance.state = RecallState::Done;
                    return;
                }
                instance.state = RecallState::Running;
            }
            let Some(processor) = instance.take_processor() else {
                return;
            };
            (instance.scope, instance.context, instance.root, processor)
        };

        let sound_scope = self
            .contexts
            .get(root)
            .map(|c| c.sound_scope)
            .unwrap_or(SoundScope::Sequencer);

        let mut cx = ProcessCx {
            audio: audio_id,
            key,
            scope,
            context,
            root,
            sound_scope,
            strand: &mut self.strand,
            contexts: &mut self.contexts,
            tic: &mut self.passes[pass_index].tic,
            tic_index: self.tic_count,
            config: &self.config,
            notifier: &self.notifier,
            sink_frame: &mut self.frame,
            bpm: &self.bpm,
        };
        let result = match phase {
            Phase::Pre => processor.pre(&mut cx),
            Phase::Run => processor.run(&mut cx),
            Phase::Post => processor.post(&mut cx),
        };
        let finished = processor.finished();

        if let Some(runtime) = self.strand.get_mut(audio_id) {
            if let Some(instance) = runtime.instances.get_mut(key) {
                instance.put_processor(processor);
                if let Err(error) = result {
                    tracing::warn!(?key, %error, "recall failed; forcing Done");
                    instance.diagnostic = Some(error.to_string());
                    instance.state = RecallState::Done;
                } else if finished && phase == Phase::Post {
                    instance.state = RecallState::Done;
                }
            }
        }
    }

    /// Detach Done/Cancelled instances (emitting `recall-done`) and tear
    /// down note contexts that neither a live instance nor a sounding
    /// signal references any more.
    fn sweep(&mut self) {
        for audio_id in self.strand.ids() {
            let Some(runtime) = self.strand.get_mut(audio_id) else {
                continue;
            };
            for key in runtime.instances.settled() {
                if let Some(mut instance) = runtime.instances.remove(key) {
                    instance.state = RecallState::Removed;
                    self.notifier.send(EngineEvent::RecallDone {
                        audio: audio_id,
                        template: key.0,
                        context: key.1,
                        diagnostic: instance.diagnostic.clone(),
                    });
                }
            }
        }

        loop {
            let mut removed_any = false;
            for context in self.contexts.ids() {
                let is_note_leaf = self
                    .contexts
                    .get(context)
                    .map(|c| c.parent.is_some() && c.children.is_empty())
                    .unwrap_or(false);
                if !is_note_leaf {
                    continue;
                }
                let referenced = self.strand.iter().any(|(_, runtime)| {
                    runtime.instances.live_for_context(context)
                        || runtime
                            .recyclings
                            .iter()
                            .any(|(_, r)| r.has_signals_for(context))
                });
                if !referenced && self.contexts.remove_leaf(context) {
                    removed_any = true;
                }
            }
            if !removed_any {
                break;
            }
        }
    }

    fn publish_snapshot(&self) {
        let beats = self
            .strand
            .iter()
            .map(|(_, runtime)| runtime.stats.beats.len() as u64)
            .sum();
        self.snapshot.store(Arc::new(PlaybackSnapshot {
            state: self.fsm.state().to_u8(),
            tic: self.tic_count,
            beats,
            passes: self.passes.len(),
        }));
    }

    /// Stop playback: cancellation propagates top-down through every
    /// pass; instances transition directly to Cancelled, skipping Done.
    pub fn stop(&mut self) {
        self.fsm.transition(PlaybackEvent::Stop);

        let roots: Vec<ContextId> = self.passes.iter().map(|p| p.root).collect();
        for root in &roots {
            self.contexts.cancel_subtree(*root);
            for (_, runtime) in self.strand.iter_mut() {
                runtime.instances.cancel_root(*root);
            }
        }
        // Emit recall-done for the cancelled instances.
        self.sweep();
        for root in &roots {
            for (_, runtime) in self.strand.iter_mut() {
                let contexts = &self.contexts;
                let reuse = self.config.reuse_signals;
                for (_, recycling) in runtime.recyclings.iter_mut() {
                    for context in contexts.ids() {
                        if contexts.is_cancelled(context) {
                            recycling.remove_context_signals(context, reuse);
                        }
                    }
                    recycling.end_pass(*root);
                }
            }
            self.contexts.remove_subtree(*root);
        }
        self.passes.clear();

        self.fsm.transition(PlaybackEvent::Drained);
        self.publish_snapshot();
    }

    /// Hand the runtimes back to the engine graph.
    pub fn into_strand(self) -> Strand {
        self.strand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use atomic_float::AtomicF64;
    use crossbeam_channel::Receiver;

    use crate::arena::Arena;
    use crate::config::EngineConfig;
    use crate::graph::{AudioEntry, AudioRuntime, ChannelRef, Direction};
    use crate::note::{Note, Waveform};
    use crate::recall::template::{PatternData, ScopeRef, TemplateKind};
    use crate::scheduler::tic::tics_per_beat;

    fn machine_runtime(
        config: &EngineConfig,
        arena: &mut Arena<AudioEntry>,
        active_steps: &[usize],
        master: bool,
    ) -> (crate::graph::AudioId, AudioRuntime) {
        let id = arena.insert(AudioEntry { runtime: None });
        let mut runtime = AudioRuntime::new(id, config);
        runtime.resize_pads(Direction::Input, 1, 0, config).unwrap();
        runtime.resize_pads(Direction::Output, 1, 0, config).unwrap();
        runtime
            .templates
            .register(TemplateKind::Counter, ScopeRef::Audio(id), Vec::new())
            .unwrap();
        if !active_steps.is_empty() {
            let note = Note::new(440.0, 1500).with_waveform(Waveform::Square);
            runtime
                .templates
                .register(
                    TemplateKind::Pattern(PatternData::new(16).with_row(0, active_steps, note)),
                    ScopeRef::Audio(id),
                    Vec::new(),
                )
                .unwrap();
        }
        for audio_channel in 0..config.audio_channels {
            let channel = runtime
                .channel_at(Direction::Input, 0, audio_channel)
                .unwrap();
            runtime
                .templates
                .register(
                    TemplateKind::Stream,
                    ScopeRef::Recycling(ChannelRef { audio: id, channel }),
                    Vec::new(),
                )
                .unwrap();
        }
        runtime
            .templates
            .register(
                TemplateKind::Output { master },
                ScopeRef::Audio(id),
                Vec::new(),
            )
            .unwrap();
        (id, runtime)
    }

    fn drum_driver(active_steps: &[usize]) -> (Driver, crate::graph::AudioId, Receiver<EngineEvent>) {
        let config = EngineConfig::default();
        let mut arena = Arena::new();
        let (id, runtime) = machine_runtime(&config, &mut arena, active_steps, true);
        let (notifier, events) = Notifier::channel();
        let driver = Driver::new(
            Strand::new(vec![(id, runtime)]),
            config,
            notifier,
            Arc::new(AtomicF64::new(120.0)),
        );
        (driver, id, events)
    }

    fn input_signal_count(driver: &Driver, audio: crate::graph::AudioId) -> usize {
        let runtime = driver.strand().get(audio).unwrap();
        (0..runtime.audio_channels)
            .filter_map(|c| runtime.channel_at(Direction::Input, 0, c))
            .filter_map(|ch| runtime.recycling_of(ch))
            .map(|r| r.signal_count())
            .sum()
    }

    #[test]
    fn test_pattern_step_fires_once_per_cycle() {
        // Scenario: 16-step pattern, step 3 active. Over the first 16
        // beats exactly one note fires, on the tic of beat 3, and the
        // following tic creates no duplicate signal.
        let (mut driver, audio, events) = drum_driver(&[3]);
        driver.begin_pass(SoundScope::Sequencer);

        let delay = tics_per_beat(44100, 1024, 120.0);
        let tics = (delay * 16.0).ceil() as usize;
        let mut fire_tic = None;
        let mut count_at_fire = 0;
        let mut count_next = usize::MAX;
        for tic in 1..=tics {
            driver.run_tic();
            let count = input_signal_count(&driver, audio);
            if fire_tic.is_none() && count > 0 {
                fire_tic = Some(tic);
                count_at_fire = count;
            } else if fire_tic.map(|f| f + 1) == Some(tic) {
                count_next = count;
            }
        }

        let fired: Vec<EngineEvent> = events.try_iter().collect();
        let notes: Vec<&EngineEvent> = fired
            .iter()
            .filter(|e| matches!(e, EngineEvent::NoteFired { .. }))
            .collect();
        assert_eq!(notes.len(), 1, "step 3 fires exactly once in 16 beats");

        // Beat 3 lands on the tic after the accumulator crossed 4*delay.
        let expected = (delay * 4.0).ceil() as usize + 1;
        let fire_tic = fire_tic.expect("a signal appeared");
        assert!(
            fire_tic.abs_diff(expected) <= 1,
            "fired at tic {fire_tic}, expected about {expected}"
        );
        assert_eq!(count_at_fire, 2, "one signal per audio channel");
        assert!(count_next <= count_at_fire, "no duplicate on the next tic");
    }

    #[test]
    fn test_note_placed_at_attack_offset_in_master_frame() {
        let (mut driver, _audio, _events) = drum_driver(&[0]);
        driver.begin_pass(SoundScope::Sequencer);

        // Beat 0 crosses on tic 22 at 120 bpm / 44100 / 1024; the square
        // note must start exactly at the beat boundary inside the frame.
        let delay = tics_per_beat(44100, 1024, 120.0);
        let fire_tic = delay as usize + 1;
        let mut frame = Vec::new();
        for _ in 0..fire_tic {
            frame = driver.run_tic().to_vec();
        }
        let overshoot = fire_tic as f64 - delay;
        let attack = ((1.0 - overshoot) * 1024.0) as usize;

        let channels = 2;
        for i in 0..attack {
            assert_eq!(frame[i * channels], 0.0, "silence before the attack offset");
        }
        assert!(
            (frame[attack * channels] - 1.0).abs() < 1e-6,
            "square wave starts at the attack offset"
        );
    }

    #[test]
    fn test_drained_note_tears_down_instances_and_context() {
        let (mut driver, audio, events) = drum_driver(&[0]);
        driver.begin_pass(SoundScope::Sequencer);

        // Fire the first beat, then run long enough for the 1500-sample
        // note (two nodes) to drain.
        for _ in 0..30 {
            driver.run_tic();
        }
        assert_eq!(input_signal_count(&driver, audio), 0, "note drained");

        let done: Vec<EngineEvent> = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::RecallDone { diagnostic: None, .. }))
            .collect();
        assert_eq!(done.len(), 2, "both stream recalls reached Done");

        // Root context remains, note context is gone.
        assert_eq!(driver.contexts().len(), 1);
    }

    #[test]
    fn test_unresolved_dependency_forces_done_with_diagnostic() {
        let config = EngineConfig::default();
        let mut arena = Arena::new();
        let id = arena.insert(AudioEntry { runtime: None });
        let mut runtime = AudioRuntime::new(id, &config);
        runtime.resize_pads(Direction::Input, 1, 0, &config).unwrap();

        // Counter template exists, but at channel scope: begin_pass only
        // duplicates audio-scope templates, so the pattern's dependency
        // never resolves to an instance.
        let channel = runtime.channel_at(Direction::Input, 0, 0).unwrap();
        runtime
            .templates
            .register(
                TemplateKind::Counter,
                ScopeRef::Channel(ChannelRef { audio: id, channel }),
                Vec::new(),
            )
            .unwrap();
        runtime
            .templates
            .register(
                TemplateKind::Pattern(PatternData::new(4)),
                ScopeRef::Audio(id),
                Vec::new(),
            )
            .unwrap();

        let (notifier, events) = Notifier::channel();
        let mut driver = Driver::new(
            Strand::new(vec![(id, runtime)]),
            config,
            notifier,
            Arc::new(AtomicF64::new(120.0)),
        );
        driver.begin_pass(SoundScope::Sequencer);
        driver.run_tic();

        let done: Vec<EngineEvent> = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::RecallDone { .. }))
            .collect();
        assert_eq!(done.len(), 1);
        match &done[0] {
            EngineEvent::RecallDone { diagnostic, .. } => {
                let diagnostic = diagnostic.as_ref().expect("diagnostic attached");
                assert!(diagnostic.contains("unresolved"), "got: {diagnostic}");
            }
            _ => unreachable!(),
        }

        // Unrelated recalls keep running in the same tic.
        for _ in 0..30 {
            driver.run_tic();
        }
        assert!(driver.state() == PlaybackState::Running);
    }

    #[test]
    fn test_stop_cancels_top_down_and_returns_strand() {
        let (mut driver, audio, events) = drum_driver(&[0]);
        driver.begin_pass(SoundScope::Sequencer);
        for _ in 0..23 {
            driver.run_tic();
        }
        assert!(input_signal_count(&driver, audio) > 0, "note is sounding");

        driver.stop();
        assert_eq!(driver.state(), PlaybackState::Stopped);
        assert_eq!(input_signal_count(&driver, audio), 0, "signals released");
        assert!(driver.contexts().is_empty(), "context tree torn down");

        let cancelled = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::RecallDone { .. }))
            .count();
        assert!(cancelled >= 4, "counter, pattern, streams, output settled");

        let strand = driver.into_strand();
        let runtime = strand.get(audio).unwrap();
        assert!(runtime.instances.is_empty());
        assert!(runtime.stats.tics >= 23);
    }

    #[test]
    fn test_linked_strand_feeds_master_through_mixer() {
        let config = EngineConfig::default();
        let mut arena = Arena::new();
        let (drum_id, mut drum) = machine_runtime(&config, &mut arena, &[0], false);
        let (mixer_id, mut mixer) = machine_runtime(&config, &mut arena, &[], true);

        // drum output (pad 0) -> mixer input (pad 0), per audio channel.
        for audio_channel in 0..config.audio_channels {
            let from = drum
                .channel_at(Direction::Output, 0, audio_channel)
                .unwrap();
            let to = mixer
                .channel_at(Direction::Input, 0, audio_channel)
                .unwrap();
            drum.channel_mut(from).unwrap().link = Some(ChannelRef {
                audio: mixer_id,
                channel: to,
            });
            mixer.channel_mut(to).unwrap().link = Some(ChannelRef {
                audio: drum_id,
                channel: from,
            });
        }

        let (notifier, _events) = Notifier::channel();
        let mut driver = Driver::new(
            Strand::new(vec![(drum_id, drum), (mixer_id, mixer)]),
            config,
            notifier,
            Arc::new(AtomicF64::new(120.0)),
        );
        driver.begin_pass(SoundScope::Sequencer);

        let mut heard = false;
        for _ in 0..30 {
            let frame = driver.run_tic();
            if frame.iter().any(|s| s.abs() > 1e-6) {
                heard = true;
                break;
            }
        }
        assert!(heard, "drum note reached the sink through the mixer link");
    }
}
