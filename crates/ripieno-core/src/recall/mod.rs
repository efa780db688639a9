//! Recalls: processing units duplicated per playback context.
//!
//! A recall exists in two forms. The *template* (see [`template`]) is an
//! immutable descriptor bound to a scope. The *instance* is the
//! per-(template, context) duplicate owning every mutable runtime field.
//! Duplication copies the static configuration, zeroes runtime state, and
//! resolves declared dependencies against sibling instances by walking
//! ancestor contexts.

pub mod counter;
pub mod notation;
pub mod output;
pub mod pattern;
pub mod stream;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;

use atomic_float::AtomicF64;

use crate::config::EngineConfig;
use crate::context::{ContextId, ContextTree, SoundScope};
use crate::error::Result;
use crate::graph::audio::AudioId;
use crate::graph::Strand;
use crate::notify::Notifier;
use crate::scheduler::tic::TicState;
pub use template::{
    DependencyDescriptor, KindTag, RecallTemplate, ScopeRef, TemplateId, TemplateKind,
    TemplateRegistry,
};

/// Instance lifecycle. Init until the first successful pre phase, then
/// Running until Done (natural completion or forced by a local failure)
/// or Cancelled (stop). Removed is terminal; the sweep detaches the
/// instance right after entering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallState {
    Init,
    Running,
    Done,
    Cancelled,
    Removed,
}

impl RecallState {
    pub fn is_live(&self) -> bool {
        matches!(self, RecallState::Init | RecallState::Running)
    }
}

pub type InstanceKey = (TemplateId, ContextId);

/// A declared dependency resolved (or not) to a concrete sibling
/// instance.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub descriptor: DependencyDescriptor,
    pub target: Option<InstanceKey>,
}

/// Per-tic phase context handed to recall processors. The processor is
/// detached from its instance slot for the duration of the call, so the
/// whole strand is mutably reachable.
pub struct ProcessCx<'a> {
    pub audio: AudioId,
    pub key: InstanceKey,
    pub scope: ScopeRef,
    pub context: ContextId,
    pub root: ContextId,
    pub sound_scope: SoundScope,
    pub strand: &'a mut Strand,
    pub contexts: &'a mut ContextTree,
    pub tic: &'a mut TicState,
    /// Global tic counter, used for mix-buffer stamping.
    pub tic_index: u64,
    pub config: &'a EngineConfig,
    pub notifier: &'a Notifier,
    /// Interleaved master frame the sink receives at the end of the tic.
    pub sink_frame: &'a mut Vec<f32>,
    /// Live bpm, shared with the UI thread.
    pub bpm: &'a Arc<AtomicF64>,
}

/// Fire one note: spawn a child context under the firing recall's
/// context, write the rendered note into each matching input recycling at
/// the beat's attack offset, and duplicate the recycling-scoped recalls
/// for the new context.
pub(crate) fn fire_note(cx: &mut ProcessCx<'_>, pad: usize, note: &crate::note::Note, attack: usize) {
    use crate::graph::channel::{ChannelRef, Direction};

    let audio_id = cx.audio;
    let Some(child) = cx.contexts.spawn_child(cx.context) else {
        return;
    };
    let reuse = cx.config.reuse_signals;
    let samples = note.render(cx.config.samplerate);

    let Some(runtime) = cx.strand.get_mut(audio_id) else {
        return;
    };
    for audio_channel in 0..runtime.audio_channels {
        let Some(channel_id) = runtime.channel_at(Direction::Input, pad, audio_channel) else {
            continue;
        };
        if let Some(recycling) = runtime.recycling_of_mut(channel_id) {
            let signal = recycling.add_note_signal(child, reuse);
            if let Some(signal) = recycling.signal_mut(signal) {
                signal.write(attack, &samples);
            }
        }

        // Entering the recycling scope duplicates its recalls for the
        // new context.
        let channel_ref = ChannelRef {
            audio: audio_id,
            channel: channel_id,
        };
        for template_id in runtime.templates.channel_scope(channel_ref) {
            if let Some(template) = runtime.templates.get(template_id) {
                runtime
                    .instances
                    .duplicate(template, child, cx.contexts, cx.config, cx.bpm);
            }
        }
    }

    cx.notifier.send(crate::notify::EngineEvent::NoteFired {
        audio: audio_id,
        context: child,
        pad,
        note: note.clone(),
    });
}

/// One phase of the per-tic three-phase barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Run,
    Post,
}

pub const PHASES: [Phase; 3] = [Phase::Pre, Phase::Run, Phase::Post];

/// Behavior of a recall instance. All three phase hooks execute
/// synchronously within one tic and must not block.
pub trait RecallProcessor: Send {
    fn pre(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    fn run(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    fn post(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Release native resources on cancellation. Must not fail.
    fn cancel(&mut self) {}

    /// Finished processors transition to Done at the end of the tic.
    fn finished(&self) -> bool {
        false
    }
}

/// Per-(template, context) duplicate of a recall template.
pub struct RecallInstance {
    pub template: TemplateId,
    pub tag: KindTag,
    pub context: ContextId,
    pub root: ContextId,
    pub scope: ScopeRef,
    pub state: RecallState,
    pub deps: Vec<ResolvedDependency>,
    /// Creation order, the tie-break within an execution rank.
    pub seq: u64,
    pub diagnostic: Option<String>,
    processor: Option<Box<dyn RecallProcessor>>,
}

impl RecallInstance {
    pub fn take_processor(&mut self) -> Option<Box<dyn RecallProcessor>> {
        self.processor.take()
    }

    pub fn put_processor(&mut self, processor: Box<dyn RecallProcessor>) {
        self.processor = Some(processor);
    }

    pub fn cancel(&mut self) {
        if let Some(processor) = self.processor.as_mut() {
            processor.cancel();
        }
        self.state = RecallState::Cancelled;
    }

    /// First dependency that never resolved, if any.
    pub fn unresolved_dep(&self) -> Option<KindTag> {
        self.deps
            .iter()
            .find(|d| d.target.is_none())
            .map(|d| d.descriptor.kind)
    }
}

/// All recall instances of one audio, keyed by (template, context).
#[derive(Default)]
pub struct InstanceStore {
    map: HashMap<InstanceKey, RecallInstance>,
    next_seq: u64,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: InstanceKey) -> Option<&RecallInstance> {
        self.map.get(&key)
    }

    pub fn get_mut(&mut self, key: InstanceKey) -> Option<&mut RecallInstance> {
        self.map.get_mut(&key)
    }

    pub fn contains(&self, key: InstanceKey) -> bool {
        self.map.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstanceKey, &RecallInstance)> {
        self.map.iter()
    }

    pub fn remove(&mut self, key: InstanceKey) -> Option<RecallInstance> {
        self.map.remove(&key)
    }

    /// Live instances of `context`, if any.
    pub fn live_for_context(&self, context: ContextId) -> bool {
        self.map
            .values()
            .any(|i| i.context == context && i.state.is_live())
    }

    /// `duplicate(template, context) -> instance`: at most one instance
    /// per (template, context); repeated calls return the existing key.
    ///
    /// Dependency resolution is one depth-first pass over ancestor
    /// contexts, nearest ancestor first. A dependency that stays
    /// unresolved is reported here and fails the instance at its first
    /// run, not now. A native processor that fails to construct forces
    /// the fresh instance straight to Done with a diagnostic.
    pub fn duplicate(
        &mut self,
        template: &RecallTemplate,
        context: ContextId,
        contexts: &ContextTree,
        config: &EngineConfig,
        bpm: &Arc<AtomicF64>,
    ) -> InstanceKey {
        let key = (template.id, context);
        if self.map.contains_key(&key) {
            return key;
        }

        let root = contexts.root_of(context).unwrap_or(context);

        let mut deps = Vec::with_capacity(template.deps.len());
        for descriptor in &template.deps {
            let target = self.resolve_dependency(descriptor, context, contexts);
            if target.is_none() {
                tracing::warn!(
                    kind = ?descriptor.kind,
                    template = ?template.kind,
                    "dependency unresolved at duplication"
                );
            }
            deps.push(ResolvedDependency {
                descriptor: *descriptor,
                target,
            });
        }

        let (processor, state, diagnostic) = match &template.kind {
            TemplateKind::Counter => (
                Some(Box::new(counter::CounterProcessor::new(config, Arc::clone(bpm)))
                    as Box<dyn RecallProcessor>),
                RecallState::Init,
                None,
            ),
            TemplateKind::Pattern(data) => (
                Some(Box::new(pattern::PatternProcessor::new(data.clone()))
                    as Box<dyn RecallProcessor>),
                RecallState::Init,
                None,
            ),
            TemplateKind::Notation(data) => (
                Some(Box::new(notation::NotationProcessor::new(data.clone()))
                    as Box<dyn RecallProcessor>),
                RecallState::Init,
                None,
            ),
            TemplateKind::Stream => (
                Some(Box::new(stream::StreamProcessor::new()) as Box<dyn RecallProcessor>),
                RecallState::Init,
                None,
            ),
            TemplateKind::Output { master } => (
                Some(Box::new(output::OutputProcessor::new(*master)) as Box<dyn RecallProcessor>),
                RecallState::Init,
                None,
            ),
            TemplateKind::Native(factory) => match factory.make(config) {
                Ok(processor) => (Some(processor), RecallState::Init, None),
                Err(error) => {
                    tracing::warn!(
                        plugin = factory.label(),
                        %error,
                        "native unit failed to instantiate, forcing recall to Done"
                    );
                    (None, RecallState::Done, Some(error.to_string()))
                }
            },
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.map.insert(
            key,
            RecallInstance {
                template: template.id,
                tag: template.kind.tag(),
                context,
                root,
                scope: template.scope,
                state,
                deps,
                seq,
                diagnostic,
                processor,
            },
        );
        key
    }

    /// Walk the context and its ancestors for a sibling instance
    /// duplicated from a template of the depended-upon kind. Nearest
    /// ancestor wins; within one context, the lowest template id.
    fn resolve_dependency(
        &self,
        descriptor: &DependencyDescriptor,
        context: ContextId,
        contexts: &ContextTree,
    ) -> Option<InstanceKey> {
        for ancestor in contexts.ancestry(context) {
            let mut candidates: Vec<InstanceKey> = self
                .map
                .values()
                .filter(|i| i.tag == descriptor.kind && i.context == ancestor)
                .map(|i| (i.template, i.context))
                .collect();
            candidates.sort();
            if let Some(key) = candidates.first() {
                return Some(*key);
            }
        }
        None
    }

    /// Re-run dependency resolution for instances with unresolved edges,
    /// used by the post-load resolve pass and after late duplication.
    pub fn resolve_pending(&mut self, contexts: &ContextTree) {
        let keys: Vec<InstanceKey> = self.map.keys().copied().collect();
        for key in keys {
            let unresolved: Vec<usize> = self
                .map
                .get(&key)
                .map(|i| {
                    i.deps
                        .iter()
                        .enumerate()
                        .filter(|(_, d)| d.target.is_none())
                        .map(|(n, _)| n)
                        .collect()
                })
                .unwrap_or_default();
            for n in unresolved {
                let descriptor = self.map[&key].deps[n].descriptor;
                let target = self.resolve_dependency(&descriptor, key.1, contexts);
                if let Some(instance) = self.map.get_mut(&key) {
                    instance.deps[n].target = target;
                }
            }
        }
    }

    /// Execution order for one pass root within a phase: kind rank from
    /// the registry's topological pass, then creation order.
    pub fn ordered(&self, registry: &TemplateRegistry, root: ContextId) -> Vec<InstanceKey> {
        let mut keys: Vec<(usize, u64, InstanceKey)> = self
            .map
            .values()
            .filter(|i| i.root == root && i.state.is_live())
            .map(|i| (registry.rank(i.tag), i.seq, (i.template, i.context)))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, _, key)| key).collect()
    }

    /// Keys of instances that reached Done or Cancelled.
    pub fn settled(&self) -> Vec<InstanceKey> {
        self.map
            .iter()
            .filter(|(_, i)| matches!(i.state, RecallState::Done | RecallState::Cancelled))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Cancel every instance belonging to `root`, top-down.
    pub fn cancel_root(&mut self, root: ContextId) {
        let mut instances: Vec<&mut RecallInstance> = self
            .map
            .values_mut()
            .filter(|i| i.root == root && i.state.is_live())
            .collect();
        instances.sort_by_key(|i| i.seq);
        for instance in instances {
            instance.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::graph::audio::AudioEntry;
    use template::PatternData;

    fn fixture() -> (
        TemplateRegistry,
        InstanceStore,
        ContextTree,
        EngineConfig,
        Arc<AtomicF64>,
    ) {
        let mut arena: Arena<AudioEntry> = Arena::new();
        let audio = arena.insert(AudioEntry { runtime: None });
        let mut registry = TemplateRegistry::new();
        registry
            .register(TemplateKind::Counter, ScopeRef::Audio(audio), Vec::new())
            .unwrap();
        registry
            .register(
                TemplateKind::Pattern(PatternData::new(16)),
                ScopeRef::Audio(audio),
                Vec::new(),
            )
            .unwrap();
        (
            registry,
            InstanceStore::new(),
            ContextTree::new(),
            EngineConfig::default(),
            Arc::new(AtomicF64::new(120.0)),
        )
    }

    fn template_of(registry: &TemplateRegistry, tag: KindTag) -> TemplateId {
        registry
            .iter()
            .find(|t| t.kind.tag() == tag)
            .map(|t| t.id)
            .unwrap()
    }

    #[test]
    fn test_duplicate_is_idempotent_per_context() {
        let (registry, mut store, mut contexts, config, bpm) = fixture();
        let root = contexts.new_root(SoundScope::Sequencer);
        let counter = template_of(&registry, KindTag::Counter);
        let template = registry.get(counter).unwrap();

        let a = store.duplicate(template, root, &contexts, &config, &bpm);
        let b = store.duplicate(template, root, &contexts, &config, &bpm);
        assert_eq!(a, b);
        assert_eq!(store.len(), 1, "repeated duplication returns the instance");
    }

    #[test]
    fn test_duplicate_distinct_contexts_yields_independent_instances() {
        let (registry, mut store, mut contexts, config, bpm) = fixture();
        let root_a = contexts.new_root(SoundScope::Sequencer);
        let root_b = contexts.new_root(SoundScope::Sequencer);
        let counter = template_of(&registry, KindTag::Counter);
        let template = registry.get(counter).unwrap();

        let a = store.duplicate(template, root_a, &contexts, &config, &bpm);
        let b = store.duplicate(template, root_b, &contexts, &config, &bpm);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dependency_resolves_to_nearest_ancestor() {
        let (registry, mut store, mut contexts, config, bpm) = fixture();
        let root = contexts.new_root(SoundScope::Sequencer);
        let child = contexts.spawn_child(root).unwrap();

        let counter = template_of(&registry, KindTag::Counter);
        let pattern = template_of(&registry, KindTag::Pattern);

        let counter_key = {
            let template = registry.get(counter).unwrap();
            store.duplicate(template, root, &contexts, &config, &bpm)
        };
        let pattern_key = {
            let template = registry.get(pattern).unwrap();
            store.duplicate(template, child, &contexts, &config, &bpm)
        };

        let instance = store.get(pattern_key).unwrap();
        assert_eq!(instance.deps.len(), 1);
        assert_eq!(instance.deps[0].target, Some(counter_key));
    }

    #[test]
    fn test_missing_dependency_reported_not_blocking() {
        let (registry, mut store, mut contexts, config, bpm) = fixture();
        let root = contexts.new_root(SoundScope::Sequencer);
        let pattern = template_of(&registry, KindTag::Pattern);

        // No counter instance exists in this context tree.
        let key = {
            let template = registry.get(pattern).unwrap();
            store.duplicate(template, root, &contexts, &config, &bpm)
        };
        let instance = store.get(key).unwrap();
        assert_eq!(instance.state, RecallState::Init, "duplication succeeded");
        assert_eq!(instance.unresolved_dep(), Some(KindTag::Counter));

        // The post-load resolve pass picks the dependency up once the
        // counter appears.
        let counter = template_of(&registry, KindTag::Counter);
        let template = registry.get(counter).unwrap();
        store.duplicate(template, root, &contexts, &config, &bpm);
        store.resolve_pending(&contexts);
        assert_eq!(store.get(key).unwrap().unresolved_dep(), None);
    }

    #[test]
    fn test_ordered_respects_rank_then_seq() {
        let (registry, mut store, mut contexts, config, bpm) = fixture();
        let root = contexts.new_root(SoundScope::Sequencer);
        let counter = template_of(&registry, KindTag::Counter);
        let pattern = template_of(&registry, KindTag::Pattern);

        // Duplicate in reverse rank order.
        let pattern_key = {
            let template = registry.get(pattern).unwrap();
            store.duplicate(template, root, &contexts, &config, &bpm)
        };
        let counter_key = {
            let template = registry.get(counter).unwrap();
            store.duplicate(template, root, &contexts, &config, &bpm)
        };

        assert_eq!(store.ordered(&registry, root), vec![counter_key, pattern_key]);
    }
}
