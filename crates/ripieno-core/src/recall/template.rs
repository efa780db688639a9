//! Recall templates: immutable processing-unit descriptors.
//!
//! A template binds a processing-unit kind to a scope and declares which
//! other template kinds it depends on. Templates carry no runtime state;
//! all mutable fields live on the per-context instance produced by
//! duplication.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Result, StructuralError};
use crate::graph::audio::AudioId;
use crate::graph::channel::ChannelRef;
use crate::note::Note;
use crate::recall::RecallProcessor;

/// Discriminant of a template kind, used by dependency declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    Counter,
    Pattern,
    Notation,
    Stream,
    Output,
    Native,
}

/// Scope level a recall binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeLevel {
    Audio,
    Channel,
    Recycling,
    Signal,
}

/// Concrete scope object a template is registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeRef {
    Audio(AudioId),
    Channel(ChannelRef),
    Recycling(ChannelRef),
    Signal(ChannelRef),
}

impl ScopeRef {
    pub fn audio(&self) -> AudioId {
        match self {
            ScopeRef::Audio(audio) => *audio,
            ScopeRef::Channel(c) | ScopeRef::Recycling(c) | ScopeRef::Signal(c) => c.audio,
        }
    }

    pub fn level(&self) -> ScopeLevel {
        match self {
            ScopeRef::Audio(_) => ScopeLevel::Audio,
            ScopeRef::Channel(_) => ScopeLevel::Channel,
            ScopeRef::Recycling(_) => ScopeLevel::Recycling,
            ScopeRef::Signal(_) => ScopeLevel::Signal,
        }
    }

    pub fn channel(&self) -> Option<ChannelRef> {
        match self {
            ScopeRef::Audio(_) => None,
            ScopeRef::Channel(c) | ScopeRef::Recycling(c) | ScopeRef::Signal(c) => Some(*c),
        }
    }
}

/// Declared edge from one template kind to another. Resolved to a concrete
/// sibling instance at duplication time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub kind: KindTag,
    pub scope: ScopeLevel,
}

/// Step grid for one input pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRow {
    pub active: Vec<bool>,
    pub note: Note,
}

/// A step pattern: rows indexed by input pad, columns by step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternData {
    pub steps: usize,
    pub rows: Vec<PatternRow>,
}

impl PatternData {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, pad: usize, active_steps: &[usize], note: Note) -> Self {
        while self.rows.len() <= pad {
            self.rows.push(PatternRow {
                active: vec![false; self.steps],
                note: Note::new(440.0, 0),
            });
        }
        let row = &mut self.rows[pad];
        row.note = note;
        for step in active_steps {
            if *step < self.steps {
                row.active[*step] = true;
            }
        }
        self
    }
}

/// One absolutely-timed note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedNote {
    pub beat: u64,
    pub pad: usize,
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotationData {
    pub notes: Vec<TimedNote>,
}

/// Constructor for recall processors provided by an external backend
/// (the native plugin host).
pub trait ProcessorFactory: Send + Sync {
    fn label(&self) -> &str;
    fn make(&self, config: &EngineConfig) -> Result<Box<dyn RecallProcessor>>;
}

#[derive(Clone)]
pub enum TemplateKind {
    /// Advances the per-pass tic clock and publishes beat events.
    Counter,
    /// Fires notes from a step grid on beat tics.
    Pattern(PatternData),
    /// Fires absolutely-timed notes on beat tics.
    Notation(NotationData),
    /// Feeds sounding signals of one recycling into its pass mix and
    /// advances their cursors.
    Stream,
    /// Folds channel mixes into the output stage; the master output also
    /// copies the final mix to the soundcard sink.
    Output { master: bool },
    /// Externally provided processor (native plugin host).
    Native(Arc<dyn ProcessorFactory>),
}

impl TemplateKind {
    pub fn tag(&self) -> KindTag {
        match self {
            TemplateKind::Counter => KindTag::Counter,
            TemplateKind::Pattern(_) => KindTag::Pattern,
            TemplateKind::Notation(_) => KindTag::Notation,
            TemplateKind::Stream => KindTag::Stream,
            TemplateKind::Output { .. } => KindTag::Output,
            TemplateKind::Native(_) => KindTag::Native,
        }
    }

    /// Dependencies implied by the kind itself. The output stage carries
    /// none: it runs in the post phase, after every stream recall of the
    /// tic, and a pure mixer audio has no stream templates at all.
    pub fn default_deps(&self) -> Vec<DependencyDescriptor> {
        match self {
            TemplateKind::Counter | TemplateKind::Stream | TemplateKind::Output { .. } => {
                Vec::new()
            }
            TemplateKind::Pattern(_) | TemplateKind::Notation(_) => vec![DependencyDescriptor {
                kind: KindTag::Counter,
                scope: ScopeLevel::Audio,
            }],
            TemplateKind::Native(_) => vec![DependencyDescriptor {
                kind: KindTag::Stream,
                scope: ScopeLevel::Recycling,
            }],
        }
    }
}

impl fmt::Debug for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Counter => write!(f, "Counter"),
            TemplateKind::Pattern(_) => write!(f, "Pattern"),
            TemplateKind::Notation(_) => write!(f, "Notation"),
            TemplateKind::Stream => write!(f, "Stream"),
            TemplateKind::Output { master } => write!(f, "Output {{ master: {master} }}"),
            TemplateKind::Native(factory) => write!(f, "Native({})", factory.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(u32);

impl TemplateId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Immutable after registration.
pub struct RecallTemplate {
    pub id: TemplateId,
    pub kind: TemplateKind,
    pub scope: ScopeRef,
    pub deps: Vec<DependencyDescriptor>,
}

/// Per-audio list of recall templates, with kind-level dependency
/// validation and a topological execution rank per kind.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: Vec<RecallTemplate>,
    /// Declared kind-level edges: kind -> kinds it depends on.
    kind_deps: HashMap<KindTag, Vec<KindTag>>,
    /// First-registration order of kinds, for deterministic rank ties.
    kind_order: Vec<KindTag>,
    ranks: HashMap<KindTag, usize>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Dependencies naming a kind with no registered
    /// template, and dependency cycles, are rejected with the registry
    /// left unchanged.
    pub fn register(
        &mut self,
        kind: TemplateKind,
        scope: ScopeRef,
        extra_deps: Vec<DependencyDescriptor>,
    ) -> core::result::Result<TemplateId, StructuralError> {
        let tag = kind.tag();
        let mut deps = kind.default_deps();
        for dep in extra_deps {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        for dep in &deps {
            if !self.templates.iter().any(|t| t.kind.tag() == dep.kind) {
                return Err(StructuralError::UnknownDependency(dep.kind));
            }
            if dep.kind == tag || self.kind_depends_on(dep.kind, tag) {
                return Err(StructuralError::CyclicDependency(tag, dep.kind));
            }
        }

        let id = TemplateId(self.templates.len() as u32);
        if !self.kind_order.contains(&tag) {
            self.kind_order.push(tag);
        }
        let entry = self.kind_deps.entry(tag).or_default();
        for dep in &deps {
            if !entry.contains(&dep.kind) {
                entry.push(dep.kind);
            }
        }
        self.templates.push(RecallTemplate {
            id,
            kind,
            scope,
            deps,
        });
        self.recompute_ranks();
        Ok(id)
    }

    /// Is `from` (transitively) declared to depend on `to`?
    fn kind_depends_on(&self, from: KindTag, to: KindTag) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(tag) = stack.pop() {
            if tag == to {
                return true;
            }
            if seen.contains(&tag) {
                continue;
            }
            seen.push(tag);
            if let Some(deps) = self.kind_deps.get(&tag) {
                stack.extend(deps.iter().copied());
            }
        }
        false
    }

    /// Kahn's algorithm over the kind dependency DAG; ties broken by
    /// first-registration order. Dependencies rank before dependents.
    fn recompute_ranks(&mut self) {
        self.ranks.clear();
        let mut remaining = self.kind_order.clone();
        let mut rank = 0;
        while !remaining.is_empty() {
            let position = remaining.iter().position(|tag| {
                self.kind_deps
                    .get(tag)
                    .map(|deps| deps.iter().all(|d| self.ranks.contains_key(d)))
                    .unwrap_or(true)
            });
            // Registration rejects cycles, so progress is guaranteed.
            let position = position.expect("kind dependency graph is acyclic");
            let tag = remaining.remove(position);
            self.ranks.insert(tag, rank);
            rank += 1;
        }
    }

    /// Execution rank of a kind; lower ranks run first within a phase.
    pub fn rank(&self, tag: KindTag) -> usize {
        self.ranks.get(&tag).copied().unwrap_or(usize::MAX)
    }

    pub fn get(&self, id: TemplateId) -> Option<&RecallTemplate> {
        self.templates.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecallTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates registered at audio scope.
    pub fn audio_scope(&self) -> Vec<TemplateId> {
        self.templates
            .iter()
            .filter(|t| matches!(t.scope, ScopeRef::Audio(_)))
            .map(|t| t.id)
            .collect()
    }

    /// Templates registered on the given channel's scope objects
    /// (channel, recycling, or signal level).
    pub fn channel_scope(&self, channel: ChannelRef) -> Vec<TemplateId> {
        self.templates
            .iter()
            .filter(|t| t.scope.channel() == Some(channel))
            .map(|t| t.id)
            .collect()
    }

    /// Does any template's scope reference one of these channels?
    /// Used to reject shrinking pads/channels under a recall's feet.
    pub fn scope_referencing(
        &self,
        channels: &[crate::graph::channel::ChannelId],
    ) -> Option<KindTag> {
        self.templates
            .iter()
            .find(|t| {
                t.scope
                    .channel()
                    .map(|c| channels.contains(&c.channel))
                    .unwrap_or(false)
            })
            .map(|t| t.kind.tag())
    }
}
