//! Audio processing graph kernel: entity graph, recall engine, tic-based
//! scheduler.
//!
//! # Primary API
//!
//! - [`Engine`]: entry point for the UI/session layer (structural
//!   operations, playback control, notifications)
//! - [`EngineConfig`]: samplerate, buffer size, bpm, thread mode
//! - [`TemplateKind`] / [`ScopeRef`]: recall template registration
//! - [`Driver`]: embeddable single-strand scheduler for offline stepping
//! - [`persist`]: bulk constructors for the persistence layer
//!
//! # Model
//!
//! Audios own channels addressed by (direction, pad, audio-channel); each
//! channel owns one recycling holding the audio signals currently
//! sounding through it. Recall templates are duplicated into per-context
//! instances when a playback pass (a [`RecallingContext`] tree) enters
//! their scope, dependency-resolved, and driven through a three-phase
//! tic barrier by the scheduler.
//!
//! # Example
//!
//! ```ignore
//! use ripieno_core::{Engine, EngineConfig, SoundScope, TemplateKind};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let audio = engine.create_audio();
//! engine.resize_pads(audio, Direction::Input, 1, 0)?;
//! engine.add_recall(ScopeRef::Audio(audio), TemplateKind::Counter, vec![])?;
//! engine.start_playback(audio, SoundScope::Sequencer)?;
//! ```

pub mod arena;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod note;
pub mod notify;
pub mod persist;
pub mod recall;
pub mod scheduler;
pub mod signal;
pub mod soundcard;

pub use config::{EngineConfig, SampleFormat, ThreadMode};
pub use context::{ContextId, ContextTree, RecallingContext, SoundScope};
pub use engine::Engine;
pub use error::{Error, Result, StructuralError};
pub use graph::{
    AudioId, AudioRuntime, AudioTopology, ChannelId, ChannelRef, Direction, Graph, Strand,
};
pub use note::{Note, Waveform};
pub use notify::{EngineEvent, Notifier};
pub use recall::template::{
    DependencyDescriptor, KindTag, NotationData, PatternData, PatternRow, ProcessorFactory,
    ScopeLevel, ScopeRef, TemplateId, TemplateKind, TimedNote,
};
pub use recall::{Phase, ProcessCx, RecallProcessor, RecallState};
pub use scheduler::{tics_per_beat, BeatInfo, Driver, PlaybackSnapshot, PlaybackState};
pub use signal::{nodes_touched, tail_copy_length, AudioSignal, BufferStream, StreamAdvance};
pub use soundcard::{OfflineSoundcard, OfflineTap, Soundcard, SoundcardPreset};
