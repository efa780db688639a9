//! Error taxonomy for ripieno-core.

use thiserror::Error;

use crate::recall::KindTag;

/// Rejected structural mutation. Returned synchronously to the caller
/// before any graph state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("stale {what} count: caller expected {expected}, graph has {found}")]
    StaleResize {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("audio channel count must be >= 1, got {0}")]
    InvalidChannelCount(usize),

    #[error("cannot shrink {what}: recall template `{template:?}` is scoped to a removed slot")]
    ShrinkBelowRecallScope {
        what: &'static str,
        template: KindTag,
    },

    #[error("link requires one input and one output channel")]
    LinkDirection,

    #[error("channel is already linked")]
    AlreadyLinked,

    #[error("channel is not linked")]
    NotLinked,

    #[error("stale {0} handle")]
    StaleHandle(&'static str),

    #[error("dependency on template kind {0:?} which has no registered template in scope")]
    UnknownDependency(KindTag),

    #[error("cyclic dependency: {0:?} <-> {1:?}")]
    CyclicDependency(KindTag, KindTag),

    #[error("recall scope does not belong to this audio")]
    ForeignScope,
}

/// Error type for ripieno-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// A recall instance ran with an unresolved dependency. Handled locally
    /// by forcing the instance to Done; never aborts the surrounding tic.
    #[error("dependency {kind:?} unresolved at first run")]
    DependencyUnresolved { kind: KindTag },

    /// A native plugin failed to instantiate or bind. Handled locally by
    /// forcing the owning recall to Done with a diagnostic.
    #[error("plugin load failed: {0}")]
    PluginLoad(String),

    /// Expected drain of a non-looping audio signal. Triggers teardown,
    /// not failure.
    #[error("audio signal stream exhausted")]
    StreamExhausted,

    /// Structural mutation attempted while the subtree's scheduler was
    /// active. A caller bug; never retried internally.
    #[error("structural mutation while subtree scheduler is active")]
    LockContention,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The soundcard stream closed; no further playback can start.
    #[error("soundcard stream closed")]
    SoundcardClosed,

    /// A persisted spec referenced an entity that does not exist.
    #[error("unresolved reference: {0}")]
    UnknownReference(String),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// True for the error classes that are absorbed into the affected
    /// instance instead of propagating out of the tic.
    pub fn is_local_to_instance(&self) -> bool {
        matches!(
            self,
            Error::DependencyUnresolved { .. } | Error::PluginLoad(_) | Error::StreamExhausted
        )
    }
}
