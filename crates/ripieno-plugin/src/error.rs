//! Error types for the native plugin host.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Scanning,
    Opening,
    EntryPoint,
    Descriptor,
    Instantiation,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Scanning => write!(f, "scanning"),
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::EntryPoint => write!(f, "resolving entry point"),
            LoadStage::Descriptor => write!(f, "reading descriptor"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin load failed at {stage} stage: {path}: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("no descriptor labelled `{label}` in {path}")]
    UnknownLabel { path: PathBuf, label: String },

    #[error("not a recognized plugin library: {0}")]
    UnsupportedFormat(PathBuf),
}

pub type Result<T> = core::result::Result<T, PluginError>;

// Surfaces as the engine's PluginLoadFailure class.
impl From<PluginError> for ripieno_core::Error {
    fn from(error: PluginError) -> Self {
        ripieno_core::Error::PluginLoad(error.to_string())
    }
}
