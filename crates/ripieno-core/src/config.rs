//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sample storage format at the soundcard / plugin boundary. The stream
/// itself accumulates in f32; conversion happens only where a consumer
/// requires a different representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    S16,
    #[default]
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// Scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadMode {
    /// One scheduler thread steps every active strand in turn.
    #[default]
    Single,
    /// A dedicated worker thread per strand, phase-synchronized by the
    /// tic pump.
    SuperThreaded,
}

/// Engine-wide configuration, fixed at engine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub samplerate: u32,
    pub buffer_size: usize,
    pub format: SampleFormat,
    /// Audio channel count given to newly created audios.
    pub audio_channels: usize,
    pub bpm: f64,
    pub thread_mode: ThreadMode,
    /// Reuse drained audio-signal buffers from a per-recycling pool
    /// instead of allocating fresh ones per note.
    pub reuse_signals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samplerate: 44100,
            buffer_size: 1024,
            format: SampleFormat::F32,
            audio_channels: 2,
            bpm: 120.0,
            thread_mode: ThreadMode::Single,
            reuse_signals: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.samplerate == 0 {
            return Err(Error::InvalidConfig("samplerate must be > 0".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be > 0".into()));
        }
        if self.audio_channels == 0 {
            return Err(Error::InvalidConfig("audio_channels must be >= 1".into()));
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(Error::InvalidConfig(format!("invalid bpm: {}", self.bpm)));
        }
        Ok(())
    }

    pub fn with_samplerate(mut self, samplerate: u32) -> Self {
        self.samplerate = samplerate;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_audio_channels(mut self, audio_channels: usize) -> Self {
        self.audio_channels = audio_channels;
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_thread_mode(mut self, mode: ThreadMode) -> Self {
        self.thread_mode = mode;
        self
    }

    pub fn with_signal_reuse(mut self, reuse: bool) -> Self {
        self.reuse_signals = reuse;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(EngineConfig::default()
            .with_buffer_size(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default().with_bpm(0.0).validate().is_err());
        assert!(EngineConfig::default().with_bpm(f64::NAN).validate().is_err());
        assert!(EngineConfig::default()
            .with_audio_channels(0)
            .validate()
            .is_err());
    }
}
