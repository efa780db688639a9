//! Soundcard seam: sink of master frames, source of tics.
//!
//! Hardware drivers live outside this crate; the engine consumes only
//! this trait. The bundled [`OfflineSoundcard`] free-runs for rendering
//! and tests, delivering frames through an SPSC ring.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::SampleFormat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundcardPreset {
    pub samplerate: u32,
    pub buffer_size: usize,
    pub format: SampleFormat,
    pub channels: usize,
}

impl SoundcardPreset {
    pub fn frame_len(&self) -> usize {
        self.buffer_size * self.channels
    }
}

pub trait Soundcard: Send {
    fn preset(&self) -> SoundcardPreset;

    /// Block until the device completed a buffer. `false` means the
    /// stream closed (device gone, or an offline tic budget ran out).
    fn wait_tic(&mut self) -> bool;

    /// Hand over the completed interleaved master frame.
    fn submit(&mut self, frame: &[f32]);
}

/// Free-running soundcard for offline rendering and tests. Ticks are
/// granted immediately up to an optional budget; submitted frames land in
/// a ring the [`OfflineTap`] drains.
pub struct OfflineSoundcard {
    preset: SoundcardPreset,
    budget: Option<u64>,
    granted: u64,
    producer: HeapProd<f32>,
}

pub struct OfflineTap {
    consumer: HeapCons<f32>,
}

impl OfflineSoundcard {
    pub fn new(preset: SoundcardPreset, budget: Option<u64>) -> (Self, OfflineTap) {
        // Retain up to the whole budgeted render, bounded to keep the
        // unlimited case from growing without end.
        let frames = budget.unwrap_or(64).min(4096);
        let ring = HeapRb::new((preset.frame_len() * frames as usize).max(1));
        let (producer, consumer) = ring.split();
        (
            Self {
                preset,
                budget,
                granted: 0,
                producer,
            },
            OfflineTap { consumer },
        )
    }
}

impl Soundcard for OfflineSoundcard {
    fn preset(&self) -> SoundcardPreset {
        self.preset
    }

    fn wait_tic(&mut self) -> bool {
        match self.budget {
            Some(budget) if self.granted >= budget => false,
            _ => {
                self.granted += 1;
                true
            }
        }
    }

    fn submit(&mut self, frame: &[f32]) {
        let pushed = self.producer.push_slice(frame);
        if pushed < frame.len() {
            tracing::trace!(dropped = frame.len() - pushed, "offline sink ring full");
        }
    }
}

impl OfflineTap {
    /// Pull everything submitted so far.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = vec![0.0; self.consumer.occupied_len()];
        let taken = self.consumer.pop_slice(&mut out);
        out.truncate(taken);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset() -> SoundcardPreset {
        SoundcardPreset {
            samplerate: 44100,
            buffer_size: 8,
            format: SampleFormat::F32,
            channels: 2,
        }
    }

    #[test]
    fn test_budget_limits_tics() {
        let (mut card, _tap) = OfflineSoundcard::new(preset(), Some(3));
        assert!(card.wait_tic());
        assert!(card.wait_tic());
        assert!(card.wait_tic());
        assert!(!card.wait_tic());
    }

    #[test]
    fn test_submitted_frames_reach_tap() {
        let (mut card, mut tap) = OfflineSoundcard::new(preset(), Some(2));
        card.submit(&[1.0; 16]);
        card.submit(&[2.0; 16]);
        let frames = tap.drain();
        assert_eq!(frames.len(), 32);
        assert_eq!(frames[0], 1.0);
        assert_eq!(frames[16], 2.0);
    }
}
