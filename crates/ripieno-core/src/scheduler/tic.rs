//! Tic clock: fractional beat accumulation and attack derivation.
//!
//! One tic is one completed hardware buffer. `delay` is the tics-per-beat
//! ratio; a unit accumulator carries the fractional remainder forward
//! Bresenham-style so the beat grid never drifts against the samplerate.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF64;

/// Tics per beat for the given clock parameters.
pub fn tics_per_beat(samplerate: u32, buffer_size: usize, bpm: f64) -> f64 {
    samplerate as f64 * 60.0 / (buffer_size as f64 * bpm)
}

/// A beat event: which beat, and the sample offset within the current
/// hardware buffer where the beat boundary falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatInfo {
    pub index: u64,
    pub attack: usize,
}

/// Per-pass, per-tic clock outputs, written by the counter recall and
/// consumed by the sequencer recalls later in the same pre phase.
#[derive(Debug, Default)]
pub struct TicState {
    /// Global tic index.
    pub tic: u64,
    pub beat: Option<BeatInfo>,
}

pub struct TicClock {
    bpm: Arc<AtomicF64>,
    samplerate: u32,
    buffer_size: usize,
    delay: f64,
    last_bpm: f64,
    accumulator: f64,
    beat_index: u64,
}

impl TicClock {
    pub fn new(samplerate: u32, buffer_size: usize, bpm: Arc<AtomicF64>) -> Self {
        let initial_bpm = bpm.load(Ordering::Relaxed);
        Self {
            bpm,
            samplerate,
            buffer_size,
            delay: tics_per_beat(samplerate, buffer_size, initial_bpm),
            last_bpm: initial_bpm,
            accumulator: 0.0,
            beat_index: 0,
        }
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    fn update_delay_if_bpm_changed(&mut self) {
        let bpm = self.bpm.load(Ordering::Relaxed);
        if (bpm - self.last_bpm).abs() > 1e-9 && bpm > 0.0 {
            self.delay = tics_per_beat(self.samplerate, self.buffer_size, bpm);
            self.last_bpm = bpm;
        }
    }

    /// Advance by one tic. Returns the beat event when the accumulator
    /// crossed `delay`, with the remainder carried into the next beat.
    pub fn advance(&mut self) -> Option<BeatInfo> {
        self.update_delay_if_bpm_changed();
        self.accumulator += 1.0;

        let mut beat = None;
        while self.accumulator > self.delay {
            self.accumulator -= self.delay;
            // The boundary fell `accumulator` tics before the end of this
            // buffer; overshoot in (0, 1] maps to an offset in [0, size).
            let attack = ((1.0 - self.accumulator).max(0.0) * self.buffer_size as f64) as usize;
            beat = Some(BeatInfo {
                index: self.beat_index,
                attack: attack.min(self.buffer_size - 1),
            });
            self.beat_index += 1;
            if self.delay <= 0.0 {
                break;
            }
        }
        beat
    }
}
