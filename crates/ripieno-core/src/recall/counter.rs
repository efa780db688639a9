//! Counter recall: advances the per-pass tic clock.

use std::sync::Arc;

use atomic_float::AtomicF64;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::recall::{ProcessCx, RecallProcessor};
use crate::scheduler::tic::TicClock;

/// Audio-scope recall owning the delay/attack bookkeeping for one
/// playback pass. Publishes the beat event the sequencer recalls consume
/// later in the same pre phase.
pub struct CounterProcessor {
    clock: TicClock,
}

impl CounterProcessor {
    pub fn new(config: &EngineConfig, bpm: Arc<AtomicF64>) -> Self {
        Self {
            clock: TicClock::new(config.samplerate, config.buffer_size, bpm),
        }
    }
}

impl RecallProcessor for CounterProcessor {
    fn pre(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        if let Some(beat) = self.clock.advance() {
            cx.tic.beat = Some(beat);
            let tic = cx.tic.tic;
            if let Some(runtime) = cx.strand.get_mut(cx.audio) {
                runtime.stats.beats.push(tic);
            }
        }
        Ok(())
    }
}
