//! Stream recall: feeds one recycling's sounding signals into the pass
//! mix and advances their cursors.

use crate::error::Result;
use crate::recall::{ProcessCx, RecallProcessor};
use crate::signal::StreamAdvance;

/// Recycling-scope recall, duplicated per fired-note context. Run phase
/// sums its context's signals into the recycling's pass mix; post phase
/// advances every cursor one node, reclaims exhausted signals, and marks
/// itself finished once its context falls silent.
pub struct StreamProcessor {
    scratch: Vec<f32>,
    drained: bool,
}

impl StreamProcessor {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
            drained: false,
        }
    }
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecallProcessor for StreamProcessor {
    fn run(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let Some(channel_ref) = cx.scope.channel() else {
            return Ok(());
        };
        let buffer_size = cx.config.buffer_size;
        let (root, tic, context) = (cx.root, cx.tic_index, cx.context);

        let Some(runtime) = cx.strand.get_mut(channel_ref.audio) else {
            return Ok(());
        };
        let Some(recycling) = runtime.recycling_of_mut(channel_ref.channel) else {
            return Ok(());
        };

        self.scratch.clear();
        self.scratch.resize(buffer_size, 0.0);
        let mut sounding = false;
        for (_, signal) in recycling.signals() {
            if signal.context() == Some(context) {
                signal.mix_into(&mut self.scratch);
                sounding = true;
            }
        }
        if sounding {
            let mix = recycling.mix_for(root, tic, buffer_size);
            for (m, s) in mix.iter_mut().zip(self.scratch.iter()) {
                *m += *s;
            }
        }
        Ok(())
    }

    fn post(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let Some(channel_ref) = cx.scope.channel() else {
            return Ok(());
        };
        let reuse = cx.config.reuse_signals;
        let context = cx.context;

        let Some(runtime) = cx.strand.get_mut(channel_ref.audio) else {
            return Ok(());
        };
        let Some(recycling) = runtime.recycling_of_mut(channel_ref.channel) else {
            return Ok(());
        };

        for id in recycling.signal_ids_for(context) {
            let advance = recycling
                .signal_mut(id)
                .map(|signal| signal.advance_tic());
            if advance == Some(StreamAdvance::Exhausted) {
                recycling.remove_signal(id, reuse);
            }
        }
        if !recycling.has_signals_for(context) {
            self.drained = true;
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.drained
    }
}
