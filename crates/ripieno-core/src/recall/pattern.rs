//! Pattern recall: fires notes from a step grid on beat tics.

use crate::error::Result;
use crate::recall::template::PatternData;
use crate::recall::{fire_note, ProcessCx, RecallProcessor};

pub struct PatternProcessor {
    data: PatternData,
}

impl PatternProcessor {
    pub fn new(data: PatternData) -> Self {
        Self { data }
    }
}

impl RecallProcessor for PatternProcessor {
    fn pre(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let Some(beat) = cx.tic.beat else {
            return Ok(());
        };
        if self.data.steps == 0 {
            return Ok(());
        }
        let step = (beat.index % self.data.steps as u64) as usize;
        let fires: Vec<(usize, crate::note::Note)> = self
            .data
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.active.get(step).copied().unwrap_or(false))
            .map(|(pad, row)| (pad, row.note.clone()))
            .collect();
        for (pad, note) in fires {
            fire_note(cx, pad, &note, beat.attack);
        }
        Ok(())
    }
}
