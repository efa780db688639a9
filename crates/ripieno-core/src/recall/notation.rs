//! Notation recall: fires absolutely-timed notes on beat tics.

use crate::error::Result;
use crate::recall::template::NotationData;
use crate::recall::{fire_note, ProcessCx, RecallProcessor};

pub struct NotationProcessor {
    data: NotationData,
    /// Index of the first note not yet fired; notes are kept sorted by
    /// beat so each pre phase scans only the due range.
    next: usize,
}

impl NotationProcessor {
    pub fn new(mut data: NotationData) -> Self {
        data.notes.sort_by_key(|n| n.beat);
        Self { data, next: 0 }
    }

    /// True once every note has fired; the pass may keep running for
    /// other recalls, this one is simply spent.
    pub fn spent(&self) -> bool {
        self.next >= self.data.notes.len()
    }
}

impl RecallProcessor for NotationProcessor {
    fn pre(&mut self, cx: &mut ProcessCx<'_>) -> Result<()> {
        let Some(beat) = cx.tic.beat else {
            return Ok(());
        };
        while self.next < self.data.notes.len() && self.data.notes[self.next].beat <= beat.index {
            let timed = self.data.notes[self.next].clone();
            self.next += 1;
            if timed.beat == beat.index {
                fire_note(cx, timed.pad, &timed.note, beat.attack);
            }
        }
        Ok(())
    }
}
