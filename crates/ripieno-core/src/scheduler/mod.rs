//! Tic-based scheduler: clock math, playback FSM, strand driver, pump.

pub mod driver;
pub mod fsm;
pub(crate) mod threads;
pub mod tic;

pub use driver::{Driver, PlaybackSnapshot};
pub use fsm::{PlaybackEvent, PlaybackFsm, PlaybackState};
pub use tic::{tics_per_beat, BeatInfo, TicClock, TicState};
