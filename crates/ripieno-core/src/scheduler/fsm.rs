//! Per-audio playback state machine.

/// Stopped -> Starting -> Running -> Stopping -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl PlaybackState {
    pub fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Starting => 1,
            PlaybackState::Running => 2,
            PlaybackState::Stopping => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Starting,
            2 => PlaybackState::Running,
            3 => PlaybackState::Stopping,
            _ => PlaybackState::Stopped,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A playback pass was requested.
    Start,
    /// Pass setup finished; tics may flow.
    Ready,
    /// Stop requested; cancellation propagates this tic.
    Stop,
    /// Teardown finished; runtimes may be returned.
    Drained,
}

#[derive(Debug, Default)]
pub struct PlaybackFsm {
    state: PlaybackState,
}

impl PlaybackFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Apply an event; returns the new state when it changed.
    pub fn transition(&mut self, event: PlaybackEvent) -> Option<PlaybackState> {
        use PlaybackEvent::*;
        let next = match (self.state, event) {
            (PlaybackState::Stopped, Start) => Some(PlaybackState::Starting),
            (PlaybackState::Starting, Ready) => Some(PlaybackState::Running),
            (PlaybackState::Starting | PlaybackState::Running, Stop) => {
                Some(PlaybackState::Stopping)
            }
            (PlaybackState::Stopping, Drained) => Some(PlaybackState::Stopped),
            _ => None,
        };
        if let Some(state) = next {
            self.state = state;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut fsm = PlaybackFsm::new();
        assert_eq!(fsm.transition(PlaybackEvent::Start), Some(PlaybackState::Starting));
        assert_eq!(fsm.transition(PlaybackEvent::Ready), Some(PlaybackState::Running));
        assert_eq!(fsm.transition(PlaybackEvent::Stop), Some(PlaybackState::Stopping));
        assert_eq!(fsm.transition(PlaybackEvent::Drained), Some(PlaybackState::Stopped));
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut fsm = PlaybackFsm::new();
        assert_eq!(fsm.transition(PlaybackEvent::Ready), None);
        assert_eq!(fsm.transition(PlaybackEvent::Drained), None);
        fsm.transition(PlaybackEvent::Start);
        assert_eq!(fsm.transition(PlaybackEvent::Start), None);
        assert_eq!(fsm.state(), PlaybackState::Starting);
    }

    #[test]
    fn test_stop_while_starting() {
        let mut fsm = PlaybackFsm::new();
        fsm.transition(PlaybackEvent::Start);
        assert_eq!(fsm.transition(PlaybackEvent::Stop), Some(PlaybackState::Stopping));
    }

    #[test]
    fn test_u8_round_trip() {
        for state in [
            PlaybackState::Stopped,
            PlaybackState::Starting,
            PlaybackState::Running,
            PlaybackState::Stopping,
        ] {
            assert_eq!(PlaybackState::from_u8(state.to_u8()), state);
        }
    }
}
