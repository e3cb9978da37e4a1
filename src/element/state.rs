//! Element states and transitions.

use std::fmt;

/// Element state. Ordered: `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state; no resources allocated.
    #[default]
    Null,
    /// Resources allocated, pads inactive.
    Ready,
    /// Pads active, data may be prerolled, clock stopped.
    Paused,
    /// Clock running.
    Playing,
}

impl State {
    /// The adjacent state one step from `self` toward `target`.
    pub fn step_toward(self, target: State) -> State {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Less => match self {
                Null => Ready,
                Ready => Paused,
                _ => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                _ => Null,
            },
            std::cmp::Ordering::Equal => self,
        }
    }

    /// Uppercase name, as used in messages.
    pub fn name(self) -> &'static str {
        match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transition between two adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// NULL to READY.
    NullToReady,
    /// READY to PAUSED. Pads are activated.
    ReadyToPaused,
    /// PAUSED to PLAYING.
    PausedToPlaying,
    /// PLAYING to PAUSED.
    PlayingToPaused,
    /// PAUSED to READY. Pads are deactivated.
    PausedToReady,
    /// READY to NULL.
    ReadyToNull,
}

impl StateChange {
    /// The transition between two adjacent states, if they are adjacent.
    pub fn new(current: State, next: State) -> Option<Self> {
        use State::*;
        Some(match (current, next) {
            (Null, Ready) => StateChange::NullToReady,
            (Ready, Paused) => StateChange::ReadyToPaused,
            (Paused, Playing) => StateChange::PausedToPlaying,
            (Playing, Paused) => StateChange::PlayingToPaused,
            (Paused, Ready) => StateChange::PausedToReady,
            (Ready, Null) => StateChange::ReadyToNull,
            _ => return None,
        })
    }

    /// State before the transition.
    pub fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub fn next(self) -> State {
        match self {
            StateChange::ReadyToNull => State::Null,
            StateChange::NullToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }

    /// Whether the transition goes toward PLAYING.
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }

    /// Name used as a metrics label.
    pub fn name(self) -> &'static str {
        match self {
            StateChange::NullToReady => "null-to-ready",
            StateChange::ReadyToPaused => "ready-to-paused",
            StateChange::PausedToPlaying => "paused-to-playing",
            StateChange::PlayingToPaused => "playing-to-paused",
            StateChange::PausedToReady => "paused-to-ready",
            StateChange::ReadyToNull => "ready-to-null",
        }
    }
}

/// Non-failure outcome of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeSuccess {
    /// The state was reached.
    Success,
    /// The state will be reached later; completion is posted as `AsyncDone`.
    Async,
    /// The state was reached but the element cannot preroll (live source).
    NoPreroll,
}

/// The element rejected a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("state change failed")]
pub struct StateChangeError;

/// Result of a state change request.
pub type StateChangeResult = Result<StateChangeSuccess, StateChangeError>;
