//! Processing loop state machine.
//!
//! ```text
//!   Stopped ──▶ Starting ──▶ Running ──▶ Stopping ──▶ Stopped
//!      │  ▲         │                        │
//!      │  └─────────┘ start failed           │ maintenance flag set
//!      ▼                                     ▼
//!   Maintenance ◀────────────────────────────┘
//!      │
//!      └──▶ Starting (flag cleared) | Stopped (stop signal)
//! ```
//!
//! Transitions come from start/stop signals and the maintenance flag only, never
//! from the workload being processed.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// No processor exists.
    Stopped,
    /// Host alive, processing suspended by the operator.
    Maintenance,
    Starting,
    Running,
    /// Processor is draining in-flight work.
    Stopping,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid processing loop transition {from:?} -> {to:?}")]
pub struct LifecycleError {
    pub from: LoopState,
    pub to: LoopState,
}

impl LoopState {
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Stopped, Maintenance)
                | (Maintenance, Starting)
                | (Maintenance, Stopped)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Maintenance)
        )
    }

    pub fn transition(self, next: LoopState) -> Result<LoopState, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError {
                from: self,
                to: next,
            })
        }
    }

    /// True while a processor instance exists.
    pub fn has_processor(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Single owner of a loop's state; observers subscribe through `watch`.
#[derive(Debug)]
pub struct LifecycleState {
    tx: watch::Sender<LoopState>,
}

impl LifecycleState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoopState::Stopped);
        Self { tx }
    }

    pub fn current(&self) -> LoopState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.tx.subscribe()
    }

    /// Move to `next`, refusing transitions outside the table.
    pub fn advance(&self, next: LoopState) -> Result<(), LifecycleError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| match state.transition(next) {
            Ok(s) => {
                *state = s;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LoopState::*;

    const ALL: [LoopState; 5] = [Stopped, Maintenance, Starting, Running, Stopping];

    #[test]
    fn normal_lifecycle_is_allowed() {
        let mut s = Stopped;
        for next in [Starting, Running, Stopping, Stopped] {
            s = s.transition(next).unwrap();
        }
        assert_eq!(s, Stopped);
    }

    #[test]
    fn maintenance_round_trip_is_allowed() {
        let s = Stopped.transition(Maintenance).unwrap();
        assert_eq!(s.transition(Starting), Ok(Starting));
        assert_eq!(s.transition(Stopped), Ok(Stopped));
        assert_eq!(Stopping.transition(Maintenance), Ok(Maintenance));
    }

    #[test]
    fn running_cannot_skip_draining() {
        assert_eq!(
            Running.transition(Stopped),
            Err(LifecycleError {
                from: Running,
                to: Stopped
            })
        );
        assert!(Running.transition(Maintenance).is_err());
    }

    #[test]
    fn maintenance_never_reaches_running_directly() {
        assert!(!Maintenance.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s:?} -> {s:?} should be rejected");
        }
    }

    #[test]
    fn handle_rejects_invalid_transition_and_keeps_state() {
        let state = LifecycleState::new();
        let rx = state.subscribe();

        state.advance(Starting).unwrap();
        assert!(state.advance(Stopping).is_err());

        assert_eq!(state.current(), Starting);
        assert_eq!(*rx.borrow(), Starting);
    }
}
