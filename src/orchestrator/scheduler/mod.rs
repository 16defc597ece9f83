use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, PartialEq, Eq)]
pub enum SchedulerError {
    NoEndpoints,
    ZeroQuantum,
    ShuttingDown,
    TurnMoved { ordinal: usize, current: usize },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEndpoints => write!(f, "turn scheduler needs at least one endpoint"),
            Self::ZeroQuantum => write!(f, "turn quantum must be greater than zero"),
            Self::ShuttingDown => write!(f, "turn scheduler is shutting down"),
            Self::TurnMoved { ordinal, current } => write!(
                f,
                "endpoint #{ordinal} lost the turn before starting it (now #{current})"
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnEnd {
    Advanced { next: usize },
    Retained,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnSnapshot {
    pub current_index: usize,
    pub busy: bool,
    pub receiving_index: Option<usize>,
    pub elapsed_ms: u64,
    pub turns_completed: u64,
}

struct TurnState {
    current_index: usize,
    busy: bool,
    receiving_index: Option<usize>,
    turn_started_at: Instant,
    turns_completed: u64,
    shutting_down: bool,
}

impl TurnState {
    fn advance(&mut self, endpoint_count: usize) -> usize {
        self.current_index = (self.current_index + 1) % endpoint_count;
        self.turn_started_at = Instant::now();
        self.turns_completed += 1;
        self.current_index
    }
}

/// Round-robin turn state shared by every endpoint worker and the watchdog.
/// All transitions happen under one lock; every change is broadcast.
pub struct TurnScheduler {
    state: Mutex<TurnState>,
    turn_changed: Condvar,
    endpoint_count: usize,
    quantum: Duration,
}

impl TurnScheduler {
    pub fn new(endpoint_count: usize, quantum: Duration) -> Result<Self, SchedulerError> {
        if endpoint_count == 0 {
            return Err(SchedulerError::NoEndpoints);
        }
        if quantum.is_zero() {
            return Err(SchedulerError::ZeroQuantum);
        }

        Ok(Self {
            state: Mutex::new(TurnState {
                current_index: 0,
                busy: false,
                receiving_index: None,
                turn_started_at: Instant::now(),
                turns_completed: 0,
                shutting_down: false,
            }),
            turn_changed: Condvar::new(),
            endpoint_count,
            quantum,
        })
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Blocks until `ordinal` holds the turn and nobody is marked busy.
    pub fn wait_for_turn(&self, ordinal: usize) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().expect("turn state mutex poisoned");
        loop {
            if state.shutting_down {
                return Err(SchedulerError::ShuttingDown);
            }
            if state.current_index == ordinal && !state.busy {
                return Ok(());
            }
            state = self
                .turn_changed
                .wait(state)
                .expect("turn state mutex poisoned");
        }
    }

    /// Marks `ordinal` busy and returns the turn start time.
    pub fn begin_turn(&self, ordinal: usize) -> Result<Instant, SchedulerError> {
        let mut state = self.state.lock().expect("turn state mutex poisoned");
        if state.shutting_down {
            return Err(SchedulerError::ShuttingDown);
        }
        if state.current_index != ordinal || state.busy {
            return Err(SchedulerError::TurnMoved {
                ordinal,
                current: state.current_index,
            });
        }

        let started_at = Instant::now();
        state.busy = true;
        state.receiving_index = Some(ordinal);
        state.turn_started_at = started_at;
        Ok(started_at)
    }

    pub fn acquire_turn(&self, ordinal: usize) -> Result<Instant, SchedulerError> {
        loop {
            self.wait_for_turn(ordinal)?;
            match self.begin_turn(ordinal) {
                Err(SchedulerError::TurnMoved { .. }) => continue,
                other => return other,
            }
        }
    }

    /// Releases the turn held by `ordinal`. The turn moves on only once the
    /// quantum has elapsed; otherwise the holder may begin again.
    pub fn end_turn(&self, ordinal: usize) -> TurnEnd {
        let mut state = self.state.lock().expect("turn state mutex poisoned");
        assert!(
            state.busy && state.receiving_index == Some(ordinal),
            "endpoint #{ordinal} ended a turn it does not hold (busy={}, receiving={:?})",
            state.busy,
            state.receiving_index
        );
        assert_eq!(
            state.current_index, ordinal,
            "turn index moved while endpoint #{ordinal} was busy"
        );

        state.busy = false;
        state.receiving_index = None;
        let outcome = if state.turn_started_at.elapsed() >= self.quantum {
            TurnEnd::Advanced {
                next: state.advance(self.endpoint_count),
            }
        } else {
            TurnEnd::Retained
        };
        drop(state);

        self.turn_changed.notify_all();
        outcome
    }

    /// Moves an idle, expired turn along. Returns `(from, to)` when it did.
    pub fn force_advance_if_expired(&self) -> Option<(usize, usize)> {
        let mut state = self.state.lock().expect("turn state mutex poisoned");
        if state.shutting_down || state.busy || state.turn_started_at.elapsed() < self.quantum {
            return None;
        }

        let from = state.current_index;
        let to = state.advance(self.endpoint_count);
        drop(state);

        self.turn_changed.notify_all();
        Some((from, to))
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        let state = self.state.lock().expect("turn state mutex poisoned");
        TurnSnapshot {
            current_index: state.current_index,
            busy: state.busy,
            receiving_index: state.receiving_index,
            elapsed_ms: u64::try_from(state.turn_started_at.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            turns_completed: state.turns_completed,
        }
    }

    pub fn shutdown(&self) {
        self.state
            .lock()
            .expect("turn state mutex poisoned")
            .shutting_down = true;
        self.turn_changed.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state
            .lock()
            .expect("turn state mutex poisoned")
            .shutting_down
    }
}
