//! Pending append completions.
//!
//! Asynchronous appends hand the caller a [`PendingAppend`] while the
//! matching [`AppendCompletion`] travels into the segment store's
//! completion callback. The pair is a one-shot settled cell: the store
//! side resolves it exactly once, the caller side waits on it at most
//! once.

use crate::error::{LogError, LogResult};
use crate::position::SequencePosition;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state between the two sides of one append.
struct Cell {
    state: Mutex<Option<LogResult<SequencePosition>>>,
    settled: Condvar,
}

/// Creates a linked pending/completion pair for one append.
pub(crate) fn pending_pair() -> (PendingAppend, AppendCompletion) {
    let cell = Arc::new(Cell {
        state: Mutex::new(None),
        settled: Condvar::new(),
    });
    (
        PendingAppend {
            cell: Arc::clone(&cell),
        },
        AppendCompletion {
            cell,
            resolved: false,
        },
    )
}

/// Caller-side handle to an append that has not settled yet.
///
/// Waiting consumes the handle; an abandoned handle does not affect the
/// append itself, which may still become durable.
pub struct PendingAppend {
    cell: Arc<Cell>,
}

impl PendingAppend {
    /// Returns true once the append has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cell.state.lock().is_some()
    }

    /// Blocks until the append settles, then returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the failure the store completion carried, unwrapped.
    pub fn wait(self) -> LogResult<SequencePosition> {
        let mut state = self.cell.state.lock();
        while state.is_none() {
            self.cell.settled.wait(&mut state);
        }
        match state.take() {
            Some(result) => result,
            // Unreachable: the loop above only exits on Some.
            None => Err(LogError::unavailable("append completion lost")),
        }
    }

    /// Blocks until the append settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Timeout`] if the deadline passes first. The
    /// append itself is not cancelled.
    pub fn wait_timeout(self, timeout: Duration) -> LogResult<SequencePosition> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            if let Some(result) = state.take() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LogError::Timeout);
            }
            self.cell.settled.wait_for(&mut state, deadline - now);
        }
    }
}

/// Store-side handle that settles one [`PendingAppend`].
///
/// Dropping an unresolved completion settles the caller side with an
/// unavailable error, so a store that loses a callback cannot strand a
/// synchronous append forever.
pub struct AppendCompletion {
    cell: Arc<Cell>,
    resolved: bool,
}

impl AppendCompletion {
    /// Settles the append with its outcome. Later settlements of the same
    /// cell are ignored.
    pub fn complete(mut self, result: LogResult<SequencePosition>) {
        self.resolved = true;
        self.settle(result);
    }

    fn settle(&self, result: LogResult<SequencePosition>) {
        let mut state = self.cell.state.lock();
        if state.is_none() {
            *state = Some(result);
            self.cell.settled.notify_all();
        }
    }
}

impl Drop for AppendCompletion {
    fn drop(&mut self) {
        if !self.resolved {
            self.settle(Err(LogError::unavailable(
                "append completion dropped without resolving",
            )));
        }
    }
}
