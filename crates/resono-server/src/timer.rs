//! One-shot timer service delivering through the message bus.
//!
//! Timers fire on a dedicated thread by sending their message to the bus;
//! the main thread sees them at its next dispatch. Cancellation succeeds
//! iff the timer has not fired yet.

use crate::message::ServerMessage;
use crossbeam_channel::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::trace;

/// Identifies a pending timer for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

struct PendingTimer {
    id: u64,
    deadline: Instant,
    message: ServerMessage,
}

struct TimerState {
    pending: Vec<PendingTimer>,
    next_id: u64,
    shutdown: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// The timer service. Dropping it stops the worker thread; timers still
/// pending are discarded.
pub struct TimerService {
    inner: Arc<TimerInner>,
    worker: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Starts the worker thread delivering into `bus_tx`.
    pub fn new(bus_tx: Sender<ServerMessage>) -> Self {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                pending: Vec::new(),
                next_id: 1,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("resono-timer".into())
            .spawn(move || worker_loop(&worker_inner, &bus_tx))
            .ok();

        Self { inner, worker }
    }

    /// Schedules `message` to be sent in `ms` milliseconds.
    pub fn create_timer(&self, ms: u64, message: ServerMessage) -> TimerHandle {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push(PendingTimer {
            id,
            deadline: Instant::now() + Duration::from_millis(ms),
            message,
        });
        drop(state);
        self.inner.cond.notify_one();
        TimerHandle(id)
    }

    /// Cancels a timer. Returns true iff the timer was still pending.
    pub fn cancel_timer(&self, handle: TimerHandle) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = state.pending.len();
        state.pending.retain(|t| t.id != handle.0);
        state.pending.len() != before
    }

    /// Number of timers not yet fired.
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
        }
        self.inner.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: &TimerInner, bus_tx: &Sender<ServerMessage>) {
    let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        // Fire everything due; earliest-deadline order keeps delivery fair.
        while let Some(pos) = due_timer(&state.pending, now) {
            let timer = state.pending.swap_remove(pos);
            trace!(id = timer.id, "timer fired");
            let _ = bus_tx.send(timer.message);
        }

        let next = state.pending.iter().map(|t| t.deadline).min();
        state = match next {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                inner
                    .cond
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => inner
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

/// Index of the earliest timer at or past its deadline, if any.
fn due_timer(pending: &[PendingTimer], now: Instant) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .filter(|(_, t)| t.deadline <= now)
        .min_by_key(|(_, t)| t.deadline)
        .map(|(pos, _)| pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBus;
    use std::time::Duration;

    #[test]
    fn timer_fires_and_delivers() {
        let bus = MessageBus::new();
        let service = TimerService::new(bus.sender());
        service.create_timer(10, ServerMessage::ReloadPipelines);

        // Wait for the worker to fire, then drain on "the main thread".
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut bus = bus;
        let mut dispatched = 0;
        while dispatched == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            dispatched = bus.dispatch();
        }
        assert_eq!(dispatched, 1);
        assert_eq!(service.pending_count(), 0);
    }

    #[test]
    fn cancel_before_fire_suppresses_delivery() {
        let bus = MessageBus::new();
        let service = TimerService::new(bus.sender());
        let handle = service.create_timer(60_000, ServerMessage::ReloadPipelines);
        assert!(service.cancel_timer(handle));
        assert_eq!(service.pending_count(), 0);
        // Cancelling again reports the timer as already gone.
        assert!(!service.cancel_timer(handle));
    }

    #[test]
    fn fired_timer_cannot_be_cancelled() {
        let mut bus = MessageBus::new();
        let service = TimerService::new(bus.sender());
        let handle = service.create_timer(5, ServerMessage::TimerFired { id: 1 });

        let deadline = Instant::now() + Duration::from_secs(2);
        while service.pending_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!service.cancel_timer(handle));
        assert!(bus.dispatch() >= 1);
    }
}
