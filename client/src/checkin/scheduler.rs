// Debounced batching of check-in events behind a single background worker

use crate::checkin::event::{deduplicate_cron, Event};
use crate::config::CheckInConfig;
use crate::telemetry;
use crate::transmitter::{encode_ndjson, PayloadFormat, Transmitter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Debounce configuration for the check-in scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the first event after idleness and the flush it
    /// triggers
    pub initial_debounce: Duration,
    /// Minimum delay between two consecutive flushes during a burst
    pub between_transmissions_debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_debounce: Duration::from_millis(100),
            between_transmissions_debounce: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(checkin: &CheckInConfig) -> Self {
        Self {
            initial_debounce: Duration::from_millis(checkin.initial_debounce_ms),
            between_transmissions_debounce: Duration::from_secs(
                checkin.between_debounce_seconds,
            ),
        }
    }
}

/// State guarded by the scheduler's one exclusive lock
///
/// Mutating `pending` and deciding whether to arm a timer are always
/// atomic relative to each other; every path below takes the lock first.
struct State {
    /// Events accepted but not yet pushed to the batch queue
    pending: Vec<Event>,
    /// Sending half of the batch queue; `None` once stopped, which makes
    /// `schedule` a logged no-op
    batch_tx: Option<UnboundedSender<Vec<Event>>>,
    /// Receiving half, handed to the worker when it is lazily started
    batch_rx: Option<UnboundedReceiver<Vec<Event>>>,
    /// The at-most-one live debounce timer
    waker: Option<JoinHandle<()>>,
    /// The at-most-one background consumer
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<State>,
}

/// Debounced check-in scheduler
///
/// Accepts events from any number of concurrent producers, coalesces
/// redundant ones, and flushes timed batches through one background worker
/// to the transmitter. Delivery is best effort: one attempt per batch,
/// failures are logged and the batch dropped — check-ins are liveness
/// signals, and a stale retry would be misleading.
pub struct Scheduler {
    shared: Arc<Shared>,
    transmitter: Arc<dyn Transmitter>,
    active: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        transmitter: Arc<dyn Transmitter>,
        active: Arc<AtomicBool>,
    ) -> Self {
        let (batch_tx, batch_rx) = tokio::sync::mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    pending: Vec::new(),
                    batch_tx: Some(batch_tx),
                    batch_rx: Some(batch_rx),
                    waker: None,
                    worker: None,
                }),
            }),
            transmitter,
            active,
        }
    }

    /// Accept an event for batched delivery
    ///
    /// Returns immediately; never blocks on I/O and never reports
    /// transmission failures back to the caller.
    pub async fn schedule(&self, event: Event) {
        let description = Event::describe(std::slice::from_ref(&event));

        if !self.active.load(Ordering::Relaxed) {
            debug!("Cannot transmit {}: monitoring is not active", description);
            return;
        }

        let mut state = self.shared.state.lock().await;

        if state.batch_tx.is_none() {
            debug!("Cannot transmit {}: the scheduler is stopped", description);
            return;
        }

        Self::add_event(&mut state, event);

        // If no debounce is currently scheduled, arm a short one; events
        // arriving while a timer is armed merge without resetting it.
        if state.waker.is_none() {
            Self::arm_waker(&self.shared, &mut state, self.shared.config.initial_debounce);
        }

        debug!("Scheduling {} to be transmitted", description);

        if state.worker.is_none() {
            self.start_worker(&mut state);
        }
    }

    /// Flush pending events and shut the scheduler down
    ///
    /// Cancels any armed debounce timer, closes the batch queue and blocks
    /// until the worker has attempted every batch it already accepted.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        let (waker, worker) = {
            let mut state = self.shared.state.lock().await;

            // Flush whatever is pending before closing the queue. A prior
            // stop leaves the queue closed; the push logs and drops in
            // that case rather than failing.
            Self::push_events(&self.shared, &mut state);

            if let Some(waker) = &state.waker {
                waker.abort();
            }

            // Dropping the sender closes the queue: further pushes are
            // rejected and the worker exits once drained.
            state.batch_tx = None;

            (state.waker.take(), state.worker.take())
        };

        // Await the tasks outside the lock; the aborted waker may be
        // parked on it.
        if let Some(waker) = waker {
            let _ = waker.await;
        }
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    // Must be called with the state lock held.
    fn add_event(state: &mut State, event: Event) {
        // Remove redundant events, keeping the newly added one, which
        // carries the most recent timestamp.
        state.pending.retain(|existing| {
            if !event.redundant(existing) {
                return true;
            }

            debug!(
                "Replacing previously scheduled {}",
                Event::describe(std::slice::from_ref(existing))
            );

            false
        });

        state.pending.push(event);
    }

    // Must be called with the state lock held. Replaces any armed timer.
    fn arm_waker(shared: &Arc<Shared>, state: &mut State, debounce: Duration) {
        if let Some(waker) = state.waker.take() {
            waker.abort();
        }

        let shared = Arc::clone(shared);
        state.waker = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let mut state = shared.state.lock().await;
            // This timer has fired; forget its handle so the next event
            // arms a fresh one.
            state.waker = None;
            Scheduler::push_events(&shared, &mut state);
        }));
    }

    // Must be called with the state lock held. Pushes the pending events
    // as one batch and schedules the longer between-transmissions
    // debounce, so a burst coalesces into at most one flush per interval.
    fn push_events(shared: &Arc<Shared>, state: &mut State) {
        if state.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut state.pending);

        match &state.batch_tx {
            Some(batch_tx) => {
                if batch_tx.send(batch).is_err() {
                    debug!("Dropping check-in batch: the batch queue is closed");
                    return;
                }
            }
            None => {
                debug!("Dropping check-in batch: the scheduler is stopped");
                return;
            }
        }

        Self::arm_waker(shared, state, shared.config.between_transmissions_debounce);
    }

    // Must be called with the state lock held.
    fn start_worker(&self, state: &mut State) {
        let Some(mut batch_rx) = state.batch_rx.take() else {
            return;
        };
        let transmitter = Arc::clone(&self.transmitter);

        state.worker = Some(tokio::spawn(async move {
            // Single long-lived consumer. The lock is never held while
            // transmitting, so network latency cannot stall producers.
            // Exits once the queue is closed and drained.
            while let Some(mut batch) = batch_rx.recv().await {
                deduplicate_cron(&mut batch);
                transmit_batch(transmitter.as_ref(), &batch).await;
            }
        }));
    }
}

/// One transmission attempt for one batch; all failures are logged and
/// swallowed here
async fn transmit_batch(transmitter: &dyn Transmitter, batch: &[Event]) {
    let description = Event::describe(batch);

    let body = match encode_ndjson(batch) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to encode {}", description);
            telemetry::record_checkin_batch_failed("encoding");
            return;
        }
    };

    match transmitter.transmit(body, PayloadFormat::Ndjson).await {
        Ok(response) if response.is_success() => {
            debug!("Transmitted {}", description);
            telemetry::record_checkin_events_transmitted(batch.len());
        }
        Ok(response) => {
            error!(
                status = response.code,
                "Failed to transmit {}: {} status code", description, response.code
            );
            telemetry::record_checkin_batch_failed("status");
        }
        Err(e) => {
            error!(error = %e, "Failed to transmit {}", description);
            telemetry::record_checkin_batch_failed("transport");
        }
    }
}
