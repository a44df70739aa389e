//! Event queue and dispatcher
//!
//! Events are buffered in arrival order and delivered in batches. A failed
//! awaited delivery puts the batch back at the front of the buffer so the
//! order seen by the collector never changes; each event carries its own
//! attempt count and is dropped once it reaches `max_retries`.
//!
//! Teardown uses a fire-and-forget beacon that never comes back to the queue.

use super::transport::Transport;
use crate::clock::{to_std, SharedClock};
use crate::config::CollectorConfig;
use crate::error::DeliveryError;
use crate::types::Event;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why an enqueue wants an early flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    None,
    BatchFull,
    Critical,
}

/// What a flush attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered
    Empty,
    /// Timer tick before the interval elapsed
    NotDue,
    /// Another awaited flush is in flight
    Skipped,
    Delivered(usize),
    /// Delivery failed; `requeued` events went back, `dropped` were lost
    Failed { requeued: usize, dropped: usize },
    /// Handed to the beacon without waiting
    Beaconed(usize),
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub delivered: u64,
    pub lost: u64,
    pub retried_batches: u64,
    pub buffered: usize,
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: Event,
    attempts: u32,
}

/// Ordered, retrying event buffer
pub struct EventQueue {
    buffer: Mutex<VecDeque<QueuedEvent>>,
    transport: Arc<dyn Transport>,
    clock: SharedClock,
    batch_size: usize,
    flush_interval: Duration,
    request_timeout: std::time::Duration,
    max_retries: u32,
    in_flight: AtomicBool,
    retry_pending: AtomicBool,
    last_attempt: Mutex<DateTime<Utc>>,
    wake: Notify,
    delivered: AtomicU64,
    lost: AtomicU64,
    retried_batches: AtomicU64,
}

impl EventQueue {
    /// Create new queue delivering through `transport`
    pub fn new(config: &CollectorConfig, transport: Arc<dyn Transport>, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            buffer: Mutex::new(VecDeque::new()),
            transport,
            clock,
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_std(config.flush_interval)
                .unwrap_or_else(|_| Duration::seconds(5)),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries.max(1),
            in_flight: AtomicBool::new(false),
            retry_pending: AtomicBool::new(false),
            last_attempt: Mutex::new(now),
            wake: Notify::new(),
            delivered: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            retried_batches: AtomicU64::new(0),
        }
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event; never blocks on I/O
    pub fn enqueue(&self, event: Event) -> FlushTrigger {
        let critical = event.event_type.is_critical();
        let len = {
            let mut buffer = self.buffer();
            buffer.push_back(QueuedEvent { event, attempts: 0 });
            buffer.len()
        };

        let trigger = if critical {
            FlushTrigger::Critical
        } else if len >= self.batch_size {
            FlushTrigger::BatchFull
        } else {
            FlushTrigger::None
        };
        if trigger != FlushTrigger::None {
            self.wake.notify_one();
        }
        trigger
    }

    /// Deliver everything buffered
    ///
    /// `immediate` hands the batch to the transport beacon and returns at once.
    pub async fn flush(&self, immediate: bool) -> FlushOutcome {
        if immediate {
            return self.beacon();
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in flight, skipping");
            return FlushOutcome::Skipped;
        }
        let outcome = self.deliver().await;
        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    /// Timer hook: flush when the interval elapsed or a retry is waiting
    pub async fn tick(&self) -> FlushOutcome {
        if self.buffer().is_empty() {
            return FlushOutcome::Empty;
        }
        let elapsed = self.clock.now() - *self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        if elapsed < self.flush_interval && !self.retry_pending.load(Ordering::Acquire) {
            return FlushOutcome::NotDue;
        }
        self.flush(false).await
    }

    async fn deliver(&self) -> FlushOutcome {
        let batch: Vec<QueuedEvent> = self.buffer().drain(..).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        *self.last_attempt.lock().unwrap_or_else(|e| e.into_inner()) = self.clock.now();

        let events: Vec<Event> = batch.iter().map(|q| q.event.clone()).collect();
        let result = match timeout(self.request_timeout, self.transport.send(&events)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.request_timeout.as_millis() as u64)),
        };

        match result {
            Ok(()) => {
                let count = batch.len();
                self.delivered.fetch_add(count as u64, Ordering::Relaxed);
                self.retry_pending.store(false, Ordering::Release);
                debug!("Delivered {} events", count);
                FlushOutcome::Delivered(count)
            }
            Err(e) if e.is_permanent() => {
                let dropped = batch.len();
                self.lost.fetch_add(dropped as u64, Ordering::Relaxed);
                self.retry_pending.store(false, Ordering::Release);
                warn!("Collector rejected batch ({}), dropping {} events", e, dropped);
                FlushOutcome::Failed {
                    requeued: 0,
                    dropped,
                }
            }
            Err(e) => self.requeue(batch, &e),
        }
    }

    fn requeue(&self, batch: Vec<QueuedEvent>, error: &DeliveryError) -> FlushOutcome {
        let mut dropped = 0;
        let survivors: Vec<QueuedEvent> = batch
            .into_iter()
            .filter_map(|mut queued| {
                queued.attempts += 1;
                if queued.attempts >= self.max_retries {
                    dropped += 1;
                    None
                } else {
                    Some(queued)
                }
            })
            .collect();

        if dropped > 0 {
            self.lost.fetch_add(dropped as u64, Ordering::Relaxed);
            warn!(
                "Dropping {} events after {} attempts: {}",
                dropped, self.max_retries, error
            );
        }

        let requeued = survivors.len();
        if requeued > 0 {
            let mut buffer = self.buffer();
            // Ahead of anything enqueued while the request was in flight
            for queued in survivors.into_iter().rev() {
                buffer.push_front(queued);
            }
            self.retried_batches.fetch_add(1, Ordering::Relaxed);
            self.retry_pending.store(true, Ordering::Release);
            debug!("Requeued {} events after failure: {}", requeued, error);
        } else {
            self.retry_pending.store(false, Ordering::Release);
        }

        FlushOutcome::Failed { requeued, dropped }
    }

    /// Hand everything buffered to the transport beacon without waiting
    pub fn beacon(&self) -> FlushOutcome {
        let events: Vec<Event> = self.buffer().drain(..).map(|q| q.event).collect();
        if events.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = events.len();
        self.transport.beacon(events);
        FlushOutcome::Beaconed(count)
    }

    /// Resolves after a critical or batch-full enqueue
    pub async fn notified(&self) {
        self.wake.notified().await
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            retried_batches: self.retried_batches.load(Ordering::Relaxed),
            buffered: self.buffer().len(),
        }
    }

    /// Snapshot of the buffered events in delivery order
    pub fn pending(&self) -> Vec<Event> {
        self.buffer().iter().map(|q| q.event.clone()).collect()
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        to_std(self.flush_interval)
    }
}

/// Production driver for an [`EventQueue`]
pub struct Dispatcher;

impl Dispatcher {
    /// Spawn the flush loop; cancelling `shutdown` sends a final beacon
    pub fn spawn(queue: Arc<EventQueue>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = (queue.flush_interval() / 5).max(std::time::Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Event dispatcher started (tick every {:?})", period);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let outcome = queue.flush(true).await;
                        info!("Event dispatcher stopped: {:?}", outcome);
                        break;
                    }
                    _ = queue.notified() => {
                        log_outcome(queue.flush(false).await);
                    }
                    _ = ticker.tick() => {
                        log_outcome(queue.tick().await);
                    }
                }
            }
        })
    }
}

fn log_outcome(outcome: FlushOutcome) {
    match outcome {
        FlushOutcome::Failed { requeued, dropped } => {
            debug!("Flush failed: {} requeued, {} dropped", requeued, dropped)
        }
        FlushOutcome::Delivered(n) => debug!("Flushed {} events", n),
        _ => {}
    }
}
