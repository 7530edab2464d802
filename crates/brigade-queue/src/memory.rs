//! In-memory queue backend for tests and single-process deployments.
//!
//! Implements the full queue contract — FIFO delivery, visibility
//! timeouts, and nack backoff — against process-local state.
//!
//! ## Limitations
//!
//! - **Not durable**: all messages are lost when the process exits
//! - **Single-process only**: producers and consumers must share the
//!   backend instance

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;

use brigade_core::Result;

use crate::{Delivery, QueueBackend, QueueReader, QueueRef, QueueWriter};

/// Tuning for the in-memory queue.
#[derive(Debug, Clone, Copy)]
pub struct InMemoryQueueConfig {
    /// How long a delivery stays invisible before an unacked message is
    /// redelivered.
    pub visibility_timeout: Duration,
    /// First nack redelivery delay; doubles per delivery attempt.
    pub base_backoff: Duration,
    /// Upper bound on the nack redelivery delay.
    pub max_backoff: Duration,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl InMemoryQueueConfig {
    /// Redelivery delay after a nack on the given delivery attempt,
    /// with up to one `base_backoff` of jitter.
    fn nack_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_backoff);
        let jitter_ms = self.base_backoff.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

#[derive(Debug)]
struct Message {
    id: u64,
    payload: Vec<u8>,
    attempts: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    next_id: u64,
    pending: VecDeque<Message>,
    in_flight: HashMap<u64, InFlight>,
}

#[derive(Debug)]
struct QueueState {
    config: InMemoryQueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl QueueState {
    fn new(config: InMemoryQueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    fn push(&self, payload: Vec<u8>) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.pending.push_back(Message {
                id,
                payload,
                attempts: 0,
                visible_at: Instant::now(),
            });
        }
        self.notify.notify_one();
    }

    /// Takes the next deliverable message, or reports when one might
    /// become deliverable.
    fn try_take(&self) -> TakeOutcome {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let now = Instant::now();

        // Unacked deliveries whose visibility lapsed go back to pending.
        let expired: Vec<u64> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let f = inner.in_flight.remove(&id).expect("expired id present");
            let mut message = f.message;
            message.visible_at = now;
            inner.pending.push_back(message);
        }

        // FIFO among visible messages: lowest id first.
        let candidate = inner
            .pending
            .iter()
            .enumerate()
            .filter(|(_, m)| m.visible_at <= now)
            .min_by_key(|(_, m)| m.id)
            .map(|(idx, _)| idx);

        if let Some(idx) = candidate {
            let mut message = inner.pending.remove(idx).expect("candidate index valid");
            message.attempts += 1;
            let taken = TakenMessage {
                id: message.id,
                payload: message.payload.clone(),
                attempt: message.attempts,
            };
            inner.in_flight.insert(
                message.id,
                InFlight {
                    message,
                    deadline: now + self.config.visibility_timeout,
                },
            );
            return TakeOutcome::Taken(taken);
        }

        let next_wake = inner
            .pending
            .iter()
            .map(|m| m.visible_at)
            .chain(inner.in_flight.values().map(|f| f.deadline))
            .min();
        TakeOutcome::Empty { next_wake }
    }

    fn ack(&self, id: u64) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.in_flight.remove(&id);
    }

    fn nack(&self, id: u64) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let Some(f) = inner.in_flight.remove(&id) else {
            return;
        };
        let mut message = f.message;
        message.visible_at = Instant::now() + self.config.nack_backoff(message.attempts);
        inner.pending.push_back(message);
        drop(inner);
        self.notify.notify_one();
    }

    fn depth(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.pending.len() + inner.in_flight.len()
    }
}

#[derive(Debug)]
struct TakenMessage {
    id: u64,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Debug)]
enum TakeOutcome {
    Taken(TakenMessage),
    Empty { next_wake: Option<Instant> },
}

/// In-memory implementation of [`QueueBackend`].
#[derive(Debug)]
pub struct InMemoryQueueBackend {
    config: InMemoryQueueConfig,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new(InMemoryQueueConfig::default())
    }
}

impl InMemoryQueueBackend {
    /// Creates a backend with the given tuning.
    #[must_use]
    pub fn new(config: InMemoryQueueConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queue(&self, queue: &QueueRef) -> Arc<QueueState> {
        let mut queues = self.queues.lock().expect("backend lock poisoned");
        queues
            .entry(queue.name())
            .or_insert_with(|| Arc::new(QueueState::new(self.config)))
            .clone()
    }

    /// Total messages (pending + in flight) on the given queue.
    #[must_use]
    pub fn depth(&self, queue: &QueueRef) -> usize {
        self.queue(queue).depth()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn writer(&self, queue: &QueueRef) -> Result<Box<dyn QueueWriter>> {
        Ok(Box::new(MemoryQueueHandle {
            state: self.queue(queue),
        }))
    }

    async fn reader(&self, queue: &QueueRef) -> Result<Box<dyn QueueReader>> {
        Ok(Box::new(MemoryQueueHandle {
            state: self.queue(queue),
        }))
    }
}

#[derive(Debug)]
struct MemoryQueueHandle {
    state: Arc<QueueState>,
}

#[async_trait]
impl QueueWriter for MemoryQueueHandle {
    async fn write(&self, payload: Vec<u8>) -> Result<()> {
        self.state.push(payload);
        Ok(())
    }
}

#[async_trait]
impl QueueReader for MemoryQueueHandle {
    async fn receive(&self) -> Result<Box<dyn Delivery>> {
        loop {
            match self.state.try_take() {
                TakeOutcome::Taken(taken) => {
                    return Ok(Box::new(MemoryDelivery {
                        state: self.state.clone(),
                        id: taken.id,
                        payload: taken.payload,
                        attempt: taken.attempt,
                    }));
                }
                TakeOutcome::Empty { next_wake } => match next_wake {
                    Some(at) => {
                        tokio::select! {
                            () = self.state.notify.notified() => {}
                            () = tokio::time::sleep_until(at) => {}
                        }
                    }
                    None => self.state.notify.notified().await,
                },
            }
        }
    }
}

struct MemoryDelivery {
    state: Arc<QueueState>,
    id: u64,
    payload: Vec<u8>,
    attempt: u32,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.state.ack(self.id);
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.state.nack(self.id);
        Ok(())
    }
}
