//! # brigade-queue
//!
//! The work-queue contract between the API server (producer) and the
//! scheduler (consumer).
//!
//! Each Project has two logical queues, `workers` and `jobs`, carrying
//! small opaque tokens; the state store remains the source of truth for
//! everything the token refers to. The contract is:
//!
//! - **Durable FIFO** per queue, at-least-once delivery
//! - **Visibility timeout** per delivery: a message neither acked nor
//!   nacked becomes deliverable again
//! - **Explicit ack/nack**, with exponential redelivery backoff on nack
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: the same interface fits AMQP, SQS, or the
//!   in-memory queue used for tests and local development
//! - **Small payloads**: tokens identify work; they never carry it

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod memory;
mod token;

pub use memory::InMemoryQueueBackend;
pub use token::{JobToken, WorkerToken};

use async_trait::async_trait;

use brigade_core::{ProjectId, Result};

/// The two logical queues every Project has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Worker tokens, one per Event.
    Workers,
    /// Job tokens, one per created Job.
    Jobs,
}

impl QueueKind {
    /// The queue-name fragment for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workers => "workers",
            Self::Jobs => "jobs",
        }
    }
}

/// Identifies one Project-scoped queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRef {
    /// The owning Project.
    pub project_id: ProjectId,
    /// Which of the Project's queues.
    pub kind: QueueKind,
}

impl QueueRef {
    /// Creates a queue reference.
    #[must_use]
    pub const fn new(project_id: ProjectId, kind: QueueKind) -> Self {
        Self { project_id, kind }
    }

    /// The backend-level queue name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind.as_str(), self.project_id)
    }
}

/// Writes tokens to one queue.
#[async_trait]
pub trait QueueWriter: Send + Sync {
    /// Appends a token to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`brigade_core::Error::BackendUnavailable`] if the queue
    /// backend cannot accept the message; the caller decides whether that
    /// is fatal (the API server marks the Worker `SCHEDULING_FAILED`).
    async fn write(&self, payload: Vec<u8>) -> Result<()>;
}

/// A single received message, pending ack or nack.
///
/// Dropping a delivery without acking leaves the message invisible until
/// its visibility timeout lapses, after which it is redelivered: consumer
/// crashes never lose tokens.
#[async_trait]
pub trait Delivery: Send {
    /// The message payload.
    fn payload(&self) -> &[u8];

    /// How many times this message has been delivered (1 on first
    /// delivery).
    fn attempt(&self) -> u32;

    /// Acknowledges the message, removing it from the queue.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negatively acknowledges the message. It will be redelivered after
    /// an exponential backoff.
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// Reads tokens from one queue.
#[async_trait]
pub trait QueueReader: Send + Sync {
    /// Receives the next available message, waiting until one is
    /// deliverable.
    ///
    /// Cancellation is the caller's concern: wrap the future in a
    /// `select!` against the component's shutdown signal.
    async fn receive(&self) -> Result<Box<dyn Delivery>>;
}

/// A queue backend: hands out writers and readers for Project queues.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Returns a writer for the given queue, creating it if necessary.
    async fn writer(&self, queue: &QueueRef) -> Result<Box<dyn QueueWriter>>;

    /// Returns a reader for the given queue, creating it if necessary.
    async fn reader(&self, queue: &QueueRef) -> Result<Box<dyn QueueReader>>;
}
