//! The Events service: creation, reads, and cancellation.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;

use brigade_core::{
    Error, Event, EventId, EventSelector, NewEvent, Phase, Principal, ProjectRole, Result, Role,
    Worker, WorkloadStatus,
};
use brigade_queue::{QueueBackend, QueueKind, QueueRef, QueueWriter as _, WorkerToken};

use crate::auth::{generate_token, hash_token, Authorizer};
use crate::metrics::names as metrics_names;
use crate::store::{modify_event, EventsStore, ProjectsStore};
use crate::watch::StatusWatchHub;

/// Authoritative operations on Events.
pub struct EventsService {
    projects: Arc<dyn ProjectsStore>,
    events: Arc<dyn EventsStore>,
    queues: Arc<dyn QueueBackend>,
    authorizer: Arc<Authorizer>,
    watch_hub: Arc<StatusWatchHub>,
}

impl EventsService {
    /// Creates the service over its collaborators.
    pub fn new(
        projects: Arc<dyn ProjectsStore>,
        events: Arc<dyn EventsStore>,
        queues: Arc<dyn QueueBackend>,
        authorizer: Arc<Authorizer>,
        watch_hub: Arc<StatusWatchHub>,
    ) -> Self {
        Self {
            projects,
            events,
            queues,
            authorizer,
            watch_hub,
        }
    }

    /// Creates an Event: assigns an ID, materializes the pending Worker
    /// from the Project's template, persists, and enqueues one Worker
    /// token.
    ///
    /// # Errors
    ///
    /// Requires `EVENT_CREATOR` scoped to the Event's source. `NOT_FOUND`
    /// if the Project does not exist. If the token cannot be enqueued the
    /// Worker is marked `SCHEDULING_FAILED` and the queue error is
    /// surfaced.
    pub async fn create(&self, principal: &Principal, new_event: NewEvent) -> Result<Event> {
        self.authorizer
            .require_role(principal, Role::EventCreator, &new_event.source)
            .await?;
        if new_event.source.trim().is_empty() {
            return Err(Error::invalid("event source must not be empty"));
        }

        let project = self.projects.get(&new_event.project_id).await?;

        let event = Event {
            id: EventId::generate(),
            project_id: new_event.project_id,
            source: new_event.source,
            event_type: new_event.event_type,
            payload: new_event.payload,
            created_at: Utc::now(),
            worker: Worker::new(project.spec.worker_template.clone()),
        };

        // Only the digest is persisted; the plaintext token reaches the
        // Worker through the event secret the substrate mounts.
        let worker_token = generate_token();
        self.events
            .create(event.clone(), hash_token(&worker_token))
            .await?;

        let queue = QueueRef::new(event.project_id.clone(), QueueKind::Workers);
        let token = WorkerToken { event_id: event.id };
        let enqueue_result = match self.queues.writer(&queue).await {
            Ok(writer) => writer.write(token.encode()?).await,
            Err(err) => Err(err),
        };

        if let Err(queue_err) = enqueue_result {
            tracing::error!(
                event_id = %event.id,
                error = %queue_err,
                "failed to enqueue worker token; marking event SCHEDULING_FAILED"
            );
            let failed = modify_event(self.events.as_ref(), event.id, |event| {
                event.worker.status = event.worker.status.transition_to(
                    Phase::SchedulingFailed,
                    Some(format!("enqueueing worker token: {queue_err}")),
                    Utc::now(),
                )?;
                Ok(())
            })
            .await;
            if let Ok(event) = failed {
                self.watch_hub.publish_worker(event.id, &event.worker.status);
            }
            return Err(queue_err);
        }

        counter!(metrics_names::EVENTS_CREATED).increment(1);
        Ok(event)
    }

    /// Fetches one Event. Requires `READER`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the Event does not exist.
    pub async fn get(&self, principal: &Principal, event_id: EventId) -> Result<Event> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        Ok(self.events.get(event_id).await?.event)
    }

    /// Lists Events matching the selector. Requires `READER`.
    ///
    /// # Errors
    ///
    /// Surfaces store errors.
    pub async fn list(
        &self,
        principal: &Principal,
        selector: &EventSelector,
    ) -> Result<Vec<Event>> {
        self.authorizer
            .require_unscoped_role(principal, Role::Reader)
            .await?;
        self.events.list(selector).await
    }

    /// Cancels an Event's Worker: `PENDING` becomes `CANCELED`, a started
    /// Worker becomes `ABORTED`. Requires project role `USER` on the
    /// Event's project.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the Worker is already terminal.
    pub async fn cancel(&self, principal: &Principal, event_id: EventId) -> Result<()> {
        let stored = self.events.get(event_id).await?;
        self.authorizer
            .require_project_role(principal, ProjectRole::User, &stored.event.project_id)
            .await?;

        let event = modify_event(self.events.as_ref(), event_id, |event| {
            let target = cancellation_phase(&event.worker.status)?;
            event.worker.status =
                event
                    .worker
                    .status
                    .transition_to(target, Some("canceled by user".to_string()), Utc::now())?;
            Ok(())
        })
        .await?;

        self.watch_hub.publish_worker(event_id, &event.worker.status);
        counter!(metrics_names::EVENTS_CANCELED).increment(1);
        Ok(())
    }
}

/// Picks the cancellation target for the Worker's current phase.
fn cancellation_phase(status: &WorkloadStatus) -> Result<Phase> {
    if status.is_terminal() {
        return Err(Error::conflict(format!(
            "worker is already {}",
            status.phase
        )));
    }
    if status.phase.is_started() {
        Ok(Phase::Aborted)
    } else {
        Ok(Phase::Canceled)
    }
}
