//! Pod sync loops: observed pod phases become Worker/Job status.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, watch};

use brigade_core::naming::{COMPONENT_JOB, COMPONENT_WORKER, LABEL_COMPONENT, LABEL_EVENT, LABEL_JOB};
use brigade_core::{Error, EventId, Phase, WorkloadStatus};
use brigade_substrate::{LabelSelector, PodEvent, PodEventStream as _, PodPhase, PodSnapshot};

use brigade_client::{JobsClient as _, WorkersClient as _};

use crate::metrics_names;
use crate::Observer;

/// Map key for the in-flight deletion set.
fn namespaced_pod_name(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

fn pod_event_id(pod: &PodSnapshot) -> Option<EventId> {
    pod.label(LABEL_EVENT)?.parse().ok()
}

impl Observer {
    pub(crate) async fn sync_worker_pods(
        self: Arc<Self>,
        error_tx: mpsc::Sender<Error>,
        mut stop: watch::Receiver<bool>,
    ) {
        let selector = LabelSelector::new().with(LABEL_COMPONENT, COMPONENT_WORKER);
        let mut pod_events = match self.substrate.watch_pods(selector).await {
            Ok(watch) => watch,
            Err(err) => {
                let _ = error_tx.send(err).await;
                return;
            }
        };

        loop {
            let event = tokio::select! {
                _ = stop.changed() => return,
                next = pod_events.next() => match next {
                    Ok(event) => event,
                    Err(err) => {
                        let _ = error_tx.send(err).await;
                        return;
                    }
                },
            };
            match event {
                PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                    self.clone().sync_worker_pod(&pod).await;
                }
                PodEvent::Deleted(pod) => self.worker_pod_deleted(&pod).await,
                PodEvent::Resync(pods) => {
                    counter!(metrics_names::WATCH_RESYNCS).increment(1);
                    for pod in pods {
                        self.clone().sync_worker_pod(&pod).await;
                    }
                }
            }
        }
    }

    async fn sync_worker_pod(self: Arc<Self>, pod: &PodSnapshot) {
        let Some(event_id) = pod_event_id(pod) else {
            tracing::warn!(pod = %pod.name, "worker pod has no usable event label");
            return;
        };
        counter!(metrics_names::WORKER_POD_SYNCS).increment(1);

        match pod.phase {
            // Nothing to report until the pod actually runs.
            PodPhase::Pending => {}
            PodPhase::Running => {
                self.report_worker_phase(event_id, Phase::Running, None).await;
            }
            PodPhase::Succeeded => {
                self.finalize_worker(pod, event_id, Phase::Succeeded, None)
                    .await;
            }
            PodPhase::Failed => {
                self.finalize_worker(
                    pod,
                    event_id,
                    Phase::Failed,
                    Some("worker pod failed".to_string()),
                )
                .await;
            }
        }
    }

    async fn worker_pod_deleted(&self, pod: &PodSnapshot) {
        // Deletion after a terminal phase is routine (usually our own
        // cleanup). Deletion of a live pod means we lost track of it.
        if pod.phase.is_terminal() {
            return;
        }
        let Some(event_id) = pod_event_id(pod) else {
            return;
        };
        tracing::warn!(pod = %pod.name, event_id = %event_id, "worker pod vanished; marking UNKNOWN");
        self.report_worker_phase(event_id, Phase::Unknown, None).await;
    }

    async fn report_worker_phase(&self, event_id: EventId, phase: Phase, error: Option<String>) {
        let mut status = WorkloadStatus::with_phase(phase);
        status.error = error;
        if let Err(err) = self.workers.update_status(event_id, status).await {
            // Transient; the next pod event or resync tries again.
            tracing::warn!(event_id = %event_id, phase = %phase, error = %err, "worker status update failed");
        }
    }

    async fn finalize_worker(
        self: Arc<Self>,
        pod: &PodSnapshot,
        event_id: EventId,
        phase: Phase,
        error: Option<String>,
    ) {
        self.report_worker_phase(event_id, phase, error).await;

        let key = namespaced_pod_name(&pod.namespace, &pod.name);
        {
            let mut deleting = self.deleting_pods.lock().expect("deletion set lock poisoned");
            if !deleting.insert(key.clone()) {
                return;
            }
        }

        let observer = self;
        tokio::spawn(async move {
            // Leave the pod around long enough for log collectors.
            tokio::time::sleep(observer.config.delay_before_cleanup).await;
            if let Err(err) = observer.workers.cleanup(event_id).await {
                tracing::warn!(event_id = %event_id, error = %err, "worker cleanup failed");
            } else {
                counter!(metrics_names::CLEANUPS).increment(1);
            }
            observer
                .deleting_pods
                .lock()
                .expect("deletion set lock poisoned")
                .remove(&key);
        });
    }

    pub(crate) async fn sync_job_pods(
        self: Arc<Self>,
        error_tx: mpsc::Sender<Error>,
        mut stop: watch::Receiver<bool>,
    ) {
        let selector = LabelSelector::new().with(LABEL_COMPONENT, COMPONENT_JOB);
        let mut pod_events = match self.substrate.watch_pods(selector).await {
            Ok(watch) => watch,
            Err(err) => {
                let _ = error_tx.send(err).await;
                return;
            }
        };

        loop {
            let event = tokio::select! {
                _ = stop.changed() => return,
                next = pod_events.next() => match next {
                    Ok(event) => event,
                    Err(err) => {
                        let _ = error_tx.send(err).await;
                        return;
                    }
                },
            };
            match event {
                PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                    self.clone().sync_job_pod(&pod).await;
                }
                PodEvent::Deleted(pod) => self.job_pod_deleted(&pod).await,
                PodEvent::Resync(pods) => {
                    counter!(metrics_names::WATCH_RESYNCS).increment(1);
                    for pod in pods {
                        self.clone().sync_job_pod(&pod).await;
                    }
                }
            }
        }
    }

    async fn sync_job_pod(self: Arc<Self>, pod: &PodSnapshot) {
        let Some((event_id, job_name)) = job_identity(pod) else {
            tracing::warn!(pod = %pod.name, "job pod has no usable event/job labels");
            return;
        };
        counter!(metrics_names::JOB_POD_SYNCS).increment(1);

        match pod.phase {
            PodPhase::Pending => {}
            PodPhase::Running => {
                self.report_job_phase(event_id, &job_name, Phase::Running, None)
                    .await;
            }
            PodPhase::Succeeded => {
                self.finalize_job(pod, event_id, &job_name, Phase::Succeeded, None)
                    .await;
            }
            PodPhase::Failed => {
                self.finalize_job(
                    pod,
                    event_id,
                    &job_name,
                    Phase::Failed,
                    Some("job pod failed".to_string()),
                )
                .await;
            }
        }
    }

    async fn job_pod_deleted(&self, pod: &PodSnapshot) {
        if pod.phase.is_terminal() {
            return;
        }
        let Some((event_id, job_name)) = job_identity(pod) else {
            return;
        };
        tracing::warn!(pod = %pod.name, event_id = %event_id, job = %job_name, "job pod vanished; marking UNKNOWN");
        self.report_job_phase(event_id, &job_name, Phase::Unknown, None)
            .await;
    }

    async fn report_job_phase(
        &self,
        event_id: EventId,
        job_name: &str,
        phase: Phase,
        error: Option<String>,
    ) {
        let mut status = WorkloadStatus::with_phase(phase);
        status.error = error;
        if let Err(err) = self.jobs.update_status(event_id, job_name, status).await {
            tracing::warn!(
                event_id = %event_id,
                job = %job_name,
                phase = %phase,
                error = %err,
                "job status update failed"
            );
        }
    }

    async fn finalize_job(
        self: Arc<Self>,
        pod: &PodSnapshot,
        event_id: EventId,
        job_name: &str,
        phase: Phase,
        error: Option<String>,
    ) {
        // A job finishing never finishes the worker; the worker script
        // watches its own jobs.
        self.report_job_phase(event_id, job_name, phase, error).await;

        let key = namespaced_pod_name(&pod.namespace, &pod.name);
        {
            let mut deleting = self.deleting_pods.lock().expect("deletion set lock poisoned");
            if !deleting.insert(key.clone()) {
                return;
            }
        }

        let observer = self;
        let job_name = job_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(observer.config.delay_before_cleanup).await;
            if let Err(err) = observer.jobs.cleanup(event_id, &job_name).await {
                tracing::warn!(event_id = %event_id, job = %job_name, error = %err, "job cleanup failed");
            } else {
                counter!(metrics_names::CLEANUPS).increment(1);
            }
            observer
                .deleting_pods
                .lock()
                .expect("deletion set lock poisoned")
                .remove(&key);
        });
    }
}

fn job_identity(pod: &PodSnapshot) -> Option<(EventId, String)> {
    let event_id = pod_event_id(pod)?;
    let job_name = pod.label(LABEL_JOB)?.to_string();
    Some((event_id, job_name))
}
