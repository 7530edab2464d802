//! Workload naming and labels.
//!
//! Pod, secret, and volume names are derived purely from Event IDs (and Job
//! names), which keeps workload creation idempotent across queue
//! redeliveries: a second attempt to create the same Worker produces the
//! same names and collides harmlessly.

use std::collections::BTreeMap;

use crate::id::EventId;

/// Label carrying the workload component kind (`worker` or `job`).
pub const LABEL_COMPONENT: &str = "brigade.sh/component";
/// Label carrying the owning Event ID.
pub const LABEL_EVENT: &str = "brigade.sh/event";
/// Label carrying the Job name (job pods only).
pub const LABEL_JOB: &str = "brigade.sh/job";
/// Label carrying the owning Project ID.
pub const LABEL_PROJECT: &str = "brigade.sh/project";

/// Component label value for Worker pods.
pub const COMPONENT_WORKER: &str = "worker";
/// Component label value for Job pods.
pub const COMPONENT_JOB: &str = "job";

/// Secret type for project secrets.
pub const SECRET_TYPE_PROJECT: &str = "brigade.sh/project-secrets";
/// Secret type for the Event payload secret.
pub const SECRET_TYPE_EVENT: &str = "brigade.sh/event";
/// Secret type for Job environment secrets.
pub const SECRET_TYPE_JOB: &str = "brigade.sh/job";

/// Maximum length Kubernetes accepts for a label value.
const MAX_LABEL_LEN: usize = 63;

fn event_fragment(event_id: EventId) -> String {
    // ULIDs are uppercase base32; object names must be lowercase.
    event_id.to_string().to_ascii_lowercase()
}

/// Name of the Worker pod for an Event.
#[must_use]
pub fn worker_pod_name(event_id: EventId) -> String {
    event_fragment(event_id)
}

/// Name of the workspace volume claim for an Event.
#[must_use]
pub fn workspace_volume_name(event_id: EventId) -> String {
    event_fragment(event_id)
}

/// Name of the secret carrying the Event payload.
#[must_use]
pub fn event_secret_name(event_id: EventId) -> String {
    event_fragment(event_id)
}

/// Name of a Job's pod.
#[must_use]
pub fn job_pod_name(event_id: EventId, job_name: &str) -> String {
    format!("{}-{}", event_fragment(event_id), job_name)
}

/// Name of a Job's environment secret.
#[must_use]
pub fn job_secret_name(event_id: EventId, job_name: &str) -> String {
    job_pod_name(event_id, job_name)
}

/// Labels applied to a Worker pod.
#[must_use]
pub fn worker_labels(project_id: &str, event_id: EventId) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_COMPONENT.to_string(), COMPONENT_WORKER.to_string());
    labels.insert(LABEL_EVENT.to_string(), truncate_label(&event_fragment(event_id)));
    labels.insert(LABEL_PROJECT.to_string(), truncate_label(project_id));
    labels
}

/// Labels applied to a Job pod.
#[must_use]
pub fn job_labels(
    project_id: &str,
    event_id: EventId,
    job_name: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_COMPONENT.to_string(), COMPONENT_JOB.to_string());
    labels.insert(LABEL_EVENT.to_string(), truncate_label(&event_fragment(event_id)));
    labels.insert(LABEL_JOB.to_string(), truncate_label(job_name));
    labels.insert(LABEL_PROJECT.to_string(), truncate_label(project_id));
    labels
}

/// Truncates a label value to the 63-character Kubernetes limit.
///
/// Values at or under the limit pass through unchanged. Longer values keep
/// their first 54 characters, an ellipsis, and their last 6 characters, so
/// a human reading pod labels can still match the tail of an identifier.
#[must_use]
pub fn truncate_label(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MAX_LABEL_LEN {
        return value.to_string();
    }
    let head: String = chars[..54].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn names_derive_purely_from_event_id() {
        let event_id = EventId::generate();
        assert_eq!(worker_pod_name(event_id), worker_pod_name(event_id));
        assert_eq!(worker_pod_name(event_id), workspace_volume_name(event_id));
        assert_eq!(
            job_pod_name(event_id, "build"),
            format!("{}-build", worker_pod_name(event_id))
        );
    }

    #[test]
    fn names_are_lowercase() {
        let event_id = EventId::generate();
        let name = worker_pod_name(event_id);
        assert_eq!(name, name.to_ascii_lowercase());
    }

    #[test]
    fn worker_labels_carry_component_event_and_project() {
        let event_id = EventId::generate();
        let labels = worker_labels("blue-book", event_id);
        assert_eq!(labels[LABEL_COMPONENT], COMPONENT_WORKER);
        assert_eq!(labels[LABEL_PROJECT], "blue-book");
        assert_eq!(labels[LABEL_EVENT], worker_pod_name(event_id));
        assert!(!labels.contains_key(LABEL_JOB));
    }

    #[test]
    fn job_labels_carry_job_name() {
        let event_id = EventId::generate();
        let labels = job_labels("blue-book", event_id, "build");
        assert_eq!(labels[LABEL_COMPONENT], COMPONENT_JOB);
        assert_eq!(labels[LABEL_JOB], "build");
    }

    #[test]
    fn short_labels_pass_through() {
        assert_eq!(truncate_label(""), "");
        assert_eq!(truncate_label("worker"), "worker");
        let exactly_63 = "a".repeat(63);
        assert_eq!(truncate_label(&exactly_63), exactly_63);
    }

    #[test]
    fn long_labels_keep_head_ellipsis_and_tail() {
        let value = format!("{}{}", "a".repeat(60), "ending");
        let truncated = truncate_label(&value);
        assert_eq!(truncated.len(), 63);
        assert_eq!(&truncated[..54], &"a".repeat(54)[..]);
        assert_eq!(&truncated[54..57], "...");
        assert_eq!(&truncated[57..], "ending");
    }

    proptest! {
        #[test]
        fn truncation_never_exceeds_the_limit(value in "[a-zA-Z0-9._-]{0,200}") {
            let truncated = truncate_label(&value);
            prop_assert!(truncated.len() <= MAX_LABEL_LEN);
            if value.len() <= MAX_LABEL_LEN {
                prop_assert_eq!(truncated, value);
            } else {
                prop_assert_eq!(&truncated[..54], &value[..54]);
                prop_assert_eq!(&truncated[54..57], "...");
                prop_assert_eq!(&truncated[57..], &value[value.len() - 6..]);
            }
        }
    }
}
