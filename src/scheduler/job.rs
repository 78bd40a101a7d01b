//! Execution of a single frame as a batch job

use crate::core::{Action, Container, Frame, Play};
use crate::scheduler::{JOB_ANNOTATION_FRAME_ID, JOB_LABEL_PLAY, JOB_LABEL_PLAY_UID};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

const MAX_PLAY_NAME: usize = 46;
const MAX_FRAME_ID: usize = 16;

/// Deterministic execution name for a frame of a play
///
/// Resource names are limited to 63 characters, so this is at most 46
/// characters of the play name, a dash and 16 characters of the frame ID.
/// Recovery of already launched executions depends on this being stable.
pub fn job_name(play_name: &str, frame_id: &str) -> String {
    let play: String = play_name.chars().take(MAX_PLAY_NAME).collect();
    let frame: String = frame_id.chars().take(MAX_FRAME_ID).collect();
    format!("{}-{}", play, frame)
}

/// Labels selecting the executions of exactly this play
pub fn execution_labels(play: &Play) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(JOB_LABEL_PLAY.to_string(), play.name().to_string());
    labels.insert(JOB_LABEL_PLAY_UID.to_string(), play.metadata.uid.to_string());
    labels
}

/// Reference from an execution back to the play that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerReference {
    pub name: String,
    pub uid: Uuid,
}

/// A frame ready to be launched
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner: OwnerReference,
    pub action: Action,
}

impl Job {
    /// Build the execution for an (already expanded) frame
    pub fn for_frame(play: &Play, frame: &Frame) -> Self {
        let mut annotations = play.metadata.annotations.clone();
        annotations.insert(JOB_ANNOTATION_FRAME_ID.to_string(), frame.id.clone());

        let mut action = frame.action.clone().unwrap_or_default();
        action.labels.extend(execution_labels(play));
        if action.backoff_limit.is_none() {
            action.backoff_limit = Some(0);
        }
        if action.restart_policy.is_none() {
            action.restart_policy = Some("Never".to_string());
        }

        let labels = execution_labels(play);

        Self {
            name: job_name(play.name(), &frame.id),
            namespace: play.namespace().to_string(),
            labels,
            annotations,
            owner: OwnerReference {
                name: play.name().to_string(),
                uid: play.metadata.uid,
            },
            action,
        }
    }

    /// ID of the frame this job runs
    pub fn frame_id(&self) -> Option<&str> {
        self.annotations
            .get(JOB_ANNOTATION_FRAME_ID)
            .map(String::as_str)
    }

    /// Name of the play this job belongs to
    pub fn play(&self) -> Option<&str> {
        self.labels.get(JOB_LABEL_PLAY).map(String::as_str)
    }

    /// UID of the play this job belongs to
    pub fn play_uid(&self) -> Option<&str> {
        self.labels.get(JOB_LABEL_PLAY_UID).map(String::as_str)
    }

    /// Render as a `batch/v1` Job manifest
    pub fn to_manifest(&self) -> Result<Value, serde_json::Error> {
        let containers = self
            .action
            .containers
            .iter()
            .map(container_manifest)
            .collect::<Result<Vec<_>, _>>()?;
        let init_containers = self
            .action
            .init_containers
            .iter()
            .map(container_manifest)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": self.labels,
                "annotations": self.annotations,
                "ownerReferences": [{
                    "apiVersion": "stagehand.dev/v1alpha1",
                    "kind": "Play",
                    "name": self.owner.name,
                    "uid": self.owner.uid.to_string(),
                    "controller": true,
                }],
            },
            "spec": {
                "backoffLimit": self.action.backoff_limit,
                "template": {
                    "metadata": { "labels": self.action.labels },
                    "spec": {
                        "restartPolicy": self.action.restart_policy,
                        "containers": containers,
                        "initContainers": init_containers,
                        "volumes": serde_json::to_value(&self.action.volumes)?,
                    },
                },
            },
        }))
    }
}

fn container_manifest(container: &Container) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(container)?;
    if let Some(object) = value.as_object_mut() {
        if !container.env_from.is_empty() {
            let env_from: Vec<Value> = container
                .env_from
                .iter()
                .map(|e| json!({ "configMapRef": { "name": e.config_map_ref } }))
                .collect();
            object.insert("envFrom".to_string(), Value::Array(env_from));
        }
    }
    Ok(value)
}
