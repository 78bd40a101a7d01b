//! Cluster client backed by the kubectl CLI

use crate::core::FrameResult;
use crate::scheduler::{
    ClusterClient, Job, ObservedJob, Resource, SchedulerError, JOB_ANNOTATION_FRAME_ID,
    JOB_LABEL_PLAY_UID,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Talks to the cluster by running kubectl as a subprocess
#[derive(Debug, Clone)]
pub struct KubectlClient {
    /// Path to the kubectl executable
    kubectl_path: String,

    /// Timeout for every kubectl invocation in seconds
    timeout_secs: u64,
}

impl KubectlClient {
    pub fn new(kubectl_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            timeout_secs,
        }
    }

    /// Run kubectl with `args`, optionally feeding `stdin`
    async fn kubectl(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, SchedulerError> {
        debug!("kubectl {}", args.join(" "));

        let mut child = Command::new(&self.kubectl_path)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
        }

        timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| SchedulerError::Timeout(self.timeout_secs))?
            .map_err(SchedulerError::from)
    }

    /// Map a failed invocation onto the scheduler's error kinds
    fn failure(output: &Output, kind: &str, name: &str) -> SchedulerError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("AlreadyExists") {
            SchedulerError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        } else if stderr.contains("NotFound") {
            SchedulerError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!("kubectl exited with code {}: {}", code, stderr.trim());
            SchedulerError::Api(format!("kubectl exited with code {}: {}", code, stderr.trim()))
        }
    }

    async fn apply_manifest(&self, manifest: &Value, kind: &str, name: &str) -> Result<(), SchedulerError> {
        let body = serde_json::to_vec(manifest)?;
        let output = self.kubectl(&["create", "-f", "-"], Some(&body)).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure(&output, kind, name))
        }
    }
}

/// Extract what the scheduler cares about from a Job object
fn parse_job(value: &Value) -> ObservedJob {
    let metadata = &value["metadata"];
    let name = metadata["name"].as_str().unwrap_or_default().to_string();
    let frame_id = metadata["annotations"][JOB_ANNOTATION_FRAME_ID]
        .as_str()
        .map(str::to_string);
    let play_uid = metadata["labels"][JOB_LABEL_PLAY_UID]
        .as_str()
        .map(str::to_string);

    let result = value["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|c| c["status"] == "True")
        .find_map(|c| match c["type"].as_str() {
            Some("Complete") => Some(FrameResult::Successful),
            Some("Failed") => Some(FrameResult::Failed),
            _ => None,
        });

    ObservedJob {
        name,
        frame_id,
        play_uid,
        result,
    }
}

fn selector_arg(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedJob>, SchedulerError> {
        let output = self
            .kubectl(&["get", "job", name, "-n", namespace, "-o", "json"], None)
            .await?;
        if !output.status.success() {
            return match Self::failure(&output, "Job", name) {
                SchedulerError::NotFound { .. } => Ok(None),
                e => Err(e),
            };
        }
        let value: Value = serde_json::from_slice(&output.stdout)?;
        Ok(Some(parse_job(&value)))
    }

    async fn create_job(&self, job: &Job) -> Result<(), SchedulerError> {
        self.apply_manifest(&job.to_manifest()?, "Job", &job.name).await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        let output = self
            .kubectl(&["delete", "job", name, "-n", namespace], None)
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure(&output, "Job", name))
        }
    }

    async fn list_jobs(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<ObservedJob>, SchedulerError> {
        let selector = selector_arg(selector);
        let output = self
            .kubectl(
                &["get", "jobs", "-n", namespace, "-l", &selector, "-o", "json"],
                None,
            )
            .await?;
        if !output.status.success() {
            return Err(Self::failure(&output, "Job", &selector));
        }
        let value: Value = serde_json::from_slice(&output.stdout)?;
        Ok(value["items"]
            .as_array()
            .into_iter()
            .flatten()
            .map(parse_job)
            .collect())
    }

    async fn create(&self, resource: &Resource) -> Result<(), SchedulerError> {
        self.apply_manifest(&resource.to_manifest(), &resource.kind, &resource.name)
            .await
    }

    async fn delete(&self, resource: &Resource) -> Result<(), SchedulerError> {
        let kind = resource.kind.to_lowercase();
        let output = self
            .kubectl(
                &["delete", &kind, &resource.name, "-n", &resource.namespace],
                None,
            )
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure(&output, &resource.kind, &resource.name))
        }
    }
}
