//! Schedulers - where frames actually run
//!
//! A [`Scheduler`] launches frames and provisions the resources a
//! screenplay needs. Every operation is idempotent: launching a frame whose
//! execution already exists, creating a resource that is already there or
//! deleting one that is already gone all succeed without side effects. The
//! flow engine relies on this to retry partially dispatched groups safely.

pub mod cluster;
pub mod job;
pub mod kubectl;
pub mod local;
pub mod resource;
pub mod stub;

use crate::core::config::{EngineConfig, SchedulerKind};
use crate::core::{Frame, FrameResult, Play};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use cluster::{ClusterClient, ClusterScheduler, InMemoryCluster, ObservedJob};
pub use job::{execution_labels, job_name, Job};
pub use kubectl::KubectlClient;
pub use local::LocalScheduler;
pub use resource::Resource;
pub use stub::RecordingScheduler;

/// Label carrying the name of the play that owns an execution
pub const JOB_LABEL_PLAY: &str = "stagehand.dev/play";

/// Label carrying the UID of that play, telling apart plays that reuse a name
pub const JOB_LABEL_PLAY_UID: &str = "stagehand.dev/play-uid";

/// Annotation carrying the ID of the frame an execution belongs to
pub const JOB_ANNOTATION_FRAME_ID: &str = "stagehand.dev/frame-id";

/// Seconds a single kubectl invocation may take
const KUBECTL_TIMEOUT_SECS: u64 = 60;

/// Error types for scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to launch {name}: {reason}")]
    Launch { name: String, reason: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("cluster API error: {0}")]
    Api(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Executes frames and manages screenplay resources
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Launch `frame` for `play`; a no-op if its execution already exists
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError>;

    /// Create resources, treating "already exists" as success
    async fn provision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError>;

    /// Delete resources, treating "not found" as success
    async fn deprovision(&self, play: &Play, resources: &[Resource])
        -> Result<(), SchedulerError>;

    /// Results of the play's executions that have concluded, keyed by frame ID
    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError>;
}

#[async_trait]
impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError> {
        (**self).run(play, frame).await
    }

    async fn provision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        (**self).provision(play, resources).await
    }

    async fn deprovision(
        &self,
        play: &Play,
        resources: &[Resource],
    ) -> Result<(), SchedulerError> {
        (**self).deprovision(play, resources).await
    }

    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError> {
        (**self).concluded(play).await
    }
}

#[async_trait]
impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError> {
        (**self).run(play, frame).await
    }

    async fn provision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        (**self).provision(play, resources).await
    }

    async fn deprovision(
        &self,
        play: &Play,
        resources: &[Resource],
    ) -> Result<(), SchedulerError> {
        (**self).deprovision(play, resources).await
    }

    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError> {
        (**self).concluded(play).await
    }
}

/// Build the scheduler backend selected by `config`
pub fn from_config(config: &EngineConfig) -> Arc<dyn Scheduler> {
    match config.scheduler {
        SchedulerKind::Local => match &config.work_dir {
            Some(dir) => Arc::new(LocalScheduler::new(dir.clone())),
            None => Arc::new(LocalScheduler::with_default_dir()),
        },
        SchedulerKind::Cluster => Arc::new(ClusterScheduler::new(KubectlClient::new(
            config.kubectl.clone(),
            KUBECTL_TIMEOUT_SECS,
        ))),
        SchedulerKind::Stub => Arc::new(RecordingScheduler::new(FrameResult::Successful)),
    }
}
