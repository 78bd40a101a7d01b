//! Cluster scheduler - runs frames as batch jobs through a cluster API

use crate::core::{Frame, FrameResult, Play};
use crate::scheduler::{execution_labels, Job, Resource, Scheduler, SchedulerError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// What the cluster reports about a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedJob {
    pub name: String,
    /// Value of the frame-id annotation
    pub frame_id: Option<String>,
    /// Value of the play-uid label
    pub play_uid: Option<String>,
    /// Set once the job has a terminal condition
    pub result: Option<FrameResult>,
}

/// The slice of the cluster API the scheduler needs
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str)
        -> Result<Option<ObservedJob>, SchedulerError>;

    /// Fails with [`SchedulerError::AlreadyExists`] if the job is there
    async fn create_job(&self, job: &Job) -> Result<(), SchedulerError>;

    /// Fails with [`SchedulerError::NotFound`] if the job is gone
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), SchedulerError>;

    /// Jobs in `namespace` carrying every label of `selector`
    async fn list_jobs(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<ObservedJob>, SchedulerError>;

    /// Fails with [`SchedulerError::AlreadyExists`] if the resource is there
    async fn create(&self, resource: &Resource) -> Result<(), SchedulerError>;

    /// Fails with [`SchedulerError::NotFound`] if the resource is gone
    async fn delete(&self, resource: &Resource) -> Result<(), SchedulerError>;
}

/// Scheduler creating one job per frame
///
/// Jobs are named deterministically, so a launch that finds its job already
/// present recovers it instead of creating a duplicate. A job with the same
/// name left behind by an earlier play of the same name is replaced.
pub struct ClusterScheduler<C> {
    client: C,
}

impl<C: ClusterClient> ClusterScheduler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: ClusterClient> Scheduler for ClusterScheduler<C> {
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError> {
        let job = Job::for_frame(play, frame);
        if let Some(existing) = self.client.get_job(&job.namespace, &job.name).await? {
            if existing.play_uid.as_deref() == job.play_uid() {
                debug!("Recovered existing job {}", job.name);
                return Ok(());
            }
            info!("Replacing job {} left by an earlier play", job.name);
            match self.client.delete_job(&job.namespace, &job.name).await {
                Ok(()) | Err(SchedulerError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        match self.client.create_job(&job).await {
            Ok(()) => {
                info!("Created job {} for frame {}", job.name, frame.name);
                Ok(())
            }
            Err(SchedulerError::AlreadyExists { .. }) => {
                debug!("Job {} created concurrently", job.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn provision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        for resource in resources {
            match self.client.create(resource).await {
                Ok(()) => info!("Provisioned {} {} for {}", resource.kind, resource.name, play.name()),
                Err(SchedulerError::AlreadyExists { .. }) => {
                    debug!("{} {} already provisioned", resource.kind, resource.name)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn deprovision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        for resource in resources {
            match self.client.delete(resource).await {
                Ok(()) => info!("Released {} {} for {}", resource.kind, resource.name, play.name()),
                Err(SchedulerError::NotFound { .. }) => {
                    debug!("{} {} already released", resource.kind, resource.name)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError> {
        let selector = execution_labels(play);
        let jobs = self.client.list_jobs(play.namespace(), &selector).await?;
        Ok(jobs
            .into_iter()
            .filter_map(|job| Some((job.frame_id?, job.result?)))
            .collect())
    }
}

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    result: Option<FrameResult>,
}

#[derive(Debug, Default)]
struct ClusterState {
    jobs: BTreeMap<(String, String), StoredJob>,
    resources: BTreeMap<(String, String, String), Resource>,
    create_calls: usize,
    failing_creates: HashMap<String, usize>,
}

/// A fake cluster kept in memory
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a job its terminal condition
    pub async fn complete_job(&self, namespace: &str, name: &str, result: FrameResult) -> bool {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&(namespace.to_string(), name.to_string())) {
            Some(stored) => {
                stored.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// Complete every job of `namespace` that is still running
    pub async fn complete_all(&self, namespace: &str, result: FrameResult) -> usize {
        let mut state = self.state.lock().await;
        let mut completed = 0;
        for ((ns, _), stored) in state.jobs.iter_mut() {
            if ns == namespace && stored.result.is_none() {
                stored.result = Some(result);
                completed += 1;
            }
        }
        completed
    }

    /// Reject the next `times` job creations named `name`
    pub async fn fail_creates(&self, name: &str, times: usize) {
        self.state
            .lock()
            .await
            .failing_creates
            .insert(name.to_string(), times);
    }

    /// Put a job on the cluster as if created by an earlier run
    pub async fn insert_job(&self, job: Job) {
        let key = (job.namespace.clone(), job.name.clone());
        self.state
            .lock()
            .await
            .jobs
            .insert(key, StoredJob { job, result: None });
    }

    pub async fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state
            .lock()
            .await
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.job.clone())
    }

    pub async fn job_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .jobs
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Number of successful job creations
    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    pub async fn resource_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .resources
            .keys()
            .map(|(_, _, name)| name.clone())
            .collect()
    }
}

fn observe(stored: &StoredJob) -> ObservedJob {
    ObservedJob {
        name: stored.job.name.clone(),
        frame_id: stored.job.frame_id().map(str::to_string),
        play_uid: stored.job.play_uid().map(str::to_string),
        result: stored.result,
    }
}

fn resource_key(resource: &Resource) -> (String, String, String) {
    (
        resource.namespace.clone(),
        resource.kind.clone(),
        resource.name.clone(),
    )
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedJob>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .map(observe))
    }

    async fn create_job(&self, job: &Job) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.failing_creates.get_mut(&job.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SchedulerError::Api(format!("cannot create {}", job.name)));
            }
        }

        let key = (job.namespace.clone(), job.name.clone());
        if state.jobs.contains_key(&key) {
            return Err(SchedulerError::AlreadyExists {
                kind: "Job".to_string(),
                name: job.name.clone(),
            });
        }
        state.jobs.insert(
            key,
            StoredJob {
                job: job.clone(),
                result: None,
            },
        );
        state.create_calls += 1;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        match state.jobs.remove(&(namespace.to_string(), name.to_string())) {
            Some(_) => Ok(()),
            None => Err(SchedulerError::NotFound {
                kind: "Job".to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn list_jobs(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<ObservedJob>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|((ns, _), stored)| {
                ns == namespace
                    && selector
                        .iter()
                        .all(|(k, v)| stored.job.labels.get(k) == Some(v))
            })
            .map(|(_, stored)| observe(stored))
            .collect())
    }

    async fn create(&self, resource: &Resource) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let key = resource_key(resource);
        if state.resources.contains_key(&key) {
            return Err(SchedulerError::AlreadyExists {
                kind: resource.kind.clone(),
                name: resource.name.clone(),
            });
        }
        state.resources.insert(key, resource.clone());
        Ok(())
    }

    async fn delete(&self, resource: &Resource) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        match state.resources.remove(&resource_key(resource)) {
            Some(_) => Ok(()),
            None => Err(SchedulerError::NotFound {
                kind: resource.kind.clone(),
                name: resource.name.clone(),
            }),
        }
    }
}
