//! Recording scheduler - concludes frames without running anything
//!
//! Useful for:
//! - Fast, deterministic tests of the flow engine and the driver
//! - Dry runs of a play definition
//! - Injecting launch failures to exercise partial dispatch

use crate::core::{Action, Frame, FrameResult, Play};
use crate::scheduler::{Job, Resource, Scheduler, SchedulerError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct Launched {
    play: String,
    uid: String,
    frame_id: String,
    action: Action,
}

#[derive(Debug, Default)]
struct StubState {
    /// Frame IDs in the order `run` was called
    requests: Vec<String>,
    /// Executions keyed by job name
    launched: BTreeMap<String, Launched>,
    /// Pending injected failures per frame ID
    failures: HashMap<String, usize>,
    /// Result overrides per frame ID
    overrides: HashMap<String, Option<FrameResult>>,
    /// Resource names currently provisioned
    provisioned: BTreeSet<String>,
    provision_calls: usize,
    deprovision_calls: usize,
}

/// Scheduler that records every call and reports a configured result for
/// every launched frame
pub struct RecordingScheduler {
    result: Option<FrameResult>,
    state: Mutex<StubState>,
}

impl RecordingScheduler {
    /// Every launched frame concludes with `result`
    pub fn new(result: FrameResult) -> Self {
        Self {
            result: Some(result),
            state: Mutex::new(StubState::default()),
        }
    }

    /// Launched frames never conclude unless overridden
    pub fn pending() -> Self {
        Self {
            result: None,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Conclude `frame_id` with `result` instead of the default
    pub async fn set_result(&self, frame_id: &str, result: FrameResult) {
        self.state
            .lock()
            .await
            .overrides
            .insert(frame_id.to_string(), Some(result));
    }

    /// Keep `frame_id` running regardless of the default
    pub async fn hold(&self, frame_id: &str) {
        self.state
            .lock()
            .await
            .overrides
            .insert(frame_id.to_string(), None);
    }

    /// Make the next `times` launches of `frame_id` fail
    pub async fn fail_next_runs(&self, frame_id: &str, times: usize) {
        self.state
            .lock()
            .await
            .failures
            .insert(frame_id.to_string(), times);
    }

    /// All `run` requests so far, in order
    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }

    /// Drain the recorded `run` requests
    pub async fn take_requests(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().await.requests)
    }

    /// Number of distinct executions actually launched
    pub async fn launch_count(&self) -> usize {
        self.state.lock().await.launched.len()
    }

    /// The action a frame was launched with
    pub async fn launched_action(&self, frame_id: &str) -> Option<Action> {
        self.state
            .lock()
            .await
            .launched
            .values()
            .find(|l| l.frame_id == frame_id)
            .map(|l| l.action.clone())
    }

    /// Names of currently provisioned resources
    pub async fn provisioned(&self) -> BTreeSet<String> {
        self.state.lock().await.provisioned.clone()
    }

    /// Number of (provision, deprovision) calls
    pub async fn provisioning_calls(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.provision_calls, state.deprovision_calls)
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError> {
        let job = Job::for_frame(play, frame);
        let mut state = self.state.lock().await;
        state.requests.push(frame.id.clone());

        if let Some(remaining) = state.failures.get_mut(&frame.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SchedulerError::Launch {
                    name: job.name,
                    reason: "injected failure".to_string(),
                });
            }
        }

        let uid = play.metadata.uid.to_string();
        if state.launched.get(&job.name).is_some_and(|l| l.uid == uid) {
            debug!("Job {} already launched", job.name);
            return Ok(());
        }

        debug!("Recording launch of {} ({})", job.name, frame.name);
        state.launched.insert(
            job.name.clone(),
            Launched {
                play: play.name().to_string(),
                uid,
                frame_id: frame.id.clone(),
                action: job.action,
            },
        );
        Ok(())
    }

    async fn provision(&self, _play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        state.provision_calls += 1;
        state
            .provisioned
            .extend(resources.iter().map(|r| r.name.clone()));
        Ok(())
    }

    async fn deprovision(
        &self,
        _play: &Play,
        resources: &[Resource],
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        state.deprovision_calls += 1;
        for resource in resources {
            state.provisioned.remove(&resource.name);
        }
        Ok(())
    }

    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError> {
        let state = self.state.lock().await;
        let uid = play.metadata.uid.to_string();
        Ok(state
            .launched
            .values()
            .filter(|l| l.play == play.name() && l.uid == uid)
            .filter_map(|l| {
                let result = match state.overrides.get(&l.frame_id) {
                    Some(result) => *result,
                    None => self.result,
                };
                result.map(|r| (l.frame_id.clone(), r))
            })
            .collect())
    }
}
