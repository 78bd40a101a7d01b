//! Play reconciler - moves one play through its lifecycle
//!
//! Each pass reads the play fresh from the store, does whatever its phase
//! calls for and writes the result back with optimistic concurrency:
//!
//! - `Created`: switch to `Init`
//! - `Init`: provision resources, assign frame identities, switch to `Running`
//! - `Running`: record concluded frames, advance the flow, finish when done
//! - terminal: release everything provisioned for the play, once

use crate::core::{FrameResult, Phase, Play, PlayKey, MAIN_SCREENPLAY};
use crate::execution::flow::{Flow, FlowError, Progress};
use crate::persistence::{PlayStore, StoreError};
use crate::scheduler::resource::{
    screenplay_resources, vars_config_map, vars_config_map_name, volume_claim_name, volume_claims,
};
use crate::scheduler::{Resource, Scheduler, SchedulerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Events emitted while reconciling plays
#[derive(Debug, Clone, PartialEq)]
pub enum PlayEvent {
    PhaseChanged {
        key: PlayKey,
        from: Phase,
        to: Phase,
    },
    FramesDispatched {
        key: PlayKey,
        frames: Vec<String>,
    },
    FrameConcluded {
        key: PlayKey,
        frame_id: String,
        result: FrameResult,
    },
    Errored {
        key: PlayKey,
        error: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PlayEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ReconcileError {
    /// Whether another pass with fresh state may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Store(StoreError::NotFound(_)) => false,
            ReconcileError::Store(StoreError::AlreadyExists(_)) => false,
            ReconcileError::Store(StoreError::Serialization(_)) => false,
            ReconcileError::Store(_) => true,
            ReconcileError::Flow(e) => !e.is_domain(),
            ReconcileError::Scheduler(_) => true,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict { .. }))
    }
}

/// Reconciles plays held in a [`PlayStore`] using a [`Flow`]
pub struct PlayReconciler<S, P> {
    flow: Flow<S>,
    store: P,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<S: Scheduler, P: PlayStore> PlayReconciler<S, P> {
    pub fn new(flow: Flow<S>, store: P) -> Self {
        Self {
            flow,
            store,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn flow(&self) -> &Flow<S> {
        &self.flow
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(PlayEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: PlayEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Store a new play
    pub async fn submit(&self, play: Play) -> Result<Play, ReconcileError> {
        let play = self.store.create(play).await?;
        info!("Submitted play {}", play.key());
        Ok(play)
    }

    /// Run one pass over the play stored under `key`
    ///
    /// Returns the play as stored after the pass, or `None` if it no longer
    /// exists.
    pub async fn reconcile(&self, key: &PlayKey) -> Result<Option<Play>, ReconcileError> {
        let Some(mut play) = self.store.get(key).await? else {
            debug!("Play {} is gone", key);
            return Ok(None);
        };

        if play.status.phase == Phase::Created {
            play = self.transition(play, Phase::Init).await?;
        }
        if play.status.phase == Phase::Init {
            play = self.init(play).await?;
        }
        if play.status.phase == Phase::Running {
            play = self.run(play).await?;
        }
        if play.status.phase.is_terminal() {
            play = self.cleanup(play).await?;
        }
        Ok(Some(play))
    }

    /// Reconcile `key` until its play is terminal
    ///
    /// Retryable errors are logged and retried on the next pass.
    pub async fn run_until_terminal(
        &self,
        key: &PlayKey,
        poll_interval: Duration,
    ) -> Result<Play, ReconcileError> {
        loop {
            match self.reconcile(key).await {
                Ok(Some(play)) if play.status.phase.is_terminal() => return Ok(play),
                Ok(Some(_)) => {}
                Ok(None) => return Err(StoreError::NotFound(key.clone()).into()),
                Err(e) if e.is_conflict() => {
                    debug!("Conflict on {}, retrying with fresh state", key);
                    continue;
                }
                Err(e) if e.is_retryable() => warn!("Reconcile of {} failed: {}", key, e),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn transition(&self, mut play: Play, to: Phase) -> Result<Play, ReconcileError> {
        let from = play.status.phase;
        play.status.phase = to;
        if to.is_terminal() {
            play.status.completed_at = Some(Utc::now());
        }
        let play = self.store.update(&play).await?;

        info!("Play {}: {} -> {}", play.key(), from, to);
        self.emit_event(PlayEvent::PhaseChanged {
            key: play.key(),
            from,
            to,
        })
        .await;
        Ok(play)
    }

    async fn fail(&self, play: Play, reason: String) -> Result<Play, ReconcileError> {
        error!("Play {}: {}", play.key(), reason);
        let key = play.key();
        let play = self.transition(play, Phase::Error).await?;
        self.emit_event(PlayEvent::Errored { key, error: reason })
            .await;
        Ok(play)
    }

    /// Resources created for the play before any frame runs
    fn owned_resources(play: &Play) -> Vec<Resource> {
        let mut resources = Vec::new();
        if !play.spec.vars.is_empty() {
            resources.push(vars_config_map(play));
        }
        resources.extend(volume_claims(play));
        if let Some(screenplay) = play.screenplay(MAIN_SCREENPLAY) {
            resources.extend(screenplay_resources(play, screenplay));
        }
        resources
    }

    async fn init(&self, mut play: Play) -> Result<Play, ReconcileError> {
        if play.screenplay(MAIN_SCREENPLAY).is_none() {
            let reason = FlowError::ScreenplayNotFound(MAIN_SCREENPLAY.to_string()).to_string();
            return self.fail(play, reason).await;
        }
        let resources = Self::owned_resources(&play);
        if let Err(e) = self.flow.scheduler().provision(&play, &resources).await {
            return self.fail(play, format!("provisioning failed: {}", e)).await;
        }

        let assigned = play.assign_frame_ids();
        debug!("Assigned {} frame identities for {}", assigned, play.key());

        play.status.provisioned_volumes = play
            .spec
            .volume_claim_templates
            .iter()
            .map(|t| (t.name.clone(), volume_claim_name(&play, t)))
            .collect();
        if !play.spec.vars.is_empty() {
            play.status.vars_config_map = Some(vars_config_map_name(&play));
        }
        play.status.started_at = Some(Utc::now());

        self.transition(play, Phase::Running).await
    }

    async fn run(&self, mut play: Play) -> Result<Play, ReconcileError> {
        let key = play.key();

        let known = self.flow.frame_ids(&play).unwrap_or_default();
        let concluded = self.flow.scheduler().concluded(&play).await?;
        let mut fresh = Vec::new();
        for (frame_id, result) in concluded {
            if !known.contains(&frame_id) {
                debug!("Play {}: ignoring result of unknown frame {}", key, frame_id);
                continue;
            }
            if !play.status.concluded(&frame_id) {
                play.status.set_frame_result(frame_id.clone(), result);
                fresh.push((frame_id, result));
            }
        }
        if !fresh.is_empty() {
            play = self.store.update(&play).await?;
            for (frame_id, result) in fresh {
                info!("Play {}: frame {} concluded: {}", key, frame_id, result);
                self.emit_event(PlayEvent::FrameConcluded {
                    key: key.clone(),
                    frame_id,
                    result,
                })
                .await;
            }
        }

        match self.flow.advance(&play).await {
            Ok(Progress::Dispatched(frames)) => {
                if !frames.is_empty() {
                    debug!("Play {}: dispatched {:?}", key, frames);
                    self.emit_event(PlayEvent::FramesDispatched { key, frames })
                        .await;
                }
                Ok(play)
            }
            Ok(Progress::Finished) => {
                let to = if play.status.failed() {
                    Phase::Failed
                } else {
                    Phase::Complete
                };
                self.transition(play, to).await
            }
            Err(e) if e.is_domain() => self.fail(play, e.to_string()).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Release whatever Init provisioned, however the play ended
    ///
    /// Screenplay resources were normally released by the flow already;
    /// releasing them again is harmless.
    async fn cleanup(&self, mut play: Play) -> Result<Play, ReconcileError> {
        if play.status.cleaned_up {
            return Ok(play);
        }
        let resources = Self::owned_resources(&play);
        if !resources.is_empty() {
            self.flow.scheduler().deprovision(&play, &resources).await?;
            info!("Play {}: released {} resources", play.key(), resources.len());
        }

        play.status.provisioned_volumes.clear();
        play.status.cleaned_up = true;
        Ok(self.store.update(&play).await?)
    }
}
