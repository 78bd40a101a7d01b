//! Flow engine - decides which frames of a running play to dispatch next
//!
//! The flow is level-triggered: every call to [`Flow::advance`] looks at the
//! recorded results and requests every frame of the current group that has
//! not concluded yet. Requests for frames that are already running are
//! absorbed by the scheduler, so the flow may be advanced any number of
//! times with the same status.

use crate::core::{ConditionPolarity, Frame, Phase, Play, MAIN_SCREENPLAY};
use crate::execution::expand::{expand, inject_verdict, verdict};
use crate::scheduler::{resource::screenplay_resources, Scheduler, SchedulerError};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

/// What a call to [`Flow::advance`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// These frames were requested from the scheduler
    Dispatched(Vec<String>),
    /// Nothing is left to run; screenplay resources were released
    Finished,
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        matches!(self, Progress::Finished)
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("play is {0}, not running")]
    NotRunning(Phase),

    #[error("screenplay '{0}' not found")]
    ScreenplayNotFound(String),

    #[error("frame '{0}' has no action")]
    MissingAction(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl FlowError {
    /// Errors in the play definition itself; retrying will not help
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            FlowError::ScreenplayNotFound(_) | FlowError::MissingAction(_)
        )
    }
}

/// Drives the main screenplay of a play through a [`Scheduler`]
pub struct Flow<S> {
    scheduler: S,
    polarity: ConditionPolarity,
}

impl<S: Scheduler> Flow<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            polarity: ConditionPolarity::default(),
        }
    }

    /// Interpret `when` conditions with `polarity`
    pub fn with_polarity(mut self, polarity: ConditionPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn polarity(&self) -> ConditionPolarity {
        self.polarity
    }

    /// Identities of every execution the main screenplay can launch
    pub fn frame_ids(&self, play: &Play) -> Option<HashSet<String>> {
        let raw = play.screenplay(MAIN_SCREENPLAY)?;
        let screenplay = expand(play, raw, self.polarity);
        Some(screenplay.frames().map(|f| f.id.clone()).collect())
    }

    /// Dispatch the next group of frames, or release resources and report
    /// [`Progress::Finished`] when nothing is left
    ///
    /// Groups run in this order: opening credits, then scenes one at a
    /// time until a frame fails, then closing credits. A failure lets the
    /// rest of its own scene finish but no later scene starts.
    pub async fn advance(&self, play: &Play) -> Result<Progress, FlowError> {
        if play.status.phase != Phase::Running {
            return Err(FlowError::NotRunning(play.status.phase));
        }
        let raw = play
            .screenplay(MAIN_SCREENPLAY)
            .ok_or_else(|| FlowError::ScreenplayNotFound(MAIN_SCREENPLAY.to_string()))?;
        let screenplay = expand(play, raw, self.polarity);
        let status = &play.status;

        if !status.all_concluded(screenplay.opening()) {
            debug!("{}: opening credits", play.name());
            return self.dispatch(play, screenplay.opening()).await;
        }

        if let Some(scene) = screenplay
            .scenes
            .iter()
            .find(|s| !status.all_concluded(&s.frames))
        {
            // after a failure only the scene already under way is finished
            let started = scene.frames.iter().any(|f| status.concluded(&f.id));
            if !status.failed() || started {
                debug!("{}: scene {}", play.name(), scene.name);
                return self.dispatch(play, &scene.frames).await;
            }
        }

        if !status.all_concluded(screenplay.closing()) {
            let verdict = verdict(&screenplay, status);
            debug!("{}: closing credits ({})", play.name(), verdict);
            let mut closing = screenplay.closing().to_vec();
            inject_verdict(&mut closing, verdict);
            return self.dispatch(play, &closing).await;
        }

        let resources = screenplay_resources(play, raw);
        if !resources.is_empty() {
            info!("{}: releasing {} resources", play.name(), resources.len());
            self.scheduler.deprovision(play, &resources).await?;
        }
        Ok(Progress::Finished)
    }

    /// Request every frame of `group` without a result
    async fn dispatch(&self, play: &Play, group: &[Frame]) -> Result<Progress, FlowError> {
        let pending: Vec<&Frame> = group
            .iter()
            .filter(|f| !play.status.concluded(&f.id))
            .collect();
        if let Some(frame) = pending.iter().find(|f| f.action.is_none()) {
            return Err(FlowError::MissingAction(frame.name.clone()));
        }

        let mut dispatched = Vec::with_capacity(pending.len());
        for frame in pending {
            self.scheduler.run(play, frame).await?;
            dispatched.push(frame.id.clone());
        }
        Ok(Progress::Dispatched(dispatched))
    }
}
