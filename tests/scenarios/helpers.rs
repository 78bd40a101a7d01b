//! Test utility functions for stagehand scenarios

use stagehand::core::{Action, FrameResult, Phase, Play};
use stagehand::persistence::InMemoryPlayStore;
use stagehand::scheduler::RecordingScheduler;
use stagehand::{Flow, PlayConfig, PlayReconciler, Progress};
use std::sync::Arc;
use std::time::Duration;

pub type StubReconciler = PlayReconciler<Arc<RecordingScheduler>, Arc<InMemoryPlayStore>>;

/// Instantiate a play from YAML with variable overrides
pub fn play_from_yaml(yaml: &str, overrides: &[(&str, &str)]) -> Play {
    let overrides: Vec<(String, String)> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    PlayConfig::from_yaml(yaml)
        .expect("valid play")
        .instantiate(&overrides)
        .expect("instantiable play")
}

/// A play that is already past initialization
pub fn running_play(yaml: &str) -> Play {
    let mut play = play_from_yaml(yaml, &[]);
    play.assign_frame_ids();
    play.status.phase = Phase::Running;
    play
}

/// A flow over a stub whose frames never conclude on their own
pub fn pending_flow() -> Flow<Arc<RecordingScheduler>> {
    Flow::new(Arc::new(RecordingScheduler::pending()))
}

/// Frame IDs of a dispatch, sorted
pub fn dispatched(progress: Progress) -> Vec<String> {
    match progress {
        Progress::Dispatched(mut ids) => {
            ids.sort();
            ids
        }
        Progress::Finished => panic!("expected a dispatch, play finished"),
    }
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn conclude(play: &mut Play, results: &[(&str, FrameResult)]) {
    for (id, result) in results {
        play.status.set_frame_result(*id, *result);
    }
}

/// Value of an env var on a launched frame's first container
pub fn launched_env(action: &Action, name: &str) -> Option<String> {
    action.env(name).map(str::to_string)
}

pub fn stub_reconciler(result: FrameResult) -> StubReconciler {
    PlayReconciler::new(
        Flow::new(Arc::new(RecordingScheduler::new(result))),
        Arc::new(InMemoryPlayStore::new()),
    )
}

pub const POLL: Duration = Duration::from_millis(1);
