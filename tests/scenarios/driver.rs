//! Test: plays driven end to end through the reconciler and a store

use crate::helpers::*;
use async_trait::async_trait;
use stagehand::core::FrameResult::{Failed, Successful};
use stagehand::core::VolumeSource;
use stagehand::persistence::InMemoryPlayStore;
use stagehand::scheduler::RecordingScheduler;
use stagehand::{Flow, Phase, Play, PlayEvent, PlayKey, PlayReconciler, PlayStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PIPELINE: &str = r#"
name: pipeline
vars:
  - name: env
    value: staging
volumeClaimTemplates:
  - name: workspace
screenplays:
  - name: main
    credits:
      closing:
        - name: report
          action:
            containers: [{ name: main, command: ["true"] }]
    scenes:
      - name: build
        frames:
          - name: compile
            action:
              containers:
                - name: main
                  command: ["true"]
                  volumeMounts:
                    - name: workspace
                      mountPath: /workspace
          - name: lint
            action:
              containers: [{ name: main, command: ["true"] }]
      - name: test
        frames:
          - name: unit
            copies: 2
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

fn record_events(
    events: &Arc<Mutex<Vec<PlayEvent>>>,
) -> impl Fn(PlayEvent) + Send + Sync + 'static {
    let sink = events.clone();
    move |event| {
        if let Ok(mut events) = sink.lock() {
            events.push(event);
        }
    }
}

fn phase_changes(events: &[PlayEvent]) -> Vec<(Phase, Phase)> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayEvent::PhaseChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_play_completes() {
    let reconciler = stub_reconciler(Successful);
    let events = Arc::new(Mutex::new(Vec::new()));
    reconciler.add_event_handler(record_events(&events)).await;

    let key = reconciler
        .submit(play_from_yaml(PIPELINE, &[]))
        .await
        .unwrap()
        .key();
    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();

    assert_eq!(play.status.phase, Phase::Complete);
    // compile, lint, two unit copies and the report
    assert_eq!(play.status.frames.len(), 5);
    assert!(play.status.started_at.is_some());
    assert!(play.status.completed_at.is_some());
    assert!(play.status.provisioned_volumes.is_empty());

    let events = events.lock().unwrap();
    assert_eq!(
        phase_changes(&events),
        vec![
            (Phase::Created, Phase::Init),
            (Phase::Init, Phase::Running),
            (Phase::Running, Phase::Complete),
        ]
    );
    let concluded = events
        .iter()
        .filter(|e| matches!(e, PlayEvent::FrameConcluded { .. }))
        .count();
    assert_eq!(concluded, 5);
}

#[tokio::test]
async fn test_play_fails_but_runs_closing() {
    let reconciler = stub_reconciler(Failed);
    let key = reconciler
        .submit(play_from_yaml(PIPELINE, &[]))
        .await
        .unwrap()
        .key();
    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();

    assert_eq!(play.status.phase, Phase::Failed);
    let scheduler = reconciler.flow().scheduler();
    // build scene and report; the test scene never starts
    assert_eq!(scheduler.launch_count().await, 3);
    assert!(scheduler.provisioned().await.is_empty());
    assert!(play.status.cleaned_up);
}

#[tokio::test]
async fn test_claim_is_mounted_only_where_used() {
    let reconciler = stub_reconciler(Successful);
    let key = reconciler
        .submit(play_from_yaml(PIPELINE, &[]))
        .await
        .unwrap()
        .key();
    let play = reconciler.reconcile(&key).await.unwrap().unwrap();

    let compile = play.frames().find(|f| f.name == "compile").unwrap();
    let lint = play.frames().find(|f| f.name == "lint").unwrap();
    let scheduler = reconciler.flow().scheduler();

    let action = scheduler.launched_action(&compile.id).await.unwrap();
    let workspace = action.volumes.iter().find(|v| v.name == "workspace").unwrap();
    assert_eq!(
        workspace.source,
        VolumeSource::PersistentVolumeClaim {
            claim_name: "pipeline-workspace".to_string()
        }
    );

    let action = scheduler.launched_action(&lint.id).await.unwrap();
    assert!(!action.volumes.iter().any(|v| v.name == "workspace"));
    assert!(action.volumes.iter().any(|v| v.name == "stagehand-vars"));
}

/// Store that rejects the first few updates as concurrent modifications
struct ContendedStore {
    inner: InMemoryPlayStore,
    conflicts: AtomicUsize,
}

#[async_trait]
impl PlayStore for ContendedStore {
    async fn create(&self, play: Play) -> Result<Play, StoreError> {
        self.inner.create(play).await
    }

    async fn get(&self, key: &PlayKey) -> Result<Option<Play>, StoreError> {
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<Play>, StoreError> {
        self.inner.list().await
    }

    async fn update(&self, play: &Play) -> Result<Play, StoreError> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                key: play.key(),
                expected: play.metadata.resource_version,
                actual: play.metadata.resource_version + 1,
            });
        }
        self.inner.update(play).await
    }

    async fn delete(&self, key: &PlayKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_conflicts_are_retried() {
    let reconciler = PlayReconciler::new(
        Flow::new(Arc::new(RecordingScheduler::new(Successful))),
        ContendedStore {
            inner: InMemoryPlayStore::new(),
            conflicts: AtomicUsize::new(3),
        },
    );
    let key = reconciler
        .submit(play_from_yaml(PIPELINE, &[]))
        .await
        .unwrap()
        .key();

    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();
    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(play.status.frames.len(), 5);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_play_completes_with_sqlite() {
    use stagehand::persistence::SqlitePlayStore;

    let store = SqlitePlayStore::in_memory().await.unwrap();
    let reconciler = PlayReconciler::new(
        Flow::new(Arc::new(RecordingScheduler::new(Successful))),
        store,
    );
    let key = reconciler
        .submit(play_from_yaml(PIPELINE, &[]))
        .await
        .unwrap()
        .key();

    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();
    assert_eq!(play.status.phase, Phase::Complete);

    let stored = reconciler.store().get(&key).await.unwrap().unwrap();
    assert_eq!(stored.status.phase, Phase::Complete);
    assert_eq!(stored.status.frames, play.status.frames);
    assert_eq!(stored.metadata.resource_version, play.metadata.resource_version);
}
