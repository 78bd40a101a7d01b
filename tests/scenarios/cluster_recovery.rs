//! Test: the cluster scheduler recovers jobs left behind by an earlier run

use crate::helpers::*;
use stagehand::core::FrameResult::{self, Failed, Successful};
use stagehand::persistence::{InMemoryPlayStore, PlayStore};
use stagehand::scheduler::{job_name, ClusterScheduler, InMemoryCluster, Job};
use stagehand::{Flow, Phase, Play, PlayKey, PlayReconciler};
use std::sync::Arc;

type ClusterReconciler =
    PlayReconciler<Arc<ClusterScheduler<InMemoryCluster>>, Arc<InMemoryPlayStore>>;

const RECOVER: &str = r#"
name: recover
namespace: ci
vars:
  - name: env
    value: prod
volumeClaimTemplates:
  - name: cache
screenplays:
  - name: main
    scenes:
      - name: build
        frames:
          - id: a
            name: a
            action:
              containers: [{ name: main, command: ["true"] }]
          - id: b
            name: b
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

fn cluster_reconciler() -> ClusterReconciler {
    PlayReconciler::new(
        Flow::new(Arc::new(ClusterScheduler::new(InMemoryCluster::new()))),
        Arc::new(InMemoryPlayStore::new()),
    )
}

fn cluster(reconciler: &ClusterReconciler) -> &InMemoryCluster {
    reconciler.flow().scheduler().client()
}

/// Reconcile, completing every running job after each pass
async fn drive(reconciler: &ClusterReconciler, key: &PlayKey, result: FrameResult) -> Play {
    for _ in 0..20 {
        if let Ok(Some(play)) = reconciler.reconcile(key).await {
            if play.status.phase.is_terminal() {
                return play;
            }
        }
        cluster(reconciler).complete_all(&key.namespace, result).await;
    }
    panic!("play {} did not finish", key);
}

#[tokio::test]
async fn test_existing_job_is_not_duplicated() {
    let reconciler = cluster_reconciler();
    let play = play_from_yaml(RECOVER, &[]);
    let frame = play.frame("a").unwrap().clone();
    cluster(&reconciler).insert_job(Job::for_frame(&play, &frame)).await;

    let key = reconciler.submit(play).await.unwrap().key();
    let play = reconciler.reconcile(&key).await.unwrap().unwrap();
    assert_eq!(play.status.phase, Phase::Running);

    let cluster = cluster(&reconciler);
    assert_eq!(cluster.create_calls().await, 1);
    let mut names = cluster.job_names().await;
    names.sort();
    assert_eq!(names, vec![job_name("recover", "a"), job_name("recover", "b")]);
}

#[tokio::test]
async fn test_completed_jobs_drive_the_play() {
    let reconciler = cluster_reconciler();
    let key = reconciler
        .submit(play_from_yaml(RECOVER, &[]))
        .await
        .unwrap()
        .key();

    reconciler.reconcile(&key).await.unwrap();
    let resources = cluster(&reconciler).resource_names().await;
    assert!(resources.contains(&"recover-vars".to_string()));
    assert!(resources.contains(&"recover-cache".to_string()));

    let job = cluster(&reconciler)
        .job("ci", &job_name("recover", "a"))
        .await
        .unwrap();
    assert_eq!(job.frame_id(), Some("a"));

    let play = drive(&reconciler, &key, Successful).await;
    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(play.status.frames.len(), 2);

    let resources = cluster(&reconciler).resource_names().await;
    assert!(!resources.contains(&"recover-cache".to_string()));
}

#[tokio::test]
async fn test_rejected_create_is_retried() {
    let reconciler = cluster_reconciler();
    cluster(&reconciler)
        .fail_creates(&job_name("recover", "b"), 1)
        .await;
    let key = reconciler
        .submit(play_from_yaml(RECOVER, &[]))
        .await
        .unwrap()
        .key();

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(cluster(&reconciler).create_calls().await, 1);

    let play = drive(&reconciler, &key, Successful).await;
    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(cluster(&reconciler).create_calls().await, 2);
}

#[tokio::test]
async fn test_rerun_under_same_name_ignores_earlier_jobs() {
    let reconciler = cluster_reconciler();
    let key = reconciler
        .submit(play_from_yaml(RECOVER, &[]))
        .await
        .unwrap()
        .key();
    let earlier = drive(&reconciler, &key, Failed).await;
    assert_eq!(earlier.status.phase, Phase::Failed);

    reconciler.store().delete(&key).await.unwrap();
    reconciler.submit(play_from_yaml(RECOVER, &[])).await.unwrap();

    let play = reconciler.reconcile(&key).await.unwrap().unwrap();
    assert_eq!(play.status.phase, Phase::Running);
    assert!(play.status.frames.is_empty());
    assert_eq!(cluster(&reconciler).create_calls().await, 4);

    let play = drive(&reconciler, &key, Successful).await;
    assert_eq!(play.status.phase, Phase::Complete);
    let job = cluster(&reconciler)
        .job("ci", &job_name("recover", "a"))
        .await
        .unwrap();
    let uid = play.metadata.uid.to_string();
    assert_eq!(job.play_uid(), Some(uid.as_str()));
}
