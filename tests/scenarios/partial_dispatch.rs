//! Test: a launch failure part way through a scene is recovered by the next pass

use crate::helpers::*;
use stagehand::core::FrameResult::Successful;
use stagehand::{FlowError, Phase, PlayStore, ReconcileError};

const ONE_SCENE: &str = r#"
name: partial
screenplays:
  - name: main
    scenes:
      - name: only
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

#[tokio::test]
async fn test_failed_launch_is_retried() {
    let flow = pending_flow();
    let play = running_play(ONE_SCENE);
    flow.scheduler().fail_next_runs("b", 1).await;

    let err = flow.advance(&play).await.unwrap_err();
    assert!(matches!(err, FlowError::Scheduler(_)));
    assert!(!err.is_domain());
    assert_eq!(flow.scheduler().launch_count().await, 1);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["a", "b"]));
    assert_eq!(flow.scheduler().requests().await, ids(&["a", "b", "a", "b"]));
    // a was already running and is not launched again
    assert_eq!(flow.scheduler().launch_count().await, 2);
}

#[tokio::test]
async fn test_reconciler_retries_launch_failures() {
    let reconciler = stub_reconciler(Successful);
    let scheduler = reconciler.flow().scheduler();
    scheduler.fail_next_runs("b", 2).await;

    let key = reconciler
        .submit(play_from_yaml(ONE_SCENE, &[]))
        .await
        .unwrap()
        .key();

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Flow(FlowError::Scheduler(_))));
    assert!(err.is_retryable());

    // the play itself made it to running before the launch failed
    let stored = reconciler.store().get(&key).await.unwrap().unwrap();
    assert_eq!(stored.status.phase, Phase::Running);

    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();
    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(scheduler.launch_count().await, 2);
}
