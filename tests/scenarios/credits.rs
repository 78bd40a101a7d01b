//! Test: opening and closing credits around the scenes

use crate::helpers::*;
use stagehand::core::FrameResult::{Failed, Successful};
use stagehand::execution::SCREENPLAY_RESULT;
use stagehand::Progress;

const WITH_CREDITS: &str = r#"
name: credits
screenplays:
  - name: main
    provision:
      resources:
        - kind: ConfigMap
          name: settings
          data:
            mode: test
    credits:
      opening:
        - id: x
          name: x
          action:
            containers: [{ name: main, command: ["true"] }]
      closing:
        - id: z
          name: z
          action:
            containers: [{ name: main, command: ["true"] }]
    scenes:
      - name: stage
        frames:
          - id: y
            name: y
            action:
              containers: [{ name: main, command: ["true"] }]
      - name: encore
        frames:
          - id: w
            name: w
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

#[tokio::test]
async fn test_failed_scene_runs_closing_with_fail_verdict() {
    let flow = pending_flow();
    let mut play = running_play(WITH_CREDITS);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["x"]));
    conclude(&mut play, &[("x", Successful)]);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["y"]));
    conclude(&mut play, &[("y", Failed)]);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["z"]));
    let closing = flow.scheduler().launched_action("z").await.unwrap();
    assert_eq!(launched_env(&closing, SCREENPLAY_RESULT).as_deref(), Some("fail"));

    conclude(&mut play, &[("z", Successful)]);
    assert_eq!(flow.advance(&play).await.unwrap(), Progress::Finished);
    assert!(flow.scheduler().launched_action("w").await.is_none());
}

#[tokio::test]
async fn test_successful_scenes_give_success_verdict() {
    let flow = pending_flow();
    let mut play = running_play(WITH_CREDITS);
    conclude(&mut play, &[("x", Successful), ("y", Successful), ("w", Successful)]);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["z"]));
    let closing = flow.scheduler().launched_action("z").await.unwrap();
    assert_eq!(
        launched_env(&closing, SCREENPLAY_RESULT).as_deref(),
        Some("success")
    );

    // scene frames never get the verdict
    assert!(flow
        .scheduler()
        .launched_action("y")
        .await
        .is_none());
}

#[tokio::test]
async fn test_failed_opening_skips_scenes() {
    let flow = pending_flow();
    let mut play = running_play(WITH_CREDITS);
    conclude(&mut play, &[("x", Failed)]);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["z"]));
    let closing = flow.scheduler().launched_action("z").await.unwrap();
    // only scene frames decide the verdict
    assert_eq!(
        launched_env(&closing, SCREENPLAY_RESULT).as_deref(),
        Some("success")
    );
}

#[tokio::test]
async fn test_finish_releases_screenplay_resources() {
    let reconciler = stub_reconciler(Successful);
    let key = reconciler
        .submit(play_from_yaml(WITH_CREDITS, &[]))
        .await
        .unwrap()
        .key();

    reconciler.reconcile(&key).await.unwrap();
    let scheduler = reconciler.flow().scheduler();
    assert!(scheduler.provisioned().await.contains("settings-credits"));

    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();
    assert_eq!(play.status.phase, stagehand::Phase::Complete);
    assert!(!scheduler.provisioned().await.contains("settings-credits"));

    let action = scheduler.launched_action("x").await.unwrap();
    assert!(action.mounts("cms-settings"));
}
