//! Test: frames with several copies fan out into distinct executions

use crate::helpers::*;
use stagehand::core::FrameResult::Successful;
use stagehand::execution::FRAME_COPY_INDEX;
use stagehand::scheduler::job_name;
use stagehand::{Phase, PlayConfig};
use std::collections::BTreeSet;

const FAN_OUT: &str = r#"
name: fan-out
screenplays:
  - name: main
    scenes:
      - name: shards
        frames:
          - id: r
            name: shard
            copies: 3
            action:
              containers: [{ name: main, command: ["true"] }]
      - name: after
        frames:
          - id: s
            name: summary
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

#[tokio::test]
async fn test_copies_fan_out_with_index() {
    let flow = pending_flow();
    let play = running_play(FAN_OUT);

    let launched = dispatched(flow.advance(&play).await.unwrap());
    assert_eq!(launched, ids(&["r-0", "r-1", "r-2"]));

    for (index, id) in launched.iter().enumerate() {
        let action = flow.scheduler().launched_action(id).await.unwrap();
        assert_eq!(
            launched_env(&action, FRAME_COPY_INDEX),
            Some(index.to_string())
        );
    }

    let names: BTreeSet<String> = launched.iter().map(|id| job_name(play.name(), id)).collect();
    assert_eq!(names.len(), 3);
}

#[tokio::test]
async fn test_scene_waits_for_every_copy() {
    let flow = pending_flow();
    let mut play = running_play(FAN_OUT);
    flow.advance(&play).await.unwrap();

    conclude(&mut play, &[("r-0", Successful), ("r-2", Successful)]);
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["r-1"]));

    conclude(&mut play, &[("r-1", Successful)]);
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["s"]));
}

#[tokio::test]
async fn test_long_ids_keep_copies_apart() {
    let yaml = r#"
name: wide
screenplays:
  - name: main
    scenes:
      - name: all
        frames:
          - id: abcdefghijklmnop
            name: worker
            copies: 12
            action:
              containers: [{ name: main, command: ["true"] }]
"#;
    let flow = pending_flow();
    let play = running_play(yaml);

    let launched = dispatched(flow.advance(&play).await.unwrap());
    assert_eq!(launched.len(), 12);
    assert_eq!(flow.scheduler().launch_count().await, 12);
}

#[tokio::test]
async fn test_replicas_through_reconciler() {
    let yaml = r#"
name: generated
screenplays:
  - name: main
    scenes:
      - name: all
        frames:
          - name: worker
            copies: 4
            action:
              containers: [{ name: main, command: ["true"] }]
"#;
    let reconciler = stub_reconciler(Successful);
    let key = reconciler
        .submit(play_from_yaml(yaml, &[]))
        .await
        .unwrap()
        .key();

    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();
    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(play.status.frames.len(), 4);
    assert_eq!(reconciler.flow().scheduler().launch_count().await, 4);
}

#[tokio::test]
async fn test_explicit_ids_run_under_distinct_names() {
    let frames = |a: &str, b: &str| {
        format!(
            r#"
name: explicit
screenplays:
  - name: main
    scenes:
      - name: all
        frames:
          - id: {}
            name: first
            copies: 2
            action:
              containers: [{{ name: main, command: ["true"] }}]
          - id: {}
            name: second
            action:
              containers: [{{ name: main, command: ["true"] }}]
"#,
            a, b
        )
    };

    // would share a truncated execution name
    assert!(PlayConfig::from_yaml(&frames("integration-test-a", "integration-test-b")).is_err());

    let reconciler = stub_reconciler(Successful);
    let key = reconciler
        .submit(play_from_yaml(&frames("integ-test-a", "integ-test-b"), &[]))
        .await
        .unwrap()
        .key();
    let play = reconciler.run_until_terminal(&key, POLL).await.unwrap();

    assert_eq!(play.status.phase, Phase::Complete);
    assert_eq!(play.status.frames.len(), 3);
    assert_eq!(reconciler.flow().scheduler().launch_count().await, 3);
}
