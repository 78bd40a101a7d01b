//! Test: scenes run strictly in declared order

use crate::helpers::*;
use stagehand::core::FrameResult::{Failed, Successful};
use stagehand::Progress;

const TWO_SCENES: &str = r#"
name: two-scenes
screenplays:
  - name: main
    scenes:
      - name: first
        frames:
          - id: a
            name: a
            action:
              containers: [{ name: main, command: ["true"] }]
          - id: b
            name: b
            action:
              containers: [{ name: main, command: ["true"] }]
      - name: second
        frames:
          - id: c
            name: c
            action:
              containers: [{ name: main, command: ["true"] }]
          - id: d
            name: d
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

#[tokio::test]
async fn test_two_scenes_progress() {
    let flow = pending_flow();
    let mut play = running_play(TWO_SCENES);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["a", "b"]));

    conclude(&mut play, &[("a", Successful)]);
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["b"]));

    conclude(&mut play, &[("b", Successful)]);
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["c", "d"]));

    conclude(&mut play, &[("c", Successful), ("d", Successful)]);
    assert_eq!(flow.advance(&play).await.unwrap(), Progress::Finished);
}

#[tokio::test]
async fn test_next_scene_waits_for_every_frame() {
    let flow = pending_flow();
    let mut play = running_play(TWO_SCENES);
    flow.advance(&play).await.unwrap();

    // b still running: the second scene must not start
    conclude(&mut play, &[("a", Successful)]);
    for _ in 0..3 {
        flow.advance(&play).await.unwrap();
    }
    let requested = flow.scheduler().requests().await;
    assert!(!requested.iter().any(|id| id == "c" || id == "d"));
}

#[tokio::test]
async fn test_readvance_is_stable() {
    let flow = pending_flow();
    let play = running_play(TWO_SCENES);

    let first = dispatched(flow.advance(&play).await.unwrap());
    let second = dispatched(flow.advance(&play).await.unwrap());
    assert_eq!(first, second);

    // requested twice, launched once
    assert_eq!(flow.scheduler().requests().await.len(), 4);
    assert_eq!(flow.scheduler().launch_count().await, 2);
}

#[tokio::test]
async fn test_failure_stops_later_scenes() {
    let flow = pending_flow();
    let mut play = running_play(TWO_SCENES);
    flow.advance(&play).await.unwrap();

    conclude(&mut play, &[("a", Failed)]);
    // the failed frame's own scene still runs to the end
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["b"]));

    conclude(&mut play, &[("b", Successful)]);
    assert_eq!(flow.advance(&play).await.unwrap(), Progress::Finished);
    assert_eq!(flow.scheduler().launch_count().await, 2);
}
