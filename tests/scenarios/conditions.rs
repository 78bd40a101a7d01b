//! Test: `when` conditions on scenes and frames

use crate::helpers::*;
use stagehand::core::{Condition, ConditionPolarity, Var, Vars};
use stagehand::scheduler::RecordingScheduler;
use stagehand::Flow;
use std::collections::BTreeMap;
use std::sync::Arc;

const GUARDED: &str = r#"
name: guarded
vars:
  - name: env
    value: staging
  - name: region
    value: eu
screenplays:
  - name: main
    scenes:
      - name: build
        frames:
          - id: compile
            name: compile
            action:
              containers: [{ name: main, command: ["true"] }]
          - id: notify
            name: notify
            when:
              - env: prod
              - env: staging
                region: us
            action:
              containers: [{ name: main, command: ["true"] }]
      - name: ship
        when:
          - env: prod
        frames:
          - id: deploy
            name: deploy
            action:
              containers: [{ name: main, command: ["true"] }]
"#;

fn condition() -> Condition {
    let clause = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    Condition::new(vec![
        clause(&[("env", "prod")]),
        clause(&[("env", "staging"), ("region", "us")]),
    ])
}

fn vars(env: &str, region: &str) -> Vars {
    vec![Var::bound("env", env), Var::bound("region", region)].into()
}

#[test]
fn test_condition_is_or_of_ands() {
    let condition = condition();
    assert!(condition.evaluate(&vars("prod", "eu")));
    assert!(condition.evaluate(&vars("staging", "us")));
    assert!(!condition.evaluate(&vars("staging", "eu")));
    assert!(!condition.evaluate(&vars("dev", "us")));

    // unbound variables fail their clause only
    let partial: Vars = vec![Var::bound("env", "prod"), Var::declared("region")].into();
    assert!(condition.evaluate(&partial));
}

#[tokio::test]
async fn test_run_if_true_skips_unmatched() {
    let flow = pending_flow();
    let play = running_play(GUARDED);

    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["compile"]));
}

#[tokio::test]
async fn test_skip_if_true_inverts() {
    let flow = Flow::new(Arc::new(RecordingScheduler::pending()))
        .with_polarity(ConditionPolarity::SkipIfTrue);
    let mut play = running_play(GUARDED);

    assert_eq!(
        dispatched(flow.advance(&play).await.unwrap()),
        ids(&["compile", "notify"])
    );

    conclude(
        &mut play,
        &[
            ("compile", stagehand::FrameResult::Successful),
            ("notify", stagehand::FrameResult::Successful),
        ],
    );
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["deploy"]));
}

#[tokio::test]
async fn test_overrides_change_the_outcome() {
    let flow = pending_flow();
    let mut play = play_from_yaml(GUARDED, &[("env", "prod")]);
    play.assign_frame_ids();
    play.status.phase = stagehand::Phase::Running;

    assert_eq!(
        dispatched(flow.advance(&play).await.unwrap()),
        ids(&["compile", "notify"])
    );
    conclude(
        &mut play,
        &[
            ("compile", stagehand::FrameResult::Successful),
            ("notify", stagehand::FrameResult::Successful),
        ],
    );
    assert_eq!(dispatched(flow.advance(&play).await.unwrap()), ids(&["deploy"]));
}
