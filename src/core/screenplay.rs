//! Screenplay domain model - scenes of parallel frames framed by credits

use crate::core::{action::Action, condition::Condition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the screenplay a play runs
pub const MAIN_SCREENPLAY: &str = "main";

/// An ordered sequence of scenes plus optional opening and closing credits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screenplay {
    pub name: String,

    /// Resources materialized before the first scene and released after
    /// the closing credits
    #[serde(default)]
    pub provision: Provision,

    /// Scenes in execution order
    #[serde(default)]
    pub scenes: Vec<Scene>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<Credits>,
}

/// Frames run before the first scene and after the last one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub opening: Vec<Frame>,

    /// Always run once reached, whether the scenes succeeded or not
    #[serde(default)]
    pub closing: Vec<Frame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    #[serde(default)]
    pub resources: Vec<ResourceTemplate>,
}

/// A resource manifest template provisioned for the lifetime of a screenplay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub kind: String,

    pub name: String,

    /// Everything else in the manifest (data, spec, ...)
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

/// A set of frames that run concurrently
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,

    #[serde(default)]
    pub frames: Vec<Frame>,

    /// Guard evaluated against the play variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

/// A single unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Runtime identity, assigned when the play is initialized
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Display name
    pub name: String,

    /// Number of replicas to fan out
    #[serde(default = "default_copies", alias = "replicas")]
    pub copies: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    /// Reference to a nested screenplay; carried but never executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,

    /// Guard evaluated against the play variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

fn default_copies() -> u32 {
    1
}

impl Frame {
    /// Create a frame that runs `action`
    pub fn new(id: impl Into<String>, name: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            copies: 1,
            action: Some(action),
            story: None,
            when: None,
        }
    }
}

impl Screenplay {
    pub fn opening(&self) -> &[Frame] {
        self.credits.as_ref().map(|c| c.opening.as_slice()).unwrap_or(&[])
    }

    pub fn closing(&self) -> &[Frame] {
        self.credits.as_ref().map(|c| c.closing.as_slice()).unwrap_or(&[])
    }

    /// Every frame: scenes first, then opening and closing credits
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.scenes
            .iter()
            .flat_map(|s| s.frames.iter())
            .chain(self.opening().iter())
            .chain(self.closing().iter())
    }

    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        let credits = self
            .credits
            .iter_mut()
            .flat_map(|c| c.opening.iter_mut().chain(c.closing.iter_mut()));
        self.scenes
            .iter_mut()
            .flat_map(|s| s.frames.iter_mut())
            .chain(credits)
    }

    /// Find a frame by ID
    pub fn frame(&self, id: &str) -> Option<&Frame> {
        self.frames().find(|f| f.id == id)
    }

    /// Frames belonging to scenes (credits excluded)
    pub fn scene_frames(&self) -> impl Iterator<Item = &Frame> {
        self.scenes.iter().flat_map(|s| s.frames.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screenplay() -> Screenplay {
        serde_yaml::from_str(
            r#"
name: main
provision:
  resources:
    - kind: ConfigMap
      name: settings
      data:
        level: debug
credits:
  opening:
    - name: announce
      action:
        containers: [{ name: main, command: ["true"] }]
  closing:
    - name: cleanup
      action:
        containers: [{ name: main, command: ["true"] }]
scenes:
  - name: build
    frames:
      - name: compile
        copies: 2
        action:
          containers: [{ name: main, command: ["true"] }]
      - name: lint
        action:
          containers: [{ name: main, command: ["true"] }]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let screenplay = screenplay();
        assert_eq!(screenplay.scenes[0].frames[0].copies, 2);
        assert_eq!(screenplay.scenes[0].frames[1].copies, 1);
        assert!(screenplay.scenes[0].frames[1].id.is_empty());
        assert_eq!(screenplay.provision.resources[0].api_version, "v1");
        assert!(screenplay.provision.resources[0].body.contains_key("data"));
    }

    #[test]
    fn test_frame_iteration_order() {
        let mut screenplay = screenplay();
        let names: Vec<_> = screenplay.frames().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["compile", "lint", "announce", "cleanup"]);

        for (i, frame) in screenplay.frames_mut().enumerate() {
            frame.id = format!("id{}", i);
        }
        assert_eq!(screenplay.frame("id3").map(|f| f.name.as_str()), Some("cleanup"));
        assert_eq!(screenplay.scene_frames().count(), 2);
    }

    #[test]
    fn test_no_credits() {
        let screenplay = Screenplay {
            name: MAIN_SCREENPLAY.to_string(),
            ..Default::default()
        };
        assert!(screenplay.opening().is_empty());
        assert!(screenplay.closing().is_empty());
        assert_eq!(screenplay.frames().count(), 0);
    }
}
