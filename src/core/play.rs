//! Play - one runtime instance of a screenplay definition

use crate::core::{
    ids,
    screenplay::{Frame, Screenplay},
    vars::Vars,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle phase of a play
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Play was just created
    #[default]
    Created,
    /// One-time setup: identities and provisioned resources
    Init,
    /// Frames are being dispatched
    Running,
    /// Every frame concluded and none failed
    Complete,
    /// Every reachable frame concluded and at least one failed
    Failed,
    /// The play could not be run at all
    Error,
}

impl Phase {
    /// Check if the phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed | Phase::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Created => "Created",
            Phase::Init => "Init",
            Phase::Running => "Running",
            Phase::Complete => "Complete",
            Phase::Failed => "Failed",
            Phase::Error => "Error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Created" => Ok(Phase::Created),
            "Init" => Ok(Phase::Init),
            "Running" => Ok(Phase::Running),
            "Complete" => Ok(Phase::Complete),
            "Failed" => Ok(Phase::Failed),
            "Error" => Ok(Phase::Error),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Terminal outcome of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameResult {
    #[serde(rename = "success")]
    Successful,
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for FrameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameResult::Successful => f.write_str("success"),
            FrameResult::Failed => f.write_str("failed"),
        }
    }
}

/// Identity of a play within the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayKey {
    pub namespace: String,
    pub name: String,
}

impl PlayKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata shared by everything the engine persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,

    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

pub fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            resource_version: 0,
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            created_at: Some(Utc::now()),
        }
    }
}

/// Request for a volume that lives as long as the play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplate {
    /// Logical name; frames mounting a volume of this name get the claim
    pub name: String,

    #[serde(default = "default_storage")]
    pub storage: String,

    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

fn default_storage() -> String {
    "1Gi".to_string()
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Definition part of a play, fixed once the play is running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySpec {
    pub screenplays: Vec<Screenplay>,

    #[serde(default)]
    pub vars: Vars,

    #[serde(default)]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
}

/// Observed state of a play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayStatus {
    #[serde(default)]
    pub phase: Phase,

    /// Results of concluded frames keyed by frame ID; a missing entry
    /// means the frame has not concluded yet
    #[serde(default)]
    pub frames: BTreeMap<String, FrameResult>,

    /// Logical volume name -> provisioned claim name
    #[serde(default)]
    pub provisioned_volumes: BTreeMap<String, String>,

    /// Name of the config object holding the bound variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars_config_map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set once everything provisioned for a terminal play was released
    #[serde(default)]
    pub cleaned_up: bool,
}

impl PlayStatus {
    /// Record the result of a frame
    pub fn set_frame_result(&mut self, frame_id: impl Into<String>, result: FrameResult) {
        self.frames.insert(frame_id.into(), result);
    }

    pub fn result(&self, frame_id: &str) -> Option<FrameResult> {
        self.frames.get(frame_id).copied()
    }

    pub fn concluded(&self, frame_id: &str) -> bool {
        self.frames.contains_key(frame_id)
    }

    /// Check whether every given frame has a result
    pub fn all_concluded<'a>(&self, frames: impl IntoIterator<Item = &'a Frame>) -> bool {
        frames.into_iter().all(|f| self.concluded(&f.id))
    }

    /// Check if any frame failed
    pub fn failed(&self) -> bool {
        self.frames.values().any(|r| *r == FrameResult::Failed)
    }

    /// Count of (successful, failed) frames
    pub fn counts(&self) -> (usize, usize) {
        let failed = self
            .frames
            .values()
            .filter(|r| **r == FrameResult::Failed)
            .count();
        (self.frames.len() - failed, failed)
    }
}

/// A play: metadata, definition and observed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub metadata: ObjectMeta,

    pub spec: PlaySpec,

    #[serde(default)]
    pub status: PlayStatus,
}

impl Play {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: PlaySpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec,
            status: PlayStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> PlayKey {
        PlayKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Get a screenplay by name
    pub fn screenplay(&self, name: &str) -> Option<&Screenplay> {
        self.spec.screenplays.iter().find(|s| s.name == name)
    }

    /// Every frame of every screenplay
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.spec.screenplays.iter().flat_map(|s| s.frames())
    }

    /// Find a frame by ID across all screenplays
    pub fn frame(&self, frame_id: &str) -> Option<&Frame> {
        self.frames().find(|f| f.id == frame_id)
    }

    /// Give every frame without an identity a random one
    ///
    /// Identities already present are kept, so calling this again is a
    /// no-op. Returns the number of identities assigned.
    pub fn assign_frame_ids(&mut self) -> usize {
        let taken: HashSet<String> = self
            .frames()
            .filter(|f| !f.id.is_empty())
            .map(|f| f.id.clone())
            .collect();
        let missing = self.frames().filter(|f| f.id.is_empty()).count();

        let mut fresh = ids::random_ids(missing + taken.len())
            .into_iter()
            .filter(|id| !taken.contains(id));

        let mut assigned = 0;
        for screenplay in &mut self.spec.screenplays {
            for frame in screenplay.frames_mut().filter(|f| f.id.is_empty()) {
                if let Some(id) = fresh.next() {
                    frame.id = id;
                    assigned += 1;
                }
            }
        }
        assigned
    }
}
