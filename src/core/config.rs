//! Play and engine configuration from YAML

use crate::core::{
    condition::ConditionPolarity,
    ids,
    play::{default_namespace, Play, PlaySpec, VolumeClaimTemplate},
    screenplay::{Frame, Screenplay, MAIN_SCREENPLAY},
    vars::{Var, VarError, Vars},
};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Names must be usable as resource names on the cluster
fn dns_label() -> &'static Regex {
    static DNS_LABEL: OnceLock<Regex> = OnceLock::new();
    DNS_LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS label regex")
    })
}

/// Explicit frame IDs end up verbatim in execution names, which keep only
/// the first [`ids::ID_LENGTH`] characters
fn check_frame_id(id: &str) -> Result<()> {
    if id.len() > ids::ID_LENGTH || !dns_label().is_match(id) {
        anyhow::bail!(
            "Frame ID '{}' must be at most {} lowercase alphanumeric characters or '-'",
            id,
            ids::ID_LENGTH
        );
    }
    Ok(())
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.len() > 63 || !dns_label().is_match(name) {
        anyhow::bail!(
            "{} name '{}' must be at most 63 lowercase alphanumeric characters or '-'",
            what,
            name
        );
    }
    Ok(())
}

/// Top-level play definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayConfig {
    /// Play name
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Annotations copied onto every execution
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Declared variables, optionally with default values
    #[serde(default)]
    pub vars: Vec<Var>,

    #[serde(default)]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,

    pub screenplays: Vec<Screenplay>,
}

impl PlayConfig {
    /// Load play configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse play configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PlayConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the play configuration
    pub fn validate(&self) -> Result<()> {
        check_name("Play", &self.name)?;

        if !self.screenplays.iter().any(|s| s.name == MAIN_SCREENPLAY) {
            anyhow::bail!("Play '{}' has no '{}' screenplay", self.name, MAIN_SCREENPLAY);
        }

        let mut screenplay_names = HashSet::new();
        let mut frame_ids = HashSet::new();
        for screenplay in &self.screenplays {
            if !screenplay_names.insert(&screenplay.name) {
                anyhow::bail!("Duplicate screenplay name: {}", screenplay.name);
            }
            check_name("Screenplay", &screenplay.name)?;

            for resource in &screenplay.provision.resources {
                check_name("Resource", &resource.name)?;
            }

            for scene in &screenplay.scenes {
                if let Some(when) = &scene.when {
                    self.check_condition_vars(&format!("scene '{}'", scene.name), when.variables())?;
                }
            }

            for frame in screenplay.frames() {
                self.validate_frame(frame)?;
                if !frame.id.is_empty() {
                    check_frame_id(&frame.id)?;
                    for id in ids::expanded_ids(&frame.id, frame.copies) {
                        if !frame_ids.insert(id.clone()) {
                            anyhow::bail!("Duplicate frame ID: {}", id);
                        }
                    }
                }
            }
        }

        let mut claim_names = HashSet::new();
        for template in &self.volume_claim_templates {
            check_name("Volume claim", &template.name)?;
            if !claim_names.insert(&template.name) {
                anyhow::bail!("Duplicate volume claim template: {}", template.name);
            }
        }

        let mut var_names = HashSet::new();
        for var in &self.vars {
            if !var_names.insert(&var.name) {
                anyhow::bail!("Duplicate variable: {}", var.name);
            }
        }

        Ok(())
    }

    fn validate_frame(&self, frame: &Frame) -> Result<()> {
        check_name("Frame", &frame.name)?;

        if frame.copies == 0 {
            anyhow::bail!("Frame '{}' must have at least one copy", frame.name);
        }

        match (&frame.action, &frame.story) {
            (Some(action), _) => {
                if action.containers.is_empty() {
                    anyhow::bail!("Frame '{}' action has no containers", frame.name);
                }
            }
            (None, Some(story)) => anyhow::bail!(
                "Frame '{}' references story '{}', but nested stories are not supported",
                frame.name,
                story
            ),
            (None, None) => anyhow::bail!("Frame '{}' has no action", frame.name),
        }

        if let Some(when) = &frame.when {
            self.check_condition_vars(&format!("frame '{}'", frame.name), when.variables())?;
        }
        Ok(())
    }

    fn check_condition_vars<'a>(
        &self,
        owner: &str,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<()> {
        for name in names {
            if !self.vars.iter().any(|v| v.name == name) {
                return Err(VarError::NotDeclared(name.to_string()))
                    .with_context(|| format!("Condition on {} is invalid", owner));
            }
        }
        Ok(())
    }

    /// Create a play, binding `overrides` onto the declared variables
    ///
    /// Every declared variable must end up with a value.
    pub fn instantiate(&self, overrides: &[(String, String)]) -> Result<Play> {
        let mut vars: Vars = self.vars.iter().cloned().collect();
        for (name, value) in overrides {
            vars.set(name, value.clone())
                .with_context(|| format!("Cannot override variable '{}'", name))?;
        }
        if let Some(missing) = vars.unbound().first() {
            anyhow::bail!("Missing required variable: {}", missing);
        }

        let mut play = Play::new(
            &self.name,
            &self.namespace,
            PlaySpec {
                screenplays: self.screenplays.clone(),
                vars,
                volume_claim_templates: self.volume_claim_templates.clone(),
            },
        );
        play.metadata.annotations = self.annotations.clone();
        Ok(play)
    }
}

/// Which scheduler backend the engine dispatches frames to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Run frame commands as local processes
    #[default]
    Local,
    /// Create jobs on a cluster through kubectl
    Cluster,
    /// Record dispatches and conclude every frame immediately
    Stub,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Namespace used when a play does not set one
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Delay between reconcile passes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of plays reconciled concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// SQLite database path (defaults to the local data dir)
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Interpretation of `when` conditions
    #[serde(default)]
    pub condition_polarity: ConditionPolarity,

    /// kubectl executable for the cluster scheduler
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Working directory for the local scheduler
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            namespace: default_namespace(),
            poll_interval_ms: default_poll_interval_ms(),
            workers: default_workers(),
            database: None,
            condition_polarity: ConditionPolarity::default(),
            kubectl: default_kubectl(),
            work_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid engine config {}", path.display()))?;
        if config.workers == 0 {
            anyhow::bail!("Engine config 'workers' must be at least 1");
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
