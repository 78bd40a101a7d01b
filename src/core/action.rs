//! Action model - the executable payload of a frame
//!
//! The engine treats an action as opaque except for the places where it
//! injects environment, env-sources, volumes and mounts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container-based action definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Main containers
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Containers run to completion before the main containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    /// Volumes available to the containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Extra labels for the execution
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Number of retries before the execution is considered failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,

    /// Restart policy (e.g. "Never", "OnFailure")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Populates a container's environment from a config object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    pub config_map_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,

    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    ConfigMap {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    PersistentVolumeClaim {
        claim_name: String,
    },
    EmptyDir {},
}

impl Action {
    /// All containers, init containers included
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.init_containers.iter().chain(self.containers.iter())
    }

    fn all_containers_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.init_containers
            .iter_mut()
            .chain(self.containers.iter_mut())
    }

    /// Set an environment variable on every container, replacing any
    /// previous value of the same name
    pub fn set_env(&mut self, name: &str, value: &str) {
        for container in self.all_containers_mut() {
            match container.env.iter_mut().find(|e| e.name == name) {
                Some(existing) => existing.value = value.to_string(),
                None => container.env.push(EnvVar::new(name, value)),
            }
        }
    }

    /// Add an env-source to every container
    pub fn add_env_from(&mut self, config_map: &str) {
        for container in self.all_containers_mut() {
            if !container.env_from.iter().any(|e| e.config_map_ref == config_map) {
                container.env_from.push(EnvFromSource {
                    config_map_ref: config_map.to_string(),
                });
            }
        }
    }

    /// Mount a volume into every container
    pub fn add_volume_mount(&mut self, name: &str, mount_path: &str) {
        for container in self.all_containers_mut() {
            if !container.volume_mounts.iter().any(|m| m.name == name) {
                container.volume_mounts.push(VolumeMount {
                    name: name.to_string(),
                    mount_path: mount_path.to_string(),
                });
            }
        }
    }

    /// Add a volume unless one with the same name already exists
    pub fn add_volume(&mut self, volume: Volume) {
        if !self.volumes.iter().any(|v| v.name == volume.name) {
            self.volumes.push(volume);
        }
    }

    /// Check whether any container declares a mount named `name`
    pub fn mounts(&self, name: &str) -> bool {
        self.all_containers()
            .any(|c| c.volume_mounts.iter().any(|m| m.name == name))
    }

    /// Look up an environment variable on the first main container
    pub fn env(&self, name: &str) -> Option<&str> {
        self.containers
            .first()
            .and_then(|c| c.env.iter().find(|e| e.name == name))
            .map(|e| e.value.as_str())
    }
}
