//! Resources provisioned for the lifetime of a play

use crate::core::{Play, Screenplay, VolumeClaimTemplate};
use crate::scheduler::JOB_LABEL_PLAY;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A concrete resource manifest, named and namespaced for one play
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Remaining manifest fields (data, spec, ...)
    pub body: Map<String, Value>,
}

impl Resource {
    pub fn is_config_map(&self) -> bool {
        self.kind == "ConfigMap"
    }

    /// Render as a manifest
    pub fn to_manifest(&self) -> Value {
        let mut manifest = self.body.clone();
        manifest.insert("apiVersion".to_string(), json!(self.api_version));
        manifest.insert("kind".to_string(), json!(self.kind));
        manifest.insert(
            "metadata".to_string(),
            json!({
                "name": self.name,
                "namespace": self.namespace,
                "labels": self.labels,
            }),
        );
        Value::Object(manifest)
    }
}

fn play_labels(play: &Play) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(JOB_LABEL_PLAY.to_string(), play.name().to_string());
    labels
}

/// Materialize a screenplay's provisioning templates for `play`
///
/// Each resource gets the play name as a suffix and the play's namespace.
pub fn screenplay_resources(play: &Play, screenplay: &Screenplay) -> Vec<Resource> {
    screenplay
        .provision
        .resources
        .iter()
        .map(|template| Resource {
            api_version: template.api_version.clone(),
            kind: template.kind.clone(),
            name: format!("{}-{}", template.name, play.name()),
            namespace: play.namespace().to_string(),
            labels: play_labels(play),
            body: template.body.clone(),
        })
        .collect()
}

/// Name of the config map holding a play's bound variables
pub fn vars_config_map_name(play: &Play) -> String {
    format!("{}-vars", play.name())
}

/// Config map exposing the play's bound variables to its frames
pub fn vars_config_map(play: &Play) -> Resource {
    let mut body = Map::new();
    body.insert("data".to_string(), json!(play.spec.vars.bound_values()));
    Resource {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: vars_config_map_name(play),
        namespace: play.namespace().to_string(),
        labels: play_labels(play),
        body,
    }
}

/// Name of the claim provisioned for a volume claim template
pub fn volume_claim_name(play: &Play, template: &VolumeClaimTemplate) -> String {
    format!("{}-{}", play.name(), template.name)
}

/// Persistent volume claim for a volume claim template
pub fn volume_claim(play: &Play, template: &VolumeClaimTemplate) -> Resource {
    let mut spec = json!({
        "accessModes": template.access_modes,
        "resources": { "requests": { "storage": template.storage } },
    });
    if let (Some(class), Some(object)) = (&template.storage_class_name, spec.as_object_mut()) {
        object.insert("storageClassName".to_string(), json!(class));
    }

    let mut body = Map::new();
    body.insert("spec".to_string(), spec);
    Resource {
        api_version: "v1".to_string(),
        kind: "PersistentVolumeClaim".to_string(),
        name: volume_claim_name(play, template),
        namespace: play.namespace().to_string(),
        labels: play_labels(play),
        body,
    }
}

/// Claims for every volume claim template of the play
pub fn volume_claims(play: &Play) -> Vec<Resource> {
    play.spec
        .volume_claim_templates
        .iter()
        .map(|t| volume_claim(play, t))
        .collect()
}
