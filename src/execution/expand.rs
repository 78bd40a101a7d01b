//! Expansion of a screenplay into its dispatch-ready form
//!
//! Expansion is a pure function of the play's spec and status: it never
//! touches the stored spec, so it can run on every pass and always yields
//! the same frames, identities and injected configuration.

use crate::core::{
    ids::replica_id, Action, ConditionPolarity, Frame, FrameResult, Play, PlayStatus, Screenplay,
    Vars, Volume, VolumeSource,
};
use crate::scheduler::resource::screenplay_resources;

/// Zero-based replica index of a fanned-out frame
pub const FRAME_COPY_INDEX: &str = "FRAME_COPY_INDEX";

/// Outcome of the scenes, given to closing credits
pub const SCREENPLAY_RESULT: &str = "STAGEHAND_SCREENPLAY_RESULT";

pub const VERDICT_SUCCESS: &str = "success";
pub const VERDICT_FAIL: &str = "fail";

const VARS_VOLUME: &str = "stagehand-vars";
const VARS_MOUNT_PATH: &str = "/stagehand/vars";
const CONFIG_MAP_MOUNT_ROOT: &str = "/stagehand/cms";

/// Expand `screenplay` for `play`
///
/// Skipped scenes and frames are dropped, replicas are fanned out, and the
/// vars config map, provisioned config maps and volume claims are wired into
/// every remaining frame.
pub fn expand(play: &Play, screenplay: &Screenplay, polarity: ConditionPolarity) -> Screenplay {
    let vars = &play.spec.vars;
    let mut expanded = screenplay.clone();

    expanded
        .scenes
        .retain(|scene| !polarity.skips(scene.when.as_ref(), vars));
    for scene in &mut expanded.scenes {
        scene.frames = replicate(active(std::mem::take(&mut scene.frames), polarity, vars));
    }
    if let Some(credits) = expanded.credits.as_mut() {
        credits.opening = replicate(active(std::mem::take(&mut credits.opening), polarity, vars));
        credits.closing = replicate(active(std::mem::take(&mut credits.closing), polarity, vars));
    }

    let injection = Injection::for_play(play, screenplay);
    for frame in expanded.frames_mut() {
        if let Some(action) = frame.action.as_mut() {
            injection.apply(action);
        }
    }
    expanded
}

fn active(frames: Vec<Frame>, polarity: ConditionPolarity, vars: &Vars) -> Vec<Frame> {
    frames
        .into_iter()
        .filter(|f| !polarity.skips(f.when.as_ref(), vars))
        .collect()
}

/// Fan out frames with more than one copy
fn replicate(frames: Vec<Frame>) -> Vec<Frame> {
    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        if frame.copies <= 1 {
            out.push(frame);
            continue;
        }
        for index in 0..frame.copies {
            let mut copy = frame.clone();
            copy.id = replica_id(&frame.id, index);
            copy.name = format!("{}-{}", frame.name, index);
            copy.copies = 1;
            if let Some(action) = copy.action.as_mut() {
                action.set_env(FRAME_COPY_INDEX, &index.to_string());
            }
            out.push(copy);
        }
    }
    out
}

/// Configuration wired into every frame of a play
struct Injection {
    vars_config_map: Option<String>,
    /// (volume name, config map name, mount path)
    config_maps: Vec<(String, String, String)>,
    /// Logical volume name -> claim name
    claims: Vec<(String, String)>,
}

impl Injection {
    fn for_play(play: &Play, screenplay: &Screenplay) -> Self {
        let config_maps = screenplay
            .provision
            .resources
            .iter()
            .zip(screenplay_resources(play, screenplay))
            .filter(|(_, resource)| resource.is_config_map())
            .map(|(template, resource)| {
                (
                    format!("cms-{}", template.name),
                    resource.name,
                    format!("{}/{}", CONFIG_MAP_MOUNT_ROOT, template.name),
                )
            })
            .collect();

        Self {
            vars_config_map: play.status.vars_config_map.clone(),
            config_maps,
            claims: play
                .status
                .provisioned_volumes
                .iter()
                .map(|(logical, claim)| (logical.clone(), claim.clone()))
                .collect(),
        }
    }

    fn apply(&self, action: &mut Action) {
        if let Some(config_map) = &self.vars_config_map {
            mount_config_map(action, VARS_VOLUME, config_map, VARS_MOUNT_PATH);
        }
        for (volume, config_map, path) in &self.config_maps {
            mount_config_map(action, volume, config_map, path);
        }
        for (logical, claim) in &self.claims {
            if action.mounts(logical) {
                action.volumes.retain(|v| &v.name != logical);
                action.volumes.push(Volume {
                    name: logical.clone(),
                    source: VolumeSource::PersistentVolumeClaim {
                        claim_name: claim.clone(),
                    },
                });
            }
        }
    }
}

fn mount_config_map(action: &mut Action, volume: &str, config_map: &str, path: &str) {
    action.add_volume(Volume {
        name: volume.to_string(),
        source: VolumeSource::ConfigMap {
            name: config_map.to_string(),
        },
    });
    action.add_env_from(config_map);
    action.add_volume_mount(volume, path);
}

/// Verdict of an expanded screenplay's scenes
pub fn verdict(screenplay: &Screenplay, status: &PlayStatus) -> &'static str {
    let failed = screenplay
        .scene_frames()
        .any(|f| status.result(&f.id) == Some(FrameResult::Failed));
    if failed {
        VERDICT_FAIL
    } else {
        VERDICT_SUCCESS
    }
}

/// Tell closing credits how the scenes went
pub fn inject_verdict(frames: &mut [Frame], verdict: &str) {
    for frame in frames {
        if let Some(action) = frame.action.as_mut() {
            action.set_env(SCREENPLAY_RESULT, verdict);
        }
    }
}
