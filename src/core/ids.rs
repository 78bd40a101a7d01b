//! Random frame identities

use std::collections::HashSet;
use uuid::Uuid;

/// Length of a generated frame identity
pub const ID_LENGTH: usize = 16;

/// Generate a random lowercase alphanumeric identity
pub fn random_id() -> String {
    Uuid::new_v4().simple().to_string()[..ID_LENGTH].to_string()
}

/// Generate `count` distinct random identities
pub fn random_ids(count: usize) -> Vec<String> {
    let mut seen = HashSet::with_capacity(count);
    let mut ids = Vec::with_capacity(count);
    while ids.len() < count {
        let id = random_id();
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
}

/// Identity of replica `index` of the frame `id`
///
/// Execution names keep only the first [`ID_LENGTH`] characters of a frame
/// identity, so the base is shortened to leave room for the suffix.
pub fn replica_id(id: &str, index: u32) -> String {
    let suffix = format!("-{}", index);
    let keep = ID_LENGTH.saturating_sub(suffix.len());
    let base: String = id.chars().take(keep).collect();
    format!("{}{}", base, suffix)
}

/// Identities a frame runs under once its copies are fanned out
pub fn expanded_ids(id: &str, copies: u32) -> Vec<String> {
    if copies <= 1 {
        vec![id.to_string()]
    } else {
        (0..copies).map(|i| replica_id(id, i)).collect()
    }
}
