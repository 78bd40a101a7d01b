//! Persistence layer for plays
//!
//! Stores use optimistic concurrency: every stored play carries a
//! `resource_version`, and an update based on a stale version is rejected
//! with [`StoreError::Conflict`] so the caller can re-read and retry.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqlitePlayStore;

use crate::core::{Phase, Play, PlayKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("play {0} already exists")]
    AlreadyExists(PlayKey),

    #[error("play {0} not found")]
    NotFound(PlayKey),

    #[error("play {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        key: PlayKey,
        expected: u64,
        actual: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Trait for play storage backends
#[async_trait]
pub trait PlayStore: Send + Sync {
    /// Store a new play; returns it with its first resource version
    async fn create(&self, play: Play) -> Result<Play, StoreError>;

    async fn get(&self, key: &PlayKey) -> Result<Option<Play>, StoreError>;

    async fn list(&self) -> Result<Vec<Play>, StoreError>;

    /// Replace a play if its resource version is current; returns the
    /// stored play with the bumped version
    async fn update(&self, play: &Play) -> Result<Play, StoreError>;

    async fn delete(&self, key: &PlayKey) -> Result<(), StoreError>;
}

#[async_trait]
impl<P: PlayStore + ?Sized> PlayStore for Arc<P> {
    async fn create(&self, play: Play) -> Result<Play, StoreError> {
        (**self).create(play).await
    }

    async fn get(&self, key: &PlayKey) -> Result<Option<Play>, StoreError> {
        (**self).get(key).await
    }

    async fn list(&self) -> Result<Vec<Play>, StoreError> {
        (**self).list().await
    }

    async fn update(&self, play: &Play) -> Result<Play, StoreError> {
        (**self).update(play).await
    }

    async fn delete(&self, key: &PlayKey) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

/// Summary of a play for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaySummary {
    pub key: PlayKey,
    pub phase: Phase,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Frames with a result
    pub concluded_frames: usize,
    pub failed_frames: usize,
    /// Frames defined in the play, before replica fan-out
    pub total_frames: usize,
}

impl From<&Play> for PlaySummary {
    fn from(play: &Play) -> Self {
        let (_, failed) = play.status.counts();
        Self {
            key: play.key(),
            phase: play.status.phase,
            started_at: play.status.started_at,
            completed_at: play.status.completed_at,
            concluded_frames: play.status.frames.len(),
            failed_frames: failed,
            total_frames: play.frames().count(),
        }
    }
}

/// In-memory store (for testing or single-process use)
#[derive(Default)]
pub struct InMemoryPlayStore {
    plays: RwLock<BTreeMap<PlayKey, Play>>,
}

impl InMemoryPlayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayStore for InMemoryPlayStore {
    async fn create(&self, mut play: Play) -> Result<Play, StoreError> {
        let mut plays = self.plays.write().await;
        let key = play.key();
        if plays.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        play.metadata.resource_version = 1;
        plays.insert(key, play.clone());
        Ok(play)
    }

    async fn get(&self, key: &PlayKey) -> Result<Option<Play>, StoreError> {
        Ok(self.plays.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<Play>, StoreError> {
        Ok(self.plays.read().await.values().cloned().collect())
    }

    async fn update(&self, play: &Play) -> Result<Play, StoreError> {
        let mut plays = self.plays.write().await;
        let key = play.key();
        let stored = plays
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if stored.metadata.resource_version != play.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: play.metadata.resource_version,
                actual: stored.metadata.resource_version,
            });
        }

        let mut updated = play.clone();
        updated.metadata.resource_version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, key: &PlayKey) -> Result<(), StoreError> {
        match self.plays.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }
}
