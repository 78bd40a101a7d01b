//! stagehand - a level-triggered workflow engine for staged, containerised plays

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod scheduler;

// Re-export commonly used types
pub use crate::core::config::{EngineConfig, PlayConfig, SchedulerKind};
pub use crate::core::{Frame, FrameResult, Phase, Play, PlayKey, Screenplay};
pub use execution::{Controller, Flow, FlowError, PlayEvent, PlayReconciler, Progress, ReconcileError};
pub use persistence::{InMemoryPlayStore, PlayStore, StoreError};
pub use scheduler::{Scheduler, SchedulerError};
