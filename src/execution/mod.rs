//! Play execution: expansion, flow engine, reconciler and controller loop

pub mod controller;
pub mod expand;
pub mod flow;
pub mod reconciler;

pub use controller::{Controller, WorkQueue};
pub use expand::{expand, FRAME_COPY_INDEX, SCREENPLAY_RESULT};
pub use flow::{Flow, FlowError, Progress};
pub use reconciler::{EventHandler, PlayEvent, PlayReconciler, ReconcileError};
