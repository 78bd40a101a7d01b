//! Core domain models for plays
//!
//! This module defines the fundamental data structures that represent
//! plays, screenplays, frames, variables and their configuration.

pub mod action;
pub mod condition;
pub mod config;
pub mod ids;
pub mod play;
pub mod screenplay;
pub mod vars;

pub use action::*;
pub use condition::*;
pub use play::*;
pub use screenplay::*;
pub use vars::*;
