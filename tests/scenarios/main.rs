//! Scenario-based tests for stagehand

mod helpers;

mod cluster_recovery;
mod conditions;
mod credits;
mod driver;
mod flow_order;
mod partial_dispatch;
mod replicas;
