// stagehand-common: shared types for the Stagehand workspace

pub mod entity;
pub mod replication;
pub mod types;
