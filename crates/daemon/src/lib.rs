// stagehand-daemon library: persistence, the replication queue worker and
// workspace negotiation.

pub mod config;
pub mod entity;
pub mod queue;
pub mod replication;
pub mod runtime;
pub mod store;
pub mod workspace;
