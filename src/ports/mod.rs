//! Port traits: the engine's view of its collaborators.

pub mod config_port;
pub mod data_port;
pub mod regime_port;
pub mod report_port;
