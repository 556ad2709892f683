pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod executor;
pub mod fixture;
pub mod orchestrator;
pub mod task;
