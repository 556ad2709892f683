pub mod engine;
pub mod state;
pub mod transitions;

pub use engine::{Collaborators, Engine, Halt, RunStatus, read_status, stop_run};
pub use state::{
    Counters, FileSnapshotStore, MemorySnapshotStore, Phase, RunOptions, Snapshot, SnapshotStore,
};
