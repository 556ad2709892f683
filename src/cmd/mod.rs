//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled     |
//! |----------|----------------------|
//! | `run`    | `Start`, `Recover`   |
//! | `status` | `Status`, `Stop`     |
//! | `config` | `Config`             |

pub mod config;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use run::{StartFlags, cmd_recover, cmd_start};
pub use status::{cmd_status, cmd_stop};
