#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod scheduler;
pub mod slots;
pub mod store;
pub mod tracer;

pub use config::Config;
pub use slots::{Slot, SlotMessageCounter};

/// Config inspection subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the JSON schema of config.toml
    #[command(long_about = "\
Print the JSON schema of config.toml.

Useful for editor completion and for validating hand-written configs.

Examples:
  slotkeeper config schema > slotkeeper.schema.json")]
    Schema,
}
