use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Drive the Ember event runtime against authored level data",
    version
)]
pub struct Args {
    /// Path to the authored event data root (map_<id>.json, common_events.json)
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Map id to make current before ticking
    #[arg(long, default_value_t = 1)]
    pub map: u32,

    /// Queue this map event immediately, as if the player triggered it
    #[arg(long)]
    pub event: Option<u32>,

    /// Run an authored Lua script file in coroutine mode instead of a map event
    #[arg(long, conflicts_with = "event")]
    pub script: Option<PathBuf>,

    /// Number of host ticks to simulate
    #[arg(long, default_value_t = 600)]
    pub ticks: u32,

    /// Stand in for the widget/scene collaborators: dismiss prompts with the
    /// first option so unattended runs finish
    #[arg(long)]
    pub auto_dismiss: bool,

    /// Path to write the engine event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write the final state snapshot as JSON
    #[arg(long)]
    pub state_json: Option<PathBuf>,

    /// Echo event log lines to stderr as they are appended
    #[arg(long)]
    pub verbose: bool,
}
