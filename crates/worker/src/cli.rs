use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chaos worker: schedules disruptions, dispatches them to executors and
/// rolls them back.
#[derive(Parser, Debug)]
#[command(name = "chaos-worker", version, about)]
pub struct Cli {
    /// Config profile; `PROD` reads `PROD_<KEY>` before `<KEY>`.
    #[arg(long, env = "CHAOS_PROFILE", default_value = "")]
    pub profile: String,

    /// Chaos settings document (overrides CHAOS_SETTINGS).
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduler and trigger loops until interrupted.
    Run {
        /// Scheduler tick period in seconds (overrides CHAOS_SCHEDULER_TICK_SECS).
        #[arg(long)]
        scheduler_tick: Option<u64>,

        /// Trigger tick period in seconds (overrides CHAOS_TRIGGER_TICK_SECS;
        /// defaults to the trigger window).
        #[arg(long)]
        trigger_tick: Option<u64>,
    },
    /// Run one scheduler tick and exit.
    TickScheduler,
    /// Run one trigger tick, wait for the started executors, and exit.
    TickTrigger,
    /// Validate the settings document and list eligible resource groups.
    Check,
}
