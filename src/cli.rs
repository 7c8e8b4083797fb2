use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stride-bot", version, about = "Group chat step-tracking assistant")]
pub struct Cli {
    /// SQLite database file.
    #[arg(long, env = "STRIDE_BOT_DB", default_value = "stride_bot.db", global = true)]
    pub database: PathBuf,

    /// Chat time zone as an offset from UTC, in minutes.
    #[arg(long, env = "STRIDE_BOT_UTC_OFFSET", default_value_t = 0, global = true)]
    pub utc_offset: i32,

    /// User ids allowed to change the goal. Repeat or comma-separate.
    #[arg(long = "admin", env = "STRIDE_BOT_ADMINS", value_delimiter = ',', global = true)]
    pub admins: Vec<String>,

    /// Treat every user as an administrator.
    #[arg(long, env = "STRIDE_BOT_EVERYONE_ADMIN", global = true)]
    pub everyone_admin: bool,

    /// Log filter, in tracing-subscriber EnvFilter syntax.
    #[arg(long, env = "STRIDE_BOT_LOG", default_value = "info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read chat events as JSON lines on stdin; write replies to stdout.
    Run {
        /// Do not start the recurring evening jobs.
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Fire one registered job immediately, then exit.
    Job {
        /// Job name, e.g. "evening_reminder" or "evening_stat".
        name: String,
    },
}
