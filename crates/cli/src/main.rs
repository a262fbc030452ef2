// crates/cli/src/main.rs
//! geoapi command-line front end.
//!
//! Submits jobs, waits on them, and follows scheduled analyses. Every job
//! created here gets a session token so later commands can refer to it by
//! name instead of server ids.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "geoapi", version, about = "Submit and track geoapi jobs")]
pub struct Cli {
    /// Config file (default: $GEOAPI_CONFIG, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More logging on stderr; repeat for more detail.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Never color output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Fixed poll interval in seconds, overriding configured policies.
    #[arg(long, global = true, value_name = "SECS", value_parser = parse_interval)]
    pub poll_interval: Option<Duration>,

    /// Give up waiting after this many status reads.
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a local file or a remote URL into a table.
    Import {
        /// Path or http(s) URL.
        source: String,
        /// Wait for the table to be created.
        #[arg(long)]
        wait: bool,
        /// public, link or private.
        #[arg(long)]
        privacy: Option<String>,
        /// Also create a map from the imported table.
        #[arg(long)]
        create_vis: bool,
    },
    /// Register a table that re-imports a URL periodically.
    Sync {
        url: String,
        /// Seconds between sync runs.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
    /// Export a visualization.
    Export {
        visualization_id: String,
        /// Wait for the download URL.
        #[arg(long)]
        wait: bool,
    },
    /// Run SQL statements as a batch job.
    Sql {
        #[arg(required = true, value_name = "QUERY")]
        queries: Vec<String>,
        #[arg(long)]
        wait: bool,
    },
    /// Cancel a batch SQL job by id or session token.
    SqlCancel {
        #[arg(value_name = "JOB")]
        job: String,
    },
    /// Create a scheduled analysis.
    #[command(group(
        ArgGroup::new("recurrence")
            .required(true)
            .args(["interval", "trigger", "now"])
    ))]
    Schedule {
        /// Job name, also the session token prefix.
        name: String,
        /// Analysis definition as a JSON object.
        #[arg(long, value_name = "JSON", value_parser = parse_definition, default_value = "{}")]
        definition: serde_json::Value,
        /// Cron expression, e.g. "0 3 * * *".
        #[arg(long, value_name = "CRON")]
        interval: Option<String>,
        /// Re-run whenever this table changes.
        #[arg(long, value_name = "TABLE")]
        trigger: Option<String>,
        /// Run once, right away.
        #[arg(long)]
        now: bool,
        /// Keep following the schedule until it stops.
        #[arg(long)]
        follow: bool,
    },
    /// Follow a schedule until it stops, or wait on one execution.
    ///
    /// Takes a session token or raw `job/schedule[/execution]` ids.
    Follow { token: String },
    /// Stop a schedule by session token or `job/schedule` ids.
    Stop { token: String },
    /// Print the server ids behind a session token.
    Token { token: String },
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("interval must be positive".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn parse_definition(raw: &str) -> Result<serde_json::Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(_) => Err("definition must be a JSON object".to_string()),
        Err(err) => Err(format!("invalid JSON: {err}")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    geoapi_observability::init_logging(cli.verbose);

    match commands::run(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
