// crates/cli/src/commands.rs
//! Subcommand execution.
//!
//! Everything a command touches lives in [`Session`]: the job context, the
//! schedule context and the token registry. `run` builds it from the loaded
//! configuration; tests build it around a scripted API.

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use geoapi_client::{ApiClient, ClientConfig, ImportSource};
use geoapi_core::{
    BatchSqlJob, ExportJob, ImportJob, ImportOptions, JobContext, JobError, JobHandle, JobSpec,
    Palette, PollPolicy, Recurrence, ScheduleContext, SessionTokenRegistry, SyncJob, Tone,
    TokenTarget,
};
use serde_json::Value;

use crate::{Cli, Command};

/// How a command ended when it did not error out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The job finished but did not succeed; details were already printed.
    JobFailed,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::JobFailed => ExitCode::FAILURE,
        }
    }
}

/// Command-line poll overrides. They beat every configured policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOverrides {
    pub interval: Option<Duration>,
    pub max_attempts: Option<u32>,
}

pub struct Session {
    config: ClientConfig,
    jobs: JobContext,
    schedules: ScheduleContext,
    tokens: Arc<Mutex<SessionTokenRegistry>>,
    palette: Palette,
    overrides: PollOverrides,
}

pub fn run(cli: Cli) -> Result<Outcome> {
    let config = ClientConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let api = ApiClient::new(&config).context("failed to build HTTP client")?;
    let registry = match config.token_store_path() {
        Some(path) => SessionTokenRegistry::open(&path)
            .with_context(|| format!("failed to open token store {}", path.display()))?,
        None => SessionTokenRegistry::in_memory(),
    };
    let palette = if cli.no_color {
        Palette::plain()
    } else {
        config.palette()
    };
    let overrides = PollOverrides {
        interval: cli.poll_interval,
        max_attempts: cli.max_attempts,
    };

    let session = Session::new(config, JobContext::new(Arc::new(api)), registry, palette, overrides);
    let stdout = io::stdout();
    session.execute(cli.command, &mut stdout.lock())
}

impl Session {
    pub fn new(
        config: ClientConfig,
        jobs: JobContext,
        registry: SessionTokenRegistry,
        palette: Palette,
        overrides: PollOverrides,
    ) -> Self {
        let tokens = Arc::new(Mutex::new(registry));
        let schedules = ScheduleContext::new(jobs.clone())
            .with_config(config.tracker_config())
            .with_palette(palette)
            .with_tokens(tokens.clone());
        Self {
            config,
            jobs,
            schedules,
            tokens,
            palette,
            overrides,
        }
    }

    pub fn execute<W: Write>(&self, command: Command, out: &mut W) -> Result<Outcome> {
        match command {
            Command::Import {
                source,
                wait,
                privacy,
                create_vis,
            } => self.import(&source, wait, privacy, create_vis, out),
            Command::Sync { url, interval } => self.sync(&url, interval, out),
            Command::Export {
                visualization_id,
                wait,
            } => self.export(&visualization_id, wait, out),
            Command::Sql { queries, wait } => self.sql(queries, wait, out),
            Command::SqlCancel { job } => self.sql_cancel(&job, out),
            Command::Schedule {
                name,
                definition,
                interval,
                trigger,
                now: _,
                follow,
            } => {
                let recurrence = Recurrence::from_fields(interval.as_deref(), trigger.as_deref());
                self.schedule(&name, recurrence, definition, follow, out)
            }
            Command::Follow { token } => self.follow(&token, out),
            Command::Stop { token } => self.stop(&token, out),
            Command::Token { token } => self.token(&token, out),
        }
    }

    fn import<W: Write>(
        &self,
        source: &str,
        wait: bool,
        privacy: Option<String>,
        create_visualization: bool,
        out: &mut W,
    ) -> Result<Outcome> {
        let source = ImportSource::parse(source);
        let name = import_name(&source);
        let job = match source {
            ImportSource::File(path) => ImportJob::from_file(&self.jobs, path),
            ImportSource::Url(url) => ImportJob::from_url(&self.jobs, url),
        }
        .with_options(ImportOptions {
            privacy,
            create_visualization,
        });

        let (job, outcome) = self.submit(job, &name, wait, out)?;
        if let Some(table) = job.table_name().filter(|_| job.succeeded()) {
            writeln!(out, "  table: {table}")?;
        }
        Ok(outcome)
    }

    fn sync<W: Write>(&self, url: &str, interval_secs: u64, out: &mut W) -> Result<Outcome> {
        // Creation polling ends at `created`; runs happen on the server's clock.
        let job = SyncJob::from_url(&self.jobs, url, interval_secs);
        let (job, outcome) = self.submit(job, "sync", true, out)?;
        if let Some(next) = job.next_run_at() {
            writeln!(out, "  next run: {}", next.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(outcome)
    }

    fn export<W: Write>(&self, visualization_id: &str, wait: bool, out: &mut W) -> Result<Outcome> {
        let job = ExportJob::for_visualization(&self.jobs, visualization_id);
        let (job, outcome) = self.submit(job, "export", wait, out)?;
        if let Some(url) = job.url() {
            writeln!(out, "  url: {url}")?;
        }
        Ok(outcome)
    }

    fn sql<W: Write>(&self, queries: Vec<String>, wait: bool, out: &mut W) -> Result<Outcome> {
        let job = BatchSqlJob::multi(&self.jobs, queries);
        let (_job, outcome) = self.submit(job, "sql", wait, out)?;
        Ok(outcome)
    }

    /// `job` is a session token when the registry knows it, a server id
    /// otherwise.
    fn sql_cancel<W: Write>(&self, job: &str, out: &mut W) -> Result<Outcome> {
        let id = match self.registry()?.ids_for(job) {
            Some([id]) => id.clone(),
            Some(chain) => return Err(anyhow!("{job} names {}, not a batch job", chain.join("/"))),
            None => job.to_string(),
        };
        let mut handle = BatchSqlJob::attach(&self.jobs, vec![id.clone()]);
        let confirmation = handle.cancel()?;
        let status = confirmation
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("cancel requested");
        writeln!(out, "{} {id}  {status}", self.palette.paint("batch-sql", Tone::Heading))?;
        Ok(Outcome::Success)
    }

    /// Create a schedule and print its token, or follow it until it stops.
    fn schedule<W: Write>(
        &self,
        name: &str,
        recurrence: Recurrence,
        definition: Value,
        follow: bool,
        out: &mut W,
    ) -> Result<Outcome> {
        let mut tracker = self.schedules.create_schedule(name, recurrence, definition)?;
        if follow {
            tracker.follow(out)?;
            return Ok(Outcome::Success);
        }

        let p = &self.palette;
        let ids = tracker.ids().join("/");
        let label = match tracker.token() {
            Some(token) => format!("{token} ({ids})"),
            None => ids,
        };
        match tracker.record() {
            Some(record) => writeln!(
                out,
                "{} {label}  {}  {}",
                p.paint("schedule", Tone::Heading),
                p.paint(&record.status, Palette::phase_tone(&record.status, None)),
                p.paint(&record.recurrence, Tone::Muted),
            )?,
            None => writeln!(out, "{} {label}", p.paint("schedule", Tone::Heading))?,
        }
        Ok(Outcome::Success)
    }

    fn follow<W: Write>(&self, token: &str, out: &mut W) -> Result<Outcome> {
        match self.target(token)? {
            target @ TokenTarget::Schedule { .. } => {
                let mut tracker = self.schedules.tracker_for(&target)?;
                tracker.follow(out)?;
                Ok(Outcome::Success)
            }
            target @ TokenTarget::Execution { .. } => {
                let mut execution = self.schedules.execution_job(&target)?;
                execution.wait_until_terminal(&self.policy::<geoapi_core::Execution>())?;
                let outcome = self.report(out, Some(token), &execution)?;
                if let Some(output) = execution.output() {
                    writeln!(out, "{output}")?;
                }
                Ok(outcome)
            }
            target @ TokenTarget::Job { .. } => {
                Err(anyhow!("{token} names job {target}; follow takes a schedule or execution token"))
            }
        }
    }

    fn stop<W: Write>(&self, token: &str, out: &mut W) -> Result<Outcome> {
        let target = self.target(token)?;
        let mut tracker = self.schedules.tracker_for(&target)?;
        tracker.stop()?;
        writeln!(out, "{} {token}  stop requested", self.palette.paint("schedule", Tone::Heading))?;
        Ok(Outcome::Success)
    }

    fn token<W: Write>(&self, token: &str, out: &mut W) -> Result<Outcome> {
        let target = self.schedules.by_token(token)?;
        let label = match target {
            TokenTarget::Job { .. } => "job",
            TokenTarget::Schedule { .. } => "schedule",
            TokenTarget::Execution { .. } => "execution",
        };
        writeln!(out, "{token}  {label}  {target}")?;
        Ok(Outcome::Success)
    }

    /// Submit, mint a token, optionally wait, then print the state line.
    fn submit<K: JobSpec, W: Write>(
        &self,
        mut job: JobHandle<K>,
        name: &str,
        wait: bool,
        out: &mut W,
    ) -> Result<(JobHandle<K>, Outcome)> {
        job.submit()?;
        let ids = job.ids().unwrap_or_default().to_vec();
        let token = self.registry()?.token_for(name, &ids)?;
        if wait {
            job.wait_until_terminal(&self.policy::<K>())?;
        }
        let outcome = self.report(out, Some(&token), &job)?;
        Ok((job, outcome))
    }

    /// One status line, plus the server's error details for a failed job.
    fn report<K: JobSpec, W: Write>(
        &self,
        out: &mut W,
        token: Option<&str>,
        job: &JobHandle<K>,
    ) -> Result<Outcome> {
        let p = &self.palette;
        let ids = job.ids().map(|ids| ids.join("/")).unwrap_or_default();
        let label = match token {
            Some(token) if token != ids => format!("{token} ({ids})"),
            _ => ids,
        };
        let state = job.state().map(ToString::to_string).unwrap_or_else(|| "unknown".into());
        let failed = job.failure().is_some();
        let tone = if failed {
            Tone::Failure
        } else if job.succeeded() {
            Tone::Success
        } else if job.is_terminal() {
            Tone::Muted
        } else {
            Tone::Active
        };
        writeln!(out, "{} {}  {}", p.paint(K::KIND, Tone::Heading), label, p.paint(&state, tone))?;

        if !failed {
            return Ok(Outcome::Success);
        }
        if let Err(err) = job.ensure_succeeded() {
            writeln!(out, "  {}", p.paint(err, Tone::Failure))?;
        }
        Ok(Outcome::JobFailed)
    }

    /// A session token, or failing that a raw `job/schedule[/execution]`
    /// id chain. Tokens win when both readings are possible.
    fn target(&self, token: &str) -> Result<TokenTarget> {
        match self.schedules.by_token(token) {
            Err(JobError::UnknownToken(_)) => {
                let chain: Vec<String> = token.split('/').map(str::to_string).collect();
                match TokenTarget::from_chain(&chain) {
                    Some(target) if chain.len() > 1 && chain.iter().all(|id| !id.is_empty()) => {
                        tracing::debug!(%target, "treating unknown token as server ids");
                        Ok(target)
                    }
                    _ => Err(JobError::UnknownToken(token.to_string()).into()),
                }
            }
            resolved => Ok(resolved?),
        }
    }

    fn policy<K: JobSpec>(&self) -> PollPolicy<K::State> {
        let mut policy = self.config.policy_for::<K>();
        if let Some(interval) = self.overrides.interval {
            policy = PollPolicy::fixed(interval, policy.max_attempts);
        }
        if let Some(attempts) = self.overrides.max_attempts {
            policy.max_attempts = attempts;
        }
        policy
    }

    fn registry(&self) -> Result<MutexGuard<'_, SessionTokenRegistry>> {
        self.tokens
            .lock()
            .map_err(|_| anyhow!("token registry lock poisoned"))
    }
}

/// Token name for an import: the file stem, or the last URL segment.
fn import_name(source: &ImportSource) -> String {
    let stem = match source {
        ImportSource::File(path) => path.file_stem().and_then(|s| s.to_str()).map(str::to_string),
        ImportSource::Url(url) => url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.trim_end_matches('/').rsplit('/').next())
            .and_then(|segment| Path::new(segment).file_stem()?.to_str().map(str::to_string)),
    };
    stem.filter(|s| !s.is_empty()).unwrap_or_else(|| "import".to_string())
}
