//! MASON CLI
//!
//! Loads a JSON manifest and brings the requested targets up to date.

#![warn(clippy::all)]

mod manifest;

use clap::{ArgAction, Parser};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use manifest::Manifest;
use mason_core::RunId;
use mason_log::{ExecutionLog, RunMeta};
use mason_plan::{dependencies_dot, dependencies_json, render_dependencies, render_descriptions};
use mason_runtime::{Engine, ResolverSet, SchedulerConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mason")]
#[command(about = "MASON - make-like build runner with a bounded worker pool", long_about = None)]
struct Cli {
    /// Targets to bring up to date
    #[arg(default_value = "all")]
    targets: Vec<String>,

    /// Manifest declaring the jobs
    #[arg(short = 'f', long, default_value = "mason.json")]
    file: PathBuf,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Number of serial jobs allowed to run at once
    #[arg(long = "n-serial", default_value_t = 1)]
    n_serial: usize,

    /// Do not start new workers above this load average
    #[arg(short = 'l', long = "load-average")]
    load_average: Option<f64>,

    /// Keep going after a failure
    #[arg(short = 'k', long)]
    keep_going: bool,

    /// Print the jobs that would run without running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Treat these targets as up to date
    #[arg(long)]
    cut: Vec<String>,

    /// Print job descriptions and exit
    #[arg(short = 'D', long)]
    descriptions: bool,

    /// Print dependencies and exit
    #[arg(short = 'P', long)]
    dependencies: bool,

    /// Print the dependency graph in DOT and exit
    #[arg(short = 'Q', long)]
    dot: bool,

    /// Print the dependency graph in JSON and exit
    #[arg(short = 'J', long)]
    json: bool,

    /// Compare file contents, not only modification times
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    use_hash: bool,

    /// Terminate child processes when the run is torn down
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    terminate_subprocesses: bool,

    /// Write a per-run execution log under this directory
    #[arg(long)]
    execution_log_dir: Option<PathBuf>,

    #[arg(long, default_value = ".mason/resource_hash")]
    resource_hash_dir: PathBuf,

    /// Root of content-addressed targets
    #[arg(long, default_value = ".mason/auto")]
    auto_prefix: PathBuf,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log: String,
}

impl Cli {
    fn config(&self) -> SchedulerConfig {
        SchedulerConfig {
            jobs: self.jobs,
            serial_jobs: self.n_serial,
            load_average: self.load_average,
            keep_going: self.keep_going,
            dry_run: self.dry_run,
            cut: self.cut.iter().cloned().collect(),
            use_content_hash: self.use_hash,
            terminate_subprocesses: self.terminate_subprocesses,
            execution_log_dir: self.execution_log_dir.clone(),
            resource_hash_dir: self.resource_hash_dir.clone(),
            auto_prefix: self.auto_prefix.clone(),
            ..SchedulerConfig::default()
        }
    }

    fn prints(&self) -> bool {
        self.descriptions || self.dependencies || self.dot || self.json
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| color_eyre::eyre::eyre!(e))?;
    Ok(())
}

fn execution_log(config: &SchedulerConfig) -> Result<ExecutionLog> {
    let Some(root) = &config.execution_log_dir else {
        return Ok(ExecutionLog::disabled());
    };
    let meta = RunMeta::new(RunId::new(), std::env::args().collect());
    let dir = root.join(meta.run_id.label());
    let log = ExecutionLog::to_dir(&dir, &meta)
        .wrap_err_with(|| format!("cannot open execution log in {}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "execution log");
    Ok(log)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&cli.log)?;

    let config = cli.config();
    config.validate()?;

    let specs = Manifest::load(&cli.file)?.into_specs(&config.auto_prefix)?;
    let log = if cli.prints() {
        ExecutionLog::disabled()
    } else {
        execution_log(&config)?
    };
    let resolvers = ResolverSet::with_file(&config.resource_hash_dir);
    let engine = Engine::new(config, resolvers, log)?;
    for spec in specs {
        engine.declare(spec)?;
    }

    if cli.prints() {
        let registry = engine.context().registry.read();
        let jobs = || registry.jobs().map(|j| j.as_ref());
        if cli.descriptions {
            print!("{}", render_descriptions(jobs()));
        }
        if cli.dependencies {
            print!("{}", render_dependencies(jobs()));
        }
        if cli.dot {
            print!("{}", dependencies_dot(jobs()));
        }
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&dependencies_json(jobs()))?);
        }
        return Ok(());
    }

    let interrupt = engine.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = engine.run(&cli.targets).await;
    match engine.log().close() {
        Ok(records) if engine.log().is_enabled() => tracing::debug!(records, "execution log closed"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "execution log incomplete"),
    }
    let report = result?;

    for listing in &report.would_run {
        print!("{}", listing);
    }
    tracing::info!(
        executed = report.executed.len(),
        fresh = report.fresh.len(),
        "done"
    );
    Ok(())
}
