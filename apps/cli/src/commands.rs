//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use articulator_core::pipeline::{InstitutionRun, Pipeline, ProgressReporter};
use articulator_shared::{AppConfig, Institution, RunConfig, init_config, load_config};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Articulator: gather transfer agreements into per-subject documents.
#[derive(Parser)]
#[command(
    name = "articulator",
    version,
    about = "Collect transfer articulation agreements and merge them per subject and school.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Which institutions `institutions` lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum InstitutionKind {
    All,
    TwoYear,
    FourYear,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// List institutions known to the catalog.
    Institutions {
        /// Restrict the listing to one kind of institution.
        #[arg(long, value_enum, default_value = "all")]
        kind: InstitutionKind,
    },

    /// List the subjects any partner offers toward an institution.
    Subjects {
        /// Receiving institution id.
        #[arg(long)]
        institution: u32,
    },

    /// Retrieve and merge agreements for one receiving institution.
    Fetch {
        /// Receiving institution id.
        #[arg(long)]
        institution: u32,

        /// Subject label to process (repeatable). Defaults to every subject.
        #[arg(long = "subject")]
        subjects: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Retrieve and merge agreements for every four-year institution.
    FetchAll {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Per-run overrides of the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Output directory (one sub-directory per school).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Maximum concurrent partner lookups and downloads.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Pause between subjects and between institutions, in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

impl RunArgs {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(n) = self.concurrency {
            config.resolve_concurrency = n.max(1);
            config.download_concurrency = n.max(1);
        }
        if let Some(ms) = self.delay_ms {
            config.request_delay_ms = ms;
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "articulator=info",
        1 => "articulator=debug",
        _ => "articulator=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Institutions { kind } => cmd_institutions(kind).await,
        Command::Subjects { institution } => cmd_subjects(institution).await,
        Command::Fetch {
            institution,
            subjects,
            run,
        } => cmd_fetch(institution, &subjects, &run).await,
        Command::FetchAll { run } => cmd_fetch_all(&run).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn build_pipeline(overrides: &RunArgs) -> Result<Pipeline> {
    let config = load_config()?;
    let mut run_config = RunConfig::from(&config);
    overrides.apply(&mut run_config);
    Ok(Pipeline::new(run_config)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_institutions(kind: InstitutionKind) -> Result<()> {
    let pipeline = build_pipeline(&RunArgs::default())?;
    let directory = pipeline.client().directory().await?;
    let (colleges, universities) = directory.split_by_type();

    let listed: Vec<&Institution> = match kind {
        InstitutionKind::All => universities.iter().chain(colleges.iter()).collect(),
        InstitutionKind::TwoYear => colleges.iter().collect(),
        InstitutionKind::FourYear => universities.iter().collect(),
    };

    for institution in &listed {
        let tag = if institution.is_community_college {
            "2yr"
        } else {
            "4yr"
        };
        println!("{:>6}  {tag}  {}", institution.id, institution.name);
    }
    info!(count = listed.len(), "institutions listed");
    Ok(())
}

async fn cmd_subjects(institution: u32) -> Result<()> {
    let pipeline = build_pipeline(&RunArgs::default())?;
    let receiving = pipeline.find_institution(institution).await?;

    let spinner = spinner(&format!("Discovering subjects for {}", receiving.name));
    let subjects = pipeline.subjects(receiving.id).await;
    spinner.finish_and_clear();

    let subjects = subjects?;
    if subjects.is_empty() {
        println!("No subjects offered toward {}.", receiving.name);
        return Ok(());
    }

    for (label, code) in &subjects {
        println!("  {code:<10} {label}");
    }
    Ok(())
}

async fn cmd_fetch(institution: u32, only: &[String], overrides: &RunArgs) -> Result<()> {
    if only.iter().any(|s| s.trim().is_empty()) {
        return Err(eyre!("--subject must not be empty"));
    }

    let pipeline = build_pipeline(overrides)?;
    let receiving = pipeline.find_institution(institution).await?;
    if receiving.is_community_college {
        return Err(eyre!(
            "{} ({}) is a two-year institution; choose a receiving four-year institution",
            receiving.name,
            receiving.id
        ));
    }

    info!(institution = %receiving.name, id = receiving.id, subjects = only.len(), "fetching agreements");

    let reporter = CliProgress::new();
    let run = pipeline.run_institution(&receiving, only, &reporter).await;
    reporter.finish();

    print_summary(&run?);
    Ok(())
}

async fn cmd_fetch_all(overrides: &RunArgs) -> Result<()> {
    let pipeline = build_pipeline(overrides)?;

    let reporter = CliProgress::new();
    let runs = pipeline.run_all(&reporter).await;
    reporter.finish();
    let runs = runs?;

    for run in &runs {
        print_summary(run);
    }

    let merged: usize = runs.iter().map(|r| r.merged.len()).sum();
    println!("  {} institutions, {merged} merged documents", runs.len());
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(run: &InstitutionRun) {
    println!();
    println!("  {} ({})", run.institution.name, run.institution.id);
    println!("  Run:      {}", run.run_id);
    println!("  Partners: {}", run.partner_count);
    println!("  Merged:   {}", run.merged.len());
    for (label, artifact) in &run.merged {
        let failed = if artifact.failures.is_empty() {
            String::new()
        } else {
            format!(", {} failed", artifact.failures.len())
        };
        println!(
            "    {:<10} {} parts{failed}  {label}",
            artifact.subject_code, artifact.parts_merged
        );
    }
    println!("  Skipped:  {}", run.skipped.len());
    for skipped in &run.skipped {
        println!("    {:<10} {}", skipped.code, skipped.reason);
    }
    println!("  Manifest: {}", run.manifest_path.display());
    println!("  Time:     {:.1}s", run.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message.to_string());
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: spinner("Starting"),
        }
    }

    /// Stop ticking and clear the line before summaries are printed.
    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn subject_started(&self, label: &str, code: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {code} {label}"));
    }

    fn done(&self, run: &InstitutionRun) {
        self.spinner.set_message(format!(
            "{} done: {} merged, {} skipped",
            run.institution.name,
            run.merged.len(),
            run.skipped.len()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn base_config() -> RunConfig {
        RunConfig::from(&AppConfig::default())
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_parses_repeated_subjects_and_overrides() {
        let cli = Cli::try_parse_from([
            "articulator",
            "fetch",
            "--institution",
            "120",
            "--subject",
            "Computer Science, B.S.",
            "--subject",
            "Biology, B.S.",
            "--out",
            "out",
            "--concurrency",
            "3",
        ])
        .unwrap();

        let Command::Fetch {
            institution,
            subjects,
            run,
        } = cli.command
        else {
            panic!("expected fetch");
        };
        assert_eq!(institution, 120);
        assert_eq!(subjects.len(), 2);
        assert_eq!(run.out, Some(PathBuf::from("out")));
        assert_eq!(run.concurrency, Some(3));
    }

    #[test]
    fn institutions_kind_values() {
        let cli = Cli::try_parse_from(["articulator", "institutions", "--kind", "two-year"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Institutions {
                kind: InstitutionKind::TwoYear
            }
        ));
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = base_config();
        let args = RunArgs {
            out: Some(PathBuf::from("/tmp/agreements")),
            concurrency: Some(0),
            delay_ms: Some(0),
        };
        args.apply(&mut config);

        assert_eq!(config.output_dir, PathBuf::from("/tmp/agreements"));
        assert_eq!(config.resolve_concurrency, 1);
        assert_eq!(config.download_concurrency, 1);
        assert_eq!(config.request_delay_ms, 0);
    }

    #[test]
    fn progress_finish_stops_the_spinner() {
        let progress = CliProgress::new();
        progress.phase("Listing partner institutions");
        assert!(!progress.spinner.is_finished());

        progress.finish();
        assert!(progress.spinner.is_finished());
    }

    #[test]
    fn empty_overrides_keep_config() {
        let mut config = base_config();
        let before = config.clone();
        RunArgs::default().apply(&mut config);
        assert_eq!(config.output_dir, before.output_dir);
        assert_eq!(config.request_delay_ms, before.request_delay_ms);
    }
}
