use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cagereport_core::archive::inject_into_archive;
use cagereport_core::assemble::generate_partial_report;
use cagereport_core::config::{CageReportConfig, ConfigPatch, load_config, patch_config};
use cagereport_core::finalize::{FinalizeOutcome, evaluate_day_state, finalize_day};
use cagereport_core::imaging::FixedSizeNormalizer;
use cagereport_core::ledger::open_ledger_store;
use cagereport_core::logging::init_logging;
use cagereport_core::records::parse_day_key;
use cagereport_core::remote::{HttpRecordsClient, RecordsClientConfig};
use cagereport_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready_for_sync,
    init_layout, inspect_runtime, resolve_paths,
};
use cagereport_core::sync::{SyncContext, SyncDayReport, sync_cycle, sync_day};
use cagereport_core::worker::{SyncWorker, WorkerControl};
use clap::{Args, CommandFactory, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "cagereport",
    version,
    about = "Field survey sync and daily report generator"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Report output root")]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    diagnostics: bool,
    verbose: u8,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            output_dir: cli.output_dir.clone(),
            diagnostics: cli.diagnostics,
            verbose: cli.verbose,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the runtime layout and a default config
    Init(InitArgs),
    /// Show resolved paths and warnings
    Status,
    /// Run one sync cycle (or one day)
    Sync(SyncArgs),
    /// Keep syncing every loop interval
    Watch(WatchArgs),
    /// Regenerate the partial report of a day from local records
    Report(DayArgs),
    /// Print whether a day is open, ready or finalized
    Check(DayArgs),
    /// Finalize a ready day
    Finalize(FinalizeArgs),
    /// Inject text and images into a document template
    Inject(InjectArgs),
    Ledger(LedgerArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, help = "Skip writing .cagereport/config.toml")]
    no_config: bool,
    #[arg(long, value_name = "URL", help = "Store the records server base URL")]
    base_url: Option<String>,
    #[arg(long, value_name = "PATH", help = "Store the report template path")]
    template: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, value_name = "YYYY-MM-DD", help = "Only sync this day")]
    day: Option<String>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, value_name = "N", help = "Stop after N cycles")]
    cycles: Option<usize>,
}

#[derive(Debug, Args)]
struct DayArgs {
    day: String,
}

#[derive(Debug, Args)]
struct FinalizeArgs {
    day: String,
    #[arg(long, help = "Skip the readiness check")]
    force: bool,
}

#[derive(Debug, Args)]
struct InjectArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(long = "text", value_name = "TOKEN=VALUE")]
    text: Vec<String>,
    #[arg(long = "image", value_name = "TOKEN=PATH")]
    image: Vec<String>,
}

#[derive(Debug, Args)]
struct LedgerArgs {
    #[command(subcommand)]
    command: LedgerSubcommand,
}

#[derive(Debug, Subcommand)]
enum LedgerSubcommand {
    /// Dump the download ledger as JSON
    Show {
        #[arg(long, value_name = "YYYY-MM-DD")]
        day: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Watch(args)) => run_watch(&runtime, args),
        Some(Commands::Report(DayArgs { day })) => run_report(&runtime, &day),
        Some(Commands::Check(DayArgs { day })) => run_check(&runtime, &day),
        Some(Commands::Finalize(args)) => run_finalize(&runtime, args),
        Some(Commands::Inject(args)) => run_inject(&runtime, args),
        Some(Commands::Ledger(LedgerArgs {
            command: LedgerSubcommand::Show { day },
        })) => run_ledger_show(&runtime, day.as_deref()),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let (paths, _) = load_runtime(runtime, false)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patched = patch_config(
        &paths.config_path,
        &ConfigPatch {
            set_base_url: args.base_url,
            set_template: args.template,
            set_output_dir: None,
        },
    )?;

    println!("Initialized cagereport runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("records_dir: {}", normalize_path(&paths.records_dir));
    println!("reports_dir: {}", normalize_path(&paths.reports_dir));
    println!("ledger_path: {}", normalize_path(&paths.ledger_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {patched}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime, false)?;
    let status = inspect_runtime(&paths, &config)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!(
        "records_dir_exists: {}",
        format_flag(status.records_dir_exists)
    );
    println!(
        "reports_dir_exists: {}",
        format_flag(status.reports_dir_exists)
    );
    println!("ledger_exists: {}", format_flag(status.ledger_exists));
    println!(
        "ledger_size_bytes: {}",
        status
            .ledger_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("template_exists: {}", format_flag(status.template_exists));
    println!(
        "base_url_configured: {}",
        format_flag(status.base_url_configured)
    );
    print_warnings(&status.warnings);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime, true)?;
    let status = inspect_runtime(&paths, &config)?;
    ensure_runtime_ready_for_sync(&paths, &status)?;
    let settings = paths.report_settings(&config)?;
    let store = open_ledger_store(&paths.ledger_path);
    let mut api = HttpRecordsClient::new(RecordsClientConfig::from_config(&config.remote)?)?;
    let context = SyncContext {
        settings: &settings,
        store: store.as_ref(),
        normalizer: &FixedSizeNormalizer,
        purge_after_photos: config.remote.purge_after_photos(),
    };

    println!("sync");
    println!("project_root: {}", normalize_path(&paths.project_root));
    match args.day {
        Some(day) => {
            let report = sync_day(&context, &mut api, &day)?;
            print_day_report(&report);
        }
        None => {
            let cycle = sync_cycle(&context, &mut api, None);
            println!("dates_listed: {}", cycle.dates_listed);
            println!("days: {}", cycle.days.len());
            for report in &cycle.days {
                print_day_report(report);
            }
            println!("request_count: {}", cycle.request_count);
            print_errors(&cycle.errors);
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_watch(runtime: &RuntimeOptions, args: WatchArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime, true)?;
    let status = inspect_runtime(&paths, &config)?;
    ensure_runtime_ready_for_sync(&paths, &status)?;
    let settings = paths.report_settings(&config)?;
    let store = open_ledger_store(&paths.ledger_path);
    let api = HttpRecordsClient::new(RecordsClientConfig::from_config(&config.remote)?)?;

    let mut worker = SyncWorker {
        context: SyncContext {
            settings: &settings,
            store: store.as_ref(),
            normalizer: &FixedSizeNormalizer,
            purge_after_photos: config.remote.purge_after_photos(),
        },
        api: Box::new(api),
        control: WorkerControl::new(),
        interval: Duration::from_secs(config.sync.loop_interval_secs()),
    };
    let summary = worker.run(args.cycles);

    println!("watch");
    println!("cycles: {}", summary.cycles);
    println!("days_synced: {}", summary.days_synced);
    println!("downloaded: {}", summary.downloaded);
    println!("finalized: {}", summary.finalized);
    println!("errors: {}", summary.errors);
    Ok(())
}

fn run_report(runtime: &RuntimeOptions, day: &str) -> Result<()> {
    let (paths, config) = load_runtime(runtime, false)?;
    let settings = paths.report_settings(&config)?;
    let store = open_ledger_store(&paths.ledger_path);
    if store.load()?.is_finalized(day) {
        println!("day: {day}");
        println!("state: finalized (report not regenerated)");
        return Ok(());
    }

    let report = generate_partial_report(&settings, day, &FixedSizeNormalizer)?;
    println!("report");
    println!("day: {}", report.day);
    println!("output: {}", normalize_path(&report.output));
    println!("records: {}", report.records);
    println!("malformed: {}", report.malformed);
    println!("images_mapped: {}", report.images_mapped);
    println!("degraded: {}", report.degraded);
    if let Some(inject) = &report.inject {
        println!("text_replacements: {}", inject.text_replacements);
        println!("images_injected: {}", inject.images_injected);
        println!("parts_rewritten: {}", inject.parts_rewritten.join(", "));
    }
    print_errors(&report.errors);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_check(runtime: &RuntimeOptions, day: &str) -> Result<()> {
    let (paths, _) = load_runtime(runtime, false)?;
    let ledger = open_ledger_store(&paths.ledger_path).load()?;
    let status = evaluate_day_state(&paths.records_dir, day, &ledger)?;

    println!("day: {}", status.day);
    println!("state: {}", status.state);
    for reason in &status.reasons {
        println!("  - {reason}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_finalize(runtime: &RuntimeOptions, args: FinalizeArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime, false)?;
    let settings = paths.report_settings(&config)?;
    let store = open_ledger_store(&paths.ledger_path);

    println!("day: {}", args.day);
    match finalize_day(&settings, store.as_ref(), &args.day, None, args.force)? {
        FinalizeOutcome::Finalized {
            path,
            transfer,
            finalized_at,
        } => {
            println!("state: finalized");
            println!("final_report: {}", normalize_path(&path));
            println!("transfer: {}", transfer.as_str());
            println!("finalized_at: {finalized_at}");
        }
        FinalizeOutcome::AlreadyFinalized { finalized_at } => {
            println!("state: finalized");
            println!(
                "finalized_at: {}",
                finalized_at.as_deref().unwrap_or("<unknown>")
            );
        }
        FinalizeOutcome::NotReady { reasons } => {
            println!("state: open");
            for reason in &reasons {
                println!("  - {reason}");
            }
            bail!("{} is not ready to finalize (use --force to skip checks)", args.day);
        }
        FinalizeOutcome::MissingPartial { expected } => {
            bail!(
                "no partial report to finalize; expected {} (run `cagereport report {}` first)",
                normalize_path(&expected),
                args.day
            );
        }
    }
    Ok(())
}

fn run_inject(runtime: &RuntimeOptions, args: InjectArgs) -> Result<()> {
    init_logging(None, runtime.verbose)?;
    let text = parse_assignments(&args.text, "--text")?;
    let images = parse_assignments(&args.image, "--image")?
        .into_iter()
        .map(|(token, path)| (token, Some(PathBuf::from(path))))
        .collect::<BTreeMap<_, _>>();

    let report = inject_into_archive(&args.input, &args.output, &images, &text)?;
    println!("inject");
    println!("input: {}", normalize_path(&args.input));
    println!("output: {}", normalize_path(&args.output));
    println!("parts_scanned: {}", report.parts_scanned);
    println!("parts_rewritten: {}", report.parts_rewritten.join(", "));
    println!("parts_skipped: {}", report.parts_skipped.len());
    println!("text_replacements: {}", report.text_replacements);
    println!("images_injected: {}", report.images_injected);
    println!("images_skipped: {}", report.images_skipped.join(", "));
    println!("media_added: {}", report.media_added.join(", "));
    print_errors(&report.errors);
    Ok(())
}

fn run_ledger_show(runtime: &RuntimeOptions, day: Option<&str>) -> Result<()> {
    let (paths, _) = load_runtime(runtime, false)?;
    let ledger = open_ledger_store(&paths.ledger_path).load()?;
    match day {
        Some(day) => {
            parse_day_key(day)?;
            let entry = ledger
                .day(day)
                .with_context(|| format!("ledger has no entry for {day}"))?;
            println!("{}", serde_json::to_string_pretty(entry)?);
        }
        None => println!("{}", serde_json::to_string_pretty(&ledger)?),
    }
    Ok(())
}

/// Resolve paths (loading `.env` from cwd and then the project root), load
/// the config and install logging.
fn load_runtime(
    runtime: &RuntimeOptions,
    log_to_file: bool,
) -> Result<(ResolvedPaths, CageReportConfig)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        output_dir: runtime.output_dir.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    let paths = if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
        resolve_paths(&context, &overrides)?
    } else {
        initial
    };
    let config = load_config(&paths.config_path)?;

    let log_file = (log_to_file && paths.state_dir.is_dir()).then(|| paths.log_file());
    init_logging(log_file.as_deref(), runtime.verbose)?;
    Ok((paths, config))
}

fn parse_assignments(values: &[String], flag: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for value in values {
        let Some((token, assigned)) = value.split_once('=') else {
            bail!("{flag} expects TOKEN=VALUE, got {value:?}");
        };
        if token.is_empty() {
            bail!("{flag} has an empty token in {value:?}");
        }
        out.insert(token.to_string(), assigned.to_string());
    }
    Ok(out)
}

fn print_day_report(report: &SyncDayReport) {
    println!("[{}]", report.day);
    println!("  listed: data={} photos={}", report.listed_data, report.listed_photos);
    println!(
        "  downloaded: data={} photos={} failed={}",
        report.downloaded_data, report.downloaded_photos, report.failed_downloads
    );
    if let Some(partial) = &report.partial_report {
        println!("  partial_report: {partial}");
    }
    if let Some(state) = report.state {
        println!("  state: {state}");
    }
    if let Some(path) = &report.finalized_path {
        println!("  final_report: {path}");
    }
    if report.purged {
        println!("  purged: yes");
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
}

fn print_errors(errors: &[String]) {
    if !errors.is_empty() {
        println!("errors:");
        for error in errors {
            println!("  - {error}");
        }
    }
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("warnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
