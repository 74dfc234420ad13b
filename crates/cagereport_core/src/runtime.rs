use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::assemble::ReportSettings;
use crate::config::{
    CageReportConfig, DEFAULT_LEDGER_FILENAME, DEFAULT_OUTPUT_DIR, DEFAULT_RECORDS_DIR,
    load_config,
};
use crate::filesystem::FINAL_DIR_NAME;

pub const STATE_DIR_NAME: &str = ".cagereport";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const SYNC_LOG_FILENAME: &str = "sync.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub config_path: PathBuf,
    pub records_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub template_path: Option<PathBuf>,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub reports_source: ValueSource,
    pub template_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub records_dir_exists: bool,
    pub reports_dir_exists: bool,
    pub ledger_exists: bool,
    pub ledger_size_bytes: Option<u64>,
    pub template_exists: bool,
    pub base_url_configured: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join(SYNC_LOG_FILENAME)
    }

    pub fn final_dir(&self) -> PathBuf {
        self.reports_dir.join(FINAL_DIR_NAME)
    }

    pub fn diagnostics(&self) -> String {
        let template = self
            .template_path
            .as_deref()
            .map(normalize_for_display)
            .unwrap_or_else(|| "<unset>".to_string());
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\nrecords_dir={}\nreports_dir={} ({})\nledger_path={}\ntemplate={} ({})\nlog_file={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.records_dir),
            normalize_for_display(&self.reports_dir),
            self.reports_source.as_str(),
            normalize_for_display(&self.ledger_path),
            template,
            self.template_source.as_str(),
            normalize_for_display(&self.log_file()),
        )
    }

    /// Output root, template and imaging knobs for one assembler/finalizer run.
    pub fn report_settings(&self, config: &CageReportConfig) -> Result<ReportSettings> {
        let Some(template) = self.template_path.clone() else {
            bail!(
                "no report template configured (set [report].template in {} or CAGEREPORT_TEMPLATE)",
                normalize_for_display(&self.config_path)
            );
        };
        Ok(ReportSettings {
            template,
            output_dir: self.reports_dir.clone(),
            records_dir: self.records_dir.clone(),
            image_size_px: config.report.image_size_px(),
            scan_photo_folder: config.report.scan_photo_folder(),
        })
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths, config: &CageReportConfig) -> Result<RuntimeStatus> {
    let ledger_exists = paths.ledger_path.exists();
    let ledger_size_bytes = if ledger_exists {
        let metadata = fs::metadata(&paths.ledger_path)
            .with_context(|| format!("failed to inspect {}", paths.ledger_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };
    let state_dir_exists = paths.state_dir.exists();
    let template_exists = paths
        .template_path
        .as_deref()
        .is_some_and(|template| template.is_file());
    let base_url_configured = config.remote.base_url().is_some();

    let mut warnings = Vec::new();
    match &paths.template_path {
        None => warnings.push("no report template configured; report commands will fail".to_string()),
        Some(template) if !template_exists => warnings.push(format!(
            "report template {} does not exist",
            normalize_for_display(template)
        )),
        Some(_) => {}
    }
    if !base_url_configured {
        warnings.push("remote base URL is not configured; sync commands will fail".to_string());
    }
    if !state_dir_exists {
        warnings.push(".cagereport/ is missing; run `cagereport init` first".to_string());
    }

    Ok(RuntimeStatus {
        project_root_exists: paths.project_root.exists(),
        state_dir_exists,
        config_exists: paths.config_path.exists(),
        records_dir_exists: paths.records_dir.exists(),
        reports_dir_exists: paths.reports_dir.exists(),
        ledger_exists,
        ledger_size_bytes,
        template_exists,
        base_url_configured,
        warnings,
    })
}

pub fn ensure_runtime_ready_for_sync(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.state_dir_exists || !status.base_url_configured {
        bail!(
            "Runtime is not ready for sync.\n  - {}\n  - {}\nRun: cagereport init --project-root {} --base-url <url>",
            if status.state_dir_exists {
                ".cagereport/ (ok)"
            } else {
                ".cagereport/ (missing)"
            },
            if status.base_url_configured {
                "remote base URL (ok)"
            } else {
                "remote base URL (missing)"
            },
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup);
    let state_dir = project_root.join(STATE_DIR_NAME);
    let data_dir = state_dir.join("data");

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup("CAGEREPORT_CONFIG") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };
    let config = load_config(&config_path)?;

    let (reports_dir, reports_source) = if let Some(path) = overrides.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("CAGEREPORT_OUTPUT_DIR") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else if let Some(path) = config.report.output_dir.as_deref() {
        (absolutize(path, &project_root), ValueSource::Config)
    } else {
        (project_root.join(DEFAULT_OUTPUT_DIR), ValueSource::Default)
    };

    let (template_path, template_source) = if let Some(value) = lookup("CAGEREPORT_TEMPLATE") {
        (
            Some(absolutize(Path::new(&value), &project_root)),
            ValueSource::Env,
        )
    } else if let Some(path) = config.report.template.as_deref() {
        (Some(absolutize(path, &project_root)), ValueSource::Config)
    } else {
        (None, ValueSource::Default)
    };

    let records_dir = config
        .sync
        .records_dir
        .as_deref()
        .map(|path| absolutize(path, &project_root))
        .unwrap_or_else(|| project_root.join(DEFAULT_RECORDS_DIR));
    let ledger_path = config
        .sync
        .ledger
        .as_deref()
        .map(|path| absolutize(path, &project_root))
        .unwrap_or_else(|| data_dir.join(DEFAULT_LEDGER_FILENAME));

    Ok(ResolvedPaths {
        logs_dir: state_dir.join("logs"),
        tmp_dir: state_dir.join("tmp"),
        project_root,
        state_dir,
        data_dir,
        config_path,
        records_dir,
        reports_dir,
        ledger_path,
        template_path,
        root_source,
        config_source,
        reports_source,
        template_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let required_dirs = [
        paths.state_dir.clone(),
        paths.data_dir.clone(),
        paths.logs_dir.clone(),
        paths.tmp_dir.clone(),
        paths.records_dir.clone(),
        paths.reports_dir.clone(),
        paths.final_dir(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let records_dir = relative_display(&paths.records_dir, &paths.project_root);
    let reports_dir = relative_display(&paths.reports_dir, &paths.project_root);
    let ledger_path = relative_display(&paths.ledger_path, &paths.project_root);
    let template = paths
        .template_path
        .as_deref()
        .map(|path| format!("template = \"{}\"", relative_display(path, &paths.project_root)))
        .unwrap_or_else(|| "# template = \"templates/Daily_Report_Template.docx\"".to_string());

    format!(
        "# cagereport runtime configuration (materialized by `cagereport init`)\n\n[remote]\n# base_url = \"https://records.example.org/records/\"\n# user_agent = \"cagereport/0.1\"\ntimeout_ms = 10000\nmax_retries = 3\nretry_delay_ms = 2000\n# Request server-side deletion once a day lists this many photos (0 disables).\npurge_after_photos = 10\n\n[report]\n{template}\noutput_dir = \"{reports_dir}\"\nimage_size_px = 162\nscan_photo_folder = false\n\n[sync]\nrecords_dir = \"{records_dir}\"\nloop_interval_secs = 10\n# A .json extension selects the JSON ledger.\nledger = \"{ledger_path}\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("CAGEREPORT_PROJECT_ROOT") {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(STATE_DIR_NAME).is_dir() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = cwd.ancestors().map(Path::to_path_buf).collect();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn relative_display(path: &Path, root: &Path) -> String {
    normalize_for_display(path.strip_prefix(root).unwrap_or(path))
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
