use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

pub const DEFAULT_USER_AGENT: &str = "cagereport/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_PURGE_AFTER_PHOTOS: usize = 10;
pub const DEFAULT_OUTPUT_DIR: &str = "reports";
pub const DEFAULT_RECORDS_DIR: &str = "records";
pub const DEFAULT_IMAGE_SIZE_PX: u32 = 162;
pub const DEFAULT_LOOP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_LEDGER_FILENAME: &str = "ledger.db";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CageReportConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub purge_after_photos: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReportConfig {
    pub template: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub image_size_px: Option<u32>,
    pub scan_photo_folder: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub records_dir: Option<PathBuf>,
    pub loop_interval_secs: Option<u64>,
    pub ledger: Option<PathBuf>,
}

impl RemoteConfig {
    /// Records endpoint base: env CAGEREPORT_BASE_URL > config > None.
    pub fn base_url(&self) -> Option<String> {
        if let Some(value) = env_trimmed("CAGEREPORT_BASE_URL") {
            return Some(value);
        }
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn user_agent(&self) -> String {
        if let Some(value) = env_trimmed("CAGEREPORT_USER_AGENT") {
            return value;
        }
        self.user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_value_u64(
            "CAGEREPORT_HTTP_TIMEOUT_MS",
            self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn max_retries(&self) -> usize {
        env_value_usize(
            "CAGEREPORT_HTTP_RETRIES",
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        )
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    /// Photo count at which a day is purged on the server. `0` disables.
    pub fn purge_after_photos(&self) -> Option<usize> {
        match self.purge_after_photos.unwrap_or(DEFAULT_PURGE_AFTER_PHOTOS) {
            0 => None,
            threshold => Some(threshold),
        }
    }
}

impl ReportConfig {
    pub fn image_size_px(&self) -> u32 {
        self.image_size_px
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_IMAGE_SIZE_PX)
    }

    pub fn scan_photo_folder(&self) -> bool {
        self.scan_photo_folder.unwrap_or(false)
    }
}

impl SyncConfig {
    pub fn loop_interval_secs(&self) -> u64 {
        env_value_u64(
            "CAGEREPORT_LOOP_INTERVAL",
            self.loop_interval_secs.unwrap_or(DEFAULT_LOOP_INTERVAL_SECS),
        )
    }
}

/// Load and parse the config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CageReportConfig> {
    if !config_path.exists() {
        return Ok(CageReportConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CageReportConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub set_base_url: Option<String>,
    pub set_template: Option<PathBuf>,
    pub set_output_dir: Option<PathBuf>,
}

/// Update selected keys while preserving every other section and key.
/// Returns `true` when a write occurred.
pub fn patch_config(config_path: &Path, patch: &ConfigPatch) -> Result<bool> {
    if patch.set_base_url.is_none() && patch.set_template.is_none() && patch.set_output_dir.is_none()
    {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    if let Some(url) = &patch.set_base_url {
        section_mut(&mut root, "remote", config_path)?
            .insert("base_url".to_string(), Value::String(url.clone()));
    }
    if let Some(template) = &patch.set_template {
        section_mut(&mut root, "report", config_path)?.insert(
            "template".to_string(),
            Value::String(template.to_string_lossy().replace('\\', "/")),
        );
    }
    if let Some(output_dir) = &patch.set_output_dir {
        section_mut(&mut root, "report", config_path)?.insert(
            "output_dir".to_string(),
            Value::String(output_dir.to_string_lossy().replace('\\', "/")),
        );
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn section_mut<'a>(
    root: &'a mut Value,
    name: &str,
    config_path: &Path,
) -> Result<&'a mut toml::map::Map<String, Value>> {
    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    root_table
        .entry(name.to_string())
        .or_insert_with(|| Value::Table(Default::default()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{name}] must be a table in {}", config_path.display()))
}

pub(crate) fn env_trimmed(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_remote() {
        let config = CageReportConfig::default();
        assert!(config.remote.base_url.is_none());
        assert!(config.report.template.is_none());
        assert_eq!(config.report.image_size_px(), DEFAULT_IMAGE_SIZE_PX);
        assert!(!config.report.scan_photo_folder());
        assert_eq!(config.remote.retry_delay_ms(), DEFAULT_RETRY_DELAY_MS);
        assert_eq!(
            config.remote.purge_after_photos(),
            Some(DEFAULT_PURGE_AFTER_PHOTOS)
        );
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, CageReportConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[remote]
base_url = "https://records.example.org/records/"
user_agent = "test-agent/1.0"
timeout_ms = 500
max_retries = 5
retry_delay_ms = 10
purge_after_photos = 0

[report]
template = "templates/daily.docx"
output_dir = "out"
image_size_px = 200
scan_photo_folder = true

[sync]
records_dir = "downloads"
loop_interval_secs = 30
ledger = ".cagereport/data/downloaded_files.json"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.remote.base_url.as_deref(),
            Some("https://records.example.org/records/")
        );
        assert_eq!(config.remote.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.remote.purge_after_photos(), None);
        assert_eq!(
            config.report.template.as_deref(),
            Some(Path::new("templates/daily.docx"))
        );
        assert_eq!(config.report.image_size_px(), 200);
        assert!(config.report.scan_photo_folder());
        assert_eq!(config.sync.loop_interval_secs, Some(30));
        assert_eq!(
            config.sync.ledger.as_deref(),
            Some(Path::new(".cagereport/data/downloaded_files.json"))
        );
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[report]\noutput_dir = \"out\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.remote.base_url.is_none());
        assert_eq!(config.report.output_dir.as_deref(), Some(Path::new("out")));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[remote\nbase_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn patch_config_preserves_other_keys() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[sync]\nloop_interval_secs = 42\n").expect("write config");

        let wrote = patch_config(
            &config_path,
            &ConfigPatch {
                set_base_url: Some("https://records.example.org/records/".to_string()),
                set_template: Some(PathBuf::from("templates/daily.docx")),
                set_output_dir: None,
            },
        )
        .expect("patch");
        assert!(wrote);

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.remote.base_url.as_deref(),
            Some("https://records.example.org/records/")
        );
        assert_eq!(
            config.report.template.as_deref(),
            Some(Path::new("templates/daily.docx"))
        );
        assert_eq!(config.sync.loop_interval_secs, Some(42));

        let again = patch_config(
            &config_path,
            &ConfigPatch {
                set_base_url: Some("https://records.example.org/records/".to_string()),
                ..ConfigPatch::default()
            },
        )
        .expect("patch");
        assert!(!again);
    }

    #[test]
    fn empty_patch_is_a_noop() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        assert!(!patch_config(&config_path, &ConfigPatch::default()).expect("patch"));
        assert!(!config_path.exists());
    }
}
