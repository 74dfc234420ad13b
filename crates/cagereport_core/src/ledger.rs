//! Download ledger: which files of each day were fetched already, and
//! whether the day's report is finalized. Loaded and saved wholesale by a
//! single writer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Data,
    Photo,
}

impl FileKind {
    pub const ALL: [FileKind; 2] = [FileKind::Data, FileKind::Photo];

    /// Folder and URL segment for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Photo => "photos",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "data" => Some(Self::Data),
            "photos" => Some(Self::Photo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLedger {
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<String>,
}

impl DayLedger {
    pub fn files(&self, kind: FileKind) -> &[String] {
        match kind {
            FileKind::Data => &self.data,
            FileKind::Photo => &self.photos,
        }
    }

    fn files_mut(&mut self, kind: FileKind) -> &mut Vec<String> {
        match kind {
            FileKind::Data => &mut self.data,
            FileKind::Photo => &mut self.photos,
        }
    }

    pub fn contains(&self, kind: FileKind, name: &str) -> bool {
        self.files(kind).iter().any(|known| known == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    pub days: BTreeMap<String, DayLedger>,
}

impl Ledger {
    pub fn day(&self, day: &str) -> Option<&DayLedger> {
        self.days.get(day)
    }

    pub fn is_finalized(&self, day: &str) -> bool {
        self.days.get(day).is_some_and(|entry| entry.finalized)
    }

    pub fn has_file(&self, day: &str, kind: FileKind, name: &str) -> bool {
        self.days
            .get(day)
            .is_some_and(|entry| entry.contains(kind, name))
    }

    /// Record a downloaded file. Returns `false` when it was already known.
    pub fn record_file(&mut self, day: &str, kind: FileKind, name: &str) -> bool {
        let entry = self.days.entry(day.to_string()).or_default();
        if entry.contains(kind, name) {
            return false;
        }
        entry.files_mut(kind).push(name.to_string());
        true
    }

    /// Flag `day` as finalized. An already finalized day keeps its original
    /// timestamp and `false` is returned.
    pub fn mark_finalized(&mut self, day: &str, at: &str) -> bool {
        let entry = self.days.entry(day.to_string()).or_default();
        if entry.finalized {
            return false;
        }
        entry.finalized = true;
        entry.finalized_at = Some(at.to_string());
        true
    }
}

pub trait LedgerStore {
    fn load(&self) -> Result<Ledger>;
    fn save(&self, ledger: &Ledger) -> Result<()>;
    fn location(&self) -> &Path;
}

/// Pick the backend from the file extension: `.json` selects the JSON file
/// format, anything else SQLite.
pub fn open_ledger_store(path: &Path) -> Box<dyn LedgerStore + Send + Sync> {
    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        Box::new(JsonLedgerStore::new(path))
    } else {
        Box::new(SqliteLedgerStore::new(path))
    }
}

/// `downloaded_files.json` layout: `{ "<day>": { "data": [..], "photos": [..],
/// "finalized": bool, "finalized_at": ".." } }`.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<Ledger> {
        if !self.path.exists() {
            return Ok(Ledger::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        match serde_json::from_str::<Ledger>(&content) {
            Ok(ledger) => Ok(ledger),
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "ledger is unreadable; starting empty");
                Ok(Ledger::default())
            }
        }
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(ledger).context("failed to serialize ledger")?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "baseline",
    sql: "CREATE TABLE IF NOT EXISTS ledger_days (
            day TEXT PRIMARY KEY,
            finalized INTEGER NOT NULL DEFAULT 0,
            finalized_at TEXT
        );
        CREATE TABLE IF NOT EXISTS ledger_files (
            day TEXT NOT NULL REFERENCES ledger_days(day) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (day, kind, name)
        );",
}];

#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    path: PathBuf,
}

impl SqliteLedgerStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create ledger parent directory {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign_keys pragma")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        run_migrations(&connection)?;
        Ok(connection)
    }
}

fn run_migrations(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")?;
    let current: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read current migration version")?;

    for migration in MIGRATIONS {
        if i64::from(migration.version) <= current {
            continue;
        }
        connection
            .execute_batch(migration.sql)
            .with_context(|| {
                format!(
                    "failed to apply migration v{:03}_{}",
                    migration.version, migration.name
                )
            })?;
        connection
            .execute(
                "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                params![i64::from(migration.version), migration.name],
            )
            .context("failed to record migration")?;
    }
    Ok(())
}

impl LedgerStore for SqliteLedgerStore {
    fn load(&self) -> Result<Ledger> {
        if !self.path.exists() {
            return Ok(Ledger::default());
        }
        let connection = self.open()?;
        let mut ledger = Ledger::default();

        let mut statement = connection
            .prepare("SELECT day, finalized, finalized_at FROM ledger_days ORDER BY day")
            .context("failed to prepare ledger day query")?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .context("failed to query ledger days")?;
        for row in rows {
            let (day, finalized, finalized_at) = row.context("failed to read ledger day")?;
            ledger.days.insert(
                day,
                DayLedger {
                    finalized: finalized != 0,
                    finalized_at,
                    ..DayLedger::default()
                },
            );
        }

        let mut statement = connection
            .prepare("SELECT day, kind, name FROM ledger_files ORDER BY day, kind, position")
            .context("failed to prepare ledger file query")?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("failed to query ledger files")?;
        for row in rows {
            let (day, kind, name) = row.context("failed to read ledger file")?;
            let Some(kind) = FileKind::parse(&kind) else {
                warn!(day = %day, kind = %kind, "ignoring ledger entry of unknown kind");
                continue;
            };
            ledger
                .days
                .entry(day)
                .or_default()
                .files_mut(kind)
                .push(name);
        }
        Ok(ledger)
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        let mut connection = self.open()?;
        let transaction = connection
            .transaction()
            .context("failed to start ledger transaction")?;
        transaction
            .execute_batch("DELETE FROM ledger_files; DELETE FROM ledger_days;")
            .context("failed to clear ledger tables")?;
        {
            let mut insert_day = transaction
                .prepare(
                    "INSERT INTO ledger_days (day, finalized, finalized_at) VALUES (?1, ?2, ?3)",
                )
                .context("failed to prepare ledger day insert")?;
            let mut insert_file = transaction
                .prepare(
                    "INSERT OR IGNORE INTO ledger_files (day, kind, name, position)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .context("failed to prepare ledger file insert")?;
            for (day, entry) in &ledger.days {
                insert_day
                    .execute(params![day, i64::from(entry.finalized), entry.finalized_at])
                    .with_context(|| format!("failed to store ledger day {day}"))?;
                for kind in FileKind::ALL {
                    for (position, name) in entry.files(kind).iter().enumerate() {
                        let position = i64::try_from(position)
                            .context("ledger position does not fit into i64")?;
                        insert_file
                            .execute(params![day, kind.as_str(), name, position])
                            .with_context(|| format!("failed to store ledger file {day}/{name}"))?;
                    }
                }
            }
        }
        transaction
            .commit()
            .context("failed to commit ledger transaction")
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
