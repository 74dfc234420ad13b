//! Day lifecycle: Open -> Ready -> Finalized. Readiness is derived from the
//! local records on every call; finalization is stored in the ledger and is
//! never revisited.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::assemble::ReportSettings;
use crate::filesystem::{
    FINAL_DIR_NAME, REPORT_EXTENSION, TransferKind, final_report_stem, move_or_copy,
    partial_report_stem, unused_output_path,
};
use crate::ledger::{Ledger, LedgerStore};
use crate::records::{
    DayDirs, DayRecords, RecordBody, TYPE_RECORD_UPDATE, load_day_records, parse_day_key,
};
use crate::registry::Shift;

pub const FINALIZED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayState {
    Open,
    Ready,
    Finalized,
}

impl DayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Ready => "ready",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for DayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayStatus {
    pub day: String,
    pub state: DayState,
    /// Why the day is still open; empty otherwise.
    pub reasons: Vec<String>,
}

/// Reasons that keep a day open. An empty list means the day is complete.
pub fn readiness_blockers(dirs: &DayDirs, records: &DayRecords) -> Vec<String> {
    if records.is_empty() {
        return vec!["no records found locally".to_string()];
    }
    let mut reasons = Vec::new();

    let mut shift_two_end_seen = false;
    let mut shift_two_end_ok = false;
    let mut shift_two_end_problems = Vec::new();
    for record in &records.records {
        let RecordBody::EndShift {
            shift: Shift::Two,
            photo,
        } = &record.body
        else {
            continue;
        };
        shift_two_end_seen = true;
        match photo {
            Some(name) if dirs.existing_photo(Some(name.as_str())).is_some() => shift_two_end_ok = true,
            Some(name) => shift_two_end_problems.push(format!(
                "{}: shift 2 end photo {name} is missing",
                record.file_name
            )),
            None => shift_two_end_problems.push(format!("{}: shift 2 end has no photo", record.file_name)),
        }
    }
    if !shift_two_end_seen {
        reasons.push("shift 2 end record not received yet".to_string());
    } else if !shift_two_end_ok {
        reasons.extend(shift_two_end_problems);
    }

    for (record, update) in records.updates() {
        check_update_photo(dirs, &record.file_name, update.photo.as_deref(), &mut reasons);
    }
    for malformed in &records.malformed {
        if malformed.kind.as_deref() == Some(TYPE_RECORD_UPDATE) {
            check_update_photo(dirs, &malformed.file_name, malformed.photo.as_deref(), &mut reasons);
        }
    }
    reasons
}

fn check_update_photo(dirs: &DayDirs, file_name: &str, photo: Option<&str>, reasons: &mut Vec<String>) {
    match photo {
        None => reasons.push(format!("{file_name}: update has no photo")),
        Some(name) if dirs.existing_photo(Some(name)).is_none() => {
            reasons.push(format!("{file_name}: photo {name} is missing"));
        }
        Some(_) => {}
    }
}

pub fn evaluate_day_state(records_dir: &Path, day: &str, ledger: &Ledger) -> Result<DayStatus> {
    parse_day_key(day)?;
    if ledger.is_finalized(day) {
        return Ok(DayStatus {
            day: day.to_string(),
            state: DayState::Finalized,
            reasons: Vec::new(),
        });
    }
    let records = load_day_records(records_dir, day)?;
    let reasons = readiness_blockers(&DayDirs::new(records_dir, day), &records);
    let state = if reasons.is_empty() {
        DayState::Ready
    } else {
        DayState::Open
    };
    Ok(DayStatus {
        day: day.to_string(),
        state,
        reasons,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finalized {
        path: PathBuf,
        transfer: TransferKind,
        finalized_at: String,
    },
    AlreadyFinalized {
        finalized_at: Option<String>,
    },
    NotReady {
        reasons: Vec<String>,
    },
    MissingPartial {
        expected: PathBuf,
    },
}

/// Most recently written partial report of `day`, any version.
pub fn latest_partial_report(output_dir: &Path, day: &str) -> Option<PathBuf> {
    let stem = partial_report_stem(day);
    let suffix = format!(".{REPORT_EXTENSION}");
    let entries = fs::read_dir(output_dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_suffix(&suffix)
                .and_then(|base| base.strip_prefix(&stem))
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("_v"))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max()
        .map(|(_, path)| path)
}

/// Finalize `day` when it is Ready (or unconditionally with `force`).
/// A day already flagged in the ledger is left alone.
pub fn finalize_day(
    settings: &ReportSettings,
    store: &dyn LedgerStore,
    day: &str,
    partial: Option<&Path>,
    force: bool,
) -> Result<FinalizeOutcome> {
    parse_day_key(day)?;
    let ledger = store.load()?;
    if ledger.is_finalized(day) {
        return Ok(FinalizeOutcome::AlreadyFinalized {
            finalized_at: ledger.day(day).and_then(|entry| entry.finalized_at.clone()),
        });
    }
    if !force {
        let status = evaluate_day_state(&settings.records_dir, day, &ledger)?;
        if status.state != DayState::Ready {
            info!(day, reasons = ?status.reasons, "day is not ready to finalize");
            return Ok(FinalizeOutcome::NotReady {
                reasons: status.reasons,
            });
        }
    }
    finalize_report(settings, store, day, partial)
}

/// Promote the partial report of `day` into the final folder and flag the
/// day in the ledger.
pub fn finalize_report(
    settings: &ReportSettings,
    store: &dyn LedgerStore,
    day: &str,
    partial: Option<&Path>,
) -> Result<FinalizeOutcome> {
    let mut ledger = store.load()?;
    if ledger.is_finalized(day) {
        return Ok(FinalizeOutcome::AlreadyFinalized {
            finalized_at: ledger.day(day).and_then(|entry| entry.finalized_at.clone()),
        });
    }

    let source = match partial {
        Some(path) => path.to_path_buf(),
        None => latest_partial_report(&settings.output_dir, day).unwrap_or_else(|| {
            settings
                .output_dir
                .join(format!("{}.{REPORT_EXTENSION}", partial_report_stem(day)))
        }),
    };
    if !source.is_file() {
        warn!(day, path = %source.display(), "partial report not found; cannot finalize");
        return Ok(FinalizeOutcome::MissingPartial { expected: source });
    }

    let final_dir = settings.output_dir.join(FINAL_DIR_NAME);
    fs::create_dir_all(&final_dir)
        .with_context(|| format!("failed to create {}", final_dir.display()))?;
    let destination = unused_output_path(&final_dir, &final_report_stem(day), REPORT_EXTENSION);
    let transfer = move_or_copy(&source, &destination)
        .with_context(|| format!("failed to finalize report for {day}"))?;

    let finalized_at = Local::now().format(FINALIZED_AT_FORMAT).to_string();
    ledger.mark_finalized(day, &finalized_at);
    store
        .save(&ledger)
        .with_context(|| format!("failed to record finalization of {day}"))?;

    info!(
        day,
        path = %destination.display(),
        transfer = transfer.as_str(),
        "report finalized"
    );
    Ok(FinalizeOutcome::Finalized {
        path: destination,
        transfer,
        finalized_at,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::ledger::JsonLedgerStore;

    const DAY: &str = "2025-11-24";

    fn settings(root: &Path) -> ReportSettings {
        ReportSettings {
            template: root.join("template.docx"),
            output_dir: root.join("reports"),
            records_dir: root.join("records"),
            image_size_px: 8,
            scan_photo_folder: false,
        }
    }

    fn write_record(root: &Path, name: &str, value: serde_json::Value) {
        let dir = root.join("records").join(DAY).join("data");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(name), value.to_string()).expect("write");
    }

    fn write_photo(root: &Path, name: &str) {
        let dir = root.join("records").join(DAY).join("photos");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(name), b"jpeg").expect("write");
    }

    fn write_partial(root: &Path) -> PathBuf {
        let dir = root.join("reports");
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(format!("Daily_Report_{DAY}_partial.docx"));
        fs::write(&path, b"partial").expect("write");
        path
    }

    fn complete_day(root: &Path) {
        write_photo(root, "end2.jpg");
        write_photo(root, "588.jpg");
        write_record(root, "01.json", json!({"type": "record_update", "shift": "1", "cage_number": 588, "photo": "588.jpg"}));
        write_record(root, "02.json", json!({"type": "end_shift", "shift": "2", "photo": "end2.jpg"}));
    }

    fn state(root: &Path) -> DayStatus {
        evaluate_day_state(&root.join("records"), DAY, &Ledger::default()).expect("state")
    }

    #[test]
    fn day_without_records_is_open() {
        let temp = tempdir().expect("tempdir");
        assert_eq!(state(temp.path()).state, DayState::Open);
    }

    #[test]
    fn missing_shift_two_end_photo_keeps_day_open() {
        let temp = tempdir().expect("tempdir");
        write_photo(temp.path(), "588.jpg");
        write_record(temp.path(), "01.json", json!({"type": "record_update", "cage_number": 588, "photo": "588.jpg"}));
        write_record(temp.path(), "02.json", json!({"type": "end_shift", "shift": "2", "photo": "gone.jpg"}));

        let status = state(temp.path());
        assert_eq!(status.state, DayState::Open);
        assert!(status.reasons.iter().any(|reason| reason.contains("gone.jpg")));
    }

    #[test]
    fn update_without_existing_photo_keeps_day_open() {
        let temp = tempdir().expect("tempdir");
        complete_day(temp.path());
        write_record(temp.path(), "03.json", json!({"type": "record_update", "cage_number": 589}));
        write_record(temp.path(), "04.json", json!({"type": "record_update", "cage_number": "x", "photo": "bad.jpg"}));

        let status = state(temp.path());
        assert_eq!(status.state, DayState::Open);
        assert_eq!(status.reasons.len(), 2);
    }

    #[test]
    fn valid_shift_two_end_clears_only_end_record_blockers() {
        let temp = tempdir().expect("tempdir");
        complete_day(temp.path());
        write_record(temp.path(), "00.json", json!({"type": "end_shift", "shift": "2", "photo": "early.jpg"}));
        assert_eq!(state(temp.path()).state, DayState::Ready);

        write_record(
            temp.path(),
            "shift 2 end fix.json",
            json!({"type": "record_update", "cage_number": 589, "photo": "589.jpg"}),
        );
        let status = state(temp.path());
        assert_eq!(status.state, DayState::Open);
        assert_eq!(status.reasons, vec!["shift 2 end fix.json: photo 589.jpg is missing".to_string()]);
    }

    #[test]
    fn complete_day_is_ready_and_ledger_flag_wins() {
        let temp = tempdir().expect("tempdir");
        complete_day(temp.path());
        assert_eq!(state(temp.path()).state, DayState::Ready);

        let mut ledger = Ledger::default();
        ledger.mark_finalized(DAY, "2025-11-24 20:00:00");
        let status =
            evaluate_day_state(&temp.path().join("records"), DAY, &ledger).expect("state");
        assert_eq!(status.state, DayState::Finalized);
    }

    #[test]
    fn finalize_moves_partial_and_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        complete_day(temp.path());
        let partial = write_partial(temp.path());
        let settings = settings(temp.path());
        let store = JsonLedgerStore::new(&temp.path().join("ledger.json"));

        let outcome = finalize_day(&settings, &store, DAY, None, false).expect("finalize");
        let FinalizeOutcome::Finalized {
            path,
            transfer,
            finalized_at,
        } = outcome
        else {
            panic!("expected finalized outcome, got {outcome:?}");
        };
        assert_eq!(transfer, TransferKind::Moved);
        assert_eq!(
            path,
            settings
                .output_dir
                .join("final")
                .join(format!("Daily_Report_{DAY}_FINAL.docx"))
        );
        assert!(!partial.exists());

        write_partial(temp.path());
        let again = finalize_day(&settings, &store, DAY, None, true).expect("second");
        assert_eq!(
            again,
            FinalizeOutcome::AlreadyFinalized {
                finalized_at: Some(finalized_at.clone())
            }
        );
        assert!(partial.exists());
        let ledger = store.load().expect("ledger");
        assert_eq!(
            ledger.day(DAY).and_then(|day| day.finalized_at.clone()),
            Some(finalized_at)
        );
    }

    #[test]
    fn final_name_is_versioned_on_collision() {
        let temp = tempdir().expect("tempdir");
        let settings = settings(temp.path());
        let final_dir = settings.output_dir.join("final");
        fs::create_dir_all(&final_dir).expect("mkdir");
        fs::write(final_dir.join(format!("Daily_Report_{DAY}_FINAL.docx")), b"old").expect("write");
        write_partial(temp.path());
        let store = JsonLedgerStore::new(&temp.path().join("ledger.json"));

        let outcome = finalize_report(&settings, &store, DAY, None).expect("finalize");
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized { ref path, .. }
                if path.ends_with(format!("Daily_Report_{DAY}_FINAL_v2.docx"))
        ));
    }

    #[test]
    fn not_ready_and_missing_partial_do_not_touch_ledger() {
        let temp = tempdir().expect("tempdir");
        let settings = settings(temp.path());
        let store = JsonLedgerStore::new(&temp.path().join("ledger.json"));

        let outcome = finalize_day(&settings, &store, DAY, None, false).expect("finalize");
        assert!(matches!(outcome, FinalizeOutcome::NotReady { .. }));
        let outcome = finalize_day(&settings, &store, DAY, None, true).expect("finalize");
        assert!(matches!(outcome, FinalizeOutcome::MissingPartial { .. }));
        assert!(!store.load().expect("ledger").is_finalized(DAY));
    }

    #[test]
    fn latest_partial_picks_versioned_files_only() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        fs::write(dir.join(format!("Daily_Report_{DAY}_partial_v2.docx")), b"x").expect("write");
        fs::write(dir.join(format!("Daily_Report_{DAY}_partial_notes.txt")), b"x").expect("write");
        assert_eq!(
            latest_partial_report(dir, DAY),
            Some(dir.join(format!("Daily_Report_{DAY}_partial_v2.docx")))
        );
    }
}
