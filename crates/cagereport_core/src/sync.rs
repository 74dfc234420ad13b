use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assemble::{PartialReport, ReportSettings, generate_partial_report};
use crate::finalize::{DayState, FinalizeOutcome, evaluate_day_state, finalize_day};
use crate::imaging::ImageNormalizer;
use crate::ledger::{FileKind, LedgerStore};
use crate::records::{DayDirs, parse_day_key};
use crate::remote::RecordsApi;
use crate::worker::WorkerControl;

/// Everything one sync pass needs besides the remote API.
pub struct SyncContext<'a> {
    pub settings: &'a ReportSettings,
    pub store: &'a dyn LedgerStore,
    pub normalizer: &'a dyn ImageNormalizer,
    pub purge_after_photos: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncDayReport {
    pub day: String,
    pub listed_data: usize,
    pub listed_photos: usize,
    pub downloaded_data: usize,
    pub downloaded_photos: usize,
    pub failed_downloads: usize,
    pub partial_report: Option<String>,
    pub degraded: bool,
    pub state: Option<DayState>,
    pub finalized_path: Option<String>,
    pub already_finalized: bool,
    pub purged: bool,
    pub errors: Vec<String>,
}

impl SyncDayReport {
    pub fn downloaded(&self) -> usize {
        self.downloaded_data + self.downloaded_photos
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCycleReport {
    pub dates_listed: bool,
    pub days: Vec<SyncDayReport>,
    pub interrupted: bool,
    pub request_count: usize,
    pub errors: Vec<String>,
}

/// Download whatever `day` has that the ledger does not, then refresh the
/// partial report and finalize when the day became Ready.
pub fn sync_day(ctx: &SyncContext<'_>, api: &mut dyn RecordsApi, day: &str) -> Result<SyncDayReport> {
    parse_day_key(day)?;
    let listing = api
        .list_day(day)
        .with_context(|| format!("could not fetch file list for {day}"))?;
    let mut ledger = ctx.store.load()?;
    let dirs = DayDirs::new(&ctx.settings.records_dir, day);

    let mut report = SyncDayReport {
        day: day.to_string(),
        listed_data: listing.data.len(),
        listed_photos: listing.photos.len(),
        already_finalized: ledger.is_finalized(day),
        ..SyncDayReport::default()
    };

    for kind in FileKind::ALL {
        let target_dir = match kind {
            FileKind::Data => &dirs.data,
            FileKind::Photo => &dirs.photos,
        };
        for name in listing.files(kind) {
            if ledger.has_file(day, kind, name) {
                continue;
            }
            match download_into(api, day, kind, name, target_dir) {
                Ok(()) => {
                    ledger.record_file(day, kind, name);
                    ctx.store
                        .save(&ledger)
                        .with_context(|| format!("failed to record download of {name}"))?;
                    match kind {
                        FileKind::Data => report.downloaded_data += 1,
                        FileKind::Photo => report.downloaded_photos += 1,
                    }
                }
                Err(download_error) => {
                    warn!(day, file = %name, error = %download_error, "download failed; will retry next cycle");
                    report.failed_downloads += 1;
                    report.errors.push(format!("{day}/{}/{name}: {download_error:#}", kind.as_str()));
                }
            }
        }
    }

    if report.downloaded() == 0 {
        debug!(day, "no new files; report unchanged");
        return Ok(report);
    }
    info!(
        day,
        data = report.downloaded_data,
        photos = report.downloaded_photos,
        "downloaded new files"
    );

    if report.already_finalized {
        info!(day, "day already finalized; report not regenerated");
    } else {
        match generate_partial_report(ctx.settings, day, ctx.normalizer) {
            Ok(partial) => finalize_if_ready(ctx, day, &partial, &mut report),
            Err(report_error) => {
                error!(day, error = %report_error, "partial report creation failed");
                report.errors.push(format!("partial report: {report_error:#}"));
            }
        }
    }

    if let Some(threshold) = ctx.purge_after_photos
        && listing.photos.len() >= threshold
    {
        info!(day, photos = listing.photos.len(), threshold, "photo limit reached; purging server files");
        match api.purge_day(day) {
            Ok(()) => report.purged = true,
            Err(purge_error) => {
                warn!(day, error = %purge_error, "failed to purge server files");
                report.errors.push(format!("purge: {purge_error:#}"));
            }
        }
    }

    Ok(report)
}

fn finalize_if_ready(
    ctx: &SyncContext<'_>,
    day: &str,
    partial: &PartialReport,
    report: &mut SyncDayReport,
) {
    report.partial_report = Some(partial.output.display().to_string());
    report.degraded = partial.degraded;
    report.errors.extend(partial.errors.iter().cloned());

    let status = match ctx
        .store
        .load()
        .and_then(|ledger| evaluate_day_state(&ctx.settings.records_dir, day, &ledger))
    {
        Ok(status) => status,
        Err(state_error) => {
            report.errors.push(format!("readiness: {state_error:#}"));
            return;
        }
    };
    report.state = Some(status.state);
    if status.state != DayState::Ready {
        debug!(day, reasons = ?status.reasons, "day still open");
        return;
    }

    match finalize_day(ctx.settings, ctx.store, day, Some(&partial.output), false) {
        Ok(FinalizeOutcome::Finalized { path, .. }) => {
            report.state = Some(DayState::Finalized);
            report.finalized_path = Some(path.display().to_string());
        }
        Ok(FinalizeOutcome::AlreadyFinalized { .. }) => {
            report.state = Some(DayState::Finalized);
            report.already_finalized = true;
        }
        Ok(FinalizeOutcome::NotReady { reasons }) => {
            report.errors.push(format!("finalization skipped: {}", reasons.join("; ")));
        }
        Ok(FinalizeOutcome::MissingPartial { expected }) => {
            report
                .errors
                .push(format!("finalization failed: {} is missing", expected.display()));
        }
        Err(finalize_error) => {
            error!(day, error = %finalize_error, "finalization attempt failed");
            report.errors.push(format!("finalization: {finalize_error:#}"));
        }
    }
}

/// One pass over every day the server lists. A failing day never aborts the
/// pass; `control` is consulted between days.
pub fn sync_cycle(
    ctx: &SyncContext<'_>,
    api: &mut dyn RecordsApi,
    control: Option<&WorkerControl>,
) -> SyncCycleReport {
    let mut cycle = SyncCycleReport::default();
    let dates = match api.list_dates() {
        Ok(dates) => dates,
        Err(list_error) => {
            warn!(error = %list_error, "could not list dates; no data this cycle");
            cycle.errors.push(format!("list dates: {list_error:#}"));
            cycle.request_count = api.request_count();
            return cycle;
        }
    };
    cycle.dates_listed = true;

    for day in dates {
        if let Some(control) = control
            && !control.wait_while_paused()
        {
            cycle.interrupted = true;
            break;
        }
        match sync_day(ctx, api, &day) {
            Ok(report) => cycle.days.push(report),
            Err(day_error) => {
                warn!(day = %day, error = %day_error, "day sync failed");
                cycle.errors.push(format!("{day}: {day_error:#}"));
            }
        }
    }
    cycle.request_count = api.request_count();
    cycle
}

fn download_into(
    api: &mut dyn RecordsApi,
    day: &str,
    kind: FileKind,
    name: &str,
    target_dir: &Path,
) -> Result<()> {
    validate_remote_file_name(name)?;
    let bytes = api.download(day, kind, name)?;
    fs::create_dir_all(target_dir)
        .with_context(|| format!("failed to create {}", target_dir.display()))?;
    let target = target_dir.join(name);
    fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(())
}

/// Server-provided names land directly in a day folder; anything that could
/// escape it is refused.
fn validate_remote_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains(':')
    {
        bail!("refusing unsafe remote file name {name:?}");
    }
    Ok(())
}
