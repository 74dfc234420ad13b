//! Report assembly: turn a day's local records into placeholder maps and
//! drive the archive mutator to produce the partial report.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::archive::{InjectReport, inject_into_archive};
use crate::filesystem::{REPORT_EXTENSION, partial_report_stem, writable_output_path};
use crate::imaging::{ImageNormalizer, prepare_photo};
use crate::records::{DayDirs, DayRecords, find_shift_sign_photos, load_day_records, parse_day_key};
use crate::registry::{
    DATE_TOKEN, DATE_WITH_MONTH_TOKEN, GROUPS, GroupRole, Shift, SignBoundary, all_cages,
    cage_token, group_for_cage, group_token, photo_token, sign_token,
};

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Everything one report generation needs, passed explicitly per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub template: PathBuf,
    pub output_dir: PathBuf,
    pub records_dir: PathBuf,
    pub image_size_px: u32,
    pub scan_photo_folder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMaps {
    pub text: BTreeMap<String, String>,
    pub images: BTreeMap<String, Option<PathBuf>>,
}

#[derive(Debug, Clone, Default, Copy, PartialEq, Eq)]
struct GroupTally {
    myna: u64,
    local: u64,
}

/// Text and image maps for `day`. Every registered unit and group token is
/// present in the text map, zero unless a record says otherwise.
pub fn build_placeholder_maps(
    settings: &ReportSettings,
    day: &str,
    records: &DayRecords,
    normalizer: &dyn ImageNormalizer,
) -> Result<PlaceholderMaps> {
    let date = parse_day_key(day)?;
    let dirs = DayDirs::new(&settings.records_dir, day);
    let mut maps = PlaceholderMaps::default();

    for shift in Shift::ALL {
        for cage in all_cages() {
            maps.text.insert(cage_token(shift, cage), "0".to_string());
        }
        for group in GROUPS {
            for role in GroupRole::ALL {
                maps.text.insert(group_token(shift, group, role), "0".to_string());
            }
        }
    }
    maps.text.insert(DATE_TOKEN.to_string(), day.to_string());
    maps.text.insert(
        DATE_WITH_MONTH_TOKEN.to_string(),
        date.format("%d %B %Y").to_string(),
    );

    for shift in Shift::ALL {
        for boundary in [SignBoundary::Start, SignBoundary::End] {
            maps.images.insert(sign_token(shift, boundary), None);
        }
    }
    let signs = find_shift_sign_photos(&dirs, records);
    for shift in Shift::ALL {
        for boundary in [SignBoundary::Start, SignBoundary::End] {
            if let Some(source) = signs.get(shift, boundary) {
                let prepared =
                    prepare_photo(normalizer, source, &dirs.resized, settings.image_size_px);
                maps.images.insert(sign_token(shift, boundary), Some(prepared));
            }
        }
    }

    if settings.scan_photo_folder {
        maps.images
            .extend(scan_photo_folder(&dirs, normalizer, settings.image_size_px)?);
    }

    let mut tallies: BTreeMap<(&'static str, Shift), GroupTally> = BTreeMap::new();
    let mut reported: BTreeSet<(u32, Shift)> = BTreeSet::new();
    for (record, update) in records.updates() {
        let cage = update.cage_number;
        maps.text
            .insert(cage_token(update.shift, cage), update.total().to_string());
        if !reported.contains(&(cage, update.shift.opposite())) {
            maps.text
                .insert(cage_token(update.shift.opposite(), cage), "0".to_string());
        }
        reported.insert((cage, update.shift));

        match group_for_cage(cage) {
            Some(group) => {
                let tally = tallies.entry((group.code, update.shift)).or_default();
                tally.myna += u64::from(update.myna_captured);
                tally.local += u64::from(update.local_released);
            }
            None => {
                warn!(day, cage, file = %record.file_name, "cage is not in the registry; no group total updated");
            }
        }

        match dirs.existing_photo(update.photo.as_deref()) {
            Some(source) => {
                let prepared =
                    prepare_photo(normalizer, &source, &dirs.resized, settings.image_size_px);
                maps.images
                    .insert(photo_token(&cage.to_string()), Some(prepared));
            }
            None => {
                if let Some(photo) = &update.photo {
                    warn!(day, cage, photo = %photo, file = %record.file_name, "referenced photo not found locally");
                }
            }
        }
    }

    for group in GROUPS {
        for shift in Shift::ALL {
            let tally = tallies
                .get(&(group.code, shift))
                .copied()
                .unwrap_or_default();
            maps.text.insert(
                group_token(shift, group, GroupRole::Total),
                (tally.myna + tally.local).to_string(),
            );
            maps.text.insert(
                group_token(shift, group, GroupRole::Myna),
                tally.myna.to_string(),
            );
            maps.text.insert(
                group_token(shift, group, GroupRole::Local),
                tally.local.to_string(),
            );
        }
    }

    debug!(
        day,
        text = maps.text.len(),
        images = maps.images.values().filter(|path| path.is_some()).count(),
        "built placeholder maps"
    );
    Ok(maps)
}

/// `(pic_<digits>)` entries for every photo in the day's folder whose stem
/// carries digits, plus the unpadded form when it differs.
pub fn scan_photo_folder(
    dirs: &DayDirs,
    normalizer: &dyn ImageNormalizer,
    size_px: u32,
) -> Result<BTreeMap<String, Option<PathBuf>>> {
    let mut out = BTreeMap::new();
    if !dirs.photos.is_dir() {
        return Ok(out);
    }
    let mut photos = Vec::new();
    for entry in fs::read_dir(&dirs.photos)
        .with_context(|| format!("failed to list {}", dirs.photos.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to list {}", dirs.photos.display()))?
            .path();
        if path.is_file() && has_photo_extension(&path) {
            photos.push(path);
        }
    }
    photos.sort();

    for source in photos {
        let digits = source
            .file_stem()
            .map(|stem| stem.to_string_lossy())
            .map(|stem| stem.chars().filter(char::is_ascii_digit).collect::<String>())
            .unwrap_or_default();
        if digits.is_empty() {
            continue;
        }
        let prepared = prepare_photo(normalizer, &source, &dirs.resized, size_px);
        out.insert(photo_token(&digits), Some(prepared.clone()));
        if let Ok(number) = digits.parse::<u64>() {
            let unpadded = number.to_string();
            if unpadded != digits {
                out.insert(photo_token(&unpadded), Some(prepared));
            }
        }
    }
    Ok(out)
}

fn has_photo_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            PHOTO_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialReport {
    pub day: String,
    pub output: PathBuf,
    pub records: usize,
    pub malformed: usize,
    pub images_mapped: usize,
    pub inject: Option<InjectReport>,
    /// The template was copied unmodified because injection failed.
    pub degraded: bool,
    pub errors: Vec<String>,
}

/// Regenerate the partial report for `day` from local records.
pub fn generate_partial_report(
    settings: &ReportSettings,
    day: &str,
    normalizer: &dyn ImageNormalizer,
) -> Result<PartialReport> {
    parse_day_key(day)?;
    if !settings.template.is_file() {
        bail!("report template not found: {}", settings.template.display());
    }
    let records = load_day_records(&settings.records_dir, day)
        .with_context(|| format!("failed to load records for {day}"))?;
    let maps = build_placeholder_maps(settings, day, &records, normalizer)?;

    fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("failed to create {}", settings.output_dir.display()))?;
    let output = writable_output_path(
        &settings.output_dir,
        &partial_report_stem(day),
        REPORT_EXTENSION,
    );

    let mut report = PartialReport {
        day: day.to_string(),
        output: output.clone(),
        records: records.records.len(),
        malformed: records.malformed.len(),
        images_mapped: maps.images.values().filter(|path| path.is_some()).count(),
        inject: None,
        degraded: false,
        errors: records
            .malformed
            .iter()
            .map(|malformed| malformed.to_string())
            .collect(),
    };

    match inject_into_archive(&settings.template, &output, &maps.images, &maps.text) {
        Ok(inject) => {
            report.errors.extend(inject.errors.iter().cloned());
            report.inject = Some(inject);
        }
        Err(inject_error) => {
            error!(day, error = %inject_error, "injection failed; copying template unmodified");
            fs::copy(&settings.template, &output).with_context(|| {
                format!(
                    "injection failed ({inject_error}) and the template could not be copied to {}",
                    output.display()
                )
            })?;
            report.degraded = true;
            report.errors.push(format!("injection failed: {inject_error}"));
        }
    }

    info!(
        day,
        output = %output.display(),
        records = report.records,
        malformed = report.malformed,
        degraded = report.degraded,
        "partial report generated"
    );
    Ok(report)
}
