use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::registry::{Shift, SignBoundary};

pub const TYPE_START_SHIFT: &str = "start_shift";
pub const TYPE_END_SHIFT: &str = "end_shift";
pub const TYPE_RECORD_UPDATE: &str = "record_update";

/// Validate a day key (`YYYY-MM-DD`) before it is used in paths or URLs.
pub fn parse_day_key(day: &str) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("invalid day key {day:?} (expected YYYY-MM-DD)"))?;
    if date.format("%Y-%m-%d").to_string() != day {
        bail!("invalid day key {day:?} (expected zero-padded YYYY-MM-DD)");
    }
    Ok(date)
}

/// Per-day folders under the local records root.
#[derive(Debug, Clone)]
pub struct DayDirs {
    pub data: PathBuf,
    pub photos: PathBuf,
    pub resized: PathBuf,
}

impl DayDirs {
    pub fn new(records_dir: &Path, day: &str) -> Self {
        let root = records_dir.join(day);
        Self {
            data: root.join("data"),
            photos: root.join("photos"),
            resized: root.join("resized"),
        }
    }

    /// Resolve a photo file name referenced by a record. Names that would
    /// escape the photo folder resolve to `None`.
    pub fn photo_path(&self, name: &str) -> Option<PathBuf> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed == "."
            || trimmed == ".."
        {
            return None;
        }
        Some(self.photos.join(trimmed))
    }

    pub fn existing_photo(&self, name: Option<&str>) -> Option<PathBuf> {
        name.and_then(|name| self.photo_path(name))
            .filter(|path| path.is_file())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CageUpdate {
    pub shift: Shift,
    pub cage_number: u32,
    pub myna_captured: u32,
    pub local_released: u32,
    pub photo: Option<String>,
    pub location: Option<String>,
}

impl CageUpdate {
    pub fn total(&self) -> u32 {
        self.myna_captured.saturating_add(self.local_released)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    StartShift { shift: Shift, photo: Option<String> },
    EndShift { shift: Shift, photo: Option<String> },
    Update(CageUpdate),
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub file_name: String,
    pub body: RecordBody,
}

impl Record {
    pub fn photo(&self) -> Option<&str> {
        match &self.body {
            RecordBody::StartShift { photo, .. } | RecordBody::EndShift { photo, .. } => {
                photo.as_deref()
            }
            RecordBody::Update(update) => update.photo.as_deref(),
            RecordBody::Other { .. } => None,
        }
    }
}

/// A record file that could not be classified. The raw `type` and `photo`
/// fields are kept so completeness checks still see them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed record {file_name}: {reason}")]
pub struct MalformedRecord {
    pub file_name: String,
    pub reason: String,
    pub kind: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DayRecords {
    pub records: Vec<Record>,
    pub malformed: Vec<MalformedRecord>,
}

impl DayRecords {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed.is_empty()
    }

    pub fn updates(&self) -> impl Iterator<Item = (&Record, &CageUpdate)> {
        self.records.iter().filter_map(|record| match &record.body {
            RecordBody::Update(update) => Some((record, update)),
            _ => None,
        })
    }
}

/// Classify one decoded JSON object into a typed record.
pub fn classify_record(file_name: &str, value: &Value) -> Result<Record, MalformedRecord> {
    let kind = value.get("type").and_then(Value::as_str).map(str::to_string);
    let photo = value.get("photo").and_then(non_empty_string);
    let malformed = |reason: String| MalformedRecord {
        file_name: file_name.to_string(),
        reason,
        kind: kind.clone(),
        photo: photo.clone(),
    };

    if !value.is_object() {
        return Err(malformed("record is not a JSON object".to_string()));
    }
    let Some(kind_name) = kind.as_deref() else {
        return Err(malformed("missing `type` field".to_string()));
    };

    let body = match kind_name {
        TYPE_START_SHIFT | TYPE_END_SHIFT => {
            let shift = value
                .get("shift")
                .and_then(parse_shift)
                .ok_or_else(|| malformed("missing or invalid `shift`".to_string()))?;
            if kind_name == TYPE_START_SHIFT {
                RecordBody::StartShift {
                    shift,
                    photo: photo.clone(),
                }
            } else {
                RecordBody::EndShift {
                    shift,
                    photo: photo.clone(),
                }
            }
        }
        TYPE_RECORD_UPDATE => {
            let shift = match value.get("shift") {
                None | Some(Value::Null) => Shift::One,
                Some(raw) => {
                    parse_shift(raw).ok_or_else(|| malformed(format!("invalid `shift` {raw}")))?
                }
            };
            let cage_number = value
                .get("cage_number")
                .and_then(parse_count)
                .ok_or_else(|| malformed("missing or invalid `cage_number`".to_string()))?;
            RecordBody::Update(CageUpdate {
                shift,
                cage_number,
                myna_captured: value.get("myna_captured").and_then(parse_count).unwrap_or(0),
                local_released: value
                    .get("local_released")
                    .and_then(parse_count)
                    .unwrap_or(0),
                photo: photo.clone(),
                location: value.get("location").and_then(non_empty_string),
            })
        }
        other => RecordBody::Other {
            kind: other.to_string(),
        },
    };

    Ok(Record {
        file_name: file_name.to_string(),
        body,
    })
}

/// Read every `*.json` record for a day in file-name order. Unreadable or
/// unclassifiable files are logged and reported as malformed.
pub fn load_day_records(records_dir: &Path, day: &str) -> Result<DayRecords> {
    let dirs = DayDirs::new(records_dir, day);
    let mut out = DayRecords::default();
    if !dirs.data.is_dir() {
        return Ok(out);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&dirs.data)
        .with_context(|| format!("failed to list {}", dirs.data.display()))?
    {
        let entry = entry.with_context(|| format!("failed to list {}", dirs.data.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.to_ascii_lowercase().ends_with(".json") && entry.path().is_file() {
            names.push(name);
        }
    }
    names.sort();

    for name in names {
        let path = dirs.data.join(&name);
        let parsed = fs::read_to_string(&path)
            .map_err(|error| error.to_string())
            .and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|error| error.to_string())
            });
        let value = match parsed {
            Ok(value) => value,
            Err(reason) => {
                warn!(day, file = %name, %reason, "could not read record");
                out.malformed.push(MalformedRecord {
                    file_name: name,
                    reason,
                    kind: None,
                    photo: None,
                });
                continue;
            }
        };
        match classify_record(&name, &value) {
            Ok(record) => out.records.push(record),
            Err(malformed) => {
                warn!(day, file = %name, reason = %malformed.reason, "skipping malformed record");
                out.malformed.push(malformed);
            }
        }
    }
    Ok(out)
}

/// Sign-in/sign-out photographs, one slot per shift and boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignPhotos {
    slots: [Option<PathBuf>; 4],
}

impl SignPhotos {
    fn index(shift: Shift, boundary: SignBoundary) -> usize {
        let base = match shift {
            Shift::One => 0,
            Shift::Two => 2,
        };
        base + usize::from(boundary == SignBoundary::End)
    }

    pub fn get(&self, shift: Shift, boundary: SignBoundary) -> Option<&Path> {
        self.slots[Self::index(shift, boundary)].as_deref()
    }

    fn set_if_empty(&mut self, shift: Shift, boundary: SignBoundary, path: PathBuf) {
        let slot = &mut self.slots[Self::index(shift, boundary)];
        if slot.is_none() {
            *slot = Some(path);
        }
    }
}

/// First start/end record per shift whose photo exists locally.
pub fn find_shift_sign_photos(dirs: &DayDirs, records: &DayRecords) -> SignPhotos {
    let mut found = SignPhotos::default();
    for record in &records.records {
        let (shift, boundary, photo) = match &record.body {
            RecordBody::StartShift { shift, photo } => (*shift, SignBoundary::Start, photo),
            RecordBody::EndShift { shift, photo } => (*shift, SignBoundary::End, photo),
            _ => continue,
        };
        if let Some(path) = dirs.existing_photo(photo.as_deref()) {
            found.set_if_empty(shift, boundary, path);
        }
    }
    found
}

fn parse_shift(value: &Value) -> Option<Shift> {
    match value {
        Value::String(text) => Shift::parse(text),
        Value::Number(number) => number
            .as_u64()
            .and_then(|raw| Shift::parse(&raw.to_string())),
        _ => None,
    }
}

fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|raw| u32::try_from(raw).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
