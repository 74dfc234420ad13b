//! Template archive mutation: unpack a `.docx`, substitute placeholder
//! tokens in every `word/**/*.xml` part, inject images with their
//! relationship wiring, and repack.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::drawing::{Extent, NS_WP, build_drawing_run};
use crate::imaging::{EmbeddedImage, encode_png_for_embedding};
use crate::relationships::{IMAGE_RELATIONSHIP_TYPE, RelationshipPart, rels_path_for};
use crate::split_run::{
    MAX_REPLACEMENTS_PER_TOKEN, escape_attribute, replace_all_with_text,
    replace_token_with_element, visible_text,
};

const STRUCTURAL_ROOT: &str = "word";
const MEDIA_DIR: &str = "word/media";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const PNG_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("input archive not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("invalid archive {}: {source}", path.display())]
    InvalidArchive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create mutation workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("failed to write archive {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectReport {
    pub parts_scanned: usize,
    pub parts_rewritten: Vec<String>,
    pub parts_skipped: Vec<String>,
    pub text_replacements: usize,
    pub images_injected: usize,
    pub images_skipped: Vec<String>,
    pub media_added: Vec<String>,
    pub errors: Vec<String>,
}

/// One archive entry in its original position.
#[derive(Debug, Clone)]
struct EntryRecord {
    name: String,
    is_dir: bool,
}

/// Produce `output` from `input` with every resolvable token in `text` and
/// `images` substituted. Image entries mapped to `None` or to a missing file
/// are skipped and their tokens left in place.
pub fn inject_into_archive(
    input: &Path,
    output: &Path,
    images: &BTreeMap<String, Option<PathBuf>>,
    text: &BTreeMap<String, String>,
) -> Result<InjectReport, ArchiveError> {
    if !input.is_file() {
        return Err(ArchiveError::MissingInput(input.to_path_buf()));
    }

    let workspace = tempfile::Builder::new()
        .prefix("cagereport-docx-")
        .tempdir()
        .map_err(ArchiveError::Workspace)?;
    let root = workspace.path();

    let entries = extract_archive(input, root)?;
    let mut report = InjectReport::default();
    let mut state = MutationState {
        root,
        media: MediaStore::new(root),
        next_drawing_id: highest_drawing_id(root, &entries) + 1,
    };

    for part in structural_parts(root) {
        let name = part_name(root, &part);
        report.parts_scanned += 1;
        let bytes = fs::read(&part).map_err(io_error(&part))?;
        let Ok(xml) = String::from_utf8(bytes) else {
            warn!(part = %name, "skipping part that is not valid UTF-8");
            report.parts_skipped.push(name);
            continue;
        };

        let updated = state.mutate_part(&name, xml.clone(), images, text, &mut report)?;
        if updated != xml {
            fs::write(&part, updated).map_err(io_error(&part))?;
            debug!(part = %name, "rewrote part");
            report.parts_rewritten.push(name);
        }
    }

    report.media_added = state.media.stored_names();
    if !report.media_added.is_empty() {
        ensure_png_content_type(root)?;
    }

    repack(root, &entries, output)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        text_replacements = report.text_replacements,
        images_injected = report.images_injected,
        "archive written"
    );
    Ok(report)
}

struct MutationState<'a> {
    root: &'a Path,
    media: MediaStore,
    next_drawing_id: u32,
}

impl MutationState<'_> {
    fn mutate_part(
        &mut self,
        name: &str,
        mut xml: String,
        images: &BTreeMap<String, Option<PathBuf>>,
        text: &BTreeMap<String, String>,
        report: &mut InjectReport,
    ) -> Result<String, ArchiveError> {
        for (token, value) in text {
            let direct = xml.matches(token.as_str()).count();
            if direct > 0 {
                xml = xml.replace(token.as_str(), &escape_attribute(value));
                report.text_replacements += direct;
            }
        }
        // Whatever is still visible was split across runs.
        let mut visible = visible_text(&xml).unwrap_or_default();
        for (token, value) in text {
            if !visible.contains(token.as_str()) {
                continue;
            }
            let (updated, split) = replace_all_with_text(&xml, token, value);
            if split > 0 {
                debug!(part = name, token = %token, count = split, "replaced split-run text token");
                xml = updated;
                visible = visible_text(&xml).unwrap_or_default();
                report.text_replacements += split;
            }
        }

        let mut relationships: Option<RelationshipPart> = None;
        let mut relationships_changed = false;
        let rels_path = self.root.join(rels_path_for(Path::new(name)));
        for (token, source) in images {
            if !xml.contains(token.as_str()) && !visible.contains(token.as_str()) {
                continue;
            }
            let Some(source) = source.as_ref().filter(|source| source.is_file()) else {
                warn!(part = name, token = %token, path = ?source, "image missing; leaving token in place");
                report.images_skipped.push(token.clone());
                continue;
            };
            let embedded = match self.media.prepare(source) {
                Ok(embedded) => embedded,
                Err(error) => {
                    warn!(part = name, token = %token, path = %source.display(), error = %format!("{error:#}"), "failed to prepare image");
                    report
                        .errors
                        .push(format!("{token}: failed to prepare {}: {error:#}", source.display()));
                    continue;
                }
            };
            let extent = Extent::from_pixels(embedded.width_px, embedded.height_px);

            if relationships.is_none() {
                relationships = Some(
                    RelationshipPart::load_or_empty(&rels_path).map_err(|error| ArchiveError::Io {
                        path: rels_path.clone(),
                        source: io::Error::other(format!("{error:#}")),
                    })?,
                );
            }
            let Some(rels) = relationships.as_mut() else {
                continue;
            };

            let rel_id = rels.next_id();
            let mut placed = 0usize;
            while placed < MAX_REPLACEMENTS_PER_TOKEN {
                let fragment = build_drawing_run(&rel_id, self.next_drawing_id, extent);
                let (updated, replaced) = replace_token_with_element(&xml, token, &fragment);
                if replaced == 0 {
                    break;
                }
                xml = updated;
                placed += 1;
                self.next_drawing_id += 1;
            }

            if placed == 0 {
                warn!(part = name, token = %token, "token is not inside a text run; left untouched");
                continue;
            }
            let media_name = self.media.store(source).map_err(io_error(source))?;
            let target = media_target(name, &media_name);
            rels.add(IMAGE_RELATIONSHIP_TYPE, &target);
            relationships_changed = true;
            report.images_injected += placed;
            debug!(part = name, token = %token, rel_id = %rel_id, target = %target, count = placed, "injected image");
        }

        if let Some(rels) = relationships.filter(|_| relationships_changed) {
            rels.save(&rels_path).map_err(|error| ArchiveError::Io {
                path: rels_path.clone(),
                source: io::Error::other(format!("{error:#}")),
            })?;
        }
        Ok(xml)
    }
}

/// Images for one invocation: decoded once per source path and written to
/// `word/media` only once actually referenced.
struct MediaStore {
    root: PathBuf,
    prepared: HashMap<PathBuf, EmbeddedImage>,
    stored: BTreeMap<PathBuf, String>,
}

impl MediaStore {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            prepared: HashMap::new(),
            stored: BTreeMap::new(),
        }
    }

    fn prepare(&mut self, source: &Path) -> anyhow::Result<EmbeddedImage> {
        if let Some(existing) = self.prepared.get(source) {
            return Ok(existing.clone());
        }
        let embedded = encode_png_for_embedding(source)?;
        self.prepared.insert(source.to_path_buf(), embedded.clone());
        Ok(embedded)
    }

    /// File name under `word/media` for `source`, writing it on first use.
    fn store(&mut self, source: &Path) -> io::Result<String> {
        if let Some(name) = self.stored.get(source) {
            return Ok(name.clone());
        }
        let Some(embedded) = self.prepared.get(source) else {
            return Err(io::Error::other("image was not prepared before storing"));
        };
        let media_dir = self.root.join(MEDIA_DIR);
        fs::create_dir_all(&media_dir)?;
        let name = next_media_name(&media_dir);
        fs::write(media_dir.join(&name), &embedded.png)?;
        self.stored.insert(source.to_path_buf(), name.clone());
        Ok(name)
    }

    fn stored_names(&self) -> Vec<String> {
        let mut names = self
            .stored
            .values()
            .map(|name| format!("{MEDIA_DIR}/{name}"))
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// First free `imageNNN.png` in `media_dir`.
fn next_media_name(media_dir: &Path) -> String {
    let mut index = 1u32;
    loop {
        let name = format!("image{index:03}.png");
        if !media_dir.join(&name).exists() {
            return name;
        }
        index += 1;
    }
}

/// Relationship target from the part's own directory to the media file.
fn media_target(part_name: &str, media_name: &str) -> String {
    let depth = Path::new(part_name)
        .parent()
        .and_then(|parent| parent.strip_prefix(STRUCTURAL_ROOT).ok())
        .map(|relative| relative.components().count())
        .unwrap_or(0);
    format!("{}media/{media_name}", "../".repeat(depth))
}

fn extract_archive(input: &Path, root: &Path) -> Result<Vec<EntryRecord>, ArchiveError> {
    let invalid = |source| ArchiveError::InvalidArchive {
        path: input.to_path_buf(),
        source,
    };
    let file = File::open(input).map_err(io_error(input))?;
    let mut archive = ZipArchive::new(file).map_err(invalid)?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(invalid)?;
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(invalid(ZipError::InvalidArchive(
                "entry escapes the archive root",
            )));
        };
        let target = root.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            let mut out = File::create(&target).map_err(io_error(&target))?;
            io::copy(&mut entry, &mut out).map_err(io_error(&target))?;
        }
        entries.push(EntryRecord {
            name,
            is_dir: entry.is_dir(),
        });
    }
    Ok(entries)
}

/// Every XML part below `word/`, in a stable order.
fn structural_parts(root: &Path) -> Vec<PathBuf> {
    let base = root.join(STRUCTURAL_ROOT);
    if !base.is_dir() {
        return Vec::new();
    }
    WalkDir::new(&base)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| extension.eq_ignore_ascii_case("xml"))
        })
        .collect()
}

fn part_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(value) => Some(value.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Highest `wp:docPr/@id` across the structural parts.
fn highest_drawing_id(root: &Path, entries: &[EntryRecord]) -> u32 {
    entries
        .iter()
        .filter(|entry| !entry.is_dir)
        .filter(|entry| entry.name.starts_with("word/") && entry.name.ends_with(".xml"))
        .filter_map(|entry| fs::read_to_string(root.join(&entry.name)).ok())
        .filter_map(|xml| {
            let document = roxmltree::Document::parse(&xml).ok()?;
            document
                .descendants()
                .filter(|node| node.has_tag_name((NS_WP, "docPr")))
                .filter_map(|node| node.attribute("id"))
                .filter_map(|id| id.parse::<u32>().ok())
                .max()
        })
        .max()
        .unwrap_or(0)
}

fn ensure_png_content_type(root: &Path) -> Result<(), ArchiveError> {
    let path = root.join(CONTENT_TYPES_PART);
    if !path.is_file() {
        warn!("package has no {CONTENT_TYPES_PART}; media type not registered");
        return Ok(());
    }
    let xml = fs::read_to_string(&path).map_err(io_error(&path))?;
    let Some(updated) = with_png_default(&xml) else {
        return Ok(());
    };
    fs::write(&path, updated).map_err(io_error(&path))
}

/// `xml` with a png `Default` entry added, or `None` when one exists or the
/// document cannot be understood.
fn with_png_default(xml: &str) -> Option<String> {
    let document = roxmltree::Document::parse(xml).ok()?;
    let has_png = document
        .root_element()
        .children()
        .filter(|node| node.tag_name().name() == "Default")
        .filter_map(|node| node.attribute("Extension"))
        .any(|extension| extension.eq_ignore_ascii_case("png"));
    if has_png {
        return None;
    }
    let close = xml.rfind("</Types>")?;
    let mut updated = String::with_capacity(xml.len() + 64);
    updated.push_str(&xml[..close]);
    updated.push_str(&format!(
        "<Default Extension=\"png\" ContentType=\"{PNG_CONTENT_TYPE}\"/>"
    ));
    updated.push_str(&xml[close..]);
    Some(updated)
}

/// Write the workspace back into `output`: original entries first, in their
/// original order, then any new files sorted by name.
fn repack(root: &Path, entries: &[EntryRecord], output: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let write_error = |source| ArchiveError::Write {
        path: output.to_path_buf(),
        source,
    };

    let file = File::create(output).map_err(io_error(output))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let known = entries
        .iter()
        .map(|entry| entry.name.trim_end_matches('/').to_string())
        .collect::<BTreeSet<_>>();
    let added = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| part_name(root, entry.path()))
        .filter(|name| !known.contains(name))
        .collect::<BTreeSet<_>>();

    for entry in entries {
        if entry.is_dir {
            writer
                .add_directory(entry.name.clone(), options)
                .map_err(write_error)?;
            continue;
        }
        write_entry(&mut writer, root, &entry.name, options)?;
    }
    for name in &added {
        write_entry(&mut writer, root, name, options)?;
    }
    writer.finish().map_err(write_error)?;
    Ok(())
}

fn write_entry(
    writer: &mut ZipWriter<File>,
    root: &Path,
    name: &str,
    options: FileOptions,
) -> Result<(), ArchiveError> {
    let path = root.join(name);
    let bytes = fs::read(&path).map_err(io_error(&path))?;
    writer
        .start_file(name, options)
        .map_err(|source| ArchiveError::Write {
            path: path.clone(),
            source,
        })?;
    writer.write_all(&bytes).map_err(io_error(&path))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::tempdir;

    use super::*;
    use crate::drawing::NS_W;

    const W: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/></Types>"#;

    const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/header" Target="header1.xml"/></Relationships>"#;

    fn part(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {W}><w:body>{body}</w:body></w:document>"#
        )
    }

    fn header(body: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:hdr {W}>{body}</w:hdr>"#)
    }

    fn write_docx(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).expect("dir");
            } else {
                writer.start_file(*name, options).expect("start");
                writer.write_all(content.as_bytes()).expect("write");
            }
        }
        let bytes = writer.finish().expect("finish").into_inner();
        fs::write(path, bytes).expect("write docx");
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(File::open(path).expect("open")).expect("zip");
        (0..archive.len())
            .map(|index| {
                let mut entry = archive.by_index(index).expect("entry");
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).expect("read");
                (entry.name().to_string(), bytes)
            })
            .collect()
    }

    fn entry_text(path: &Path, name: &str) -> String {
        read_entries(path)
            .into_iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, bytes)| String::from_utf8(bytes).expect("utf8"))
            .unwrap_or_else(|| panic!("missing entry {name}"))
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save_with_format(path, ImageFormat::Png)
            .expect("png");
    }

    fn template(dir: &Path, document: &str, header_xml: &str) -> PathBuf {
        let path = dir.join("template.docx");
        write_docx(
            &path,
            &[
                (CONTENT_TYPES_PART, CONTENT_TYPES),
                ("word/", ""),
                ("word/document.xml", document),
                ("word/_rels/document.xml.rels", DOCUMENT_RELS),
                ("word/header1.xml", header_xml),
                ("docProps/core.xml", "<core/>"),
            ],
        );
        path
    }

    #[test]
    fn empty_maps_preserve_entries_and_order() {
        let temp = tempdir().expect("tempdir");
        let input = template(
            temp.path(),
            &part("<w:p><w:r><w:t>(1c588)</w:t></w:r></w:p>"),
            &header("<w:p/>"),
        );
        let output = temp.path().join("out.docx");

        let report =
            inject_into_archive(&input, &output, &BTreeMap::new(), &BTreeMap::new()).expect("inject");
        assert!(report.parts_rewritten.is_empty());
        assert_eq!(report.parts_scanned, 2);
        assert_eq!(read_entries(&input), read_entries(&output));
    }

    #[test]
    fn missing_input_is_a_typed_error() {
        let temp = tempdir().expect("tempdir");
        let error = inject_into_archive(
            &temp.path().join("absent.docx"),
            &temp.path().join("out.docx"),
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .expect_err("must fail");
        assert!(matches!(error, ArchiveError::MissingInput(_)));
    }

    #[test]
    fn non_zip_input_is_invalid_archive() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("broken.docx");
        fs::write(&input, b"not a zip").expect("write");
        let error = inject_into_archive(
            &input,
            &temp.path().join("out.docx"),
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .expect_err("must fail");
        assert!(matches!(error, ArchiveError::InvalidArchive { .. }));
    }

    #[test]
    fn text_tokens_are_replaced_in_body_header_and_split_runs() {
        let temp = tempdir().expect("tempdir");
        let input = template(
            temp.path(),
            &part(concat!(
                "<w:p><w:r><w:t>(1c588)</w:t></w:r></w:p>",
                "<w:p><w:r><w:t>(2c</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>588)</w:t></w:r></w:p>"
            )),
            &header("<w:p><w:r><w:t>Date: (date)</w:t></w:r></w:p>"),
        );
        let output = temp.path().join("out.docx");
        let text = BTreeMap::from([
            ("(1c588)".to_string(), "5".to_string()),
            ("(2c588)".to_string(), "0".to_string()),
            ("(date)".to_string(), "2025-11-24".to_string()),
        ]);

        let report = inject_into_archive(&input, &output, &BTreeMap::new(), &text).expect("inject");
        assert_eq!(report.text_replacements, 3);
        assert_eq!(
            report.parts_rewritten,
            vec!["word/document.xml".to_string(), "word/header1.xml".to_string()]
        );

        let document = entry_text(&output, "word/document.xml");
        assert_eq!(visible_text(&document).as_deref(), Some("50"));
        assert!(document.contains("<w:b/>"));
        let header_xml = entry_text(&output, "word/header1.xml");
        assert_eq!(visible_text(&header_xml).as_deref(), Some("Date: 2025-11-24"));
    }

    #[test]
    fn images_get_media_relationships_and_unique_drawing_ids() {
        let temp = tempdir().expect("tempdir");
        let photo = temp.path().join("588.png");
        write_png(&photo, 4, 2);
        let input = template(
            temp.path(),
            &part(concat!(
                "<w:p><w:r><w:t>(pic_</w:t></w:r><w:r><w:t>588)</w:t></w:r></w:p>",
                "<w:p><w:r><w:t>(pic_588)</w:t></w:r></w:p>"
            )),
            &header("<w:p><w:r><w:t>(pic_588)</w:t></w:r></w:p>"),
        );
        let output = temp.path().join("out.docx");
        let images = BTreeMap::from([("(pic_588)".to_string(), Some(photo))]);

        let report = inject_into_archive(&input, &output, &images, &BTreeMap::new()).expect("inject");
        assert_eq!(report.images_injected, 3);
        assert_eq!(report.media_added, vec!["word/media/image001.png".to_string()]);

        let names = read_entries(&output)
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        assert_eq!(&names[..6], &[
            CONTENT_TYPES_PART,
            "word/",
            "word/document.xml",
            "word/_rels/document.xml.rels",
            "word/header1.xml",
            "docProps/core.xml",
        ]);
        assert!(names.contains(&"word/media/image001.png".to_string()));
        assert!(names.contains(&"word/_rels/header1.xml.rels".to_string()));

        let document_rels =
            RelationshipPart::parse(&entry_text(&output, "word/_rels/document.xml.rels")).expect("rels");
        let added = document_rels.entries.last().expect("added");
        assert_eq!(added.id, "rId5");
        assert_eq!(added.target, "media/image001.png");
        let header_rels =
            RelationshipPart::parse(&entry_text(&output, "word/_rels/header1.xml.rels")).expect("rels");
        assert_eq!(header_rels.entries.len(), 1);
        assert_eq!(header_rels.entries[0].id, "rId1");

        let mut ids = Vec::new();
        for name in ["word/document.xml", "word/header1.xml"] {
            let xml = entry_text(&output, name);
            let document = roxmltree::Document::parse(&xml).expect("parse");
            assert!(!visible_text(&xml).expect("text").contains("(pic_588)"));
            assert!(
                document
                    .descendants()
                    .filter(|node| node.has_tag_name((NS_W, "t")))
                    .all(|node| node.children().all(|child| !child.is_element()))
            );
            ids.extend(
                document
                    .descendants()
                    .filter(|node| node.has_tag_name((NS_WP, "docPr")))
                    .filter_map(|node| node.attribute("id").map(str::to_string)),
            );
        }
        let unique = ids.iter().collect::<BTreeSet<_>>();
        assert_eq!(ids.len(), 3);
        assert_eq!(unique.len(), 3);

        let content_types = entry_text(&output, CONTENT_TYPES_PART);
        assert!(content_types.contains(r#"Extension="png""#));
    }

    #[test]
    fn token_split_across_hyperlink_does_not_block_later_occurrences() {
        let temp = tempdir().expect("tempdir");
        let photo = temp.path().join("588.png");
        write_png(&photo, 4, 2);
        let input = template(
            temp.path(),
            &part(concat!(
                "<w:p><w:r><w:t>(pic_</w:t></w:r><w:hyperlink><w:r><w:t>588)</w:t></w:r></w:hyperlink></w:p>",
                "<w:p><w:r><w:t>(pic_588)</w:t></w:r></w:p>",
                "<w:p><w:r><w:t>(da</w:t></w:r><w:hyperlink><w:r><w:t>te)</w:t></w:r></w:hyperlink></w:p>",
                "<w:p><w:r><w:t>(d</w:t></w:r><w:r><w:t>ate)</w:t></w:r></w:p>"
            )),
            &header("<w:p/>"),
        );
        let output = temp.path().join("out.docx");
        let images = BTreeMap::from([("(pic_588)".to_string(), Some(photo))]);
        let text = BTreeMap::from([("(date)".to_string(), "2025-11-24".to_string())]);

        let report = inject_into_archive(&input, &output, &images, &text).expect("inject");
        assert_eq!(report.images_injected, 1);
        assert_eq!(report.text_replacements, 1);
        let document = entry_text(&output, "word/document.xml");
        assert_eq!(
            visible_text(&document).as_deref(),
            Some("(pic_588)(date)2025-11-24")
        );
        assert_eq!(document.matches("<w:drawing>").count(), 1);
    }

    #[test]
    fn missing_image_leaves_token_and_succeeds() {
        let temp = tempdir().expect("tempdir");
        let input = template(
            temp.path(),
            &part("<w:p><w:r><w:t>(shift_1_signin)</w:t></w:r></w:p>"),
            &header("<w:p/>"),
        );
        let output = temp.path().join("out.docx");
        let images = BTreeMap::from([
            (
                "(shift_1_signin)".to_string(),
                Some(temp.path().join("nope.jpg")),
            ),
            ("(shift_2_signout)".to_string(), None),
        ]);

        let report = inject_into_archive(&input, &output, &images, &BTreeMap::new()).expect("inject");
        assert_eq!(report.images_injected, 0);
        assert_eq!(report.images_skipped, vec!["(shift_1_signin)".to_string()]);
        assert!(report.media_added.is_empty());
        assert!(entry_text(&output, "word/document.xml").contains("(shift_1_signin)"));
        assert_eq!(entry_text(&output, CONTENT_TYPES_PART), CONTENT_TYPES);
    }

    #[test]
    fn media_names_skip_existing_files() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("image001.png"), b"x").expect("write");
        assert_eq!(next_media_name(temp.path()), "image002.png");
    }

    #[test]
    fn media_targets_are_relative_to_part_directory() {
        assert_eq!(media_target("word/document.xml", "image001.png"), "media/image001.png");
        assert_eq!(
            media_target("word/glossary/document.xml", "image002.png"),
            "../media/image002.png"
        );
    }

    #[test]
    fn png_default_is_added_once() {
        let updated = with_png_default(CONTENT_TYPES).expect("added");
        assert!(updated.contains(r#"<Default Extension="png" ContentType="image/png"/></Types>"#));
        assert!(with_png_default(&updated).is_none());
    }
}
