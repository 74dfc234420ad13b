use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::split_run::escape_attribute;

pub const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const IMAGE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub kind: String,
    pub target: String,
    pub target_mode: Option<String>,
}

/// Companion `.rels` part of one structural part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipPart {
    pub entries: Vec<Relationship>,
}

impl RelationshipPart {
    pub fn parse(xml: &str) -> Result<Self> {
        let document = roxmltree::Document::parse(xml).context("malformed relationship XML")?;
        let root = document.root_element();
        if root.tag_name().name() != "Relationships" {
            bail!(
                "unexpected relationship root element <{}>",
                root.tag_name().name()
            );
        }

        let mut entries = Vec::new();
        for node in root.children().filter(|node| node.is_element()) {
            if node.tag_name().name() != "Relationship" {
                continue;
            }
            let id = node
                .attribute("Id")
                .ok_or_else(|| anyhow::anyhow!("relationship without Id"))?;
            entries.push(Relationship {
                id: id.to_string(),
                kind: node.attribute("Type").unwrap_or_default().to_string(),
                target: node.attribute("Target").unwrap_or_default().to_string(),
                target_mode: node.attribute("TargetMode").map(str::to_string),
            });
        }
        Ok(Self { entries })
    }

    /// Load `path`, or start an empty collection when the part has none yet.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let xml =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&xml).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Highest numeric `rIdN` suffix plus one.
    pub fn next_id(&self) -> String {
        let highest = self
            .entries
            .iter()
            .filter_map(|entry| entry.id.strip_prefix("rId"))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("rId{}", highest + 1)
    }

    pub fn add(&mut self, kind: &str, target: &str) -> String {
        let id = self.next_id();
        self.entries.push(Relationship {
            id: id.clone(),
            kind: kind.to_string(),
            target: target.to_string(),
            target_mode: None,
        });
        id
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
        );
        out.push_str(&format!("<Relationships xmlns=\"{RELATIONSHIPS_NS}\">"));
        for entry in &self.entries {
            out.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                escape_attribute(&entry.id),
                escape_attribute(&entry.kind),
                escape_attribute(&entry.target)
            ));
            if let Some(mode) = &entry.target_mode {
                out.push_str(&format!(" TargetMode=\"{}\"", escape_attribute(mode)));
            }
            out.push_str("/>");
        }
        out.push_str("</Relationships>");
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_xml()).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// `word/header1.xml` -> `word/_rels/header1.xml.rels`.
pub fn rels_path_for(part: &Path) -> PathBuf {
    let name = part
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = part.parent().unwrap_or_else(|| Path::new(""));
    parent.join("_rels").join(format!("{name}.rels"))
}
