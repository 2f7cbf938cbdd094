//! Output types: the annotation record set and its tabular projection.
//!
//! [`AnnotationSet`] is the per-request context object. One extraction call
//! creates it, the caller owns it, and nothing is cached between requests.

use crate::error::ClassificationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column headers of the tabular projection, in export order.
pub const TABLE_COLUMNS: [&str; 8] = [
    "Annotation ID",
    "Image",
    "Page",
    "Content",
    "Author",
    "Coordinates",
    "Nature",
    "Type",
];

/// Prefix turning a base64 PNG into an embeddable data URI.
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// An axis-aligned rectangle in PDF user space (origin bottom-left).
///
/// Serialised as the four-element array `[x0, y0, x1, y1]`, the same layout
/// as the PDF `/Rect` entry it comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

impl From<[f64; 4]> for Rect {
    fn from(a: [f64; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }
}

impl From<Rect> for [f64; 4] {
    fn from(r: Rect) -> Self {
        r.to_array()
    }
}

/// What part of the product a defect concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    Content,
    #[serde(rename = "UI")]
    Ui,
}

impl Nature {
    pub fn as_str(self) -> &'static str {
        match self {
            Nature::Content => "Content",
            Nature::Ui => "UI",
        }
    }
}

impl fmt::Display for Nature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Nature {
    type Err = String;

    /// Accepts the short labels and the long forms used in the prompt
    /// ("Content Defect", "UI Defect"), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" | "content defect" => Ok(Nature::Content),
            "ui" | "ui defect" => Ok(Nature::Ui),
            other => Err(other.to_string()),
        }
    }
}

/// Whether a defect is a change request or a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefectType {
    Change,
    Bug,
}

impl DefectType {
    pub fn as_str(self) -> &'static str {
        match self {
            DefectType::Change => "Change",
            DefectType::Bug => "Bug",
        }
    }
}

impl fmt::Display for DefectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "change" | "change request" => Ok(DefectType::Change),
            "bug" => Ok(DefectType::Bug),
            other => Err(other.to_string()),
        }
    }
}

/// One primary annotation plus every reply merged into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// 1-based, contiguous, in document encounter order.
    pub id: u32,
    /// 1-based page of the primary annotation.
    pub page: usize,
    /// Original text first, then replies in encounter order.
    pub contents: Vec<String>,
    /// Parallel to `contents`.
    pub authors: Vec<String>,
    /// Rectangle of the primary annotation, PDF user space.
    pub coordinates: Rect,
    /// Base64 PNG of the padded page strip around the annotation.
    pub image: String,
    #[serde(default)]
    pub nature: Option<Nature>,
    #[serde(rename = "type", default)]
    pub defect_type: Option<DefectType>,
}

impl AnnotationRecord {
    /// Number of replies merged into this record.
    pub fn reply_count(&self) -> usize {
        self.contents.len().saturating_sub(1)
    }

    /// Normalised table row for this record.
    pub fn to_row(&self) -> TableRow {
        TableRow {
            annotation_id: self.id,
            image: format!("{}{}", PNG_DATA_URI_PREFIX, self.image),
            page: self.page,
            content: join_paragraphs(&self.contents),
            author: join_paragraphs(&self.authors),
            coordinates: self
                .coordinates
                .to_array()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
            nature: self.nature.map(|n| n.to_string()).unwrap_or_default(),
            defect_type: self.defect_type.map(|t| t.to_string()).unwrap_or_default(),
        }
    }
}

/// Each entry followed by a blank line, so multi-reply cells read as paragraphs.
fn join_paragraphs(items: &[String]) -> String {
    items.iter().map(|s| format!("{s}\n\n")).collect()
}

/// One row of the tabular projection; every column rendered as display text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub annotation_id: u32,
    /// `data:image/png;base64,…`
    pub image: String,
    pub page: usize,
    pub content: String,
    pub author: String,
    pub coordinates: String,
    /// Empty when unclassified.
    pub nature: String,
    /// Empty when unclassified.
    pub defect_type: String,
}

/// A reply whose target never became a record, kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedReply {
    pub page: usize,
    pub content: String,
    pub author: String,
    pub rect: Rect,
}

/// Counters collected across one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub page_count: usize,
    pub primary_annotations: usize,
    pub replies_merged: usize,
    pub orphaned_replies: usize,
    /// Annotations without `/Contents` or with an unreadable `/Rect`.
    pub skipped_annotations: usize,
    pub classified: usize,
    pub classification_failures: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub classify_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The complete result of one extraction request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationSet {
    /// File stem or URL segment the PDF came from; used to name exports.
    pub source_name: String,
    /// Records in ascending id order.
    pub records: Vec<AnnotationRecord>,
    pub orphaned_replies: Vec<OrphanedReply>,
    /// Per-record classification failures from the last classification pass.
    pub classification_errors: Vec<ClassificationError>,
    pub stats: ExtractionStats,
}

impl AnnotationSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&AnnotationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// The normalised tabular projection, sorted by ascending id.
    ///
    /// Pure: calling it twice on the same set yields identical rows.
    pub fn to_table(&self) -> Vec<TableRow> {
        let mut rows: Vec<TableRow> = self.records.iter().map(AnnotationRecord::to_row).collect();
        rows.sort_by_key(|r| r.annotation_id);
        rows
    }

    /// Records carrying the given nature label, ascending id.
    pub fn with_nature(&self, nature: Nature) -> Vec<&AnnotationRecord> {
        self.records
            .iter()
            .filter(|r| r.nature == Some(nature))
            .collect()
    }
}
