//! # edgequake-annotations
//!
//! Extract reviewer annotations from PDFs, label them with a Vision Language
//! Model, and export them as CSV, spreadsheet, JSON or Jira tickets.
//!
//! ## Why this crate?
//!
//! User-acceptance reviews often come back as a marked-up PDF: dozens of
//! sticky notes, each with a reply thread, scattered over many pages.
//! Turning that into a defect list by hand means copying every comment,
//! screenshotting the region it points at, and deciding whether it is a
//! content or a UI problem. This crate reads the annotation objects
//! directly, crops the page strip each one refers to, merges replies into
//! the comment they answer, and asks a VLM to label each defect.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     load local file or download from URL
//!  ├─ 2. Walk      /Annots per page via lopdf (contents, author, /Rect, /IRT)
//!  ├─ 3. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Assemble  ids 1..N, merge replies, crop + base64 PNG per record
//!  ├─ 5. Classify  Content/UI × Change/Bug per record (failures isolated)
//!  └─ 6. Export    CSV · XLSX · JSON · Jira Story + Sub-tasks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_annotations::{analyze, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let set = analyze("review.pdf", &config).await?;
//!     for row in set.to_table() {
//!         println!("#{} p{} [{} / {}] {}", row.annotation_id, row.page,
//!             row.nature, row.defect_type, row.content.trim_end());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfannot` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-annotations = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod gateway;
pub mod jira;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, OrphanPolicy};
pub use error::{AnnotError, ClassificationError, ExportError};
pub use export::ExportFormat;
pub use extract::{analyze, analyze_bytes, analyze_sync, classify_records, extract, extract_from_bytes};
pub use gateway::{GatewayClassifier, GatewayConfig};
pub use jira::{export_to_jira, JiraConfig};
pub use output::{
    AnnotationRecord, AnnotationSet, DefectType, ExtractionStats, Nature, OrphanedReply, Rect, TableRow,
};
pub use pipeline::classify::{ClassificationOutcome, ClassificationRequest, Classifier, Labels, LlmClassifier};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{ClassificationProgressCallback, NoopProgressCallback, ProgressCallback};
