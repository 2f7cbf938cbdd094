//! File exports of an [`AnnotationSet`]: CSV, spreadsheet and JSON.
//!
//! Every format is rendered to bytes first and then written atomically
//! (temp file + rename), so a failed export never leaves a half-written file
//! next to the good ones.

pub mod csv;
pub mod json;
pub mod xlsx;

use crate::error::ExportError;
use crate::output::AnnotationSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// One file export target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Json,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Csv, ExportFormat::Xlsx, ExportFormat::Json];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{other}' (expected csv, xlsx or json)")),
        }
    }
}

/// Render `set` in `format`.
pub fn render(set: &AnnotationSet, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => Ok(csv::to_csv(&set.to_table()).into_bytes()),
        ExportFormat::Xlsx => xlsx::to_xlsx(&set.to_table()),
        ExportFormat::Json => Ok(json::to_json(&set.records)?.into_bytes()),
    }
}

/// `<dir>/<stem>.<ext>`, where the stem is the source name without its
/// `.pdf` extension.
pub fn output_path(dir: &Path, source_name: &str, format: ExportFormat) -> PathBuf {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "annotations".to_string());
    dir.join(format!("{stem}.{}", format.extension()))
}

/// Render `set` and write it to `path` atomically.
pub async fn write_export(
    set: &AnnotationSet,
    format: ExportFormat,
    path: &Path,
) -> Result<(), ExportError> {
    let bytes = render(set, format)?;

    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let tmp_path = path.with_extension(format!("{}.tmp", format.extension()));
    tokio::fs::write(&tmp_path, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
