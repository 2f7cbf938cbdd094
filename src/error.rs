//! Error types for the edgequake-annotations library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`AnnotError`]: **Fatal** to one extraction request: the PDF cannot be
//!   read, a page cannot be rasterised, or the configuration is invalid.
//!   Returned as `Err(AnnotError)` from the top-level `extract*` / `analyze*`
//!   functions.
//!
//! * [`ClassificationError`]: **Non-fatal**: a single record could not be
//!   classified. The record keeps `nature` / `type` unset and the batch moves
//!   on to the next record.
//!
//! * [`ExportError`]: fatal to **one export target** only (CSV, spreadsheet,
//!   JSON or Jira). The extracted records and the other targets are untouched.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum AnnotError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("'{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { source_name: String, detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rasteriser and the annotation walker disagree on the page count.
    #[error("Rasteriser produced {rendered} page images but the document has {expected} pages")]
    PageCountMismatch { expected: usize, rendered: usize },

    /// A cropped annotation region could not be PNG-encoded.
    #[error("Failed to encode the crop for the annotation on page {page}: {detail}")]
    ImageEncodingFailed { page: usize, detail: String },

    // ── Correlation errors ────────────────────────────────────────────────
    /// A reply points at an annotation that never became a record.
    ///
    /// Only returned under [`crate::config::OrphanPolicy::Fail`].
    #[error("Reply on page {page} ('{content}') refers to an annotation that is not a registered record")]
    OrphanedReply { page: usize, content: String },

    // ── Classifier errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib) to use an\n\
existing copy, or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal classification failure for a single record.
///
/// The record's labels stay unset; every other record is unaffected.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ClassificationError {
    /// The request failed after all retries.
    #[error("record {record_id}: classification request failed after {attempts} attempts: {detail}")]
    RequestFailed {
        record_id: u32,
        attempts: u32,
        detail: String,
    },

    /// No access token could be obtained for the classification service.
    #[error("record {record_id}: not authenticated with the classification service: {detail}")]
    Unauthenticated { record_id: u32, detail: String },

    /// The service answered with a non-success status.
    #[error("record {record_id}: classification service returned status '{status}': {detail}")]
    ServiceError {
        record_id: u32,
        status: String,
        detail: String,
    },

    /// The model output did not contain a usable JSON object.
    #[error("record {record_id}: malformed model output: {detail}")]
    MalformedResponse { record_id: u32, detail: String },

    /// The model answered with a label outside the fixed vocabulary.
    #[error("record {record_id}: unknown {field} label '{value}'")]
    UnknownLabel {
        record_id: u32,
        field: String,
        value: String,
    },
}

impl ClassificationError {
    /// The record this failure belongs to.
    pub fn record_id(&self) -> u32 {
        match self {
            ClassificationError::RequestFailed { record_id, .. }
            | ClassificationError::Unauthenticated { record_id, .. }
            | ClassificationError::ServiceError { record_id, .. }
            | ClassificationError::MalformedResponse { record_id, .. }
            | ClassificationError::UnknownLabel { record_id, .. } => *record_id,
        }
    }
}

/// Failure of a single export target.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Required environment variables for an external service are not set.
    #[error("{service} credentials are not set: missing {missing}")]
    MissingCredentials { service: String, missing: String },

    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("{service} request failed: {source}")]
    Http {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with an unexpected HTTP status.
    #[error("{service} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        service: String,
        status: u16,
        body: String,
    },

    /// Building the workbook failed.
    #[error("Spreadsheet export failed: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    /// JSON (de)serialisation failed.
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A record image is not valid base64 / PNG.
    #[error("Record {record_id} has an unreadable image: {detail}")]
    Image { record_id: u32, detail: String },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
