//! Input resolution: load a user-supplied path or URL into memory.
//!
//! Both the annotation walk (lopdf) and the rasteriser (pdfium) read from a
//! byte slice, so the whole document is loaded once and shared. The PDF
//! magic bytes (`%PDF`) are checked up front so callers get a meaningful
//! error rather than a parser failure deep inside lopdf.

use crate::error::AnnotError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded PDF and a human-readable name for it.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    pub bytes: Vec<u8>,
    /// File name (local) or last URL path segment; used in errors and exports.
    pub source_name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` from disk or over HTTP(S).
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, AnnotError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Reject anything that does not start with `%PDF`.
pub fn check_magic(bytes: &[u8], source_name: &str) -> Result<(), AnnotError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(AnnotError::NotAPdf {
            source_name: source_name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<LoadedInput, AnnotError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(AnnotError::PermissionDenied { path });
        }
        Err(_) => return Err(AnnotError::FileNotFound { path }),
    };

    let source_name = file_name(&path);
    check_magic(&bytes, &source_name)?;

    debug!("Loaded local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedInput { bytes, source_name })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, AnnotError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AnnotError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            AnnotError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            AnnotError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(AnnotError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AnnotError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    let source_name = url_file_name(url);
    check_magic(&bytes, &source_name)?;

    info!("Downloaded {} ({} bytes)", source_name, bytes.len());
    Ok(LoadedInput { bytes, source_name })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Last path segment of `url` if it looks like a file name.
fn url_file_name(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn magic_check() {
        assert!(check_magic(b"%PDF-1.7\n", "a.pdf").is_ok());
        let err = check_magic(b"PK\x03\x04", "a.docx").unwrap_err();
        assert!(matches!(err, AnnotError::NotAPdf { ref magic, .. } if magic == b"PK\x03\x04"));
        assert!(check_magic(b"%P", "short").is_err());
    }

    #[test]
    fn url_names() {
        assert_eq!(url_file_name("https://x.test/files/review.pdf?dl=1"), "review.pdf");
        assert_eq!(url_file_name("https://x.test/download/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, AnnotError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, AnnotError::NotAPdf { ref source_name, .. } if source_name == "notes.txt"));
    }
}
