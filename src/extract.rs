//! Extraction and classification entry points.
//!
//! [`extract`] produces the record set without touching a language model;
//! [`classify_records`] labels an existing set in place; [`analyze`] does
//! both. Each call owns its [`AnnotationSet`] and nothing survives between
//! calls.

use crate::config::ExtractionConfig;
use crate::error::AnnotError;
use crate::output::{AnnotationSet, ExtractionStats};
use crate::pipeline::classify::{self, Classifier, LlmClassifier};
use crate::pipeline::render::{self, PageRasterizer, PdfiumRasterizer};
use crate::pipeline::{assemble, input, walk};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Extract the annotation records of a PDF file or URL.
///
/// # Errors
/// Returns `Err(AnnotError)` only for fatal errors: unreadable input, a PDF
/// that cannot be parsed or rasterised, or an orphaned reply under
/// [`crate::OrphanPolicy::Fail`].
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<AnnotationSet, AnnotError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let loaded = input::resolve_input(input_str, config.download_timeout_secs).await?;
    extract_from_bytes(loaded.bytes, &loaded.source_name, config).await
}

/// Extract the annotation records of an in-memory PDF.
///
/// # Example
/// ```rust,no_run
/// use edgequake_annotations::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("review.pdf")?;
/// let set = extract_from_bytes(bytes, "review.pdf", &ExtractionConfig::default()).await?;
/// for record in &set.records {
///     println!("#{} p{}: {:?}", record.id, record.page, record.contents);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: Vec<u8>,
    source_name: &str,
    config: &ExtractionConfig,
) -> Result<AnnotationSet, AnnotError> {
    let total_start = Instant::now();
    input::check_magic(&bytes, source_name)?;

    // ── Step 1: Walk annotations ─────────────────────────────────────────
    let walked = walk::walk_document(&bytes, source_name, config.password.as_deref())?;
    let page_count = walked.pages.len();

    // ── Step 2: Rasterise pages ──────────────────────────────────────────
    // A document without content annotations needs no page images.
    let render_start = Instant::now();
    let page_images = if walked.annotations.is_empty() {
        debug!("No content annotations, skipping rasterisation");
        Vec::new()
    } else {
        let rasterizer = resolve_rasterizer(config);
        render::rasterize_blocking(rasterizer, Arc::new(bytes), walked.pages.clone())
            .await
            .map_err(|e| match e {
                AnnotError::PasswordRequired { .. } => AnnotError::PasswordRequired {
                    source_name: source_name.to_string(),
                },
                other => other,
            })?
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 3: Assemble records ─────────────────────────────────────────
    let assembled = if walked.annotations.is_empty() {
        assemble::Assembled::default()
    } else {
        assemble::assemble_records(&walked, &page_images, config)?
    };

    let stats = ExtractionStats {
        page_count,
        primary_annotations: assembled.records.len(),
        replies_merged: assembled.replies_merged,
        orphaned_replies: assembled.orphaned_replies.len(),
        skipped_annotations: walked.skipped,
        render_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        ..Default::default()
    };

    info!(
        "Extraction complete: {} records, {} replies merged, {} orphaned, {}ms",
        stats.primary_annotations, stats.replies_merged, stats.orphaned_replies, stats.total_duration_ms
    );

    Ok(AnnotationSet {
        source_name: source_name.to_string(),
        records: assembled.records,
        orphaned_replies: assembled.orphaned_replies,
        classification_errors: Vec::new(),
        stats,
    })
}

/// Label every record of `set` in place.
///
/// Per-record failures do not fail the call: they are stored in
/// `set.classification_errors` and the record's labels stay unset.
///
/// # Errors
/// Only when no classifier can be constructed.
pub async fn classify_records(
    set: &mut AnnotationSet,
    config: &ExtractionConfig,
) -> Result<(), AnnotError> {
    let classifier = resolve_classifier(config).await?;
    let start = Instant::now();
    let summary = classify::classify_all(&mut set.records, classifier, config).await;

    set.stats.classified = summary.classified;
    set.stats.classification_failures = summary.errors.len();
    set.stats.total_input_tokens = summary.input_tokens;
    set.stats.total_output_tokens = summary.output_tokens;
    set.stats.classify_duration_ms = start.elapsed().as_millis() as u64;
    set.stats.total_duration_ms += set.stats.classify_duration_ms;
    set.classification_errors = summary.errors;
    Ok(())
}

/// Extract and, unless `config.skip_classification` is set, classify.
pub async fn analyze(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<AnnotationSet, AnnotError> {
    let mut set = extract(input_str, config).await?;
    if !config.skip_classification && !set.is_empty() {
        classify_records(&mut set, config).await?;
    }
    Ok(set)
}

/// [`analyze`] for an in-memory PDF.
pub async fn analyze_bytes(
    bytes: Vec<u8>,
    source_name: &str,
    config: &ExtractionConfig,
) -> Result<AnnotationSet, AnnotError> {
    let mut set = extract_from_bytes(bytes, source_name, config).await?;
    if !config.skip_classification && !set.is_empty() {
        classify_records(&mut set, config).await?;
    }
    Ok(set)
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<AnnotationSet, AnnotError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnnotError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(input_str, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn resolve_rasterizer(config: &ExtractionConfig) -> Arc<dyn PageRasterizer> {
    match config.rasterizer {
        Some(ref r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer::new(
            config.pdfium_library_path.clone(),
            config.password.clone(),
        )),
    }
}

/// A pre-built classifier wins; otherwise wrap the resolved LLM provider.
pub async fn resolve_classifier(config: &ExtractionConfig) -> Result<Arc<dyn Classifier>, AnnotError> {
    if let Some(ref classifier) = config.classifier {
        return Ok(Arc::clone(classifier));
    }
    let provider = resolve_provider(config).await?;
    Ok(Arc::new(LlmClassifier::new(provider, config)))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AnnotError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AnnotError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
async fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, AnnotError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnnotError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, configure a provider, \
                or use the gateway classifier.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
