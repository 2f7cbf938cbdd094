//! Configuration types for annotation extraction and classification.
//!
//! Every knob lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Collaborators that talk to the outside world
//! (LLM provider, classifier, rasteriser, progress callback) can be injected
//! pre-built; when they are absent the pipeline constructs the defaults.

use crate::error::AnnotError;
use crate::pipeline::classify::Classifier;
use crate::pipeline::render::PageRasterizer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one extraction request.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_annotations::{ExtractionConfig, OrphanPolicy};
///
/// let config = ExtractionConfig::builder()
///     .padding(80)
///     .concurrency(4)
///     .orphan_policy(OrphanPolicy::Promote)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Pixels added above and below an annotation's rectangle when cropping.
    /// Default: 100.
    pub padding: u32,

    /// Classification calls in flight at once. Default: 1 (strictly sequential).
    ///
    /// Results are always applied in record order, whatever the value.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses "gpt-4.1-nano" for named providers.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed classifier. Takes precedence over every provider setting.
    pub classifier: Option<Arc<dyn Classifier>>,

    /// Pre-constructed rasteriser. Default: pdfium.
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,

    /// Sampling temperature for the classification call. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the model may generate per record. Default: 50.
    ///
    /// The answer is a two-field JSON object.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed classification call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in label prompt.
    pub system_prompt: Option<String>,

    /// What to do with a reply whose target is not a record. Default: Drop.
    pub orphan_policy: OrphanPolicy,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium library (file or directory). Falls back to
    /// `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Skip the classification pass entirely. Default: false.
    pub skip_classification: bool,

    /// Per-record classification events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            padding: 100,
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            classifier: None,
            rasterizer: None,
            temperature: 0.7,
            max_tokens: 50,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            orphan_policy: OrphanPolicy::default(),
            password: None,
            pdfium_library_path: None,
            download_timeout_secs: 120,
            skip_classification: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("padding", &self.padding)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("classifier", &self.classifier.as_ref().map(|_| "<dyn Classifier>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("orphan_policy", &self.orphan_policy)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("skip_classification", &self.skip_classification)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn padding(mut self, px: u32) -> Self {
        self.config.padding = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.config.classifier = Some(classifier);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.config.orphan_policy = policy;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn skip_classification(mut self, v: bool) -> Self {
        self.config.skip_classification = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, AnnotError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(AnnotError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(AnnotError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.padding > 10_000 {
            return Err(AnnotError::InvalidConfig(format!(
                "Padding must be ≤ 10000 px, got {}",
                c.padding
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Policy for a reply whose in-reply-to target is not a registered record.
///
/// This happens when the annotation being replied to has no `/Contents`
/// (so it was never extracted), or when `/IRT` points at an annotation on a
/// page that does not list it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrphanPolicy {
    /// Skip the reply, log a warning, and list it in
    /// [`crate::output::AnnotationSet::orphaned_replies`]. (default)
    #[default]
    Drop,
    /// Treat the reply as a primary annotation with its own record.
    Promote,
    /// Abort the extraction with [`AnnotError::OrphanedReply`].
    Fail,
}

impl std::str::FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(OrphanPolicy::Drop),
            "promote" => Ok(OrphanPolicy::Promote),
            "fail" => Ok(OrphanPolicy::Fail),
            other => Err(format!(
                "unknown orphan policy '{other}' (expected drop, promote or fail)"
            )),
        }
    }
}
