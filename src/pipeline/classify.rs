//! Classification driver: one labelling call per record, failures isolated.
//!
//! [`Classifier`] is the seam between the pipeline and whatever answers the
//! question "is this a Content or UI defect, a Change or a Bug?".
//! [`LlmClassifier`] asks an `edgequake-llm` provider; the gateway client in
//! [`crate::gateway`] speaks the HTTP envelope of a hosted model gateway.
//!
//! ## Retry Strategy
//!
//! Transport failures are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). A model answer that parses but carries
//! an unknown label is not retried: asking again at temperature 0.7 rarely
//! fixes a vocabulary problem and doubles the cost.

use crate::config::ExtractionConfig;
use crate::error::ClassificationError;
use crate::output::{AnnotationRecord, DefectType, Nature};
use crate::pipeline::{encode, labels};
use crate::prompts::{record_text, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Everything a classifier needs for one record.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub record_id: u32,
    pub system_prompt: String,
    /// `"<authors>,<contents>"` as built by [`record_text`].
    pub text: String,
    /// The record's crop as a base64 PNG.
    pub image_base64: String,
}

impl ClassificationRequest {
    /// Build the request for `record`, using `system_prompt` or the built-in one.
    pub fn for_record(record: &AnnotationRecord, system_prompt: Option<&str>) -> Self {
        Self {
            record_id: record.id,
            system_prompt: system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string(),
            text: record_text(&record.authors, &record.contents),
            image_base64: record.image.clone(),
        }
    }
}

/// Labels for one record plus the token usage it cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Labels {
    pub nature: Nature,
    pub defect_type: DefectType,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of classifying one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Success(Labels),
    Error(ClassificationError),
}

/// Labels a single record. Implementations never panic on bad input; every
/// failure comes back as [`ClassificationOutcome::Error`].
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> ClassificationOutcome;
}

/// Classifier backed by an `edgequake-llm` vision provider.
pub struct LlmClassifier {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    /// Message layout: the label prompt as system message, then one user
    /// message carrying the author/content text and the crop.
    async fn classify(&self, request: &ClassificationRequest) -> ClassificationOutcome {
        let record_id = request.record_id;
        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user_with_images(
                &request.text,
                vec![encode::to_image_data(&request.image_base64)],
            ),
        ];
        let options = build_options(self.temperature, self.max_tokens);

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Record {}: retry {}/{} after {}ms",
                    record_id, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Record {}: {} input tokens, {} output tokens",
                        record_id, response.prompt_tokens, response.completion_tokens
                    );
                    return match labels::parse_labels(record_id, &response.content) {
                        Ok(pair) => ClassificationOutcome::Success(Labels {
                            nature: pair.nature,
                            defect_type: pair.defect_type,
                            input_tokens: response.prompt_tokens as u64,
                            output_tokens: response.completion_tokens as u64,
                        }),
                        Err(e) => ClassificationOutcome::Error(e),
                    };
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Record {}: attempt {} failed: {}", record_id, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        ClassificationOutcome::Error(ClassificationError::RequestFailed {
            record_id,
            attempts: self.max_retries + 1,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Totals from one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationSummary {
    pub classified: usize,
    pub errors: Vec<ClassificationError>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Classify every record, writing labels in place.
///
/// At most `config.concurrency` requests are in flight; outcomes are applied
/// in record order. A failed record keeps `nature`/`defect_type` unset and
/// its error is returned in the summary; the pass always runs to the end.
pub async fn classify_all(
    records: &mut [AnnotationRecord],
    classifier: Arc<dyn Classifier>,
    config: &ExtractionConfig,
) -> ClassificationSummary {
    let total = records.len();
    info!("Classifying {} records (concurrency {})", total, config.concurrency);

    if let Some(ref cb) = config.progress_callback {
        cb.on_classification_start(total);
    }

    let requests: Vec<ClassificationRequest> = records
        .iter()
        .map(|r| ClassificationRequest::for_record(r, config.system_prompt.as_deref()))
        .collect();

    let outcomes: Vec<ClassificationOutcome> = stream::iter(requests.into_iter().map(|request| {
        let classifier = Arc::clone(&classifier);
        let callback = config.progress_callback.clone();
        async move {
            if let Some(ref cb) = callback {
                cb.on_record_start(request.record_id, total);
            }
            let outcome = classifier.classify(&request).await;
            if let Some(ref cb) = callback {
                match &outcome {
                    ClassificationOutcome::Success(_) => cb.on_record_complete(request.record_id, total),
                    ClassificationOutcome::Error(e) => {
                        cb.on_record_error(request.record_id, total, &e.to_string())
                    }
                }
            }
            outcome
        }
    }))
    .buffered(config.concurrency.max(1))
    .collect()
    .await;

    let mut summary = ClassificationSummary::default();
    for (record, outcome) in records.iter_mut().zip(outcomes) {
        match outcome {
            ClassificationOutcome::Success(labels) => {
                record.nature = Some(labels.nature);
                record.defect_type = Some(labels.defect_type);
                summary.classified += 1;
                summary.input_tokens += labels.input_tokens;
                summary.output_tokens += labels.output_tokens;
            }
            ClassificationOutcome::Error(e) => {
                warn!("{}", e);
                record.nature = None;
                record.defect_type = None;
                summary.errors.push(e);
            }
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_classification_complete(total, summary.classified);
    }
    info!(
        "Classification done: {}/{} labelled, {} failed",
        summary.classified,
        total,
        summary.errors.len()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Rect;
    use std::sync::Mutex;

    fn record(id: u32) -> AnnotationRecord {
        AnnotationRecord {
            id,
            page: 1,
            contents: vec![format!("comment {id}")],
            authors: vec!["Alice".into()],
            coordinates: Rect::new(0.0, 0.0, 1.0, 1.0),
            image: "aGVsbG8=".into(),
            nature: None,
            defect_type: None,
        }
    }

    /// Labels odd ids UI/Bug, fails even ids; remembers call order.
    #[derive(Default)]
    struct OddEven {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Classifier for OddEven {
        async fn classify(&self, request: &ClassificationRequest) -> ClassificationOutcome {
            self.seen.lock().unwrap().push(request.record_id);
            if request.record_id % 2 == 1 {
                ClassificationOutcome::Success(Labels {
                    nature: Nature::Ui,
                    defect_type: DefectType::Bug,
                    input_tokens: 10,
                    output_tokens: 2,
                })
            } else {
                ClassificationOutcome::Error(ClassificationError::MalformedResponse {
                    record_id: request.record_id,
                    detail: "no JSON".into(),
                })
            }
        }
    }

    #[test]
    fn request_carries_text_and_image() {
        let mut r = record(3);
        r.authors.push("Bob".into());
        r.contents.push("agreed".into());
        let req = ClassificationRequest::for_record(&r, None);
        assert_eq!(req.record_id, 3);
        assert_eq!(req.text, r#"["Alice", "Bob"],["comment 3", "agreed"]"#);
        assert_eq!(req.image_base64, "aGVsbG8=");
        assert_eq!(req.system_prompt, DEFAULT_SYSTEM_PROMPT);

        let custom = ClassificationRequest::for_record(&r, Some("label it"));
        assert_eq!(custom.system_prompt, "label it");
    }

    #[tokio::test]
    async fn failures_are_isolated_per_record() {
        let mut records: Vec<_> = (1..=4).map(record).collect();
        let classifier = Arc::new(OddEven::default());
        let summary = classify_all(&mut records, classifier.clone(), &ExtractionConfig::default()).await;

        assert_eq!(summary.classified, 2);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.input_tokens, 20);
        assert_eq!(records[0].nature, Some(Nature::Ui));
        assert_eq!(records[1].nature, None);
        assert_eq!(records[2].defect_type, Some(DefectType::Bug));
        assert_eq!(records[3].defect_type, None);
        assert_eq!(*classifier.seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concurrent_dispatch_applies_in_record_order() {
        let mut records: Vec<_> = (1..=6).map(record).collect();
        let config = ExtractionConfig::builder().concurrency(3).build().unwrap();
        let summary = classify_all(&mut records, Arc::new(OddEven::default()), &config).await;

        let failed: Vec<u32> = summary.errors.iter().map(|e| e.record_id()).collect();
        assert_eq!(failed, vec![2, 4, 6]);
        for r in &records {
            assert_eq!(r.nature.is_some(), r.id % 2 == 1);
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, Some(50));
    }
}
