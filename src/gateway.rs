//! Classification through a hosted model gateway.
//!
//! The gateway fronts the model behind an OAuth2 client-credentials token
//! and its own JSON envelope: the request carries Anthropic-style content
//! blocks, the response wraps the model text in `{status, result, …}`.
//! A token is fetched on first use and reused for the rest of the batch; if
//! it cannot be obtained, each record fails with
//! [`ClassificationError::Unauthenticated`] instead of aborting the run.

use crate::config::ExtractionConfig;
use crate::error::{AnnotError, ClassificationError};
use crate::pipeline::classify::{ClassificationOutcome, ClassificationRequest, Classifier, Labels};
use crate::pipeline::labels::parse_labels;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Model used when `GATEWAY_MODEL` is not set.
pub const DEFAULT_GATEWAY_MODEL: &str = "anthropic.claude-3-5-sonnet-v2:0";

/// Gateway endpoints and client credentials.
#[derive(Clone)]
pub struct GatewayConfig {
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_endpoint: String,
    pub model: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("auth_url", &self.auth_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_endpoint", &self.api_endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl GatewayConfig {
    /// Read `GATEWAY_AUTH_URL`, `GATEWAY_CLIENT_ID`, `GATEWAY_CLIENT_SECRET`,
    /// `GATEWAY_API_ENDPOINT` and the optional `GATEWAY_MODEL`.
    pub fn from_env() -> Result<Self, AnnotError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnnotError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = [
            "GATEWAY_AUTH_URL",
            "GATEWAY_CLIENT_ID",
            "GATEWAY_CLIENT_SECRET",
            "GATEWAY_API_ENDPOINT",
        ];
        let missing: Vec<&str> = required.iter().copied().filter(|k| get(k).is_none()).collect();
        if !missing.is_empty() {
            return Err(AnnotError::ProviderNotConfigured {
                provider: "gateway".to_string(),
                hint: format!("Set {} (a .env file works).", missing.join(", ")),
            });
        }

        Ok(Self {
            auth_url: get("GATEWAY_AUTH_URL").unwrap_or_default(),
            client_id: get("GATEWAY_CLIENT_ID").unwrap_or_default(),
            client_secret: get("GATEWAY_CLIENT_SECRET").unwrap_or_default(),
            api_endpoint: get("GATEWAY_API_ENDPOINT").unwrap_or_default(),
            model: get("GATEWAY_MODEL").unwrap_or_else(|| DEFAULT_GATEWAY_MODEL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    status: Option<String>,
    result: Option<Value>,
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

/// [`Classifier`] speaking the gateway's HTTP envelope.
pub struct GatewayClassifier {
    client: reqwest::Client,
    config: GatewayConfig,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    token: Mutex<Option<String>>,
}

impl GatewayClassifier {
    pub fn new(config: GatewayConfig, extraction: &ExtractionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            temperature: extraction.temperature,
            max_tokens: extraction.max_tokens,
            max_retries: extraction.max_retries,
            retry_backoff_ms: extraction.retry_backoff_ms,
            token: Mutex::new(None),
        }
    }

    /// The cached bearer token, fetching one if none is held.
    async fn bearer_token(&self) -> Result<String, String> {
        let mut guard = self.token.lock().await;
        if let Some(ref token) = *guard {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let body: TokenResponse = response.json().await.map_err(|e| e.to_string())?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "token response has no access_token".to_string())?;

        info!("Obtained gateway access token");
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Request body for one record.
    pub fn build_payload(&self, request: &ClassificationRequest) -> Value {
        json!({
            "max_tokens": self.max_tokens,
            "model": self.config.model,
            "stream": false,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.text },
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": "image/png",
                                "data": request.image_base64,
                            }
                        }
                    ]
                }
            ]
        })
    }

    async fn send(&self, token: &str, payload: &Value) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(&self.config.api_endpoint)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
    }
}

/// Turn a decoded gateway response into an outcome for `record_id`.
fn interpret(record_id: u32, body: GatewayResponse) -> ClassificationOutcome {
    let status = body.status.unwrap_or_default();
    let text = match body.result {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };

    if status != "success" {
        return ClassificationOutcome::Error(ClassificationError::ServiceError {
            record_id,
            status,
            detail: text,
        });
    }

    match parse_labels(record_id, &text) {
        Ok(pair) => ClassificationOutcome::Success(Labels {
            nature: pair.nature,
            defect_type: pair.defect_type,
            input_tokens: body.prompt_tokens.unwrap_or(0),
            output_tokens: body.completion_tokens.unwrap_or(0),
        }),
        Err(e) => ClassificationOutcome::Error(e),
    }
}

#[async_trait]
impl Classifier for GatewayClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> ClassificationOutcome {
        let record_id = request.record_id;
        let token = match self.bearer_token().await {
            Ok(t) => t,
            Err(detail) => {
                warn!("Record {}: no gateway token: {}", record_id, detail);
                return ClassificationOutcome::Error(ClassificationError::Unauthenticated {
                    record_id,
                    detail,
                });
            }
        };

        let payload = self.build_payload(request);
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

            let response = match self.send(&token, &payload).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Record {}: attempt {} failed: {}", record_id, attempt + 1, e);
                    last_err = Some(e.to_string());
                    continue;
                }
            };

            let http_status = response.status();
            if http_status.is_server_error() || http_status.as_u16() == 429 {
                warn!("Record {}: attempt {} got HTTP {}", record_id, attempt + 1, http_status);
                last_err = Some(format!("HTTP {http_status}"));
                continue;
            }
            if !http_status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return ClassificationOutcome::Error(ClassificationError::ServiceError {
                    record_id,
                    status: http_status.as_u16().to_string(),
                    detail: body,
                });
            }

            return match response.json::<GatewayResponse>().await {
                Ok(body) => {
                    debug!(
                        "Record {}: gateway status {:?}, {:?} completion tokens",
                        record_id, body.status, body.completion_tokens
                    );
                    interpret(record_id, body)
                }
                Err(e) => ClassificationOutcome::Error(ClassificationError::MalformedResponse {
                    record_id,
                    detail: e.to_string(),
                }),
            };
        }

        ClassificationOutcome::Error(ClassificationError::RequestFailed {
            record_id,
            attempts: self.max_retries + 1,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
