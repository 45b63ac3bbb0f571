use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use payclaim_core::{Money, ParsedFields, Provider};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model endpoint returned status {0}")]
    Status(u16),
    #[error("Model returned no content")]
    EmptyResponse,
    #[error("Model output is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Last-resort extraction for messages the pattern parser could not read.
///
/// Implementations must not fail loudly: an unavailable or broken backend
/// answers `None` and the message goes to manual review.
pub trait FallbackExtractor: Send + Sync {
    fn extract(&self, raw_text: &str) -> impl Future<Output = Option<ParsedFields>> + Send;
}

// ── Disabled backend ──────────────────────────────────────────────────────────

/// Used when no model is configured.
pub struct NoFallback;

impl FallbackExtractor for NoFallback {
    async fn extract(&self, _raw_text: &str) -> Option<ParsedFields> {
        None
    }
}

// ── Mock backend (tests) ──────────────────────────────────────────────────────

/// Returns a preset answer and counts how often it was asked.
pub struct MockFallback {
    pub answer: Option<ParsedFields>,
    calls: AtomicUsize,
}

impl MockFallback {
    pub fn new(answer: Option<ParsedFields>) -> Self {
        Self { answer, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FallbackExtractor for MockFallback {
    async fn extract(&self, _raw_text: &str) -> Option<ParsedFields> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

// ── Gemini backend ────────────────────────────────────────────────────────────

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl GeminiExtractor {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request(&self, api_key: &str, raw_text: &str) -> Result<ParsedFields, FallbackError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        let prompt = format!(
            "Extract the payment details from this SMS. If it is not a payment SMS, return null values.\n\nSMS: \"{raw_text}\""
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "trxId": { "type": "STRING", "description": "The unique transaction ID" },
                        "amount": { "type": "NUMBER", "description": "The amount of money received" },
                        "sender": { "type": "STRING", "description": "The phone number or name of the sender" },
                        "provider": { "type": "STRING", "description": "One of: bKash, Nagad, Rocket, or Unknown" }
                    },
                    "required": ["trxId", "amount", "sender", "provider"]
                }
            }
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FallbackError::Status(response.status().as_u16()));
        }

        let reply: GenerateContentResponse = response.json().await?;
        let text = reply
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .find_map(|p| p.text)
            .ok_or(FallbackError::EmptyResponse)?;
        let payment: ModelPayment = serde_json::from_str(&text)?;
        Ok(normalize(payment))
    }
}

impl FallbackExtractor for GeminiExtractor {
    async fn extract(&self, raw_text: &str) -> Option<ParsedFields> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("Gemini API key missing, skipping AI extraction");
            return None;
        };
        match self.request(api_key, raw_text).await {
            Ok(fields) => Some(fields),
            Err(e) => {
                tracing::warn!("AI extraction failed: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// The JSON object the model is asked to produce.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModelPayment {
    pub trx_id: Option<String>,
    pub amount: Option<f64>,
    pub sender: Option<String>,
    pub provider: Option<String>,
}

/// Blank strings and non-positive amounts become `None`; the provider label
/// is mapped onto the closed set.
pub(crate) fn normalize(payment: ModelPayment) -> ParsedFields {
    let non_blank = |s: Option<String>| {
        s.map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
    };
    ParsedFields {
        provider: Provider::from_label(payment.provider.as_deref().unwrap_or_default()),
        transaction_code: non_blank(payment.trx_id),
        amount: payment
            .amount
            .filter(|a| a.is_finite())
            .and_then(Money::from_f64)
            .filter(|m| m.is_positive()),
        sender: non_blank(payment.sender),
    }
}
