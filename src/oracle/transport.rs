use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use thiserror::Error;

const USER_AGENT: &str = concat!("vra/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_OUTPUT_TOKENS: u32 = 80;
const ERROR_BODY_LIMIT: usize = 200;

/// One multimodal comparison request: a text prompt followed by PNG images.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub images: &'a [Vec<u8>],
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("invalid response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Rate limiting and transient connection problems are worth another try;
    /// everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let error = error.without_url();
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Sends a generate request and returns the decoded JSON response.
pub trait Transport {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Value, TransportError>;
}

/// `generateContent` over HTTPS.
pub struct GeminiTransport {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.endpoint, model)
    }
}

pub fn request_body(request: &GenerateRequest<'_>) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    parts.extend(request.images.iter().map(|image| {
        json!({
            "inlineData": {
                "mimeType": "image/png",
                "data": STANDARD.encode(image),
            }
        })
    }));

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": 0.0,
            "maxOutputTokens": MAX_OUTPUT_TOKENS,
            "responseMimeType": "application/json",
        },
    })
}

fn retry_after_header(response: &reqwest::blocking::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

impl Transport for GeminiTransport {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Value, TransportError> {
        let response = self
            .http
            .post(self.url(request.model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(request))
            .send()?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                retry_after: retry_after_header(&response),
            });
        }

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Status {
                code: status.as_u16(),
                message: truncate(body.trim(), ERROR_BODY_LIMIT),
            });
        }

        let text = response
            .text()
            .map_err(|error| TransportError::Body(error.without_url().to_string()))?;
        let trimmed = text.trim_start_matches('\u{feff}');
        serde_json::from_str(trimmed).map_err(|error| {
            TransportError::Body(format!(
                "{} (body: {})",
                error,
                truncate(trimmed, ERROR_BODY_LIMIT)
            ))
        })
    }
}
