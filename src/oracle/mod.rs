//! Visual comparison of a protocol row against a report row through a remote
//! multimodal model, memoized in a content-addressed cache.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::model::{ComparisonResult, OracleStats};
use crate::util::sha256_hex;

pub mod cache;
pub mod payload;
pub mod retry;
pub mod transport;
#[cfg(test)]
mod tests;

use cache::ResponseCache;
use payload::{ResponsePayload, coerce_comparison, extract_payload, parse_model_json};
use retry::{Outcome, RetryPolicy};
use transport::{GeminiTransport, GenerateRequest, Transport, TransportError};

pub const CACHE_VERSION: &str = "v2";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_CACHE_PATH: &str = ".cache/vlm_cache.json";

pub const COMPARISON_PROMPT: &str = "You are validating a PQ protocol row against a report row.\n\
You will receive 4 images in order:\n\
1) protocol master, 2) protocol sample, 3) report master, 4) report sample.\n\
Decide if the report pair matches the protocol pair for the same difference ID.\n\
Return EXACTLY one JSON object on one line with keys:\n\
{\"match\": true|false, \"reason\": \"short string\", \"confidence\": 0.0}\n\
Rules: reason must be <= 8 words. confidence must be [0.0, 1.0].";

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Blank keys are treated as absent.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub min_interval: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    /// `None` disables the cache.
    pub cache_path: Option<PathBuf>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            min_interval: Duration::from_millis(500),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(45),
            cache_path: Some(PathBuf::from(DEFAULT_CACHE_PATH)),
        }
    }
}

impl OracleConfig {
    fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.credential().is_some()
    }
}

/// The four evidence images of one comparison. Any of them may be missing
/// when its region could not be located or rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceCrops {
    pub protocol_master: Option<PathBuf>,
    pub protocol_sample: Option<PathBuf>,
    pub report_master: Option<PathBuf>,
    pub report_sample: Option<PathBuf>,
}

pub trait ComparisonOracle {
    /// Never fails; problems come back as a non-matching, zero-confidence
    /// result whose reason names the cause.
    fn compare(&mut self, crops: &EvidenceCrops) -> ComparisonResult;

    fn stats(&self) -> OracleStats {
        OracleStats::default()
    }
}

#[derive(Debug)]
enum CallError {
    Transport(TransportError),
    Parse(String),
    NoPayload,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(error) => write!(f, "{error}"),
            Self::Parse(message) => write!(f, "{message}"),
            Self::NoPayload => write!(f, "no text payload"),
        }
    }
}

pub struct OracleClient<T: Transport> {
    config: OracleConfig,
    transport: T,
    cache: Option<ResponseCache>,
    last_request_at: Option<Instant>,
    stats: OracleStats,
}

impl OracleClient<GeminiTransport> {
    pub fn gemini(config: OracleConfig) -> Result<Self> {
        let transport = GeminiTransport::new(
            &config.endpoint,
            config.credential().unwrap_or_default(),
            config.timeout,
        )?;
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> OracleClient<T> {
    pub fn new(config: OracleConfig, transport: T) -> Self {
        let cache = config.cache_path.as_deref().map(ResponseCache::open);
        if let Some(cache) = &cache {
            info!(
                path = %cache.path().display(),
                entries = cache.len(),
                "comparison cache enabled"
            );
        }

        Self {
            config,
            transport,
            cache,
            last_request_at: None,
            stats: OracleStats::default(),
        }
    }

    fn degrade(&mut self, reason: String) -> ComparisonResult {
        self.stats.degraded += 1;
        debug!(reason = %reason, "comparison degraded");
        ComparisonResult::degraded(reason)
    }

    fn throttle(&self) {
        let Some(last) = self.last_request_at else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.config.min_interval {
            thread::sleep(self.config.min_interval - elapsed);
        }
    }

    fn request_comparison(&mut self, images: &[Vec<u8>]) -> Result<ComparisonResult, CallError> {
        let policy = RetryPolicy::new(self.config.max_retries, self.config.base_delay);
        let model = self.config.model.clone();
        let request = GenerateRequest {
            model: &model,
            prompt: COMPARISON_PROMPT,
            images,
        };

        policy.run(|attempt| {
            self.throttle();
            self.stats.requests += 1;
            debug!(attempt = attempt + 1, model = %model, "sending comparison request");
            let response = self.transport.generate(&request);
            self.last_request_at = Some(Instant::now());

            let response = match response {
                Ok(response) => response,
                Err(TransportError::Body(message)) => {
                    return Outcome::Terminal(CallError::Parse(message));
                }
                Err(error) if error.is_retryable() => {
                    return Outcome::Retryable {
                        retry_after: error.retry_after(),
                        error: CallError::Transport(error),
                    };
                }
                Err(error) => return Outcome::Terminal(CallError::Transport(error)),
            };

            let object = match extract_payload(&response) {
                ResponsePayload::Structured(object) => Ok(object),
                ResponsePayload::Text(text) => parse_model_json(&text),
                ResponsePayload::Empty => return Outcome::Terminal(CallError::NoPayload),
            };

            match object.and_then(|object| coerce_comparison(&object)) {
                Ok(result) => Outcome::Success(result),
                Err(message) => Outcome::Terminal(CallError::Parse(message)),
            }
        })
    }
}

fn read_images(paths: [&Path; 4]) -> std::io::Result<Vec<Vec<u8>>> {
    paths.into_iter().map(fs::read).collect()
}

impl<T: Transport> ComparisonOracle for OracleClient<T> {
    fn compare(&mut self, crops: &EvidenceCrops) -> ComparisonResult {
        let (Some(report_master), Some(report_sample)) =
            (crops.report_master.as_deref(), crops.report_sample.as_deref())
        else {
            return self.degrade("missing report crops for this repeat/difference".to_string());
        };
        let (Some(protocol_master), Some(protocol_sample)) = (
            crops.protocol_master.as_deref(),
            crops.protocol_sample.as_deref(),
        ) else {
            return self.degrade("missing protocol crops for this repeat/difference".to_string());
        };

        if !self.config.is_configured() {
            return self.degrade("oracle not configured (set GEMINI_API_KEY)".to_string());
        }

        let paths = [
            protocol_master,
            protocol_sample,
            report_master,
            report_sample,
        ];
        let images = match read_images(paths) {
            Ok(images) => images,
            Err(error) => return self.degrade(format!("failed to read evidence crops: {error}")),
        };

        let cache_key = sha256_hex(
            [CACHE_VERSION.as_bytes(), self.config.model.as_bytes()]
                .into_iter()
                .chain(images.iter().map(Vec::as_slice)),
        );

        if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.get(&cache_key)) {
            let hit = hit.clone();
            self.stats.cache_hits += 1;
            debug!(key = %cache_key, "comparison cache hit");
            return hit;
        }

        match self.request_comparison(&images) {
            Ok(result) => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.insert(cache_key, result.clone());
                }
                result
            }
            Err(CallError::Transport(error)) => {
                warn!(error = %error, "comparison request failed");
                self.degrade(format!("oracle request failed: {error}"))
            }
            Err(CallError::Parse(message)) => {
                warn!(error = %message, "comparison response could not be parsed");
                self.degrade(format!("oracle response parsing failed: {message}"))
            }
            Err(CallError::NoPayload) => {
                self.degrade("oracle returned no text payload for comparison".to_string())
            }
        }
    }

    fn stats(&self) -> OracleStats {
        self.stats
    }
}
