//! [`VisionLabeler`] – names the obstacle in a camera frame via a cloud model.
//!
//! The labeler never fails its caller.  Every call resolves to text, with a
//! fixed sentinel standing in for anything that went wrong:
//!
//! | Condition                          | Behaviour                              |
//! |------------------------------------|----------------------------------------|
//! | reachability check fails           | offline sentinel, no request made      |
//! | client-side throttle engaged       | sentinel, no request made              |
//! | daily quota exhausted              | sentinel, no retry                     |
//! | HTTP 429 from the API              | wait `base × 2^attempt`, retry         |
//! | 429 on the last attempt            | sentinel                               |
//! | any other error                    | sentinel, no retry                     |
//!
//! The HTTP side sits behind [`VisionBackend`] so the policy can be exercised
//! without a network.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Local, NaiveDate};
use fieldbot_hal::CameraFrame;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label used when the model could not name the object.
pub const UNKNOWN_LABEL: &str = "unknown";
/// Label used when the API host is unreachable.
pub const OFFLINE_LABEL: &str = "unknown (offline)";
pub const NO_PATH_SUGGESTION: &str = "No path suggestion available.";
pub const NO_PATH_SUGGESTION_OFFLINE: &str = "No path suggestion available (offline).";
pub const NO_RESPONSE: &str = "I couldn't generate a response.";
pub const NO_RESPONSE_OFFLINE: &str = "I couldn't generate a response due to being offline.";

const LABEL_PROMPT: &str = "I am using a Raspberry Pi with a camera to detect objects. \
Analyze the attached image and identify the most prominent object. \
Return only the name of the object (e.g., 'apple', 'car', 'tree') without any additional text.";
const PATH_PROMPT: &str =
    "Analyze the image and suggest a navigation path for a small farm robot to avoid obstacles.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from a vision request.
#[derive(Error, Debug)]
pub enum VisionError {
    /// The API answered HTTP 429.
    #[error("rate limited by the vision API")]
    RateLimited,
    #[error("daily request limit of {limit} exceeded")]
    QuotaExceeded { limit: u32 },
    /// The local per-minute throttle refused the request.
    #[error("request throttled locally")]
    Throttled,
    #[error("vision API unreachable")]
    Offline,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoint, credentials and request policy of the vision collaborator.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the Generative Language API.
    pub api_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// First backoff after a 429; doubles on every further attempt.
    pub backoff_base_ms: u64,
    /// Host checked with a HEAD request before every call.
    pub reachability_url: String,
    pub reachability_timeout_ms: u64,
    pub daily_limit: u32,
    /// File holding `YYYY-MM-DD,count`.  In-memory only when unset.
    pub request_count_path: Option<PathBuf>,
    /// Client-side cap on calls per minute.  Unlimited when unset.
    pub requests_per_minute: Option<u32>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: String::new(),
            max_attempts: 3,
            backoff_base_ms: 1000,
            reachability_url: "http://www.google.com".to_string(),
            reachability_timeout_ms: 5000,
            daily_limit: 200,
            request_count_path: None,
            requests_per_minute: Some(15),
        }
    }
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("reachability_url", &self.reachability_url)
            .field("reachability_timeout_ms", &self.reachability_timeout_ms)
            .field("daily_limit", &self.daily_limit)
            .field("request_count_path", &self.request_count_path)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

/// Transport to a multimodal model.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Cheap connectivity check made before every request.
    async fn is_reachable(&self) -> bool;

    /// Send `prompt` (and optionally one image) and return the model's text.
    ///
    /// # Errors
    ///
    /// [`VisionError::RateLimited`] on HTTP 429, [`VisionError::Http`] or
    /// [`VisionError::BadResponse`] otherwise.
    async fn generate(&self, prompt: &str, image: Option<&CameraFrame>) -> Result<String, VisionError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiBackend {
    client: reqwest::Client,
    config: VisionConfig,
}

impl GeminiBackend {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl VisionBackend for GeminiBackend {
    async fn is_reachable(&self) -> bool {
        let timeout = Duration::from_millis(self.config.reachability_timeout_ms);
        match self
            .client
            .head(&self.config.reachability_url)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "no internet connection; skipping vision API");
                false
            }
        }
    }

    async fn generate(&self, prompt: &str, image: Option<&CameraFrame>) -> Result<String, VisionError> {
        let mut parts = vec![Part::Text { text: prompt }];
        if let Some(frame) = image {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: CameraFrame::MIME_TYPE,
                    data: BASE64.encode(&frame.data),
                },
            });
        }
        let body = GenerateRequest {
            contents: [Content { parts }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VisionError::RateLimited);
        }
        let response: GenerateResponse = response.error_for_status()?.json().await?;

        response
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .ok_or_else(|| VisionError::BadResponse("empty candidates array".into()))
    }
}

/// Backend used when no API key is configured: always unreachable.
pub struct OfflineBackend;

#[async_trait]
impl VisionBackend for OfflineBackend {
    async fn is_reachable(&self) -> bool {
        false
    }

    async fn generate(&self, _prompt: &str, _image: Option<&CameraFrame>) -> Result<String, VisionError> {
        Err(VisionError::Offline)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily quota
// ─────────────────────────────────────────────────────────────────────────────

/// Per-day request counter, optionally shared with other processes through a
/// `YYYY-MM-DD,count` file.
#[derive(Debug)]
pub struct DailyQuota {
    limit: u32,
    path: Option<PathBuf>,
    day: NaiveDate,
    count: u32,
}

impl DailyQuota {
    pub fn new(limit: u32, path: Option<PathBuf>) -> Self {
        Self {
            limit,
            path,
            day: Local::now().date_naive(),
            count: 0,
        }
    }

    /// Requests counted so far on the current day.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Count one request made on `today`.
    ///
    /// The counter resets when the day changes.  File errors are logged and
    /// the in-memory count is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`VisionError::QuotaExceeded`] once the count passes the limit.
    pub fn charge(&mut self, today: NaiveDate) -> Result<u32, VisionError> {
        self.reload();
        if self.day != today {
            debug!(previous = %self.day, %today, "request counter reset for new day");
            self.day = today;
            self.count = 0;
        }
        self.count += 1;
        self.persist();
        info!(count = self.count, limit = self.limit, "vision requests today");

        if self.count > self.limit {
            return Err(VisionError::QuotaExceeded { limit: self.limit });
        }
        Ok(self.count)
    }

    fn reload(&mut self) {
        let Some(path) = &self.path else { return };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read request counter");
                return;
            }
        };
        match parse_counter(&raw) {
            Some((day, count)) => {
                self.day = day;
                self.count = count;
            }
            None => warn!(path = %path.display(), "malformed request counter; ignoring"),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let line = format!("{},{}", self.day.format("%Y-%m-%d"), self.count);
        if let Err(e) = std::fs::write(path, line) {
            warn!(path = %path.display(), error = %e, "cannot write request counter");
        }
    }
}

fn parse_counter(raw: &str) -> Option<(NaiveDate, u32)> {
    let (day, count) = raw.trim().split_once(',')?;
    let day = NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d").ok()?;
    let count = count.trim().parse().ok()?;
    Some((day, count))
}

// ─────────────────────────────────────────────────────────────────────────────
// Labeler
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of [`VisionLabeler::label`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// `false` when `name` is a sentinel.
    pub ok: bool,
}

impl Label {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ok: true }
    }

    pub fn sentinel(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
        }
    }
}

/// Retry, quota and throttle policy wrapped around a [`VisionBackend`].
pub struct VisionLabeler {
    backend: Box<dyn VisionBackend>,
    config: VisionConfig,
    quota: Mutex<DailyQuota>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl VisionLabeler {
    pub fn new(backend: Box<dyn VisionBackend>, config: VisionConfig) -> Self {
        let quota = DailyQuota::new(config.daily_limit, config.request_count_path.clone());
        let limiter = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));
        Self {
            backend,
            config,
            quota: Mutex::new(quota),
            limiter,
        }
    }

    /// Name the most prominent object in `frame`.
    pub async fn label(&self, frame: &CameraFrame) -> Label {
        match self.request(LABEL_PROMPT, Some(frame)).await {
            Ok(text) if !text.trim().is_empty() => Label::named(text.trim()),
            Ok(_) => Label::sentinel(UNKNOWN_LABEL),
            Err(VisionError::Offline) => Label::sentinel(OFFLINE_LABEL),
            Err(e) => {
                warn!(error = %e, "object labeling failed");
                Label::sentinel(UNKNOWN_LABEL)
            }
        }
    }

    /// Ask the model for a route around what `frame` shows.
    pub async fn suggest_path(&self, frame: &CameraFrame) -> String {
        self.text_or(PATH_PROMPT, Some(frame), NO_PATH_SUGGESTION, NO_PATH_SUGGESTION_OFFLINE)
            .await
    }

    /// Answer a free-form farming question.
    pub async fn ask(&self, query: &str) -> String {
        let prompt = format!("As a farming assistant, answer the following query: {query}");
        self.text_or(&prompt, None, NO_RESPONSE, NO_RESPONSE_OFFLINE).await
    }

    async fn text_or(
        &self,
        prompt: &str,
        image: Option<&CameraFrame>,
        fallback: &str,
        offline: &str,
    ) -> String {
        match self.request(prompt, image).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback.to_string(),
            Err(VisionError::Offline) => offline.to_string(),
            Err(e) => {
                warn!(error = %e, "vision request failed");
                fallback.to_string()
            }
        }
    }

    async fn request(&self, prompt: &str, image: Option<&CameraFrame>) -> Result<String, VisionError> {
        if !self.backend.is_reachable().await {
            return Err(VisionError::Offline);
        }
        if let Some(limiter) = &self.limiter
            && limiter.check().is_err()
        {
            return Err(VisionError::Throttled);
        }

        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            self.charge_quota()?;
            match self.backend.generate(prompt, image).await {
                Err(VisionError::RateLimited) if attempt + 1 < attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "vision API rate limited; backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn charge_quota(&self) -> Result<u32, VisionError> {
        let today = Local::now().date_naive();
        self.quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .charge(today)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.backoff_base_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test backend
// ─────────────────────────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
