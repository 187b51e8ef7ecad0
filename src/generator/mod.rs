//! Image generation service client
//!
//! Provides:
//! - The [`ImageGenerator`] seam used by the pipeline
//! - [`BingClient`], a cookie-authenticated submit/poll/download client
//!
//! Every request carries a per-call timeout. Transient failures (network
//! errors, HTTP 429, HTTP 5xx, poll timeouts) are retried with exponential
//! backoff up to `max_attempts`; credential rejections and content/quota
//! refusals are not.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GenerateError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";

/// Body fragments the service uses to refuse a prompt
const BLOCKED_MARKERS: &[&str] = &[
    "this prompt has been blocked",
    "content warning",
    "unsafe image content detected",
];

/// Body fragments the service uses to report an exhausted quota
const QUOTA_MARKERS: &[&str] = &["run out of boosts", "daily limit reached"];

/// Paths of the account sign-in pages the service redirects to
const SIGN_IN_PATHS: &[&str] = &["/fd/auth/signin", "/signin", "/login"];

/// Downloads smaller than this are the service's error icon, not art
const MIN_IMAGE_BYTES: usize = 1024;

static REQUEST_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/async/results/([a-f0-9-]{36})",
        r#"data-rid="([a-f0-9-]{36})""#,
        r#"id="([a-f0-9-]{36})""#,
        r#""id":"([a-f0-9-]{36})""#,
        r#"requestId["']?\s*[:=]\s*["']?([a-f0-9-]{36})"#,
        r"rid=([a-f0-9-]{36})",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
    .collect()
});

static IMAGE_URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?:data-src|src)="([^"]*/th/id/[^"]+)""#,
        r#"(?:data-src|src)="([^"]*OIG[^"]*)""#,
        r#""murl":"([^"]+)""#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static WIDTH_PARAM: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"([?&])w=\d+").ok());
static HEIGHT_PARAM: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"([?&])h=\d+").ok());

/// Generator client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    /// Service base URL
    pub base_url: String,
    /// Timeout for each HTTP call
    pub request_timeout_secs: u64,
    /// Total attempts per prompt, including the first
    pub max_attempts: u32,
    /// Backoff before retry n is base * 2^(n-1)
    pub base_backoff_ms: u64,
    /// Delay between result polls
    pub poll_interval_ms: u64,
    /// Give up polling after this long
    pub poll_timeout_secs: u64,
    /// Images to keep from one generation
    pub max_images: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.bing.com".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            base_backoff_ms: 2000,
            poll_interval_ms: 3000,
            poll_timeout_secs: 300,
            max_images: 1,
        }
    }
}

impl GeneratorSettings {
    /// Backoff before the retry that follows `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Raw image as returned by the generation service
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub prompt: String,
    pub generated_at: DateTime<Utc>,
    pub source_url: String,
}

/// Something that turns a prompt into images
#[allow(async_fn_in_trait)]
pub trait ImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<GeneratedImage>, GenerateError>;
}

/// Outcome of one failed attempt
#[derive(Debug)]
enum Failure {
    /// Worth retrying
    Transient(String),
    /// Retrying will not help
    Fatal(GenerateError),
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Failure::Transient(format!("request timed out: {}", e))
        } else {
            Failure::Transient(format!("request failed: {}", e))
        }
    }
}

/// Map a non-success status to a failure
fn classify(status: StatusCode) -> Failure {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Failure::Fatal(GenerateError::Authentication(format!("HTTP {}", status)))
        }
        StatusCode::TOO_MANY_REQUESTS => Failure::Transient("rate limited (HTTP 429)".to_string()),
        s if s.is_server_error() => Failure::Transient(format!("server error: HTTP {}", s)),
        s => Failure::Fatal(GenerateError::Generation(format!("HTTP {}", s))),
    }
}

/// Check a page body for refusal messages
fn check_refusal(body: &str) -> Result<(), Failure> {
    let lower = body.to_lowercase();
    if let Some(marker) = BLOCKED_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Err(Failure::Fatal(GenerateError::Generation(format!(
            "prompt rejected by content policy ({})",
            marker
        ))));
    }
    if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
        return Err(Failure::Fatal(GenerateError::Generation(
            "generation quota exhausted".to_string(),
        )));
    }
    Ok(())
}

/// Find the generation request id in a redirect URL or page body
pub fn extract_request_id(url: &str, body: &str) -> Option<String> {
    REQUEST_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url).or_else(|| re.captures(body)))
        .map(|c| c[1].to_lowercase())
}

/// Find result image URLs in a results page, absolutized and upscaled
pub fn extract_image_urls(body: &str, base_url: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for re in IMAGE_URL_PATTERNS.iter() {
        for caps in re.captures_iter(body) {
            let raw = caps[1].replace("\\/", "/").replace("&amp;", "&");
            let url = if raw.starts_with("//") {
                format!("https:{}", raw)
            } else if raw.starts_with('/') {
                format!("{}{}", base_url.trim_end_matches('/'), raw)
            } else if raw.starts_with("http") {
                raw
            } else {
                continue;
            };
            let url = full_resolution(&url);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

/// Ask for the 1024px rendition instead of the thumbnail
fn full_resolution(url: &str) -> String {
    let mut url = url.to_string();
    if let Some(re) = WIDTH_PARAM.as_ref() {
        url = re.replace_all(&url, "${1}w=1024").into_owned();
    }
    if let Some(re) = HEIGHT_PARAM.as_ref() {
        url = re.replace_all(&url, "${1}h=1024").into_owned();
    }
    url
}

/// Sign-in pages are recognized by host and path; the query carries the
/// prompt and is never inspected.
fn is_sign_in_page(url: &reqwest::Url) -> bool {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let path = url.path().to_lowercase();
    host.starts_with("login.") || SIGN_IN_PATHS.iter().any(|p| path.starts_with(p))
}

/// Tiny or SVG payloads are the service's placeholder icon
fn looks_like_error_icon(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_IMAGE_BYTES {
        return true;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(100)]).to_lowercase();
    head.contains("<svg") || head.contains("<?xml")
}

/// Cookie-authenticated generation client
#[derive(Debug)]
pub struct BingClient {
    client: Client,
    cookie: String,
    settings: GeneratorSettings,
}

impl BingClient {
    /// Create a new client. An empty session cookie is rejected up front.
    pub fn new(cookie: &str, settings: GeneratorSettings) -> Result<Self, GenerateError> {
        let cookie = cookie.trim();
        if cookie.is_empty() {
            return Err(GenerateError::Authentication(
                "session cookie not provided".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GenerateError::Generation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cookie: cookie.to_string(),
            settings,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn cookie_header(&self) -> String {
        format!("_U={}", self.cookie)
    }

    /// Redirects to a sign-in page mean the cookie has expired
    fn check_signed_in(response: &Response) -> Result<(), Failure> {
        if is_sign_in_page(response.url()) {
            return Err(Failure::Fatal(GenerateError::Authentication(
                "session cookie expired (redirected to sign-in)".to_string(),
            )));
        }
        Ok(())
    }

    /// Load the create page to confirm the cookie is accepted
    pub async fn verify_session(&self) -> Result<(), GenerateError> {
        let response = self
            .client
            .get(self.url("/images/create"))
            .header("Cookie", self.cookie_header())
            .send()
            .await
            .map_err(|e| GenerateError::Generation(format!("request failed: {}", e)))?;

        let outcome = if response.status().is_success() {
            Self::check_signed_in(&response)
        } else {
            Err(classify(response.status()))
        };

        outcome.map_err(|f| match f {
            Failure::Fatal(e) => e,
            Failure::Transient(msg) => GenerateError::Generation(msg),
        })
    }

    /// Submit the prompt and return the request id
    async fn submit(&self, prompt: &str) -> Result<String, Failure> {
        let response = self
            .client
            .post(self.url("/images/create"))
            .header("Cookie", self.cookie_header())
            .form(&[("q", prompt), ("rt", "3"), ("FORM", "GENCRE")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify(response.status()));
        }
        Self::check_signed_in(&response)?;

        let final_url = response.url().to_string();
        let body = response.text().await?;
        check_refusal(&body)?;

        extract_request_id(&final_url, &body)
            .ok_or_else(|| Failure::Transient("no request id in submit response".to_string()))
    }

    /// Poll the results page until image URLs appear
    async fn poll(&self, request_id: &str) -> Result<Vec<String>, Failure> {
        let url = self.url(&format!("/images/create/async/results/{}", request_id));
        let deadline = Instant::now() + Duration::from_secs(self.settings.poll_timeout_secs);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self
                .client
                .get(&url)
                .header("Cookie", self.cookie_header())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await?;
                    check_refusal(&body)?;
                    let urls = extract_image_urls(&body, &self.settings.base_url);
                    if !urls.is_empty() {
                        debug!(request_id, polls, found = urls.len(), "results ready");
                        return Ok(urls);
                    }
                }
                Ok(response) => {
                    if let Failure::Fatal(e) = classify(response.status()) {
                        if matches!(e, GenerateError::Authentication(_)) {
                            return Err(Failure::Fatal(e));
                        }
                    }
                    debug!(request_id, status = %response.status(), "poll not ready");
                }
                Err(e) => debug!(request_id, "poll failed: {}", e),
            }

            if Instant::now() + interval > deadline {
                return Err(Failure::Transient(format!(
                    "timed out after {}s waiting for images",
                    self.settings.poll_timeout_secs
                )));
            }
            if polls % 10 == 0 {
                info!(request_id, polls, "still waiting for images");
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Download result images, skipping placeholder icons and URLs that fail
    async fn download(
        &self,
        prompt: &str,
        urls: &[String],
    ) -> Result<Vec<GeneratedImage>, Failure> {
        let wanted = self.settings.max_images.max(1);
        let mut images = Vec::new();
        for url in urls {
            if images.len() >= wanted {
                break;
            }
            let response = match self
                .client
                .get(url)
                .header("Cookie", self.cookie_header())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, "image download failed: {}", e);
                    continue;
                }
            };
            if !response.status().is_success() {
                warn!(url = %url, status = %response.status(), "image download failed");
                continue;
            }
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    warn!(url = %url, "image download interrupted: {}", e);
                    continue;
                }
            };
            if looks_like_error_icon(&bytes) {
                warn!(url = %url, size = bytes.len(), "skipping placeholder image");
                continue;
            }
            images.push(GeneratedImage {
                bytes,
                prompt: prompt.to_string(),
                generated_at: Utc::now(),
                source_url: url.clone(),
            });
        }

        if images.is_empty() {
            return Err(Failure::Transient("no valid images downloaded".to_string()));
        }
        Ok(images)
    }

    async fn attempt(&self, prompt: &str) -> Result<Vec<GeneratedImage>, Failure> {
        let request_id = self.submit(prompt).await?;
        debug!(request_id, "generation submitted");
        let urls = self.poll(&request_id).await?;
        self.download(prompt, &urls).await
    }
}

impl ImageGenerator for BingClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<GeneratedImage>, GenerateError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(prompt).await {
                Ok(images) => {
                    info!(attempt, count = images.len(), "images generated");
                    return Ok(images);
                }
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Transient(cause)) if attempt < max_attempts => {
                    let delay = self.settings.backoff(attempt);
                    warn!(attempt, max_attempts, ?delay, "generation attempt failed: {}", cause);
                    tokio::time::sleep(delay).await;
                }
                Err(Failure::Transient(cause)) => {
                    return Err(GenerateError::Generation(format!(
                        "giving up after {} attempts: {}",
                        attempt, cause
                    )));
                }
            }
        }
    }
}
