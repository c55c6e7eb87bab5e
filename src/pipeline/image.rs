//! Image stage: call the image model for one slot, with retries and a
//! placeholder fallback.
//!
//! ## Attempt strategy
//!
//! Each slot gets `config.image_attempts` tries (default 2) with linear
//! backoff. A content-policy rejection switches every later attempt to the
//! simplified prompt (style + character + scene), which drops the rule blocks
//! that most often trip safety filters. Authentication failures stop
//! immediately. When attempts run out the slot gets a placeholder URL and the
//! error is reported as a [`PageError`]; the story itself never fails
//! because of an image.

use crate::config::StoryConfig;
use crate::error::{ImageApiError, PageError, StorybookError};
use crate::pipeline::limiter::RequestLimiter;
use crate::pipeline::retry::{retry_with_backoff_if, Backoff, RetryPolicy};
use crate::pipeline::sanitize::prepare_prompt;
use crate::pipeline::ImageSlot;
use crate::prompts::{image_prompt, simplified_image_prompt, ImagePromptParts};
use crate::story::IllustrationStyle;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Placeholder service used when no image could be produced.
pub const PLACEHOLDER_BASE: &str = "https://placehold.co";

/// What an image model returns.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    /// A URL to fetch the image from (usually short-lived).
    Url(String),
    /// Inline image bytes.
    Bytes(Vec<u8>),
}

/// A text-to-image model.
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Identifier reported in diagnostics.
    fn name(&self) -> String;

    async fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedImage, ImageApiError>;
}

// ── OpenAI-compatible HTTP client ───────────────────────────────────────────

/// Client for `POST {base}/images/generations`.
pub struct OpenAiImageModel {
    client: reqwest::Client,
    base: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl OpenAiImageModel {
    pub fn new(
        base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, StorybookError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StorybookError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs,
        })
    }

    /// Build from config; the key falls back to `OPENAI_API_KEY`.
    pub fn from_config(config: &StoryConfig) -> Result<Self, StorybookError> {
        let key = config
            .image_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StorybookError::ProviderNotConfigured {
                provider: "image".into(),
                hint: "Set OPENAI_API_KEY or pass --image-api-key, or enable placeholders.".into(),
            })?;
        Self::new(
            config.image_api_base.clone(),
            key,
            config.image_model.clone(),
            config.api_timeout_secs,
        )
    }
}

#[async_trait]
impl ImageModel for OpenAiImageModel {
    fn name(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedImage, ImageApiError> {
        let url = format!("{}/images/generations", self.base);
        let request = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(classify_error(status.as_u16(), &body, retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;
        parse_image_response(&body)
    }
}

fn transport_error(e: reqwest::Error, timeout_secs: u64) -> ImageApiError {
    if e.is_timeout() {
        ImageApiError::Timeout { secs: timeout_secs }
    } else {
        ImageApiError::Request {
            message: e.to_string(),
        }
    }
}

/// Map an HTTP error response to its failure class.
pub fn classify_error(status: u16, body: &str, retry_after_secs: Option<u64>) -> ImageApiError {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map(|r| r.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    let policy_flag = parsed.as_ref().is_some_and(|r| {
        r.error.code.as_deref() == Some("content_policy_violation")
            || r.error.kind.as_deref() == Some("image_generation_user_error")
    });
    let lower = message.to_lowercase();
    let policy_text = lower.contains("safety system") || lower.contains("content policy");

    match status {
        400 if policy_flag || policy_text => ImageApiError::ContentPolicy { message },
        429 => ImageApiError::RateLimited { retry_after_secs },
        401 | 403 => ImageApiError::Auth { message },
        500..=599 => ImageApiError::Server { status, message },
        _ => ImageApiError::Request {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

/// Extract the first image from a successful response body.
pub fn parse_image_response(body: &str) -> Result<GeneratedImage, ImageApiError> {
    let parsed: ImageResponse =
        serde_json::from_str(body).map_err(|e| ImageApiError::InvalidResponse {
            detail: format!("invalid JSON: {e}"),
        })?;
    let datum = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ImageApiError::InvalidResponse {
            detail: "empty 'data' array".into(),
        })?;

    if let Some(url) = datum.url.filter(|u| !u.is_empty()) {
        return Ok(GeneratedImage::Url(url));
    }
    if let Some(b64) = datum.b64_json.filter(|b| !b.is_empty()) {
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| ImageApiError::InvalidResponse {
                detail: format!("bad base64 image: {e}"),
            })?;
        return Ok(GeneratedImage::Bytes(bytes));
    }
    Err(ImageApiError::InvalidResponse {
        detail: "neither 'url' nor 'b64_json' present".into(),
    })
}

// ── Placeholders ────────────────────────────────────────────────────────────

/// Placeholder image URL encoding the slot and style.
pub fn placeholder_url(slot: ImageSlot, style: IllustrationStyle, size: &str) -> String {
    let label = match slot {
        ImageSlot::Cover => format!("Cover - {}", style.label()),
        ImageSlot::Page(n) => format!("Page {n} - {}", style.label()),
        ImageSlot::CharacterReference => format!("Character - {}", style.label()),
    };
    let base = format!("{PLACEHOLDER_BASE}/{size}/png");
    match reqwest::Url::parse_with_params(&base, &[("text", label.as_str())]) {
        Ok(url) => url.to_string(),
        Err(_) => base,
    }
}

/// True for URLs produced by [`placeholder_url`].
pub fn is_placeholder(url: &str) -> bool {
    url.starts_with(PLACEHOLDER_BASE)
}

// ── Generation with fallback ────────────────────────────────────────────────

/// Result of illustrating one slot.
#[derive(Debug, Clone)]
pub enum SlotImage {
    /// The model produced an image.
    Generated {
        image: GeneratedImage,
        attempts: u32,
        simplified: bool,
    },
    /// A placeholder stands in. `error` is `None` in placeholder mode.
    Placeholder {
        url: String,
        error: Option<PageError>,
    },
}

/// Illustrate one slot.
///
/// `simplified` starts on the simplified prompt (used by the retry pass).
/// Every model call first acquires a permit from `limiter`.
pub async fn generate_slot_image(
    model: &dyn ImageModel,
    limiter: &dyn RequestLimiter,
    parts: &ImagePromptParts<'_>,
    config: &StoryConfig,
    simplified: bool,
) -> SlotImage {
    let slot = parts.slot;
    if config.use_placeholders {
        return SlotImage::Placeholder {
            url: placeholder_url(slot, parts.style, &config.image_size),
            error: None,
        };
    }

    let full = prepare_prompt(&image_prompt(parts), config.prompt_char_budget);
    let simple = prepare_prompt(&simplified_image_prompt(parts), config.prompt_char_budget);
    let use_simple = AtomicBool::new(simplified);
    let attempts = AtomicU32::new(0);

    let policy = RetryPolicy::new(
        config.image_attempts,
        Backoff::Linear(Duration::from_millis(config.image_retry_backoff_ms)),
    );
    let label = format!("image {slot}");
    let full = full.as_str();
    let simple = simple.as_str();
    let use_simple_flag = &use_simple;
    let attempt_count = &attempts;

    let result = retry_with_backoff_if(
        policy,
        &label,
        move |attempt| {
            let prompt = if use_simple_flag.load(Ordering::SeqCst) {
                simple
            } else {
                full
            };
            async move {
                limiter.acquire().await;
                attempt_count.fetch_add(1, Ordering::SeqCst);
                debug!(
                    slot = %slot,
                    attempt = attempt + 1,
                    chars = prompt.chars().count(),
                    "requesting image"
                );
                let result = model.generate(prompt, &config.image_size).await;
                if let Err(ref e) = result {
                    warn!(slot = %slot, attempt = attempt + 1, kind = %e.kind(), "image attempt failed");
                    if matches!(e, ImageApiError::ContentPolicy { .. })
                        && config.simplify_on_policy_violation
                    {
                        use_simple_flag.store(true, Ordering::SeqCst);
                    }
                }
                result
            }
        },
        |e| !matches!(e, ImageApiError::Auth { .. }),
    )
    .await;

    let attempts = attempts.load(Ordering::SeqCst);
    match result {
        Ok(image) => {
            info!("Illustrated {slot} in {attempts} attempt(s)");
            SlotImage::Generated {
                image,
                attempts,
                simplified: use_simple.load(Ordering::SeqCst),
            }
        }
        Err(e) => {
            warn!("{slot}: using placeholder after {attempts} attempt(s): {e}");
            SlotImage::Placeholder {
                url: placeholder_url(slot, parts.style, &config.image_size),
                error: Some(PageError::ImageFailed {
                    page: slot.index().unwrap_or(0),
                    attempts,
                    kind: e.kind(),
                    detail: e.to_string(),
                }),
            }
        }
    }
}

// ── Fetching ────────────────────────────────────────────────────────────────

/// HTTP client for image downloads.
pub fn download_client(timeout_secs: u64) -> Result<reqwest::Client, StorybookError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StorybookError::Internal(format!("HTTP client: {e}")))
}

/// Download `url`, retrying once on failure.
pub async fn download_image(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let policy = RetryPolicy::new(2, Backoff::Fixed(Duration::from_secs(1)));
    retry_with_backoff_if(
        policy,
        "image download",
        move |_| async move {
            let response = client.get(url).send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            if !status.is_success() {
                return Err(format!("HTTP {status}"));
            }
            let bytes = response.bytes().await.map_err(|e| e.to_string())?;
            Ok(bytes.to_vec())
        },
        |_| true,
    )
    .await
}

/// Bytes of a generated image, downloading when needed.
pub async fn image_bytes(
    client: &reqwest::Client,
    image: &GeneratedImage,
) -> Result<Vec<u8>, String> {
    match image {
        GeneratedImage::Bytes(b) => Ok(b.clone()),
        GeneratedImage::Url(url) => download_image(client, url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageFailureKind;
    use crate::pipeline::limiter::Unlimited;
    use std::sync::Mutex;

    #[test]
    fn classifies_content_policy() {
        let body = r#"{"error":{"code":"content_policy_violation","message":"Your request was rejected as a result of our safety system.","type":"invalid_request_error"}}"#;
        let e = classify_error(400, body, None);
        assert_eq!(e.kind(), ImageFailureKind::ContentPolicy);
    }

    #[test]
    fn classifies_by_status() {
        assert_eq!(classify_error(429, "{}", Some(20)).kind(), ImageFailureKind::RateLimit);
        assert_eq!(classify_error(401, "nope", None).kind(), ImageFailureKind::Auth);
        assert_eq!(classify_error(503, "", None).kind(), ImageFailureKind::Server);
        assert_eq!(
            classify_error(400, r#"{"error":{"message":"bad size"}}"#, None).kind(),
            ImageFailureKind::Request
        );
    }

    #[test]
    fn parses_url_and_b64_responses() {
        let url = parse_image_response(r#"{"data":[{"url":"https://img/x.png"}]}"#).unwrap();
        assert_eq!(url, GeneratedImage::Url("https://img/x.png".into()));

        let b64 = BASE64.encode([137u8, 80, 78, 71]);
        let body = format!(r#"{{"data":[{{"b64_json":"{b64}"}}]}}"#);
        assert_eq!(
            parse_image_response(&body).unwrap(),
            GeneratedImage::Bytes(vec![137, 80, 78, 71])
        );

        assert!(parse_image_response(r#"{"data":[]}"#).is_err());
    }

    #[test]
    fn placeholder_encodes_page_and_style() {
        let url = placeholder_url(ImageSlot::Page(3), IllustrationStyle::Watercolor, "1024x1024");
        assert!(url.starts_with("https://placehold.co/1024x1024/png?text="));
        assert!(url.contains("Page+3"));
        assert!(url.contains("Watercolor"));
        assert!(is_placeholder(&url));
    }

    /// Fails with the queued errors, then succeeds. Records prompts.
    struct ScriptedModel {
        errors: Mutex<Vec<ImageApiError>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(mut errors: Vec<ImageApiError>) -> Self {
            errors.reverse();
            Self {
                errors: Mutex::new(errors),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageModel for ScriptedModel {
        fn name(&self) -> String {
            "scripted".into()
        }

        async fn generate(&self, prompt: &str, _size: &str) -> Result<GeneratedImage, ImageApiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.errors.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(GeneratedImage::Bytes(vec![1])),
            }
        }
    }

    fn parts() -> ImagePromptParts<'static> {
        ImagePromptParts {
            slot: ImageSlot::Page(2),
            style: IllustrationStyle::Cartoon,
            title: "Title",
            scene: "Ana jumps in puddles",
            character: None,
            feedback: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn content_policy_switches_to_simplified_prompt() {
        let model = ScriptedModel::new(vec![ImageApiError::ContentPolicy {
            message: "flagged".into(),
        }]);
        let config = StoryConfig::default();
        let out = generate_slot_image(&model, &Unlimited, &parts(), &config, false).await;

        assert!(matches!(out, SlotImage::Generated { attempts: 2, simplified: true, .. }));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("ANATOMICAL CORRECTNESS"));
        assert!(!prompts[1].contains("ANATOMICAL CORRECTNESS"));
        assert!(prompts[1].contains("SCENE: Ana jumps in puddles"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_yield_placeholder() {
        let model = ScriptedModel::new(vec![
            ImageApiError::Server { status: 500, message: "x".into() },
            ImageApiError::Timeout { secs: 120 },
        ]);
        let config = StoryConfig::default();
        match generate_slot_image(&model, &Unlimited, &parts(), &config, false).await {
            SlotImage::Placeholder { url, error: Some(PageError::ImageFailed { page, attempts, kind, .. }) } => {
                assert!(is_placeholder(&url));
                assert_eq!(page, 2);
                assert_eq!(attempts, 2);
                assert_eq!(kind, ImageFailureKind::Timeout);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_errors_stop_immediately() {
        let model = ScriptedModel::new(vec![ImageApiError::Auth { message: "bad key".into() }]);
        let config = StoryConfig::builder().image_attempts(4).build().unwrap();
        let out = generate_slot_image(&model, &Unlimited, &parts(), &config, false).await;
        assert!(matches!(out, SlotImage::Placeholder { .. }));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn placeholder_mode_skips_model() {
        let model = ScriptedModel::new(vec![]);
        let config = StoryConfig::builder().use_placeholders(true).build().unwrap();
        let out = generate_slot_image(&model, &Unlimited, &parts(), &config, false).await;
        assert!(matches!(out, SlotImage::Placeholder { error: None, .. }));
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
