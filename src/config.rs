//! Configuration types for storybook generation.
//!
//! All pipeline behaviour is controlled through [`StoryConfig`], built via its
//! [`StoryConfigBuilder`]. Process-wide switches (placeholder mode, page
//! count, rate limits) live here and are passed explicitly to every entry
//! point, so two requests with different configs never interfere.

use crate::error::StorybookError;
use crate::pipeline::image::ImageModel;
use crate::pipeline::text::TextModel;
use crate::progress::ProgressCallback;
use crate::storage::StoryStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for story generation, storage and PDF assembly.
///
/// Built via [`StoryConfig::builder()`] or using [`StoryConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_storybook::StoryConfig;
///
/// let config = StoryConfig::builder()
///     .page_count(6)
///     .use_placeholders(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.page_count, 6);
/// ```
#[derive(Clone)]
pub struct StoryConfig {
    /// Number of story pages. Range: 1–20. Default: 8.
    pub page_count: usize,

    // ── Text model ───────────────────────────────────────────────────────
    /// Text model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub text_model: Option<String>,

    /// Text provider name ("openai", "anthropic", …). If None, auto-detected.
    pub text_provider_name: Option<String>,

    /// Pre-constructed text model. Takes precedence over `text_provider_name`.
    pub text_provider: Option<Arc<dyn TextModel>>,

    /// Sampling temperature for story text. Default: 0.8.
    pub temperature: f32,

    /// Maximum tokens for the story completion. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a failed text-model call (transport errors only). Default: 2.
    pub text_max_retries: u32,

    /// Initial text retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub text_retry_backoff_ms: u64,

    /// How the protagonist profile is derived. Default: [`CharacterStrategy::Model`].
    pub character_strategy: CharacterStrategy,

    // ── Image model ──────────────────────────────────────────────────────
    /// Pre-constructed image model. Takes precedence over the HTTP client settings.
    pub image_provider: Option<Arc<dyn ImageModel>>,

    /// Image model identifier. Default: "dall-e-3".
    pub image_model: String,

    /// Base URL of the OpenAI-compatible images API. Default: "https://api.openai.com/v1".
    pub image_api_base: String,

    /// API key for the images API. Falls back to `OPENAI_API_KEY` when None.
    pub image_api_key: Option<String>,

    /// Requested image size. Default: "1024x1024".
    pub image_size: String,

    /// Skip the image model and use placeholder images everywhere. Default: false.
    pub use_placeholders: bool,

    /// Attempts per image before falling back to a placeholder. Default: 2.
    pub image_attempts: u32,

    /// Linear backoff step between image attempts in milliseconds. Default: 2000.
    pub image_retry_backoff_ms: u64,

    /// Retry a content-policy rejection with a simplified prompt. Default: true.
    pub simplify_on_policy_violation: bool,

    /// Maximum characters in an image prompt. Default: 4000.
    pub prompt_char_budget: usize,

    /// Image requests allowed per rate window. Default: 5.
    pub image_requests_per_window: usize,

    /// Rate window length in milliseconds; slightly over one minute. Default: 61000.
    pub rate_window_ms: u64,

    /// Retry failed images once more after the main pass. Default: true.
    pub retry_failed_pass: bool,

    /// Delay before the retry pass in milliseconds. Default: 10000.
    pub failed_pass_delay_ms: u64,

    /// Render a character reference image (`character_profile.png`). Default: false.
    pub render_character_reference: bool,

    // ── Storage & documents ──────────────────────────────────────────────
    /// Directory holding one folder per story. Default: "stories".
    pub stories_root: PathBuf,

    /// URL prefix under which the stories root is served, e.g. "/stories".
    /// When None, stored image locations are filesystem paths.
    pub public_base_url: Option<String>,

    /// Pre-constructed store. Takes precedence over `stories_root`.
    pub store: Option<Arc<dyn StoryStore>>,

    /// TrueType font embedded in PDFs. Falls back to Helvetica when None or unreadable.
    pub font_path: Option<PathBuf>,

    /// Timeout for image downloads in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Timeout for each image-model call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Interval between canned status events on the SSE endpoint. Default: 3000.
    pub status_interval_ms: u64,

    /// Receives per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            page_count: 8,
            text_model: None,
            text_provider_name: None,
            text_provider: None,
            temperature: 0.8,
            max_tokens: 4096,
            text_max_retries: 2,
            text_retry_backoff_ms: 1000,
            character_strategy: CharacterStrategy::default(),
            image_provider: None,
            image_model: "dall-e-3".to_string(),
            image_api_base: "https://api.openai.com/v1".to_string(),
            image_api_key: None,
            image_size: "1024x1024".to_string(),
            use_placeholders: false,
            image_attempts: 2,
            image_retry_backoff_ms: 2000,
            simplify_on_policy_violation: true,
            prompt_char_budget: 4000,
            image_requests_per_window: 5,
            rate_window_ms: 61_000,
            retry_failed_pass: true,
            failed_pass_delay_ms: 10_000,
            render_character_reference: false,
            stories_root: PathBuf::from("stories"),
            public_base_url: None,
            store: None,
            font_path: None,
            download_timeout_secs: 60,
            api_timeout_secs: 120,
            status_interval_ms: 3000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryConfig")
            .field("page_count", &self.page_count)
            .field("text_model", &self.text_model)
            .field("text_provider_name", &self.text_provider_name)
            .field("text_provider", &self.text_provider.as_ref().map(|_| "<dyn TextModel>"))
            .field("temperature", &self.temperature)
            .field("character_strategy", &self.character_strategy)
            .field("image_provider", &self.image_provider.as_ref().map(|_| "<dyn ImageModel>"))
            .field("image_model", &self.image_model)
            .field("image_api_base", &self.image_api_base)
            .field("image_api_key", &self.image_api_key.as_ref().map(|_| "<redacted>"))
            .field("use_placeholders", &self.use_placeholders)
            .field("image_attempts", &self.image_attempts)
            .field("prompt_char_budget", &self.prompt_char_budget)
            .field("image_requests_per_window", &self.image_requests_per_window)
            .field("rate_window_ms", &self.rate_window_ms)
            .field("stories_root", &self.stories_root)
            .field("public_base_url", &self.public_base_url)
            .field("font_path", &self.font_path)
            .finish()
    }
}

impl StoryConfig {
    /// Create a new builder for `StoryConfig`.
    pub fn builder() -> StoryConfigBuilder {
        StoryConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`StoryConfig`].
#[derive(Debug)]
pub struct StoryConfigBuilder {
    config: StoryConfig,
}

impl StoryConfigBuilder {
    pub fn page_count(mut self, n: usize) -> Self {
        self.config.page_count = n;
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = Some(model.into());
        self
    }

    pub fn text_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.text_provider_name = Some(name.into());
        self
    }

    pub fn text_provider(mut self, provider: Arc<dyn TextModel>) -> Self {
        self.config.text_provider = Some(provider);
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

    pub fn text_max_retries(mut self, n: u32) -> Self {
        self.config.text_max_retries = n;
        self
    }

    pub fn text_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.text_retry_backoff_ms = ms;
        self
    }

    pub fn character_strategy(mut self, strategy: CharacterStrategy) -> Self {
        self.config.character_strategy = strategy;
        self
    }

    pub fn image_provider(mut self, provider: Arc<dyn ImageModel>) -> Self {
        self.config.image_provider = Some(provider);
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = model.into();
        self
    }

    pub fn image_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.image_api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn image_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.image_api_key = Some(key.into());
        self
    }

    pub fn image_size(mut self, size: impl Into<String>) -> Self {
        self.config.image_size = size.into();
        self
    }

    pub fn use_placeholders(mut self, v: bool) -> Self {
        self.config.use_placeholders = v;
        self
    }

    pub fn image_attempts(mut self, n: u32) -> Self {
        self.config.image_attempts = n.max(1);
        self
    }

    pub fn image_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.image_retry_backoff_ms = ms;
        self
    }

    pub fn simplify_on_policy_violation(mut self, v: bool) -> Self {
        self.config.simplify_on_policy_violation = v;
        self
    }

    pub fn prompt_char_budget(mut self, n: usize) -> Self {
        self.config.prompt_char_budget = n;
        self
    }

    pub fn image_requests_per_window(mut self, n: usize) -> Self {
        self.config.image_requests_per_window = n.max(1);
        self
    }

    pub fn rate_window_ms(mut self, ms: u64) -> Self {
        self.config.rate_window_ms = ms;
        self
    }

    pub fn retry_failed_pass(mut self, v: bool) -> Self {
        self.config.retry_failed_pass = v;
        self
    }

    pub fn failed_pass_delay_ms(mut self, ms: u64) -> Self {
        self.config.failed_pass_delay_ms = ms;
        self
    }

    pub fn render_character_reference(mut self, v: bool) -> Self {
        self.config.render_character_reference = v;
        self
    }

    pub fn stories_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stories_root = path.into();
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn store(mut self, store: Arc<dyn StoryStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn status_interval_ms(mut self, ms: u64) -> Self {
        self.config.status_interval_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StoryConfig, StorybookError> {
        let c = &self.config;
        if c.page_count == 0 || c.page_count > 20 {
            return Err(StorybookError::InvalidConfig(format!(
                "page count must be 1–20, got {}",
                c.page_count
            )));
        }
        if c.prompt_char_budget < 200 {
            return Err(StorybookError::InvalidConfig(format!(
                "prompt budget must be ≥ 200 characters, got {}",
                c.prompt_char_budget
            )));
        }
        if c.rate_window_ms == 0 {
            return Err(StorybookError::InvalidConfig(
                "rate window must be > 0 ms".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the protagonist's appearance is derived for image prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterStrategy {
    /// Ask the text model for a structured profile; heuristic on failure. (default)
    #[default]
    Model,
    /// Scan the generated scene descriptions with pattern matching only.
    Heuristic,
}
