//! Text stage: one structured completion turned into a [`StoryDocument`].
//!
//! The model is asked for strict JSON (see [`crate::prompts::story_prompt`]).
//! Models still wrap answers in a markdown fence now and then, so the parser
//! strips one outer fence before decoding. Anything else that does not match
//! the expected structure is a [`StorybookError::GenerationFormat`]: the call
//! is not repeated for format problems, only for transport failures.
//!
//! ## Provider resolution
//!
//! [`resolve_text_model`] walks the same chain the CLI documents:
//!
//! 1. **Injected model** (`config.text_provider`) - tests and embedders.
//! 2. **Named provider + model** (`config.text_provider_name`).
//! 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
//! 4. **OpenAI key** (`OPENAI_API_KEY`), then full auto-detection through
//!    [`ProviderFactory::from_env`].

use crate::config::StoryConfig;
use crate::error::StorybookError;
use crate::pipeline::retry::{retry_with_backoff_if, Backoff, RetryPolicy};
use crate::prompts::{story_prompt, STORY_SYSTEM_PROMPT};
use crate::story::{Page, StoryDocument, StoryMetadata, StoryRequest};
use async_trait::async_trait;
use chrono::Utc;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-mini";

/// Sampling settings for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl TextOptions {
    pub fn from_config(config: &StoryConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A completed text-model call.
#[derive(Debug, Clone, Default)]
pub struct TextCompletion {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A chat-style text model.
///
/// Errors returned here are transport failures and are retried; use
/// [`StorybookError::TextModel`].
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Identifier reported in diagnostics, e.g. `openai/gpt-4.1-mini`.
    fn name(&self) -> String;

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &TextOptions,
    ) -> Result<TextCompletion, StorybookError>;
}

/// [`TextModel`] backed by an `edgequake-llm` provider.
pub struct LlmTextModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmTextModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl TextModel for LlmTextModel {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &TextOptions,
    ) -> Result<TextCompletion, StorybookError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let opts = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&opts))
            .await
            .map_err(|e| StorybookError::TextModel {
                message: e.to_string(),
            })?;
        Ok(TextCompletion {
            content: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

// ── Provider resolution ─────────────────────────────────────────────────────

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn TextModel>, StorybookError> {
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        StorybookError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmTextModel::new(provider, format!("{name}/{model}"))))
}

/// Resolve the text model, from most-specific to least-specific.
pub fn resolve_text_model(config: &StoryConfig) -> Result<Arc<dyn TextModel>, StorybookError> {
    if let Some(ref model) = config.text_provider {
        return Ok(Arc::clone(model));
    }

    if let Some(ref name) = config.text_provider_name {
        let model = config.text_model.as_deref().unwrap_or(DEFAULT_TEXT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.text_model.as_deref().unwrap_or(DEFAULT_TEXT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| StorybookError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No text model could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(Arc::new(LlmTextModel::new(provider, "auto")))
}

// ── Completion with retry ───────────────────────────────────────────────────

/// Call the model, retrying transport failures with exponential backoff.
pub async fn complete_with_retry(
    model: &dyn TextModel,
    system: &str,
    user: &str,
    options: &TextOptions,
    config: &StoryConfig,
) -> Result<TextCompletion, StorybookError> {
    let base = Duration::from_millis(config.text_retry_backoff_ms);
    let policy = RetryPolicy::new(
        config.text_max_retries + 1,
        Backoff::Exponential {
            base,
            max: base.saturating_mul(8),
        },
    );
    retry_with_backoff_if(
        policy,
        "text model",
        move |_| model.complete(system, user, options),
        |e| matches!(e, StorybookError::TextModel { .. }),
    )
    .await
}

/// A parsed story plus the token usage of the completion that produced it.
#[derive(Debug, Clone)]
pub struct StoryText {
    pub document: StoryDocument,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Generate the story text for `request`.
///
/// The document has exactly `config.page_count` pages, image URLs still
/// empty.
pub async fn generate_story_text(
    model: &dyn TextModel,
    request: &StoryRequest,
    config: &StoryConfig,
) -> Result<StoryText, StorybookError> {
    let start = Instant::now();
    let prompt = story_prompt(request, config.page_count);
    let completion = complete_with_retry(
        model,
        STORY_SYSTEM_PROMPT,
        &prompt,
        &TextOptions::from_config(config),
        config,
    )
    .await?;

    debug!(
        "story text: {} input tokens, {} output tokens, {:?}",
        completion.prompt_tokens,
        completion.completion_tokens,
        start.elapsed()
    );

    let document = parse_story(&completion.content, request, config.page_count)?;
    info!(
        "Story text ready: '{}' ({} pages) via {}",
        document.title,
        document.pages.len(),
        model.name()
    );
    Ok(StoryText {
        document,
        prompt_tokens: completion.prompt_tokens,
        completion_tokens: completion.completion_tokens,
    })
}

// ── Parsing ─────────────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Strip one outer markdown code fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_OUTER_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Decode a model answer into a JSON object.
pub fn parse_json_object(raw: &str) -> Result<serde_json::Map<String, Value>, StorybookError> {
    let body = strip_code_fence(raw);
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StorybookError::GenerationFormat {
            detail: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(StorybookError::GenerationFormat {
            detail: format!("response is not valid JSON: {e}"),
        }),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn required_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a str, StorybookError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StorybookError::GenerationFormat {
            detail: format!("missing or empty '{key}'"),
        })
}

/// Validate a model answer and build the document.
///
/// More pages than requested are truncated; fewer is an error. Pages are
/// renumbered `1..=page_count` in the order given.
pub fn parse_story(
    raw: &str,
    request: &StoryRequest,
    page_count: usize,
) -> Result<StoryDocument, StorybookError> {
    let obj = parse_json_object(raw)?;
    let title = required_str(&obj, "title")?.to_string();
    let cover_description = required_str(&obj, "coverDescription")?.to_string();

    let raw_pages = obj
        .get("pages")
        .and_then(Value::as_array)
        .ok_or_else(|| StorybookError::GenerationFormat {
            detail: "missing 'pages' array".into(),
        })?;

    if raw_pages.len() < page_count {
        return Err(StorybookError::GenerationFormat {
            detail: format!(
                "expected {page_count} pages, got {}",
                raw_pages.len()
            ),
        });
    }
    if raw_pages.len() > page_count {
        warn!(
            "Model returned {} pages, truncating to {page_count}",
            raw_pages.len()
        );
    }

    let mut pages = Vec::with_capacity(page_count);
    for (i, raw_page) in raw_pages.iter().take(page_count).enumerate() {
        let number = i + 1;
        let page_obj = raw_page
            .as_object()
            .ok_or_else(|| StorybookError::GenerationFormat {
                detail: format!("page {number} is not an object"),
            })?;
        let content = page_obj
            .get("content")
            .or_else(|| page_obj.get("text"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StorybookError::GenerationFormat {
                detail: format!("page {number} has no 'content'"),
            })?;
        let image_description = match page_obj
            .get("imageDescription")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => d.to_string(),
            None => {
                warn!("Page {number} has no imageDescription, using its text");
                content.to_string()
            }
        };
        pages.push(Page {
            page_number: number,
            content: content.to_string(),
            image_description,
            image_url: String::new(),
        });
    }

    Ok(StoryDocument {
        title,
        cover_description,
        cover_image: String::new(),
        pages,
        characters: parse_characters(obj.get("characters")),
        metadata: StoryMetadata {
            language: request.language,
            theme: request.theme,
            style: request.style,
            age_range: request.effective_age(),
            child_name: request.child_name.clone(),
            generated_at: Utc::now(),
        },
    })
}

/// Accept either `{"Name": "desc"}` or `[{"name": .., "description": ..}]`.
fn parse_characters(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Some(Value::Object(map)) => {
            for (name, desc) in map {
                if let Some(d) = desc.as_str().filter(|d| !d.trim().is_empty()) {
                    out.insert(name.clone(), d.trim().to_string());
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let name = item.get("name").and_then(Value::as_str);
                let desc = item
                    .get("description")
                    .or_else(|| item.get("appearance"))
                    .and_then(Value::as_str);
                if let (Some(n), Some(d)) = (name, desc) {
                    out.insert(n.trim().to_string(), d.trim().to_string());
                }
            }
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{IllustrationStyle, Language, Theme};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> StoryRequest {
        StoryRequest {
            child_name: "Ana".into(),
            theme: Theme::Friendship,
            style: IllustrationStyle::Watercolor,
            language: Language::English,
            age_range: None,
            custom_prompt: None,
        }
    }

    fn story_json(pages: usize) -> String {
        let pages: Vec<Value> = (1..=pages)
            .map(|n| {
                serde_json::json!({
                    "pageNumber": n,
                    "content": format!("Text {n}"),
                    "imageDescription": format!("Scene {n}"),
                })
            })
            .collect();
        serde_json::json!({
            "title": "Ana's Day",
            "coverDescription": "Ana waves hello",
            "characters": {"Ana": "a girl with black braids"},
            "pages": pages,
        })
        .to_string()
    }

    #[test]
    fn parses_fenced_json() {
        let raw = format!("```json\n{}\n```", story_json(3));
        let doc = parse_story(&raw, &request(), 3).unwrap();
        assert_eq!(doc.title, "Ana's Day");
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[2].page_number, 3);
        assert_eq!(doc.pages[0].image_url, "");
        assert_eq!(doc.characters["Ana"], "a girl with black braids");
        assert_eq!(doc.metadata.child_name, "Ana");
    }

    #[test]
    fn extra_pages_are_truncated() {
        let doc = parse_story(&story_json(10), &request(), 8).unwrap();
        assert_eq!(doc.pages.len(), 8);
        assert_eq!(doc.pages.last().unwrap().content, "Text 8");
    }

    #[test]
    fn too_few_pages_is_format_error() {
        let err = parse_story(&story_json(5), &request(), 8).unwrap_err();
        assert!(matches!(err, StorybookError::GenerationFormat { .. }));
        assert!(err.to_string().contains("expected 8 pages, got 5"));
    }

    #[test]
    fn missing_title_is_format_error() {
        let raw = r#"{"coverDescription": "x", "pages": []}"#;
        let err = parse_story(raw, &request(), 1).unwrap_err();
        assert!(err.to_string().contains("'title'"));
    }

    #[test]
    fn non_json_is_format_error() {
        let err = parse_story("Once upon a time...", &request(), 1).unwrap_err();
        assert!(matches!(err, StorybookError::GenerationFormat { .. }));
    }

    #[test]
    fn character_list_form_accepted() {
        let v = serde_json::json!([{"name": "Toby", "description": "a brown dog"}]);
        let chars = parse_characters(Some(&v));
        assert_eq!(chars["Toby"], "a brown dog");
    }

    struct FlakyModel {
        calls: AtomicU32,
        fail_first: u32,
        body: String,
    }

    #[async_trait]
    impl TextModel for FlakyModel {
        fn name(&self) -> String {
            "fake/flaky".into()
        }

        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &TextOptions,
        ) -> Result<TextCompletion, StorybookError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(StorybookError::TextModel {
                    message: "connection reset".into(),
                });
            }
            Ok(TextCompletion {
                content: self.body.clone(),
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried() {
        let model = FlakyModel {
            calls: AtomicU32::new(0),
            fail_first: 2,
            body: story_json(4),
        };
        let config = StoryConfig::builder().page_count(4).build().unwrap();
        let text = generate_story_text(&model, &request(), &config).await.unwrap();
        assert_eq!(text.document.pages.len(), 4);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn format_errors_are_not_retried() {
        let model = FlakyModel {
            calls: AtomicU32::new(0),
            fail_first: 0,
            body: "not json".into(),
        };
        let config = StoryConfig::builder().page_count(2).build().unwrap();
        let err = generate_story_text(&model, &request(), &config).await.unwrap_err();
        assert!(matches!(err, StorybookError::GenerationFormat { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn injected_model_wins() {
        let model: Arc<dyn TextModel> = Arc::new(FlakyModel {
            calls: AtomicU32::new(0),
            fail_first: 0,
            body: String::new(),
        });
        let config = StoryConfig::builder()
            .text_provider(Arc::clone(&model))
            .build()
            .unwrap();
        let resolved = resolve_text_model(&config).unwrap();
        assert_eq!(resolved.name(), "fake/flaky");
    }
}
