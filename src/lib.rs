//! # edgequake-storybook
//!
//! Generate illustrated children's storybooks with a text LLM and an image
//! model, then bind them into a PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! StoryRequest
//!  │
//!  ├─ 1. Text       one JSON completion → title, cover scene, N pages
//!  ├─ 2. Character  protagonist profile (model, or regex over the scenes)
//!  ├─ 3. Images     prompt → sanitize → trim → image model
//!  │                (rate-limited, retried, placeholder when exhausted)
//!  ├─ 4. Resume     generation_progress.json skips finished images
//!  ├─ 5. Persist    stories/{folder}/story.json, cover.png, pageN.png
//!  └─ 6. Assemble   PDF: cover + one page per story page
//! ```
//!
//! Image failures never fail a story: each slot degrades to a placeholder
//! and the reason is reported in [`GenerationDebug`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_storybook::{generate_story, StoryConfig, StoryRequest, StoryRequestBody};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Text provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = StoryConfig::builder().page_count(6).build()?;
//!     let request = StoryRequest::try_from(StoryRequestBody {
//!         child_name: Some("Ana".into()),
//!         theme: Some("moral-values".into()),
//!         style: Some("pixar-style".into()),
//!         language: Some("spanish".into()),
//!         ..Default::default()
//!     })?;
//!     let output = generate_story(&request, &config).await?;
//!     println!("{} ({} pages)", output.story.title, output.page_images.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storybook` binary (clap, anyhow, indicatif, tracing-subscriber, dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod storage;
pub mod story;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CharacterStrategy, StoryConfig, StoryConfigBuilder};
pub use error::{ImageApiError, ImageFailureKind, PageError, StorybookError};
pub use generate::{
    generate_character_profile, generate_story, list_stories, regenerate_page_image,
    render_story_pdf, save_story, CharacterProfileRequest, RegenerateImageRequest, RenderedPdf,
};
pub use output::{GenerationDebug, RegeneratedImage, SavedStory, StoryOutput};
pub use pipeline::image::{GeneratedImage, ImageModel, OpenAiImageModel};
pub use pipeline::limiter::{RequestLimiter, WindowLimiter};
pub use pipeline::text::{TextCompletion, TextModel, TextOptions};
pub use pipeline::ImageSlot;
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{LocalStore, StoryStore, StorySummary};
pub use story::{
    AgeRange, CharacterProfile, IllustrationStyle, Language, Page, ProfileSource, StoryDocument,
    StoryMetadata, StoryRequest, StoryRequestBody, Theme,
};
