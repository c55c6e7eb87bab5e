//! Generation entry points.
//!
//! [`generate_story`] runs the whole pipeline for one request:
//!
//! ```text
//! text → character profile → folder + progress record → images → story.json
//! ```
//!
//! The other functions serve the remaining endpoints: regenerating one
//! illustration from feedback, building a standalone character profile,
//! saving an edited story, listing stories and rendering a stored story to
//! PDF.

use crate::config::{CharacterStrategy, StoryConfig};
use crate::error::{PageError, StorybookError};
use crate::output::{GenerationDebug, RegeneratedImage, SavedStory, StoryOutput};
use crate::pipeline::assemble::{assemble_pdf, load_story_images, PdfOutput};
use crate::pipeline::character::{profile_for_story, profile_from_context, profile_from_model};
use crate::pipeline::font::PdfFont;
use crate::pipeline::image::{
    download_client, download_image, generate_slot_image, image_bytes, is_placeholder,
    GeneratedImage, ImageModel, OpenAiImageModel, SlotImage,
};
use crate::pipeline::limiter::{RequestLimiter, Unlimited, WindowLimiter};
use crate::pipeline::resume::ProgressTracker;
use crate::pipeline::text::{generate_story_text, resolve_text_model, StoryText};
use crate::pipeline::ImageSlot;
use crate::prompts::ImagePromptParts;
use crate::storage::{
    folder_has_story, read_story, resolve_collision, story_folder_name, write_story, LocalStore,
    StoryStore, StorySummary,
};
use crate::story::{
    CharacterProfile, IllustrationStyle, ProfileSource, StoryDocument, StoryRequest,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Resolution ──────────────────────────────────────────────────────────────

/// The configured store, or a [`LocalStore`] over `stories_root`.
pub fn resolve_store(config: &StoryConfig) -> Arc<dyn StoryStore> {
    match config.store {
        Some(ref store) => Arc::clone(store),
        None => Arc::new(LocalStore::new(
            config.stories_root.clone(),
            config.public_base_url.clone(),
        )),
    }
}

/// Stand-in model for placeholder mode; never called.
struct PlaceholderModel;

#[async_trait]
impl ImageModel for PlaceholderModel {
    fn name(&self) -> String {
        "placeholder".to_string()
    }

    async fn generate(
        &self,
        _prompt: &str,
        _size: &str,
    ) -> Result<GeneratedImage, crate::error::ImageApiError> {
        Err(crate::error::ImageApiError::Request {
            message: "placeholder mode".into(),
        })
    }
}

/// The configured image model, the OpenAI-compatible client, or a stand-in
/// when placeholders are enabled.
pub fn resolve_image_model(config: &StoryConfig) -> Result<Arc<dyn ImageModel>, StorybookError> {
    if let Some(ref model) = config.image_provider {
        return Ok(Arc::clone(model));
    }
    if config.use_placeholders {
        return Ok(Arc::new(PlaceholderModel));
    }
    Ok(Arc::new(OpenAiImageModel::from_config(config)?))
}

// ── Per-slot illustration ───────────────────────────────────────────────────

/// Everything an image job needs, shared by all jobs of one run.
struct ImageJob<'a> {
    model: &'a dyn ImageModel,
    limiter: &'a dyn RequestLimiter,
    store: &'a dyn StoryStore,
    client: &'a reqwest::Client,
    tracker: Option<&'a ProgressTracker>,
    config: &'a StoryConfig,
    folder: &'a str,
    title: &'a str,
    style: IllustrationStyle,
    profile: Option<&'a CharacterProfile>,
    total: usize,
}

/// How one slot ended.
#[derive(Debug, Clone)]
struct SlotOutcome {
    slot: ImageSlot,
    location: String,
    generated: bool,
    failure: Option<PageError>,
    problems: Vec<PageError>,
}

impl ImageJob<'_> {
    async fn illustrate(
        &self,
        slot: ImageSlot,
        scene: &str,
        feedback: Option<&str>,
        simplified: bool,
    ) -> SlotOutcome {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_image_start(slot, self.total);
        }
        let parts = ImagePromptParts {
            slot,
            style: self.style,
            title: self.title,
            scene,
            character: self.profile,
            feedback,
        };
        let page = slot.index().unwrap_or(0);

        let outcome = match generate_slot_image(self.model, self.limiter, &parts, self.config, simplified)
            .await
        {
            SlotImage::Generated { image, .. } => self.persist(slot, page, image).await,
            SlotImage::Placeholder { url, error } => SlotOutcome {
                slot,
                location: url,
                generated: false,
                failure: error,
                problems: Vec::new(),
            },
        };

        if let Some(index) = slot.index() {
            if let Some(tracker) = self.tracker {
                let recorded = if outcome.generated && outcome.problems.is_empty() {
                    tracker.record_success(index, &outcome.location).await
                } else if !self.config.use_placeholders {
                    tracker.record_failure(index).await
                } else {
                    Ok(())
                };
                if let Err(e) = recorded {
                    warn!("Progress record not updated for {slot}: {e}");
                }
            }
        }

        if let Some(ref cb) = self.config.progress_callback {
            match outcome.failure {
                Some(ref e) => cb.on_image_error(slot, self.total, &e.to_string()),
                None => cb.on_image_complete(slot, self.total, !outcome.generated),
            }
        }
        outcome
    }

    /// Fetch and store a generated image. Failures keep the best location
    /// available and are reported as problems.
    async fn persist(&self, slot: ImageSlot, page: usize, image: GeneratedImage) -> SlotOutcome {
        let mut problems = Vec::new();
        let fallback_location = match image {
            GeneratedImage::Url(ref url) => url.clone(),
            GeneratedImage::Bytes(ref bytes) => {
                format!("data:image/png;base64,{}", BASE64.encode(bytes))
            }
        };

        let location = match image_bytes(self.client, &image).await {
            Ok(bytes) => {
                let key = format!("{}/{}", self.folder, slot.file_name());
                match self.store.put(&key, bytes).await {
                    Ok(location) => location,
                    Err(e) => {
                        warn!("{slot}: generated but not stored: {e}");
                        problems.push(PageError::StoreFailed {
                            page,
                            detail: e.to_string(),
                        });
                        fallback_location
                    }
                }
            }
            Err(detail) => {
                warn!("{slot}: generated but download failed: {detail}");
                problems.push(PageError::DownloadFailed {
                    page,
                    url: fallback_location.clone(),
                    detail,
                });
                fallback_location
            }
        };

        SlotOutcome {
            slot,
            location,
            generated: true,
            failure: None,
            problems,
        }
    }
}

// ── Full pipeline ───────────────────────────────────────────────────────────

/// Generate a complete storybook for `request`.
///
/// # Returns
/// `Ok(StoryOutput)` whenever the story text was produced, even if some or
/// all illustrations fell back to placeholders (see `output.debug`).
///
/// # Errors
/// Fatal errors only: no text model configured, text model failure after
/// retries, or a text response that does not parse into the requested
/// number of pages.
pub async fn generate_story(
    request: &StoryRequest,
    config: &StoryConfig,
) -> Result<StoryOutput, StorybookError> {
    let total_start = Instant::now();
    info!(
        "Generating story for {} ({}, {}, {})",
        request.child_name, request.theme, request.style, request.language
    );

    let text_model = resolve_text_model(config)?;
    let image_model = resolve_image_model(config)?;
    let store = resolve_store(config);
    let client = download_client(config.download_timeout_secs)?;

    // ── Step 1: Story text ───────────────────────────────────────────────
    let text_start = Instant::now();
    let StoryText {
        mut document,
        prompt_tokens,
        completion_tokens,
    } = generate_story_text(text_model.as_ref(), request, config).await?;
    let text_duration_ms = text_start.elapsed().as_millis() as u64;

    // ── Step 2: Character profile ────────────────────────────────────────
    let character_start = Instant::now();
    let mut profile = profile_for_story(Some(text_model.as_ref()), &document, config).await;
    if let Some(ref name) = profile.name {
        document
            .characters
            .entry(name.clone())
            .or_insert_with(|| profile.description.clone());
    }

    // ── Step 3: Folder and progress record ───────────────────────────────
    let folder = story_folder_name(&document.title);
    let tracker = ProgressTracker::load(Arc::clone(&store), &folder).await;
    let progress = tracker.snapshot().await;
    let limiter = WindowLimiter::new(
        config.image_requests_per_window,
        Duration::from_millis(config.rate_window_ms),
    );

    // ── Step 4: Plan image slots ─────────────────────────────────────────
    let scenes: Vec<(ImageSlot, String)> = std::iter::once((
        ImageSlot::Cover,
        document.cover_description.clone(),
    ))
    .chain(
        document
            .pages
            .iter()
            .map(|p| (ImageSlot::Page(p.page_number), p.image_description.clone())),
    )
    .collect();

    let mut locations: BTreeMap<usize, String> = BTreeMap::new();
    let mut skipped = Vec::new();
    let mut pending = Vec::new();
    for (slot, scene) in &scenes {
        let index = slot.index().unwrap_or(0);
        match progress.locations.get(&index) {
            Some(location) if progress.is_succeeded(index) => {
                debug!("{slot}: reusing {location}");
                locations.insert(index, location.clone());
                skipped.push(index);
            }
            _ => pending.push((*slot, scene.as_str())),
        }
    }
    if !skipped.is_empty() {
        info!(
            "Resuming '{folder}': {} image(s) already done, {} to go",
            skipped.len(),
            pending.len()
        );
    }
    let total = pending.len() + usize::from(config.render_character_reference);
    let mut slots_generated = 0;
    if let Some(ref cb) = config.progress_callback {
        cb.on_generation_start(&document.title, total);
    }

    if config.render_character_reference {
        let job = ImageJob {
            model: image_model.as_ref(),
            limiter: &limiter,
            store: store.as_ref(),
            client: &client,
            tracker: None,
            config,
            folder: &folder,
            title: &document.title,
            style: request.style,
            profile: None,
            total,
        };
        let portrait = job
            .illustrate(ImageSlot::CharacterReference, &profile.description, None, false)
            .await;
        if portrait.generated {
            slots_generated += 1;
            profile.reference_image = Some(portrait.location);
        }
    }
    let character_duration_ms = character_start.elapsed().as_millis() as u64;

    // ── Step 5: Illustrate ───────────────────────────────────────────────
    let image_start = Instant::now();
    let job = ImageJob {
        model: image_model.as_ref(),
        limiter: &limiter,
        store: store.as_ref(),
        client: &client,
        tracker: Some(&tracker),
        config,
        folder: &folder,
        title: &document.title,
        style: request.style,
        profile: Some(&profile),
        total,
    };
    let concurrency = limiter.quota();
    let job_ref = &job;

    let mut outcomes: BTreeMap<usize, SlotOutcome> = stream::iter(pending)
        .map(|(slot, scene)| async move { job_ref.illustrate(slot, scene, None, false).await })
        .buffer_unordered(concurrency)
        .map(|o| (o.slot.index().unwrap_or(0), o))
        .boxed()
        .collect()
        .await;

    // ── Step 6: Second pass over failures ────────────────────────────────
    let failed: Vec<(ImageSlot, &str)> = outcomes
        .values()
        .filter(|o| o.failure.is_some())
        .filter_map(|o| {
            scenes
                .iter()
                .find(|(slot, _)| *slot == o.slot)
                .map(|(slot, scene)| (*slot, scene.as_str()))
        })
        .collect();
    if config.retry_failed_pass && !config.use_placeholders && !failed.is_empty() {
        info!(
            "Retrying {} failed image(s) after {}ms",
            failed.len(),
            config.failed_pass_delay_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_retry_pass(failed.len());
        }
        tokio::time::sleep(Duration::from_millis(config.failed_pass_delay_ms)).await;
        let retried: Vec<SlotOutcome> = stream::iter(failed)
            .map(|(slot, scene)| async move { job_ref.illustrate(slot, scene, None, true).await })
            .buffer_unordered(concurrency)
            .boxed()
            .collect()
            .await;
        for outcome in retried {
            outcomes.insert(outcome.slot.index().unwrap_or(0), outcome);
        }
    }
    let image_duration_ms = image_start.elapsed().as_millis() as u64;
    drop(job);

    // ── Step 7: Apply results ────────────────────────────────────────────
    let mut debug = GenerationDebug {
        skipped_pages: skipped,
        story_folder: folder.clone(),
        text_model: text_model.name(),
        image_model: image_model.name(),
        prompt_tokens,
        completion_tokens,
        text_duration_ms,
        character_duration_ms,
        image_duration_ms,
        ..Default::default()
    };
    for (index, outcome) in outcomes {
        match (index, outcome.generated) {
            (0, generated) => {
                debug.cover_generated = generated;
                slots_generated += usize::from(generated);
            }
            (_, true) => {
                debug.images_generated += 1;
                slots_generated += 1;
            }
            (_, false) => debug.placeholders_used += 1,
        }
        if let Some(failure) = outcome.failure {
            debug.failed_pages.push(index);
            debug.page_errors.push(failure);
        }
        for problem in outcome.problems {
            debug.warnings.push(problem.to_string());
            debug.page_errors.push(problem);
        }
        locations.insert(index, outcome.location);
    }

    if let Some(cover) = locations.get(&0) {
        document.cover_image = cover.clone();
    }
    for page in &mut document.pages {
        if let Some(location) = locations.get(&page.page_number) {
            page.image_url = location.clone();
        }
    }

    // ── Step 8: Persist story.json ───────────────────────────────────────
    if let Err(e) = write_story(store.as_ref(), &folder, &document).await {
        warn!("Story '{folder}' not saved: {e}");
        debug.warnings.push(format!("story.json not saved: {e}"));
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_generation_complete(total, slots_generated);
    }
    debug.total_duration_ms = total_start.elapsed().as_millis() as u64;
    let (images_generated, placeholders_used, reused, total_ms) = (
        debug.images_generated,
        debug.placeholders_used,
        debug.skipped_pages.len(),
        debug.total_duration_ms,
    );
    info!(
        "Story '{}' complete: {} generated, {} placeholder(s), {} reused, {}ms",
        document.title,
        images_generated,
        placeholders_used,
        reused,
        total_ms
    );

    let page_images = document.pages.iter().map(|p| p.image_url.clone()).collect();
    Ok(StoryOutput {
        story: document,
        page_images,
        character_profile: profile,
        debug,
    })
}

// ── Single-image regeneration ───────────────────────────────────────────────

/// Body of a regeneration request.
///
/// `page_index` uses slot numbering: 0 is the cover, `n` is page `n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateImageRequest {
    pub story_id: String,
    pub page_index: usize,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Replacement scene description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Profile reused for a stored story: the child's entry in the character
/// map, otherwise the heuristic over the stored scenes.
fn stored_profile(document: &StoryDocument) -> CharacterProfile {
    let child = &document.metadata.child_name;
    let entry = document
        .characters
        .get_key_value(child)
        .or_else(|| document.characters.iter().next());
    match entry {
        Some((name, description)) => CharacterProfile {
            name: Some(name.clone()),
            description: description.clone(),
            source: ProfileSource::Heuristic,
            reference_image: None,
        },
        None => {
            let scenes: Vec<&str> = document
                .pages
                .iter()
                .map(|p| p.image_description.as_str())
                .collect();
            crate::pipeline::character::heuristic_profile(&document.cover_description, &scenes)
        }
    }
}

/// Regenerate one illustration of a stored story, amending the prompt with
/// user feedback, and update `story.json` on success.
pub async fn regenerate_page_image(
    request: &RegenerateImageRequest,
    config: &StoryConfig,
) -> Result<RegeneratedImage, StorybookError> {
    let store = resolve_store(config);
    let mut document = read_story(store.as_ref(), &request.story_id).await?;
    if request.page_index > document.pages.len() {
        return Err(StorybookError::UnsupportedValue {
            field: "pageIndex",
            value: request.page_index.to_string(),
        });
    }

    let slot = ImageSlot::from_index(request.page_index);
    let stored_scene = match slot {
        ImageSlot::Page(n) => document.pages[n - 1].image_description.clone(),
        _ => document.cover_description.clone(),
    };
    let scene = request
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or(stored_scene);
    let feedback = request
        .feedback
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());

    let image_model = resolve_image_model(config)?;
    let client = download_client(config.download_timeout_secs)?;
    let tracker = ProgressTracker::load(Arc::clone(&store), &request.story_id).await;
    let profile = stored_profile(&document);
    info!("Regenerating {slot} of '{}'", request.story_id);

    let title = document.title.clone();
    let job = ImageJob {
        model: image_model.as_ref(),
        limiter: &Unlimited,
        store: store.as_ref(),
        client: &client,
        tracker: Some(&tracker),
        config,
        folder: &request.story_id,
        title: &title,
        style: document.metadata.style,
        profile: Some(&profile),
        total: 1,
    };
    let outcome = job.illustrate(slot, &scene, feedback, false).await;
    let mut warnings: Vec<String> = outcome.problems.iter().map(|p| p.to_string()).collect();

    if outcome.generated {
        match slot {
            ImageSlot::Page(n) => {
                let page = &mut document.pages[n - 1];
                page.image_url = outcome.location.clone();
                if request.description.is_some() {
                    page.image_description = scene.clone();
                }
            }
            _ => document.cover_image = outcome.location.clone(),
        }
        if let Err(e) = write_story(store.as_ref(), &request.story_id, &document).await {
            warn!("Story '{}' not updated: {e}", request.story_id);
            warnings.push(format!("story.json not updated: {e}"));
        }
    } else if let Some(ref failure) = outcome.failure {
        warnings.push(failure.to_string());
    }

    Ok(RegeneratedImage {
        image_url: outcome.location,
        success: outcome.generated,
        warnings,
    })
}

// ── Character profile ───────────────────────────────────────────────────────

/// Body of a standalone character-profile request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfileRequest {
    pub child_name: String,
    #[serde(default)]
    pub style: Option<IllustrationStyle>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub render_reference: bool,
}

/// Build a character profile outside a full story run.
///
/// Uses the text model when the strategy says so and one is available;
/// otherwise, or when the model fails, derives it from `context`. With
/// `render_reference` a portrait is stored as `character_profile.png` in a
/// `{name}_character` folder.
pub async fn generate_character_profile(
    request: &CharacterProfileRequest,
    config: &StoryConfig,
) -> Result<CharacterProfile, StorybookError> {
    let name = request.child_name.trim();
    if name.is_empty() {
        return Err(StorybookError::MissingField { field: "childName" });
    }
    let style = request.style.unwrap_or_default();
    let context = request.context.as_deref();

    let mut profile = match config.character_strategy {
        CharacterStrategy::Model => match resolve_text_model(config) {
            Ok(model) => match profile_from_model(model.as_ref(), name, style, context, config).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Character profile from model failed, using context: {e}");
                    profile_from_context(name, context)
                }
            },
            Err(e) => {
                warn!("No text model for character profile, using context: {e}");
                profile_from_context(name, context)
            }
        },
        CharacterStrategy::Heuristic => profile_from_context(name, context),
    };

    if request.render_reference {
        let image_model = resolve_image_model(config)?;
        let store = resolve_store(config);
        let client = download_client(config.download_timeout_secs)?;
        let folder = format!("{}_character", story_folder_name(name));
        let job = ImageJob {
            model: image_model.as_ref(),
            limiter: &Unlimited,
            store: store.as_ref(),
            client: &client,
            tracker: None,
            config,
            folder: &folder,
            title: name,
            style,
            profile: None,
            total: 1,
        };
        let portrait = job
            .illustrate(ImageSlot::CharacterReference, &profile.description, None, false)
            .await;
        if portrait.generated {
            profile.reference_image = Some(portrait.location);
        }
    }
    Ok(profile)
}

// ── Saving and listing ──────────────────────────────────────────────────────

fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (_, data) = uri.strip_prefix("data:")?.split_once(";base64,")?;
    BASE64.decode(data.trim()).ok()
}

/// Save a story document (typically edited on the client).
///
/// Without an explicit `folder` the folder is derived from the title and a
/// timestamp suffix is added when a story already lives there. Inline
/// (`data:`), remote and stored images from other folders are copied into
/// the folder; placeholders are kept as they are. Copy failures leave the
/// original location and produce a warning.
///
/// The book is then rendered to `{folder}/{title}.pdf`. A rendering failure
/// is reported in `warnings` with no `pdf_path`; the JSON and images stay
/// saved.
pub async fn save_story(
    mut document: StoryDocument,
    folder: Option<&str>,
    config: &StoryConfig,
) -> Result<SavedStory, StorybookError> {
    let store = resolve_store(config);
    let folder = match folder.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => story_folder_name(f),
        None => {
            let base = story_folder_name(&document.title);
            let taken = folder_has_story(store.as_ref(), &base).await?;
            resolve_collision(&base, taken, Utc::now())
        }
    };
    let client = download_client(config.download_timeout_secs)?;
    let mut warnings = Vec::new();

    let cover = std::mem::take(&mut document.cover_image);
    document.cover_image =
        copy_into_folder(store.as_ref(), &client, &folder, ImageSlot::Cover, cover, &mut warnings)
            .await;
    for page in &mut document.pages {
        let url = std::mem::take(&mut page.image_url);
        page.image_url = copy_into_folder(
            store.as_ref(),
            &client,
            &folder,
            ImageSlot::Page(page.page_number),
            url,
            &mut warnings,
        )
        .await;
    }

    let story_path = write_story(store.as_ref(), &folder, &document).await?;
    info!("Saved story '{}' to {story_path}", document.title);

    let pdf_path = match render_story_pdf(&folder, config).await {
        Ok(rendered) => Some(rendered.location),
        Err(e) => {
            warn!("PDF for saved story '{folder}' not rendered: {e}");
            warnings.push(format!("PDF not rendered: {e}"));
            None
        }
    };

    Ok(SavedStory {
        story_id: folder,
        story_path,
        cover_image: document.cover_image.clone(),
        page_images: document.pages.iter().map(|p| p.image_url.clone()).collect(),
        pdf_path,
        warnings,
    })
}

async fn copy_into_folder(
    store: &dyn StoryStore,
    client: &reqwest::Client,
    folder: &str,
    slot: ImageSlot,
    location: String,
    warnings: &mut Vec<String>,
) -> String {
    let bytes = if location.starts_with("data:") {
        match decode_data_uri(&location) {
            Some(b) => b,
            None => {
                warnings.push(format!("{slot}: invalid inline image"));
                return location;
            }
        }
    } else if (location.starts_with("http://") || location.starts_with("https://"))
        && !is_placeholder(&location)
    {
        match download_image(client, &location).await {
            Ok(b) => b,
            Err(e) => {
                warnings.push(format!("{slot}: could not copy {location}: {e}"));
                return location;
            }
        }
    } else if let Some(source) = store.key_for_location(&location) {
        if source.split('/').next() == Some(folder) {
            return location;
        }
        match store.get(&source).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                warnings.push(format!("{slot}: {location} is missing from the store"));
                return location;
            }
            Err(e) => {
                warnings.push(format!("{slot}: could not read {location}: {e}"));
                return location;
            }
        }
    } else {
        return location;
    };

    match store.put(&format!("{folder}/{}", slot.file_name()), bytes).await {
        Ok(stored) => stored,
        Err(e) => {
            warnings.push(format!("{slot}: could not store image: {e}"));
            location
        }
    }
}

/// Summaries of every stored story, newest first.
pub async fn list_stories(config: &StoryConfig) -> Result<Vec<StorySummary>, StorybookError> {
    let store = resolve_store(config);
    crate::storage::list_stories(store.as_ref()).await
}

// ── PDF ─────────────────────────────────────────────────────────────────────

/// A rendered book and where it was stored.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub location: String,
    pub pdf: PdfOutput,
}

/// File name for a story's PDF: the title without path separators or
/// characters that are invalid in file names.
pub fn pdf_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');
    if cleaned.is_empty() {
        "story.pdf".to_string()
    } else {
        format!("{cleaned}.pdf")
    }
}

/// Render the story stored in `folder` to PDF and store it as
/// `{folder}/{title}.pdf`.
pub async fn render_story_pdf(
    folder: &str,
    config: &StoryConfig,
) -> Result<RenderedPdf, StorybookError> {
    let store = resolve_store(config);
    let document = read_story(store.as_ref(), folder).await?;
    let client = download_client(config.download_timeout_secs)?;
    let images = load_story_images(&document, store.as_ref(), &client).await;

    let key = format!("{folder}/{}", pdf_file_name(&document.title));
    let font_path = config.font_path.clone();
    let pdf = tokio::task::spawn_blocking(move || {
        let font = PdfFont::load(font_path.as_deref());
        assemble_pdf(&document, &images, &font)
    })
    .await
    .map_err(|e| StorybookError::Internal(format!("PDF task panicked: {e}")))??;

    if !pdf.missing_images.is_empty() {
        warn!(
            "PDF for '{folder}' drawn without {} image(s)",
            pdf.missing_images.len()
        );
    }
    let location = store.put(&key, pdf.bytes.clone()).await?;
    info!("Rendered {} pages to {location}", pdf.pages.len());
    Ok(RenderedPdf { location, pdf })
}
