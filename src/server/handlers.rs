//! Handlers for the `/api` routes and `/health`.
//!
//! Bodies are extracted as `Result<Json<T>, JsonRejection>` so malformed
//! JSON comes back in the same `{error, code}` shape as every other error.

use crate::generate::{
    generate_character_profile, generate_story, list_stories, regenerate_page_image,
    render_story_pdf, save_story, CharacterProfileRequest, RegenerateImageRequest,
};
use crate::output::{RegeneratedImage, SavedStory, StoryOutput};
use crate::server::error::ApiResult;
use crate::server::state::AppState;
use crate::storage::{read_story, StorySummary};
use crate::story::{CharacterProfile, StoryDocument, StoryRequest, StoryRequestBody};
use crate::stream::status_stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/generate-story
pub async fn generate_story_handler(
    State(state): State<AppState>,
    body: Result<Json<StoryRequestBody>, JsonRejection>,
) -> ApiResult<Json<StoryOutput>> {
    let Json(body) = body?;
    let request = StoryRequest::try_from(body)?;
    let output = generate_story(&request, &state.config).await?;
    Ok(Json(output))
}

/// POST /api/generate-image
pub async fn generate_image_handler(
    State(state): State<AppState>,
    body: Result<Json<RegenerateImageRequest>, JsonRejection>,
) -> ApiResult<Json<RegeneratedImage>> {
    let Json(request) = body?;
    Ok(Json(regenerate_page_image(&request, &state.config).await?))
}

/// POST /api/character-profile
pub async fn character_profile_handler(
    State(state): State<AppState>,
    body: Result<Json<CharacterProfileRequest>, JsonRejection>,
) -> ApiResult<Json<CharacterProfile>> {
    let Json(request) = body?;
    Ok(Json(generate_character_profile(&request, &state.config).await?))
}

/// Body of POST /api/save-story: the document plus an optional target folder.
#[derive(Debug, Deserialize)]
pub struct SaveStoryRequest {
    #[serde(flatten)]
    pub story: StoryDocument,
    #[serde(default)]
    pub folder: Option<String>,
}

/// POST /api/save-story
pub async fn save_story_handler(
    State(state): State<AppState>,
    body: Result<Json<SaveStoryRequest>, JsonRejection>,
) -> ApiResult<Json<SavedStory>> {
    let Json(request) = body?;
    let saved = save_story(request.story, request.folder.as_deref(), &state.config).await?;
    Ok(Json(saved))
}

/// GET /api/stories
pub async fn list_stories_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<StorySummary>>> {
    Ok(Json(list_stories(&state.config).await?))
}

/// GET /api/stories/{id}
pub async fn get_story_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StoryDocument>> {
    let store = crate::generate::resolve_store(&state.config);
    Ok(Json(read_story(store.as_ref(), &id).await?))
}

/// GET /api/stories/{id}/pdf
///
/// Renders (or re-renders) the book and returns it inline so browsers can
/// preview it.
pub async fn story_pdf_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rendered = render_story_pdf(&id, &state.config).await?;
    let disposition = format!("inline; filename=\"{id}.pdf\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.pdf.bytes,
    ))
}

/// GET /api/generation-status
pub async fn generation_status_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let interval = Duration::from_millis(state.config.status_interval_ms);
    let events = status_stream(interval)
        .map(|status| Event::default().event("status").json_data(status));
    Sse::new(events).keep_alive(KeepAlive::default())
}
