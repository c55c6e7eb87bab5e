//! HTTP API tests, driven through the router with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use edgequake_storybook::server::{build_cors_layer, build_router, AppState};
use edgequake_storybook::{
    CharacterStrategy, StoryConfig, StorybookError, TextCompletion, TextModel, TextOptions,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

struct OnePageStory;

#[async_trait]
impl TextModel for OnePageStory {
    fn name(&self) -> String {
        "fake/one-page".into()
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _options: &TextOptions,
    ) -> Result<TextCompletion, StorybookError> {
        let story = json!({
            "title": "Leo Among the Stars",
            "coverDescription": "Leo is a boy with red hair in a silver rocket.",
            "characters": {"Leo": "a boy with red hair and freckles"},
            "pages": [{
                "pageNumber": 1,
                "content": "Leo counted the stars.",
                "imageDescription": "Leo looking through a round window at the stars",
            }],
        });
        Ok(TextCompletion {
            content: story.to_string(),
            prompt_tokens: 10,
            completion_tokens: 50,
        })
    }
}

fn app(root: &Path) -> Router {
    let config = StoryConfig::builder()
        .page_count(1)
        .stories_root(root)
        .public_base_url("/stories")
        .character_strategy(CharacterStrategy::Heuristic)
        .text_provider(Arc::new(OnePageStory))
        .use_placeholders(true)
        .status_interval_ms(1)
        .build()
        .unwrap();
    build_router(AppState::new(config), build_cors_layer(&[]).unwrap())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn generate_leo(root: &Path) -> Value {
    let body = r#"{"childName":"Leo","theme":"space","style":"watercolor","language":"english"}"#;
    let (status, body) = send(app(root), post_json("/api/generate-story", body)).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

fn png_data_uri() -> String {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 160, 220]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", BASE64.encode(out.into_inner()))
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(app(dir.path()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["status"], "ok");
}

#[tokio::test]
async fn missing_child_name_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"theme":"space","style":"watercolor","language":"english"}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-story", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "MISSING_FIELD");
    assert!(v["error"].as_str().unwrap().contains("childName"));
}

#[tokio::test]
async fn unknown_style_is_unsupported_value() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"childName":"Leo","theme":"space","style":"oil-on-canvas","language":"english"}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-story", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "UNSUPPORTED_VALUE");
}

#[tokio::test]
async fn malformed_json_uses_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(app(dir.path()), post_json("/api/generate-story", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn generated_story_is_listed_and_readable() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"childName":"Leo","theme":"space","style":"watercolor","language":"english"}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-story", body)).await;
    assert_eq!(status, StatusCode::OK);
    let story: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(story["title"], "Leo Among the Stars");
    assert_eq!(story["pageImages"].as_array().unwrap().len(), 1);
    assert_eq!(story["_debug"]["storyFolder"], "leo_among_the_stars");

    let (status, body) = send(app(dir.path()), get("/api/stories")).await;
    assert_eq!(status, StatusCode::OK);
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], "leo_among_the_stars");

    let (status, body) = send(app(dir.path()), get("/api/stories/leo_among_the_stars")).await;
    assert_eq!(status, StatusCode::OK);
    let stored: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stored["pages"][0]["content"], "Leo counted the stars.");

    let (status, _) = send(
        app(dir.path()),
        get("/stories/leo_among_the_stars/story.json"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_story_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(app(dir.path()), get("/api/stories/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "NOT_FOUND");
}

#[tokio::test]
async fn empty_story_list() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(app(dir.path()), get("/api/stories")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([]));
}

#[tokio::test]
async fn generation_status_streams_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(dir.path())
        .oneshot(get("/api/generation-status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(text.matches("event: status").count(), 6);
    assert!(text.contains("\"totalStages\":6"));
}

#[tokio::test]
async fn save_story_writes_json_images_and_pdf() {
    let dir = tempfile::tempdir().unwrap();
    generate_leo(dir.path()).await;

    let (_, body) = send(app(dir.path()), get("/api/stories/leo_among_the_stars")).await;
    let mut story: Value = serde_json::from_slice(&body).unwrap();
    story["coverImage"] = json!(png_data_uri());
    story["pages"][0]["imageUrl"] = json!("");
    story["folder"] = json!("leo_edited");

    let (status, body) = send(
        app(dir.path()),
        post_json("/api/save-story", &story.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let saved: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(saved["storyId"], "leo_edited");
    assert_eq!(saved["coverImage"], "/stories/leo_edited/cover.png");
    assert_eq!(saved["pdfPath"], "/stories/leo_edited/Leo Among the Stars.pdf");

    let folder = dir.path().join("leo_edited");
    assert!(folder.join("story.json").exists());
    assert!(folder.join("cover.png").exists());
    assert!(folder.join("Leo Among the Stars.pdf").exists());
}

#[tokio::test]
async fn save_story_without_title_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"coverDescription":"c","pages":[],"folder":"x"}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/save-story", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "BAD_REQUEST");
    assert!(!dir.path().join("x").exists());
}

#[tokio::test]
async fn generate_image_replaces_one_page() {
    let dir = tempfile::tempdir().unwrap();
    generate_leo(dir.path()).await;

    let body = r#"{"storyId":"leo_among_the_stars","pageIndex":1,"feedback":"more stars"}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-image", body)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert!(!v["imageUrl"].as_str().unwrap().is_empty());
    // Placeholder mode never counts as a generated image.
    assert_eq!(v["success"], false);
}

#[tokio::test]
async fn generate_image_validates_story_and_page() {
    let dir = tempfile::tempdir().unwrap();
    generate_leo(dir.path()).await;

    let body = r#"{"storyId":"nope","pageIndex":1}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-image", body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "NOT_FOUND");

    let body = r#"{"storyId":"leo_among_the_stars","pageIndex":5}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/generate-image", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "UNSUPPORTED_VALUE");

    let (status, _) = send(
        app(dir.path()),
        post_json("/api/generate-image", r#"{"pageIndex":1}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn character_profile_from_context() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"childName":"Mia","context":"Mia is a girl with short black hair and round glasses."}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/character-profile", body)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["name"], "Mia");
    assert!(v["description"].as_str().unwrap().contains("round glasses"));
    assert!(v.get("referenceImage").is_none());
}

#[tokio::test]
async fn character_profile_needs_a_name() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"childName":"   "}"#;
    let (status, body) = send(app(dir.path()), post_json("/api/character-profile", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["code"], "MISSING_FIELD");
}
