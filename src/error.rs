//! Error types for the edgequake-storybook library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`StorybookError`] - **Fatal**: the request cannot be served at all
//!   (missing field, the text model returned garbage, storage unreachable).
//!   Returned as `Err(StorybookError)` from the top-level entry points.
//!
//! * [`PageError`] - **Non-fatal**: one illustration could not be produced
//!   or stored. The page falls back to a placeholder image and the error is
//!   reported in the output diagnostics.
//!
//! * [`ImageApiError`] - a single image-model call failed. Carries the
//!   vendor classification used for logging and for the content-policy
//!   retry path.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All fatal errors returned by the edgequake-storybook library.
#[derive(Debug, Error)]
pub enum StorybookError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A required request field was absent or blank.
    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    /// A request field named an unknown theme, style, language or age.
    #[error("Unsupported {field} '{value}'")]
    UnsupportedValue { field: &'static str, value: String },

    // ── Text model errors ─────────────────────────────────────────────────
    /// The text model answered, but not with the expected JSON structure.
    #[error("Story generation returned an invalid response: {detail}")]
    GenerationFormat { detail: String },

    /// The text model call failed after all retries.
    #[error("Text model error: {message}")]
    TextModel { message: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("Provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// No stored story exists under the given folder.
    #[error("Story '{folder}' not found")]
    StoryNotFound { folder: String },

    /// Reading or writing the story store failed.
    #[error("Storage error at '{key}': {detail}")]
    Storage { key: String, detail: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// The PDF could not be serialised.
    #[error("PDF assembly failed: {detail}")]
    Pdf { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorybookError {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorybookError::MissingField { .. } | StorybookError::UnsupportedValue { .. }
        )
    }
}

/// Vendor classification of a failed image-model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFailureKind {
    ContentPolicy,
    RateLimit,
    Auth,
    Server,
    Timeout,
    InvalidResponse,
    Request,
}

impl fmt::Display for ImageFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageFailureKind::ContentPolicy => "content_policy",
            ImageFailureKind::RateLimit => "rate_limit",
            ImageFailureKind::Auth => "auth",
            ImageFailureKind::Server => "server",
            ImageFailureKind::Timeout => "timeout",
            ImageFailureKind::InvalidResponse => "invalid_response",
            ImageFailureKind::Request => "request",
        };
        f.write_str(s)
    }
}

/// A failed call to the image model.
#[derive(Debug, Clone, Error)]
pub enum ImageApiError {
    /// The prompt was rejected by the vendor's safety system.
    #[error("Prompt rejected by content policy: {message}")]
    ContentPolicy { message: String },

    /// HTTP 429.
    #[error("Image API rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401/403.
    #[error("Image API authentication failed: {message}")]
    Auth { message: String },

    /// HTTP 5xx.
    #[error("Image API server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The request did not complete in time.
    #[error("Image API call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered 2xx but without a usable image.
    #[error("Image API returned no usable image: {detail}")]
    InvalidResponse { detail: String },

    /// Any other transport or HTTP failure.
    #[error("Image API request failed: {message}")]
    Request { message: String },
}

impl ImageApiError {
    pub fn kind(&self) -> ImageFailureKind {
        match self {
            ImageApiError::ContentPolicy { .. } => ImageFailureKind::ContentPolicy,
            ImageApiError::RateLimited { .. } => ImageFailureKind::RateLimit,
            ImageApiError::Auth { .. } => ImageFailureKind::Auth,
            ImageApiError::Server { .. } => ImageFailureKind::Server,
            ImageApiError::Timeout { .. } => ImageFailureKind::Timeout,
            ImageApiError::InvalidResponse { .. } => ImageFailureKind::InvalidResponse,
            ImageApiError::Request { .. } => ImageFailureKind::Request,
        }
    }
}

/// A non-fatal error for a single illustration.
///
/// The page keeps a placeholder image and the error is listed in the
/// generation diagnostics.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageError {
    /// Every image-model attempt failed.
    #[error("Page {page}: image generation failed after {attempts} attempts ({kind}): {detail}")]
    ImageFailed {
        page: usize,
        attempts: u32,
        kind: ImageFailureKind,
        detail: String,
    },

    /// The image was generated but could not be fetched.
    #[error("Page {page}: download of '{url}' failed: {detail}")]
    DownloadFailed {
        page: usize,
        url: String,
        detail: String,
    },

    /// The image was fetched but could not be written to the store.
    #[error("Page {page}: storing image failed: {detail}")]
    StoreFailed { page: usize, detail: String },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::ImageFailed { page, .. }
            | PageError::DownloadFailed { page, .. }
            | PageError::StoreFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_display() {
        let e = StorybookError::MissingField { field: "childName" };
        assert!(e.to_string().contains("childName"));
        assert!(e.is_client_error());
    }

    #[test]
    fn format_error_is_not_client_error() {
        let e = StorybookError::GenerationFormat {
            detail: "missing 'pages'".into(),
        };
        assert!(!e.is_client_error());
        assert!(e.to_string().contains("missing 'pages'"));
    }

    #[test]
    fn image_error_kinds() {
        let e = ImageApiError::ContentPolicy {
            message: "flagged".into(),
        };
        assert_eq!(e.kind(), ImageFailureKind::ContentPolicy);
        assert_eq!(e.kind().to_string(), "content_policy");

        let e = ImageApiError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(e.kind(), ImageFailureKind::Server);
        assert!(e.to_string().contains("502"));
    }

    #[test]
    fn page_error_serialises_with_tag() {
        let e = PageError::ImageFailed {
            page: 3,
            attempts: 2,
            kind: ImageFailureKind::Timeout,
            detail: "slow".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "image_failed");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(e.page(), 3);
    }
}
