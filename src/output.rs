//! Output types returned by the generation entry points.

use crate::error::PageError;
use crate::story::{CharacterProfile, StoryDocument};
use serde::{Deserialize, Serialize};

/// The complete result of a story generation run.
///
/// Serialises flat: the [`StoryDocument`] fields (including `coverImage`)
/// sit next to `pageImages` and the `_debug` block, which is the shape the
/// HTTP endpoint returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryOutput {
    #[serde(flatten)]
    pub story: StoryDocument,

    /// One image location per page, in page order.
    pub page_images: Vec<String>,

    pub character_profile: CharacterProfile,

    #[serde(rename = "_debug")]
    pub debug: GenerationDebug,
}

/// Diagnostics about how the run went.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDebug {
    /// Pages that ended with a model-generated image in this run. The cover
    /// is reported by `cover_generated`, so this never exceeds the page count.
    pub images_generated: usize,

    /// Pages that ended on a placeholder.
    pub placeholders_used: usize,

    /// Whether the cover was illustrated by the model in this run.
    pub cover_generated: bool,

    /// Page numbers that fell back to a placeholder after failing (0 = cover).
    pub failed_pages: Vec<usize>,

    /// Slots reused from an earlier run's progress record (0 = cover).
    pub skipped_pages: Vec<usize>,

    /// Folder under the stories root holding this story.
    pub story_folder: String,

    pub text_model: String,
    pub image_model: String,

    pub prompt_tokens: usize,
    pub completion_tokens: usize,

    /// Wall-clock time for the text stage.
    pub text_duration_ms: u64,
    /// Wall-clock time for the character stage.
    pub character_duration_ms: u64,
    /// Wall-clock time for the image stage, retry pass included.
    pub image_duration_ms: u64,
    pub total_duration_ms: u64,

    /// Non-fatal problems, e.g. an image generated but not stored.
    pub warnings: Vec<String>,

    /// Per-slot failures behind `failed_pages`.
    pub page_errors: Vec<PageError>,
}

/// Result of regenerating a single page illustration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegeneratedImage {
    pub image_url: String,
    /// False when the page fell back to a placeholder.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Where a saved story landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedStory {
    pub story_id: String,
    pub story_path: String,
    pub cover_image: String,
    pub page_images: Vec<String>,
    /// Location of the rendered PDF, absent when rendering failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
