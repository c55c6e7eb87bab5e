//! Pipeline stages for storybook generation.
//!
//! Each submodule implements one step. Stages talk to the outside world only
//! through the [`text::TextModel`], [`image::ImageModel`] and
//! [`crate::storage::StoryStore`] traits, so every stage can be tested with
//! in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//! text ──▶ character ──▶ image ──▶ assemble
//! (JSON)   (profile)     (rate-limited, resumable)   (PDF)
//! ```
//!
//! 1. [`text`]      - one structured completion, parsed and validated into a
//!    [`crate::story::StoryDocument`]
//! 2. [`character`] - protagonist description from the model or a regex scan
//! 3. [`image`]     - prompt assembly, [`sanitize`], trim, model call with
//!    [`retry`] and placeholder fallback, paced by a [`limiter`]
//! 4. [`resume`]    - per-slot success/failure record shared across runs
//! 5. [`assemble`]  - lay out and serialise the PDF; fonts come from [`font`]

pub mod assemble;
pub mod character;
pub mod font;
pub mod image;
pub mod limiter;
pub mod resume;
pub mod retry;
pub mod sanitize;
pub mod text;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One illustration of a book.
///
/// Slot indices follow the progress record: 0 is the cover, `n` is page `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Cover,
    Page(usize),
    /// The standalone character portrait. Not tracked in the progress record.
    CharacterReference,
}

impl ImageSlot {
    /// Build a slot from a progress-record index.
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            ImageSlot::Cover
        } else {
            ImageSlot::Page(index)
        }
    }

    /// Progress-record index, `None` for the character reference.
    pub fn index(&self) -> Option<usize> {
        match self {
            ImageSlot::Cover => Some(0),
            ImageSlot::Page(n) => Some(*n),
            ImageSlot::CharacterReference => None,
        }
    }

    /// File name inside the story folder.
    pub fn file_name(&self) -> String {
        match self {
            ImageSlot::Cover => "cover.png".to_string(),
            ImageSlot::Page(n) => format!("page{n}.png"),
            ImageSlot::CharacterReference => "character_profile.png".to_string(),
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSlot::Cover => f.write_str("cover"),
            ImageSlot::Page(n) => write!(f, "page {n}"),
            ImageSlot::CharacterReference => f.write_str("character reference"),
        }
    }
}
