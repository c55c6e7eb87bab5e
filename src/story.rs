//! Story data model: the request a user submits and the document the
//! pipeline builds from it.
//!
//! The wire format is camelCase JSON, matching what the browser client sends
//! and what is persisted as `story.json`.

use crate::error::StorybookError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Enumerations ─────────────────────────────────────────────────────────

/// Story theme. Ids are kebab-case (`moral-values`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    Adventure,
    Friendship,
    MoralValues,
    Nature,
    Space,
    Animals,
    Bedtime,
    Fantasy,
}

impl Theme {
    pub const ALL: [Theme; 8] = [
        Theme::Adventure,
        Theme::Friendship,
        Theme::MoralValues,
        Theme::Nature,
        Theme::Space,
        Theme::Animals,
        Theme::Bedtime,
        Theme::Fantasy,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Theme::Adventure => "adventure",
            Theme::Friendship => "friendship",
            Theme::MoralValues => "moral-values",
            Theme::Nature => "nature",
            Theme::Space => "space",
            Theme::Animals => "animals",
            Theme::Bedtime => "bedtime",
            Theme::Fantasy => "fantasy",
        }
    }

    /// One sentence steering the plot toward the theme.
    pub fn guidance(&self) -> &'static str {
        match self {
            Theme::Adventure => "An exciting journey with a small challenge the hero overcomes with courage and cleverness.",
            Theme::Friendship => "A story about making a new friend, sharing, and helping each other.",
            Theme::MoralValues => "A gentle story that teaches honesty, kindness, and responsibility through the hero's choices.",
            Theme::Nature => "An exploration of forests, rivers, and gardens that shows respect for the natural world.",
            Theme::Space => "A trip among stars and planets full of wonder and simple science facts.",
            Theme::Animals => "A story where friendly animals help the hero learn something new.",
            Theme::Bedtime => "A calm, soothing story that winds down toward a peaceful sleep.",
            Theme::Fantasy => "A magical world with kind creatures, enchanted places, and a happy ending.",
        }
    }
}

/// Illustration style used for every image of a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IllustrationStyle {
    #[default]
    PixarStyle,
    Watercolor,
    Cartoon,
    ClassicStorybook,
    Anime,
    PencilSketch,
    PaperCutout,
}

impl IllustrationStyle {
    pub const ALL: [IllustrationStyle; 7] = [
        IllustrationStyle::PixarStyle,
        IllustrationStyle::Watercolor,
        IllustrationStyle::Cartoon,
        IllustrationStyle::ClassicStorybook,
        IllustrationStyle::Anime,
        IllustrationStyle::PencilSketch,
        IllustrationStyle::PaperCutout,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            IllustrationStyle::PixarStyle => "pixar-style",
            IllustrationStyle::Watercolor => "watercolor",
            IllustrationStyle::Cartoon => "cartoon",
            IllustrationStyle::ClassicStorybook => "classic-storybook",
            IllustrationStyle::Anime => "anime",
            IllustrationStyle::PencilSketch => "pencil-sketch",
            IllustrationStyle::PaperCutout => "paper-cutout",
        }
    }

    /// Short human label, used on placeholder images.
    pub fn label(&self) -> &'static str {
        match self {
            IllustrationStyle::PixarStyle => "3D Animated",
            IllustrationStyle::Watercolor => "Watercolor",
            IllustrationStyle::Cartoon => "Cartoon",
            IllustrationStyle::ClassicStorybook => "Classic Storybook",
            IllustrationStyle::Anime => "Anime",
            IllustrationStyle::PencilSketch => "Pencil Sketch",
            IllustrationStyle::PaperCutout => "Paper Cutout",
        }
    }
}

/// Language the story text is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Portuguese,
    Italian,
}

impl Language {
    pub fn id(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Spanish => "spanish",
            Language::French => "french",
            Language::German => "german",
            Language::Portuguese => "portuguese",
            Language::Italian => "italian",
        }
    }

    /// Name of the language as written in the text prompt.
    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish (español)",
            Language::French => "French (français)",
            Language::German => "German (Deutsch)",
            Language::Portuguese => "Portuguese (português)",
            Language::Italian => "Italian (italiano)",
        }
    }
}

/// Reader age bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[default]
    #[serde(rename = "6-8")]
    SixToEight,
    #[serde(rename = "9-12")]
    NineToTwelve,
}

impl AgeRange {
    pub fn id(&self) -> &'static str {
        match self {
            AgeRange::ThreeToFive => "3-5",
            AgeRange::SixToEight => "6-8",
            AgeRange::NineToTwelve => "9-12",
        }
    }

    /// Vocabulary and sentence-complexity guidance for the text prompt.
    pub fn guidance(&self) -> &'static str {
        match self {
            AgeRange::ThreeToFive => "Use very simple words, short sentences of 5 to 8 words, lots of repetition, and 1 to 2 sentences per page.",
            AgeRange::SixToEight => "Use simple vocabulary, sentences of up to 12 words, some dialogue, and 2 to 4 sentences per page.",
            AgeRange::NineToTwelve => "Use richer vocabulary, varied sentence length, dialogue and descriptive language, and 4 to 6 sentences per page.",
        }
    }
}

/// Implements `FromStr` by matching the `id()` of every listed variant.
macro_rules! parse_by_id {
    ($ty:ty, $field:literal, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = StorybookError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.id() == needle)
                    .ok_or_else(|| StorybookError::UnsupportedValue {
                        field: $field,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.id())
            }
        }
    };
}

parse_by_id!(Theme, "theme", [
    Theme::Adventure, Theme::Friendship, Theme::MoralValues, Theme::Nature,
    Theme::Space, Theme::Animals, Theme::Bedtime, Theme::Fantasy,
]);
parse_by_id!(IllustrationStyle, "style", [
    IllustrationStyle::PixarStyle, IllustrationStyle::Watercolor, IllustrationStyle::Cartoon,
    IllustrationStyle::ClassicStorybook, IllustrationStyle::Anime,
    IllustrationStyle::PencilSketch, IllustrationStyle::PaperCutout,
]);
parse_by_id!(Language, "language", [
    Language::English, Language::Spanish, Language::French,
    Language::German, Language::Portuguese, Language::Italian,
]);

impl FromStr for AgeRange {
    type Err = StorybookError;

    /// Accepts a bracket id (`"6-8"`) or a single age (`"7"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || StorybookError::UnsupportedValue {
            field: "ageRange",
            value: s.to_string(),
        };
        let t = s.trim();
        for r in [AgeRange::ThreeToFive, AgeRange::SixToEight, AgeRange::NineToTwelve] {
            if r.id() == t {
                return Ok(r);
            }
        }
        match t.parse::<u32>().map_err(|_| unsupported())? {
            0..=5 => Ok(AgeRange::ThreeToFive),
            6..=8 => Ok(AgeRange::SixToEight),
            9..=12 => Ok(AgeRange::NineToTwelve),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for AgeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ── Request ──────────────────────────────────────────────────────────────

/// Loosely-typed request body as received over HTTP.
///
/// Every field is optional so that a missing field produces a
/// [`StorybookError::MissingField`] rather than a generic decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequestBody {
    pub child_name: Option<String>,
    pub theme: Option<String>,
    pub style: Option<String>,
    pub language: Option<String>,
    pub age_range: Option<String>,
    pub custom_prompt: Option<String>,
}

/// A validated story request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequest {
    pub child_name: String,
    pub theme: Theme,
    pub style: IllustrationStyle,
    pub language: Language,
    pub age_range: Option<AgeRange>,
    pub custom_prompt: Option<String>,
}

impl StoryRequest {
    /// Bracket used for calibration; defaults to 6–8 when none was given.
    pub fn effective_age(&self) -> AgeRange {
        self.age_range.unwrap_or_default()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, StorybookError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(StorybookError::MissingField { field })
}

impl TryFrom<StoryRequestBody> for StoryRequest {
    type Error = StorybookError;

    fn try_from(body: StoryRequestBody) -> Result<Self, Self::Error> {
        let child_name = required(body.child_name, "childName")?;
        let theme = required(body.theme, "theme")?.parse()?;
        let style = required(body.style, "style")?.parse()?;
        let language = required(body.language, "language")?.parse()?;
        let age_range = match body.age_range.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(a) => Some(a.parse()?),
        };
        let custom_prompt = body
            .custom_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(StoryRequest {
            child_name,
            theme,
            style,
            language,
            age_range,
            custom_prompt,
        })
    }
}

// ── Document ─────────────────────────────────────────────────────────────

/// One page of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-indexed page number.
    pub page_number: usize,
    pub content: String,
    pub image_description: String,
    /// Empty until the image stage has run.
    #[serde(default)]
    pub image_url: String,
}

/// Generation metadata stored alongside the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    pub language: Language,
    pub theme: Theme,
    pub style: IllustrationStyle,
    #[serde(default)]
    pub age_range: AgeRange,
    pub child_name: String,
    pub generated_at: DateTime<Utc>,
}

/// The generated story: title, cover, pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDocument {
    pub title: String,
    pub cover_description: String,
    #[serde(default)]
    pub cover_image: String,
    pub pages: Vec<Page>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub characters: BTreeMap<String, String>,
    pub metadata: StoryMetadata,
}

/// Where a character profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    /// Asked the text model directly.
    Model,
    /// Extracted from scene descriptions by pattern matching.
    Heuristic,
    /// Nothing matched; the first page's scene description is used with its
    /// whitespace collapsed.
    Fallback,
}

/// Description of the protagonist repeated in every image prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: Option<String>,
    pub description: String,
    pub source: ProfileSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> StoryRequestBody {
        StoryRequestBody {
            child_name: Some("Ana".into()),
            theme: Some("moral-values".into()),
            style: Some("pixar-style".into()),
            language: Some("spanish".into()),
            age_range: None,
            custom_prompt: Some("   ".into()),
        }
    }

    #[test]
    fn valid_body_converts() {
        let req = StoryRequest::try_from(body()).unwrap();
        assert_eq!(req.child_name, "Ana");
        assert_eq!(req.theme, Theme::MoralValues);
        assert_eq!(req.style, IllustrationStyle::PixarStyle);
        assert_eq!(req.language, Language::Spanish);
        assert_eq!(req.custom_prompt, None);
        assert_eq!(req.effective_age(), AgeRange::SixToEight);
    }

    #[test]
    fn blank_name_is_missing() {
        let mut b = body();
        b.child_name = Some("  ".into());
        match StoryRequest::try_from(b) {
            Err(StorybookError::MissingField { field }) => assert_eq!(field, "childName"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_style_is_unsupported() {
        let mut b = body();
        b.style = Some("oil-painting".into());
        assert!(matches!(
            StoryRequest::try_from(b),
            Err(StorybookError::UnsupportedValue { field: "style", .. })
        ));
    }

    #[test]
    fn age_parsing() {
        assert_eq!("3-5".parse::<AgeRange>().unwrap(), AgeRange::ThreeToFive);
        assert_eq!("7".parse::<AgeRange>().unwrap(), AgeRange::SixToEight);
        assert_eq!(" 10 ".parse::<AgeRange>().unwrap(), AgeRange::NineToTwelve);
        assert!("40".parse::<AgeRange>().is_err());
        assert!("teen".parse::<AgeRange>().is_err());
    }

    #[test]
    fn ids_round_trip_through_serde() {
        for style in IllustrationStyle::ALL {
            let json = serde_json::to_string(&style).unwrap();
            assert_eq!(json, format!("\"{}\"", style.id()));
            assert_eq!(style.id().parse::<IllustrationStyle>().unwrap(), style);
        }
        for theme in Theme::ALL {
            assert_eq!(theme.id().parse::<Theme>().unwrap(), theme);
        }
    }
}
