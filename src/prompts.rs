//! Prompts for the text model and the image model.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** - changing the wording of a rule (e.g. the
//!    no-text rule for interior pages) requires editing exactly one place.
//!
//! 2. **Testability** - unit tests can inspect prompts directly without a
//!    model, making prompt regressions easy to catch.
//!
//! Image prompts are assembled from blank-line separated blocks. Each block
//! starts with an upper-case label; [`crate::pipeline::sanitize::trim_prompt`]
//! uses those labels to decide which blocks survive when a prompt is over
//! budget.

use crate::pipeline::ImageSlot;
use crate::story::{CharacterProfile, IllustrationStyle, StoryRequest};

// ── Text model ───────────────────────────────────────────────────────────

/// System prompt for story generation.
pub const STORY_SYSTEM_PROMPT: &str = "You are an award-winning children's book author. \
You write warm, age-appropriate stories with a clear beginning, middle and happy ending. \
You always answer with one valid JSON object and nothing else: no markdown fences, no commentary.";

/// System prompt for character-profile generation.
pub const CHARACTER_SYSTEM_PROMPT: &str = "You are a character designer for illustrated children's books. \
You describe characters so precisely that different illustrators would draw them identically. \
You always answer with one valid JSON object and nothing else.";

/// Build the user prompt asking for a complete story as JSON.
pub fn story_prompt(request: &StoryRequest, page_count: usize) -> String {
    let age = request.effective_age();
    let language = request.language.prompt_name();
    let mut prompt = format!(
        "Write a children's storybook in {language} for a child named {name}, aged {age}.\n\n\
         Theme: {theme}\n\
         Reading level: {reading}\n",
        name = request.child_name,
        age = age.id(),
        theme = request.theme.guidance(),
        reading = age.guidance(),
    );

    if let Some(ref custom) = request.custom_prompt {
        prompt.push_str(&format!("Additional request from the parent: {custom}\n"));
    }

    prompt.push_str(&format!(
        "\nRules:\n\
         - The story has exactly {page_count} pages.\n\
         - {name} is the main character and appears on every page.\n\
         - Write the title and every page's content in {language}.\n\
         - Write coverDescription and every imageDescription in English, as a detailed visual \
           scene for an illustrator: setting, characters, actions, colors and mood. Mention {name} \
           by name and repeat their appearance (age, hair, eyes, clothing) in every description.\n\
         - List every recurring character with a one-sentence visual description in \"characters\".\n\
         \nRespond with JSON in exactly this shape:\n\
         {{\"title\": \"...\", \"coverDescription\": \"...\", \
         \"characters\": {{\"Name\": \"appearance\"}}, \
         \"pages\": [{{\"pageNumber\": 1, \"content\": \"...\", \"imageDescription\": \"...\"}}]}}",
        name = request.child_name,
    ));
    prompt
}

/// Build the user prompt asking for a structured character profile.
pub fn character_prompt(name: &str, style: IllustrationStyle, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Create a detailed visual profile of {name}, the main character of a children's book \
         illustrated as {style}.\n",
        style = style_phrase(style),
    );
    if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("Story context: {}\n", one_line(ctx)));
    }
    prompt.push_str(
        "\nRespond with JSON in exactly this shape:\n\
         {\"name\": \"...\", \"age\": \"...\", \"appearance\": \"...\", \"hair\": \"...\", \
         \"eyes\": \"...\", \"clothing\": \"...\", \"distinctiveFeatures\": \"...\"}",
    );
    prompt
}

// ── Image model ──────────────────────────────────────────────────────────

/// Hand-written description of each illustration style.
pub fn style_phrase(style: IllustrationStyle) -> &'static str {
    match style {
        IllustrationStyle::PixarStyle => "a 3D animated movie style with soft global lighting, expressive oversized eyes, smooth rounded shapes and rich saturated colors",
        IllustrationStyle::Watercolor => "a soft watercolor painting with gentle washes of color, visible paper texture and delicate ink outlines",
        IllustrationStyle::Cartoon => "a bright 2D cartoon with bold clean outlines, flat vibrant colors and playful exaggerated expressions",
        IllustrationStyle::ClassicStorybook => "a classic golden-age picture book illustration with detailed gouache painting and warm muted tones",
        IllustrationStyle::Anime => "a gentle anime style with clean line art, large expressive eyes, cel shading and pastel backgrounds",
        IllustrationStyle::PencilSketch => "a hand-drawn colored pencil sketch with visible strokes, soft shading and a cream paper background",
        IllustrationStyle::PaperCutout => "a layered paper cutout collage with visible paper edges, subtle drop shadows and textured craft-paper colors",
    }
}

/// Labels that start each image-prompt block.
pub mod labels {
    pub const STYLE: &str = "STYLE";
    pub const CHARACTER: &str = "CHARACTER CONSISTENCY";
    pub const TITLE_TEXT: &str = "TITLE TEXT";
    pub const NO_TEXT: &str = "NO TEXT";
    pub const NO_META: &str = "NO META-REPRESENTATION";
    pub const ANATOMY: &str = "ANATOMICAL CORRECTNESS";
    pub const SCENE: &str = "SCENE";
    pub const FEEDBACK: &str = "FEEDBACK";
}

/// Block labels in descending priority, used when trimming over-long prompts.
pub const PRIORITY_KEYWORDS: &[&str] = &[
    labels::SCENE,
    labels::CHARACTER,
    labels::FEEDBACK,
    labels::TITLE_TEXT,
    labels::NO_TEXT,
    labels::ANATOMY,
    labels::NO_META,
];

const NO_TEXT_RULES: &str = "Do not include any words, letters, numbers, captions, signs, labels \
or speech bubbles anywhere in the image.";

const NO_META_RULES: &str = "Show the scene itself filling the whole frame. Do not depict a book, \
an open page, a photo of a book, a picture frame, a poster or an illustration lying on a table.";

const ANATOMY_RULES: &str = "Every person and animal has the correct number of arms, legs, eyes \
and ears. Hands have exactly five fingers. Faces are symmetrical, friendly and well proportioned. \
No extra or merged limbs.";

/// Everything needed to describe one illustration.
#[derive(Debug, Clone, Copy)]
pub struct ImagePromptParts<'a> {
    pub slot: ImageSlot,
    pub style: IllustrationStyle,
    pub title: &'a str,
    pub scene: &'a str,
    pub character: Option<&'a CharacterProfile>,
    pub feedback: Option<&'a str>,
}

/// Assemble the full image prompt.
///
/// Block order: style, character, text rules, meta rules, anatomy, scene,
/// feedback.
pub fn image_prompt(parts: &ImagePromptParts<'_>) -> String {
    let mut blocks = vec![style_block(parts.style)];
    if let Some(block) = character_block(parts.character) {
        blocks.push(block);
    }
    match parts.slot {
        ImageSlot::Cover => blocks.push(format!(
            "{}: Display the title \"{}\" at the top of the image in large, friendly, \
             easy-to-read letters, spelled exactly as given, with high contrast against the \
             background. The title must not cover any character's face. No other text.",
            labels::TITLE_TEXT,
            one_line(parts.title)
        )),
        ImageSlot::Page(_) | ImageSlot::CharacterReference => {
            blocks.push(format!("{}: {NO_TEXT_RULES}", labels::NO_TEXT))
        }
    }
    blocks.push(format!("{}: {NO_META_RULES}", labels::NO_META));
    blocks.push(format!("{}: {ANATOMY_RULES}", labels::ANATOMY));
    blocks.push(format!("{}: {}", labels::SCENE, one_line(parts.scene)));
    if let Some(block) = feedback_block(parts.feedback) {
        blocks.push(block);
    }
    blocks.join("\n\n")
}

/// A shortened prompt: style, character and scene only.
///
/// Used after a content-policy rejection and for the retry pass over failed
/// pages, where fewer rule blocks give the safety filter less to object to.
pub fn simplified_image_prompt(parts: &ImagePromptParts<'_>) -> String {
    let mut blocks = vec![style_block(parts.style)];
    if let Some(block) = character_block(parts.character) {
        blocks.push(block);
    }
    blocks.push(format!("{}: {}", labels::SCENE, one_line(parts.scene)));
    if let Some(block) = feedback_block(parts.feedback) {
        blocks.push(block);
    }
    blocks.join("\n\n")
}

fn style_block(style: IllustrationStyle) -> String {
    format!(
        "{}: A children's book illustration in {}.",
        labels::STYLE,
        style_phrase(style)
    )
}

fn character_block(profile: Option<&CharacterProfile>) -> Option<String> {
    let profile = profile?;
    let description = one_line(&profile.description);
    if description.is_empty() {
        return None;
    }
    let who = profile
        .name
        .as_deref()
        .map(|n| format!("The main character {n}"))
        .unwrap_or_else(|| "The main character".to_string());
    Some(format!(
        "{}: {who} must look exactly the same as in every other illustration of this book: {description}",
        labels::CHARACTER
    ))
}

fn feedback_block(feedback: Option<&str>) -> Option<String> {
    let feedback = one_line(feedback?);
    if feedback.is_empty() {
        return None;
    }
    Some(format!(
        "{}: The reader asked for these changes to the previous version, apply them: {feedback}",
        labels::FEEDBACK
    ))
}

/// Collapse all whitespace runs (including blank lines) to single spaces so
/// interpolated text can never split a prompt block.
pub fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Language, ProfileSource, Theme};

    fn request() -> StoryRequest {
        StoryRequest {
            child_name: "Ana".into(),
            theme: Theme::MoralValues,
            style: IllustrationStyle::PixarStyle,
            language: Language::Spanish,
            age_range: None,
            custom_prompt: Some("Include her dog Toby".into()),
        }
    }

    fn profile() -> CharacterProfile {
        CharacterProfile {
            name: Some("Ana".into()),
            description: "a six-year-old girl with\n\nblack braids and a yellow raincoat".into(),
            source: ProfileSource::Model,
            reference_image: None,
        }
    }

    #[test]
    fn story_prompt_mentions_everything() {
        let p = story_prompt(&request(), 8);
        assert!(p.contains("exactly 8 pages"));
        assert!(p.contains("Spanish"));
        assert!(p.contains("Ana"));
        assert!(p.contains("6-8"));
        assert!(p.contains("Include her dog Toby"));
        assert!(p.contains("\"coverDescription\""));
    }

    #[test]
    fn cover_prompt_has_title_rules_not_no_text() {
        let prof = profile();
        let parts = ImagePromptParts {
            slot: ImageSlot::Cover,
            style: IllustrationStyle::Watercolor,
            title: "Ana y la verdad",
            scene: "Ana stands in a meadow",
            character: Some(&prof),
            feedback: None,
        };
        let p = image_prompt(&parts);
        assert!(p.starts_with("STYLE:"));
        assert!(p.contains("\"Ana y la verdad\""));
        assert!(p.contains(labels::TITLE_TEXT));
        assert!(!p.contains("NO TEXT:"));
        assert!(p.contains(labels::ANATOMY));
    }

    #[test]
    fn interior_prompt_forbids_text_and_keeps_blocks_intact() {
        let prof = profile();
        let parts = ImagePromptParts {
            slot: ImageSlot::Page(2),
            style: IllustrationStyle::Cartoon,
            title: "Title",
            scene: "Ana feeds\n\nthe ducks",
            character: Some(&prof),
            feedback: Some("make the sky pink"),
        };
        let p = image_prompt(&parts);
        assert!(p.contains("NO TEXT:"));
        assert!(p.contains("SCENE: Ana feeds the ducks"));
        assert!(p.contains("black braids and a yellow raincoat"));
        assert!(p.ends_with("apply them: make the sky pink"));
        // style, character, no-text, meta, anatomy, scene, feedback
        assert_eq!(p.split("\n\n").count(), 7);
    }

    #[test]
    fn simplified_prompt_drops_rule_blocks() {
        let parts = ImagePromptParts {
            slot: ImageSlot::Page(1),
            style: IllustrationStyle::Anime,
            title: "Title",
            scene: "A picnic",
            character: None,
            feedback: None,
        };
        let p = simplified_image_prompt(&parts);
        assert_eq!(p.split("\n\n").count(), 2);
        assert!(!p.contains(labels::ANATOMY));
        assert!(p.len() < image_prompt(&parts).len());
    }
}
