//! Character stage: a description of the protagonist that is repeated in
//! every image prompt.
//!
//! Two strategies:
//!
//! * **Model** - ask the text model for a structured profile and flatten it.
//! * **Heuristic** - scan the cover description, then each page scene, for
//!   `Name is/was/has/had/wears/wearing …` and keep the sentence of the
//!   first match. Capitalised pronouns and sentence openers on a skip list
//!   never count as a name. Nothing matched means the first page's scene
//!   (the cover's when that is blank) is used with its whitespace collapsed
//!   to single spaces.
//!
//! A failed model call degrades to the heuristic. Beyond the skip list,
//! neither strategy checks that the text actually describes the protagonist.

use crate::config::{CharacterStrategy, StoryConfig};
use crate::error::StorybookError;
use crate::pipeline::text::{complete_with_retry, parse_json_object, TextModel, TextOptions};
use crate::prompts::{character_prompt, one_line, CHARACTER_SYSTEM_PROMPT};
use crate::story::{CharacterProfile, IllustrationStyle, ProfileSource, StoryDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

static RE_CHARACTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\p{Lu}\p{Ll}+)\s+(?:is|was|has|had|wears|wearing)\b[^.!?]*[.!?]?").unwrap()
});

/// Capitalised words that start sentences but never name a character.
const NOT_NAMES: &[&str] = &[
    "It", "This", "That", "There", "Here", "He", "She", "They", "Everything", "Everyone",
    "Nobody", "Something", "What", "Which", "Who", "Today", "Now",
];

/// Build the profile for a generated story.
pub async fn profile_for_story(
    model: Option<&dyn TextModel>,
    document: &StoryDocument,
    config: &StoryConfig,
) -> CharacterProfile {
    let scenes: Vec<&str> = document
        .pages
        .iter()
        .map(|p| p.image_description.as_str())
        .collect();

    if config.character_strategy == CharacterStrategy::Model {
        if let Some(model) = model {
            let context = format!("{} {}", document.title, document.cover_description);
            match profile_from_model(
                model,
                &document.metadata.child_name,
                document.metadata.style,
                Some(&context),
                config,
            )
            .await
            {
                Ok(profile) => return profile,
                Err(e) => warn!("Character profile from model failed, using heuristic: {e}"),
            }
        }
    }

    heuristic_profile(&document.cover_description, &scenes)
}

/// Ask the text model for a structured profile.
pub async fn profile_from_model(
    model: &dyn TextModel,
    name: &str,
    style: IllustrationStyle,
    context: Option<&str>,
    config: &StoryConfig,
) -> Result<CharacterProfile, StorybookError> {
    let prompt = character_prompt(name, style, context);
    let options = TextOptions {
        temperature: config.temperature.min(0.5),
        max_tokens: 800,
    };
    let completion =
        complete_with_retry(model, CHARACTER_SYSTEM_PROMPT, &prompt, &options, config).await?;
    let obj = parse_json_object(&completion.content)?;
    let description = flatten_profile(&obj).ok_or_else(|| StorybookError::GenerationFormat {
        detail: "character profile has no descriptive fields".into(),
    })?;

    let profile_name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(name)
        .to_string();

    info!("Character profile for {profile_name} from {}", model.name());
    Ok(CharacterProfile {
        name: Some(profile_name),
        description,
        source: ProfileSource::Model,
        reference_image: None,
    })
}

/// Join the structured fields into one description string.
fn flatten_profile(obj: &serde_json::Map<String, Value>) -> Option<String> {
    let field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(one_line)
            .filter(|s| !s.is_empty())
    };

    let mut parts = Vec::new();
    if let Some(age) = field("age") {
        parts.push(format!("Age: {age}."));
    }
    if let Some(appearance) = field("appearance") {
        parts.push(sentence(&appearance));
    }
    for (key, label) in [("hair", "Hair"), ("eyes", "Eyes"), ("clothing", "Clothing")] {
        if let Some(v) = field(key) {
            parts.push(format!("{label}: {}", sentence(&v)));
        }
    }
    if let Some(extra) = field("distinctiveFeatures") {
        parts.push(sentence(&extra));
    }

    (!parts.is_empty()).then(|| parts.join(" "))
}

fn sentence(s: &str) -> String {
    let s = s.trim();
    if s.ends_with(['.', '!', '?']) {
        s.to_string()
    } else {
        format!("{s}.")
    }
}

/// Pattern-match a profile out of the scene descriptions.
///
/// `cover` is scanned first, then `pages` in order; the first match wins.
pub fn heuristic_profile(cover: &str, pages: &[&str]) -> CharacterProfile {
    for text in std::iter::once(cover).chain(pages.iter().copied()) {
        if let Some((name, description)) = find_character(text) {
            debug!("Heuristic character match: {name}");
            return CharacterProfile {
                name: Some(name),
                description,
                source: ProfileSource::Heuristic,
                reference_image: None,
            };
        }
    }

    let description = pages
        .first()
        .copied()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(cover);
    CharacterProfile {
        name: None,
        description: one_line(description),
        source: ProfileSource::Fallback,
        reference_image: None,
    }
}

/// First `Name is …` sentence in `text`: the name and the whole sentence.
fn find_character(text: &str) -> Option<(String, String)> {
    RE_CHARACTER.captures_iter(text).find_map(|caps| {
        let name = caps.get(1)?;
        if NOT_NAMES.contains(&name.as_str()) {
            return None;
        }
        let whole = caps.get(0)?;
        let sentence_start = text[..whole.start()]
            .rfind(['.', '!', '?'])
            .map(|i| i + 1)
            .unwrap_or(0);
        let sentence = one_line(&text[sentence_start..whole.end()]);
        Some((name.as_str().to_string(), sentence))
    })
}

/// Convenience for callers with only a name and some free text.
pub fn profile_from_context(name: &str, context: Option<&str>) -> CharacterProfile {
    match context.filter(|c| !c.trim().is_empty()) {
        Some(ctx) => heuristic_profile(ctx, &[]),
        None => CharacterProfile {
            name: Some(name.to_string()),
            description: format!("{name}, the main character of the story."),
            source: ProfileSource::Fallback,
            reference_image: None,
        },
    }
}
