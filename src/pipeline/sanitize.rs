//! Prompt hygiene: flagged-term replacement and length trimming.
//!
//! Image APIs reject prompts for two cheap-to-avoid reasons: words their
//! safety filter dislikes (even in a harmless story a "sword" or a "scary
//! forest" can trip it) and prompts longer than the vendor limit. Both are
//! handled here with pure functions so the rules are easy to test.
//!
//! Sanitisation must run before trimming: a replacement can be longer than
//! the word it replaces.

use crate::prompts::PRIORITY_KEYWORDS;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Flagged terms and their child-friendly replacements.
///
/// No replacement contains a flagged term, which makes [`sanitize_prompt`]
/// idempotent.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("blood", "red paint"),
    ("bloody", "messy"),
    ("weapon", "tool"),
    ("weapons", "tools"),
    ("gun", "toy"),
    ("guns", "toys"),
    ("sword", "wooden stick"),
    ("swords", "wooden sticks"),
    ("knife", "spoon"),
    ("knives", "spoons"),
    ("kill", "stop"),
    ("killed", "stopped"),
    ("killing", "stopping"),
    ("dead", "asleep"),
    ("death", "rest"),
    ("die", "fall asleep"),
    ("dies", "falls asleep"),
    ("scary", "mysterious"),
    ("terrifying", "surprising"),
    ("horror", "surprise"),
    ("fight", "playful contest"),
    ("fighting", "playing"),
    ("attack", "approach"),
    ("attacks", "approaches"),
    ("monster", "friendly creature"),
    ("monsters", "friendly creatures"),
    ("violent", "lively"),
    ("violence", "commotion"),
    ("war", "big disagreement"),
    ("hurt", "bumped"),
    ("injured", "tired"),
    ("wound", "scrape"),
    ("naked", "dressed"),
    ("nude", "dressed"),
    ("demon", "sprite"),
    ("evil", "grumpy"),
];

static RE_FLAGGED: Lazy<Regex> = Lazy::new(|| {
    let alternation = REPLACEMENTS
        .iter()
        .map(|(term, _)| regex::escape(term))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
});

/// Replace flagged terms, case-insensitively and on whole words only.
///
/// A capitalised match yields a capitalised replacement.
pub fn sanitize_prompt(input: &str) -> String {
    RE_FLAGGED
        .replace_all(input, |caps: &Captures| {
            let found = &caps[0];
            let lower = found.to_lowercase();
            let replacement = REPLACEMENTS
                .iter()
                .find(|(term, _)| *term == lower)
                .map(|(_, r)| *r)
                .unwrap_or(found);
            if found.chars().next().is_some_and(char::is_uppercase) {
                capitalise(replacement)
            } else {
                replacement.to_string()
            }
        })
        .into_owned()
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const SEPARATOR: &str = "\n\n";

/// Trim a blank-line separated prompt to at most `budget` characters.
///
/// The first segment (the style directive) is always kept. Segments that
/// contain a keyword from `priority` are admitted next, in keyword order,
/// then all remaining segments in their original order; each is admitted
/// only if it still fits. Kept segments are emitted in original order. If
/// the first segment alone exceeds the budget it is cut at the budget.
pub fn trim_prompt(prompt: &str, budget: usize, priority: &[&str]) -> String {
    if prompt.chars().count() <= budget {
        return prompt.to_string();
    }

    let segments: Vec<&str> = prompt
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let Some(first) = segments.first() else {
        return String::new();
    };

    let first_len = first.chars().count();
    if first_len >= budget {
        return first.chars().take(budget).collect();
    }

    let sep_len = SEPARATOR.chars().count();
    let mut kept = vec![false; segments.len()];
    kept[0] = true;
    let mut used = first_len;

    let admit = |i: usize, used: &mut usize, kept: &mut Vec<bool>| {
        let cost = sep_len + segments[i].chars().count();
        if *used + cost <= budget {
            kept[i] = true;
            *used += cost;
        }
    };

    for keyword in priority {
        for i in 1..segments.len() {
            if !kept[i] && segments[i].contains(keyword) {
                admit(i, &mut used, &mut kept);
            }
        }
    }
    for i in 1..segments.len() {
        if !kept[i] {
            admit(i, &mut used, &mut kept);
        }
    }

    segments
        .iter()
        .zip(&kept)
        .filter(|(_, k)| **k)
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Sanitise then trim with the standard block priorities.
pub fn prepare_prompt(raw: &str, budget: usize) -> String {
    trim_prompt(&sanitize_prompt(raw), budget, PRIORITY_KEYWORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_whole_words_case_insensitively() {
        let out = sanitize_prompt("The Monster waved a SWORD at the swordfish.");
        assert_eq!(
            out,
            "The Friendly creature waved a Wooden stick at the swordfish."
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        let input = "A scary war with guns, blood and a dead knight who dies; Evil demons attack.";
        let once = sanitize_prompt(input);
        assert_eq!(sanitize_prompt(&once), once);
    }

    #[test]
    fn no_replacement_reintroduces_a_flagged_term() {
        for (_, replacement) in REPLACEMENTS {
            assert!(
                !RE_FLAGGED.is_match(replacement),
                "replacement '{replacement}' contains a flagged term"
            );
        }
    }

    #[test]
    fn clean_prompt_passes_through() {
        let s = "Ana plants sunflowers in the garden.";
        assert_eq!(sanitize_prompt(s), s);
    }

    #[test]
    fn short_prompt_untouched() {
        let p = "STYLE: x\n\nSCENE: y";
        assert_eq!(trim_prompt(p, 100, &["SCENE"]), p);
    }

    #[test]
    fn trim_respects_budget_and_priority() {
        let style = "STYLE: watercolor";
        let filler = format!("NOTES: {}", "x".repeat(60));
        let anatomy = "ANATOMICAL CORRECTNESS: five fingers";
        let scene = "SCENE: Ana reads under a tree";
        let prompt = [style, filler.as_str(), anatomy, scene].join("\n\n");

        let budget = style.len() + anatomy.len() + scene.len() + 4;
        let out = trim_prompt(&prompt, budget, &["SCENE", "ANATOMICAL CORRECTNESS"]);

        assert!(out.chars().count() <= budget);
        assert_eq!(out, [style, anatomy, scene].join("\n\n"));
    }

    #[test]
    fn keyword_order_decides_under_pressure() {
        let prompt = "STYLE: s\n\nANATOMICAL CORRECTNESS: aaaaaaaaaa\n\nSCENE: bbbbbbbbbb";
        // Either block fits next to the first segment, but not both.
        let out = trim_prompt(prompt, 8 + 2 + 34, &["SCENE", "ANATOMICAL CORRECTNESS"]);
        assert_eq!(out, "STYLE: s\n\nSCENE: bbbbbbbbbb");
    }

    #[test]
    fn unprioritised_segments_fill_remaining_space_in_order() {
        let prompt = "FIRST\n\naaaa\n\nbbbbbbbbbbbbbbbbbbbb\n\ncccc";
        let out = trim_prompt(prompt, 5 + 6 + 6, &[]);
        assert_eq!(out, "FIRST\n\naaaa\n\ncccc");
    }

    #[test]
    fn oversized_first_segment_is_cut() {
        let prompt = format!("{}\n\nSCENE: tail", "é".repeat(50));
        let out = trim_prompt(&prompt, 20, &["SCENE"]);
        assert_eq!(out.chars().count(), 20);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn prepare_sanitizes_before_trimming() {
        let prompt = "STYLE: cartoon\n\nSCENE: a scary cave";
        assert_eq!(prepare_prompt(prompt, 4000), "STYLE: cartoon\n\nSCENE: a mysterious cave");
    }
}
