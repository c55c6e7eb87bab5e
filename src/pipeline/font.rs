//! Fonts and text encoding for the PDF.
//!
//! Text is written with single-byte `WinAnsiEncoding`. Both font options use
//! it: the built-in Helvetica, which needs no embedding, and an optional
//! TrueType file embedded as `FontFile2` when it parses. Characters outside
//! the encoding are replaced with `?`; emoji and pictographs are dropped
//! since neither font can draw them.

use std::path::Path;
use tracing::{info, warn};

/// First and last encoded character codes written to the font dictionary.
pub const FIRST_CHAR: u8 = 32;
pub const LAST_CHAR: u8 = 255;

/// Unicode for WinAnsi codes 0x80–0x9F; `'\0'` marks unused codes.
const WIN_ANSI_HIGH: [char; 32] = [
    '€', '\0', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\0', 'Ž', '\0',
    '\0', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\0', 'ž', 'Ÿ',
];

/// Helvetica advance widths (1/1000 em) for ASCII 32–126.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space … /
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0 … ?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @ … O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P … _
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // ` … o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p … ~
];

fn helvetica_width(code: u8) -> u16 {
    match code {
        32..=126 => HELVETICA_ASCII[(code - 32) as usize],
        0x85 | 0x97 | 0x89 => 1000,
        0x91 | 0x92 | 0x82 => 222,
        0x93 | 0x94 | 0x84 => 333,
        0xC0..=0xDE => 722,
        _ => 556,
    }
}

/// Unicode character drawn for an encoded byte.
pub fn decode_char(code: u8) -> Option<char> {
    match code {
        0x80..=0x9F => Some(WIN_ANSI_HIGH[(code - 0x80) as usize]).filter(|c| *c != '\0'),
        32..=126 | 0xA0..=0xFF => Some(code as char),
        _ => None,
    }
}

fn is_pictograph(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF   // emoji, symbols, flags
        | 0x2600..=0x27BF   // misc symbols, dingbats
        | 0x2B00..=0x2BFF   // arrows, stars
        | 0x2300..=0x23FF   // technical (⌚, ⏰)
        | 0xFE00..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
        | 0x20E3            // keycap
        | 0xE000..=0xF8FF   // private use
    )
}

/// Remove emoji and pictographic symbols.
fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_pictograph(*c)).collect()
}

/// Encode to WinAnsi bytes. Emoji are dropped, tabs become spaces, other
/// control characters are dropped and unmappable characters become `?`.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in strip_emoji(text).chars() {
        let cp = c as u32;
        match cp {
            0x09 => out.push(b' '),
            0x20..=0x7E | 0xA0..=0xFF => out.push(cp as u8),
            0x00..=0x1F | 0x7F..=0x9F => {}
            _ => match WIN_ANSI_HIGH.iter().position(|h| *h == c) {
                Some(i) => out.push(0x80 + i as u8),
                None => out.push(b'?'),
            },
        }
    }
    out
}

// ── Fonts ───────────────────────────────────────────────────────────────────

/// A TrueType font to embed.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    /// PostScript-safe base font name.
    pub name: String,
    pub data: Vec<u8>,
    /// Advance widths (1/1000 em) for codes `FIRST_CHAR..=LAST_CHAR`.
    pub widths: Vec<u16>,
    pub ascent: i32,
    pub descent: i32,
    pub cap_height: i32,
    pub bbox: [i32; 4],
}

/// The font every page is set in.
#[derive(Debug, Clone)]
pub enum PdfFont {
    Helvetica,
    Embedded(Box<EmbeddedFont>),
}

impl PdfFont {
    /// Load the TrueType font at `path`, falling back to Helvetica when the
    /// path is absent, unreadable or not a parseable font.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return PdfFont::Helvetica;
        };
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Font {} unreadable ({e}), using Helvetica", path.display());
                return PdfFont::Helvetica;
            }
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("StoryFont");
        match Self::from_ttf(stem, data) {
            Ok(font) => {
                info!("Embedding font {}", path.display());
                font
            }
            Err(e) => {
                warn!("Font {} not usable ({e}), using Helvetica", path.display());
                PdfFont::Helvetica
            }
        }
    }

    /// Parse TrueType bytes and compute the metrics the PDF needs.
    pub fn from_ttf(name: &str, data: Vec<u8>) -> Result<Self, String> {
        let (widths, ascent, descent, cap_height, bbox) = {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|e| e.to_string())?;
            let upem = f32::from(face.units_per_em().max(1));
            let scale = |v: i16| (f32::from(v) * 1000.0 / upem).round() as i32;

            let notdef = face.glyph_hor_advance(ttf_parser::GlyphId(0)).unwrap_or(0);
            let widths: Vec<u16> = (FIRST_CHAR..=LAST_CHAR)
                .map(|code| {
                    let advance = decode_char(code)
                        .and_then(|c| face.glyph_index(c))
                        .and_then(|g| face.glyph_hor_advance(g))
                        .unwrap_or(notdef);
                    (f32::from(advance) * 1000.0 / upem).round() as u16
                })
                .collect();

            let b = face.global_bounding_box();
            (
                widths,
                scale(face.ascender()),
                scale(face.descender()),
                scale(face.capital_height().unwrap_or(face.ascender())),
                [scale(b.x_min), scale(b.y_min), scale(b.x_max), scale(b.y_max)],
            )
        };

        let mut base_name: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if base_name.is_empty() {
            base_name = "StoryFont".into();
        }

        Ok(PdfFont::Embedded(Box::new(EmbeddedFont {
            name: base_name,
            data,
            widths,
            ascent,
            descent,
            cap_height,
            bbox,
        })))
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, PdfFont::Embedded(_))
    }

    /// Advance width of one encoded byte in 1/1000 em.
    pub fn char_width(&self, code: u8) -> u16 {
        match self {
            PdfFont::Helvetica => helvetica_width(code),
            PdfFont::Embedded(f) if code >= FIRST_CHAR => f.widths[(code - FIRST_CHAR) as usize],
            PdfFont::Embedded(_) => 0,
        }
    }

    /// Width of encoded text at `size` points.
    pub fn text_width(&self, encoded: &[u8], size: f32) -> f32 {
        let units: u32 = encoded.iter().map(|b| u32::from(self.char_width(*b))).sum();
        units as f32 * size / 1000.0
    }
}

/// Greedy word wrap. Returns encoded lines no wider than `max_width`, except
/// that a word wider than a whole line is broken by character.
pub fn wrap_text(font: &PdfFont, text: &str, size: f32, max_width: f32) -> Vec<Vec<u8>> {
    let space = font.text_width(b" ", size);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line: Vec<u8> = Vec::new();
        let mut width = 0.0f32;

        for word in paragraph.split_whitespace() {
            let encoded = encode_text(word);
            if encoded.is_empty() {
                continue;
            }
            let word_width = font.text_width(&encoded, size);

            if !line.is_empty() && width + space + word_width <= max_width {
                line.push(b' ');
                line.extend_from_slice(&encoded);
                width += space + word_width;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if word_width <= max_width {
                width = word_width;
                line = encoded;
                continue;
            }
            // Break an over-long word.
            width = 0.0;
            for b in encoded {
                let w = font.text_width(&[b], size);
                if !line.is_empty() && width + w > max_width {
                    lines.push(std::mem::take(&mut line));
                    width = 0.0;
                }
                line.push(b);
                width += w;
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_are_stripped() {
        assert_eq!(strip_emoji("Hola 🌟 Ana ✨!"), "Hola  Ana !");
        assert_eq!(encode_text("👍🏽ok"), b"ok".to_vec());
    }

    #[test]
    fn joined_emoji_sequences_leave_no_marks() {
        assert_eq!(encode_text("👨\u{200D}👩\u{200D}👧 family"), b" family".to_vec());
        assert_eq!(encode_text("1\u{FE0F}\u{20E3} ☀\u{FE0F}"), b"1 ".to_vec());
    }

    #[test]
    fn latin1_and_win_ansi_mapping() {
        assert_eq!(encode_text("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_text("¡Sí!"), vec![0xA1, b'S', 0xED, b'!']);
        assert_eq!(encode_text("“Hi”—ok…"), vec![0x93, b'H', b'i', 0x94, 0x97, b'o', b'k', 0x85]);
        assert_eq!(encode_text("日本"), b"??".to_vec());
        assert_eq!(decode_char(0x93), Some('“'));
        assert_eq!(decode_char(0x81), None);
    }

    #[test]
    fn helvetica_metrics() {
        let f = PdfFont::Helvetica;
        let w = f.text_width(b"Hello", 10.0);
        assert!((w - 22.78).abs() < 0.001, "{w}");
    }

    #[test]
    fn wrap_respects_width() {
        let f = PdfFont::Helvetica;
        let text = "Ana walked through the quiet forest and found a small blue bird singing on a branch.";
        let lines = wrap_text(&f, text, 12.0, 150.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(f.text_width(line, 12.0) <= 150.0);
        }
        let rejoined = lines
            .iter()
            .map(|l| String::from_utf8(l.clone()).unwrap())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn long_words_are_broken() {
        let f = PdfFont::Helvetica;
        let lines = wrap_text(&f, &"m".repeat(40), 10.0, 50.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| f.text_width(l, 10.0) <= 50.0));
    }

    #[test]
    fn missing_or_invalid_font_falls_back() {
        assert!(!PdfFont::load(None).is_embedded());
        assert!(!PdfFont::load(Some(Path::new("/no/such/font.ttf"))).is_embedded());

        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"definitely not a font").unwrap();
        assert!(!PdfFont::load(Some(&bogus)).is_embedded());
        assert!(PdfFont::from_ttf("x", b"nope".to_vec()).is_err());
    }
}
