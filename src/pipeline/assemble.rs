//! Document assembly: lay out the storybook and serialise it as PDF.
//!
//! Assembly runs in two steps so the geometry can be tested without parsing
//! PDF content streams:
//!
//! 1. **Layout** - each page becomes a [`PageLayout`]: positioned images,
//!    text lines (already encoded and wrapped) and frames.
//! 2. **Render** - layouts are written as `lopdf` objects.
//!
//! Pages are A4 portrait. The cover shows the illustration in roughly the
//! top 75% with the title below it; story pages show the illustration in
//! roughly the top 60%, the wrapped text below and the page number at the
//! bottom. An image that decodes neither as JPEG nor as PNG is replaced by a
//! framed message and the document still completes.

use crate::error::StorybookError;
use crate::pipeline::font::{encode_text, wrap_text, PdfFont, FIRST_CHAR, LAST_CHAR};
use crate::pipeline::image::download_image;
use crate::pipeline::ImageSlot;
use crate::storage::StoryStore;
use crate::story::StoryDocument;
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
pub const MARGIN: f32 = 48.0;

/// Drawn in place of an image that could not be decoded.
pub const MISSING_IMAGE_TEXT: &str = "Illustration unavailable";

const COVER_IMAGE_SHARE: f32 = 0.75;
const PAGE_IMAGE_SHARE: f32 = 0.60;
const TITLE_SIZE: f32 = 30.0;
const BODY_SIZE: f32 = 14.0;
const NUMBER_SIZE: f32 = 10.0;
const LINE_SPACING: f32 = 1.35;
const MAX_IMAGE_SIDE: u32 = 1200;
const FONT_RESOURCE: &str = "F1";

// ── Layout model ────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in PDF points, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Decoded image `image` drawn into `rect`.
    Image { image: usize, rect: Rect },
    /// One encoded line of text with its baseline origin.
    Text { line: Vec<u8>, x: f32, y: f32, size: f32 },
    /// Thin grey outline.
    Frame { rect: Rect },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub elements: Vec<Element>,
}

impl PageLayout {
    /// All text on the page, lines joined by newlines. For tests and logs.
    pub fn text(&self) -> String {
        self.elements
            .iter()
            .filter_map(|e| match e {
                Element::Text { line, .. } => Some(line.iter().map(|b| *b as char).collect::<String>()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.elements.iter().any(|e| matches!(e, Element::Image { .. }))
    }
}

/// An image decoded to raw RGB8.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Raw image bytes for the cover and each page, in page order.
#[derive(Debug, Clone, Default)]
pub struct StoryImages {
    pub cover: Option<Vec<u8>>,
    pub pages: Vec<Option<Vec<u8>>>,
}

/// The serialised PDF plus the layout it was rendered from.
#[derive(Debug, Clone)]
pub struct PdfOutput {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageLayout>,
    /// Slots drawn with [`MISSING_IMAGE_TEXT`] instead of an image.
    pub missing_images: Vec<ImageSlot>,
}

/// Decode as JPEG first, then PNG. Large images are downscaled.
pub fn decode_image(bytes: &[u8]) -> Option<DecodedImage> {
    let img = [ImageFormat::Jpeg, ImageFormat::Png]
        .into_iter()
        .find_map(|fmt| image::load_from_memory_with_format(bytes, fmt).ok())?;
    let img = if img.width() > MAX_IMAGE_SIDE || img.height() > MAX_IMAGE_SIDE {
        img.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    let rgb = img.to_rgb8();
    Some(DecodedImage {
        width: rgb.width(),
        height: rgb.height(),
        rgb: rgb.into_raw(),
    })
}

// ── Layout ──────────────────────────────────────────────────────────────────

fn fit(area: Rect, img: &DecodedImage) -> Rect {
    let scale = (area.w / img.width as f32).min(area.h / img.height as f32);
    let w = img.width as f32 * scale;
    let h = img.height as f32 * scale;
    Rect {
        x: area.x + (area.w - w) / 2.0,
        y: area.y + (area.h - h) / 2.0,
        w,
        h,
    }
}

fn centered(font: &PdfFont, line: Vec<u8>, y: f32, size: f32) -> Element {
    let width = font.text_width(&line, size);
    Element::Text {
        x: ((PAGE_WIDTH - width) / 2.0).max(MARGIN),
        y,
        size,
        line,
    }
}

fn place_image(
    elements: &mut Vec<Element>,
    area: Rect,
    image: Option<(usize, &DecodedImage)>,
    font: &PdfFont,
) {
    match image {
        Some((index, img)) => elements.push(Element::Image {
            image: index,
            rect: fit(area, img),
        }),
        None => {
            elements.push(Element::Frame { rect: area });
            elements.push(centered(
                font,
                encode_text(MISSING_IMAGE_TEXT),
                area.y + area.h / 2.0,
                BODY_SIZE,
            ));
        }
    }
}

/// Cover: illustration in the top 75%, large centred title below.
pub fn cover_layout(title: &str, image: Option<(usize, &DecodedImage)>, font: &PdfFont) -> PageLayout {
    let mut elements = Vec::new();
    let image_bottom = PAGE_HEIGHT * (1.0 - COVER_IMAGE_SHARE);
    let area = Rect {
        x: MARGIN,
        y: image_bottom,
        w: PAGE_WIDTH - 2.0 * MARGIN,
        h: PAGE_HEIGHT - MARGIN - image_bottom,
    };
    place_image(&mut elements, area, image, font);

    let mut y = image_bottom - TITLE_SIZE * LINE_SPACING;
    for line in wrap_text(font, title, TITLE_SIZE, PAGE_WIDTH - 2.0 * MARGIN) {
        if y < MARGIN / 2.0 {
            break;
        }
        elements.push(centered(font, line, y, TITLE_SIZE));
        y -= TITLE_SIZE * LINE_SPACING;
    }
    PageLayout { elements }
}

/// Story page: illustration in the top 60%, text below, page number at the
/// bottom.
pub fn story_page_layout(
    number: usize,
    content: &str,
    image: Option<(usize, &DecodedImage)>,
    font: &PdfFont,
) -> PageLayout {
    let mut elements = Vec::new();
    let image_bottom = PAGE_HEIGHT * (1.0 - PAGE_IMAGE_SHARE);
    let area = Rect {
        x: MARGIN,
        y: image_bottom,
        w: PAGE_WIDTH - 2.0 * MARGIN,
        h: PAGE_HEIGHT - MARGIN - image_bottom,
    };
    place_image(&mut elements, area, image, font);

    let text_floor = MARGIN + NUMBER_SIZE * 2.0;
    let mut y = image_bottom - BODY_SIZE * 2.0;
    let lines = wrap_text(font, content, BODY_SIZE, PAGE_WIDTH - 2.0 * MARGIN);
    let total = lines.len();
    for (i, line) in lines.into_iter().enumerate() {
        if y < text_floor {
            warn!("Page {number}: text overflows, {} line(s) dropped", total - i);
            break;
        }
        elements.push(Element::Text {
            line,
            x: MARGIN,
            y,
            size: BODY_SIZE,
        });
        y -= BODY_SIZE * LINE_SPACING;
    }

    elements.push(centered(
        font,
        number.to_string().into_bytes(),
        MARGIN / 2.0,
        NUMBER_SIZE,
    ));
    PageLayout { elements }
}

// ── Assembly ────────────────────────────────────────────────────────────────

/// Lay out and render the whole book. CPU-bound; call from
/// `spawn_blocking` in async contexts.
pub fn assemble_pdf(
    document: &StoryDocument,
    images: &StoryImages,
    font: &PdfFont,
) -> Result<PdfOutput, StorybookError> {
    let mut decoded: Vec<DecodedImage> = Vec::new();
    let mut missing = Vec::new();

    let mut take = |slot: ImageSlot, bytes: Option<&Vec<u8>>, decoded: &mut Vec<DecodedImage>| {
        match bytes.and_then(|b| decode_image(b)) {
            Some(img) => {
                decoded.push(img);
                Some(decoded.len() - 1)
            }
            None => {
                warn!("{slot}: image missing or undecodable, drawing fallback text");
                missing.push(slot);
                None
            }
        }
    };

    let cover_index = take(ImageSlot::Cover, images.cover.as_ref(), &mut decoded);
    let page_indices: Vec<Option<usize>> = document
        .pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            take(
                ImageSlot::Page(page.page_number),
                images.pages.get(i).and_then(Option::as_ref),
                &mut decoded,
            )
        })
        .collect();

    let mut layouts = Vec::with_capacity(document.pages.len() + 1);
    layouts.push(cover_layout(
        &document.title,
        cover_index.map(|i| (i, &decoded[i])),
        font,
    ));
    for (page, index) in document.pages.iter().zip(&page_indices) {
        layouts.push(story_page_layout(
            page.page_number,
            &page.content,
            index.map(|i| (i, &decoded[i])),
            font,
        ));
    }

    let bytes = render_pdf(&document.title, &layouts, &decoded, font)?;
    debug!("assembled PDF: {} pages, {} bytes", layouts.len(), bytes.len());
    Ok(PdfOutput {
        bytes,
        pages: layouts,
        missing_images: missing,
    })
}

fn pdf_err(e: impl std::fmt::Display) -> StorybookError {
    StorybookError::Pdf {
        detail: e.to_string(),
    }
}

fn add_font(doc: &mut Document, font: &PdfFont) -> ObjectId {
    match font {
        PdfFont::Helvetica => doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
        PdfFont::Embedded(f) => {
            let file_id = doc.add_object(Stream::new(
                dictionary! { "Length1" => f.data.len() as i64 },
                f.data.clone(),
            ));
            let descriptor_id = doc.add_object(dictionary! {
                "Type" => "FontDescriptor",
                "FontName" => Object::Name(f.name.clone().into_bytes()),
                "Flags" => 32,
                "FontBBox" => f.bbox.iter().map(|v| Object::Integer(i64::from(*v))).collect::<Vec<_>>(),
                "ItalicAngle" => 0,
                "Ascent" => f.ascent,
                "Descent" => f.descent,
                "CapHeight" => f.cap_height,
                "StemV" => 80,
                "FontFile2" => file_id,
            });
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "TrueType",
                "BaseFont" => Object::Name(f.name.clone().into_bytes()),
                "FirstChar" => i64::from(FIRST_CHAR),
                "LastChar" => i64::from(LAST_CHAR),
                "Widths" => f.widths.iter().map(|w| Object::Integer(i64::from(*w))).collect::<Vec<_>>(),
                "FontDescriptor" => descriptor_id,
                "Encoding" => "WinAnsiEncoding",
            })
        }
    }
}

fn image_name(index: usize) -> String {
    format!("Im{index}")
}

fn page_operations(layout: &PageLayout) -> Vec<Operation> {
    let mut ops = Vec::new();
    for element in &layout.elements {
        match element {
            Element::Image { image, rect } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new(
                    "cm",
                    vec![
                        rect.w.into(),
                        Object::Integer(0),
                        Object::Integer(0),
                        rect.h.into(),
                        rect.x.into(),
                        rect.y.into(),
                    ],
                ));
                ops.push(Operation::new(
                    "Do",
                    vec![Object::Name(image_name(*image).into_bytes())],
                ));
                ops.push(Operation::new("Q", vec![]));
            }
            Element::Frame { rect } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("RG", vec![0.7f32.into(), 0.7f32.into(), 0.7f32.into()]));
                ops.push(Operation::new("w", vec![Object::Integer(1)]));
                ops.push(Operation::new(
                    "re",
                    vec![rect.x.into(), rect.y.into(), rect.w.into(), rect.h.into()],
                ));
                ops.push(Operation::new("S", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            Element::Text { line, x, y, size } => {
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new("rg", vec![0.1f32.into(), 0.1f32.into(), 0.1f32.into()]));
                ops.push(Operation::new("Tf", vec![FONT_RESOURCE.into(), (*size).into()]));
                ops.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                ops.push(Operation::new(
                    "Tj",
                    vec![Object::String(line.clone(), StringFormat::Literal)],
                ));
                ops.push(Operation::new("ET", vec![]));
            }
        }
    }
    ops
}

fn render_pdf(
    title: &str,
    layouts: &[PageLayout],
    images: &[DecodedImage],
    font: &PdfFont,
) -> Result<Vec<u8>, StorybookError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = add_font(&mut doc, font);

    let image_ids: Vec<ObjectId> = images
        .iter()
        .map(|img| {
            doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(img.width),
                    "Height" => i64::from(img.height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                img.rgb.clone(),
            ))
        })
        .collect();

    let mut page_ids = Vec::with_capacity(layouts.len());
    for layout in layouts {
        let content = Content {
            operations: page_operations(layout),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().map_err(pdf_err)?));

        let mut xobjects = Dictionary::new();
        for element in &layout.elements {
            if let Element::Image { image, .. } = element {
                xobjects.set(image_name(*image), image_ids[*image]);
            }
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { FONT_RESOURCE => font_id },
                "XObject" => xobjects,
            },
        });
        page_ids.push(page_id);
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
        "Count" => page_ids.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(encode_text(title), StringFormat::Literal),
        "Producer" => Object::string_literal("edgequake-storybook"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(pdf_err)?;
    Ok(bytes)
}

// ── Image sources ───────────────────────────────────────────────────────────

/// Fetch the bytes behind an image location: `http(s)` URLs are downloaded,
/// store locations are read from the store, anything else is read as a
/// local path. Failures yield `None`.
pub async fn load_image_source(
    source: &str,
    store: &dyn StoryStore,
    client: &reqwest::Client,
) -> Option<Vec<u8>> {
    if source.is_empty() {
        return None;
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return match download_image(client, source).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Image download failed for {source}: {e}");
                None
            }
        };
    }
    if let Some(key) = store.key_for_location(source) {
        match store.get(&key).await {
            Ok(Some(bytes)) => return Some(bytes),
            Ok(None) => {}
            Err(e) => warn!("Image read failed for {source}: {e}"),
        }
    }
    tokio::fs::read(source).await.ok()
}

/// Load the cover and page images referenced by `document`.
pub async fn load_story_images(
    document: &StoryDocument,
    store: &dyn StoryStore,
    client: &reqwest::Client,
) -> StoryImages {
    let cover = load_image_source(&document.cover_image, store, client).await;
    let mut pages = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        pages.push(load_image_source(&page.image_url, store, client).await);
    }
    StoryImages { cover, pages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{AgeRange, IllustrationStyle, Language, Page, StoryMetadata, Theme};
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(w, h, Rgb([200, 120, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn document(pages: usize) -> StoryDocument {
        StoryDocument {
            title: "Ana y la verdad 🌟".into(),
            cover_description: "cover".into(),
            cover_image: String::new(),
            pages: (1..=pages)
                .map(|n| Page {
                    page_number: n,
                    content: format!("Había una vez una niña llamada Ana. Página {n}."),
                    image_description: "scene".into(),
                    image_url: String::new(),
                })
                .collect(),
            characters: Default::default(),
            metadata: StoryMetadata {
                language: Language::Spanish,
                theme: Theme::MoralValues,
                style: IllustrationStyle::PixarStyle,
                age_range: AgeRange::SixToEight,
                child_name: "Ana".into(),
                generated_at: chrono::Utc::now(),
            },
        }
    }

    #[test]
    fn decodes_png_and_rejects_garbage() {
        let img = decode_image(&png(4, 3)).unwrap();
        assert_eq!((img.width, img.height), (4, 3));
        assert_eq!(img.rgb.len(), 4 * 3 * 3);
        assert!(decode_image(b"not an image").is_none());
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        let area = Rect { x: 0.0, y: 0.0, w: 200.0, h: 100.0 };
        let img = DecodedImage { width: 10, height: 10, rgb: vec![] };
        let r = fit(area, &img);
        assert_eq!((r.w, r.h), (100.0, 100.0));
        assert_eq!(r.x, 50.0);
    }

    #[test]
    fn cover_image_occupies_top_three_quarters() {
        let img = decode_image(&png(100, 100)).unwrap();
        let layout = cover_layout("Title", Some((0, &img)), &PdfFont::Helvetica);
        let Element::Image { rect, .. } = &layout.elements[0] else {
            panic!("first element should be the image");
        };
        assert!(rect.y >= PAGE_HEIGHT * 0.25 - 0.01);
        assert!(rect.y + rect.h <= PAGE_HEIGHT - MARGIN + 0.01);
        assert!(layout.text().contains("Title"));
    }

    #[test]
    fn invalid_second_image_still_renders_every_page() {
        let doc = document(2);
        let images = StoryImages {
            cover: Some(png(8, 8)),
            pages: vec![Some(png(8, 6)), Some(b"corrupt bytes".to_vec())],
        };
        let out = assemble_pdf(&doc, &images, &PdfFont::Helvetica).unwrap();

        assert_eq!(out.pages.len(), 3);
        assert_eq!(out.missing_images, vec![ImageSlot::Page(2)]);
        assert!(out.pages[1].has_image());
        assert!(!out.pages[2].has_image());
        assert!(out.pages[2].text().contains(MISSING_IMAGE_TEXT));
        assert!(out.pages[2].text().contains("Página 2"));

        let parsed = Document::load_mem(&out.bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 3);
    }

    #[test]
    fn page_number_and_text_are_laid_out() {
        let layout = story_page_layout(4, "Short text.", None, &PdfFont::Helvetica);
        let text = layout.text();
        assert!(text.contains("Short text."));
        assert!(text.ends_with('4'));
    }

    #[test]
    fn emoji_in_title_do_not_break_rendering() {
        let doc = document(1);
        let out = assemble_pdf(&doc, &StoryImages::default(), &PdfFont::Helvetica).unwrap();
        assert_eq!(out.missing_images, vec![ImageSlot::Cover, ImageSlot::Page(1)]);
        assert!(out.pages[0].text().contains("Ana y la verdad"));
        assert!(!out.pages[0].text().contains('?'));
    }
}
