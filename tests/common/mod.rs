#![allow(dead_code)]

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

/// A word shown at a PDF user-space position (origin bottom-left).
pub struct Word<'a> {
    pub text: &'a str,
    pub x: i64,
    pub y: i64,
}

pub fn word(text: &str, x: i64, y: i64) -> Word<'_> {
    Word { text, x, y }
}

/// Writes a 595x842 Courier PDF with one text object per word.
pub fn create_test_pdf(path: &Path, pages: &[Vec<Word<'_>>]) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids = Vec::new();

    for words in pages {
        let mut operations = Vec::new();
        for word in words {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![word.x.into(), word.y.into()]),
                Operation::new("Tj", vec![Object::string_literal(word.text)]),
                Operation::new("ET", vec![]),
            ]);
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| (*id).into()).collect::<Vec<_>>(),
            "Count" => i64::try_from(page_ids.len())?,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    doc.save(path)?;
    Ok(())
}

/// A glyph dump JSON document: `(page, [(text, x, baseline, width)])` on a
/// 400x400 page with 10pt text.
pub fn glyph_dump_json(document: &str, pages: &[(u32, Vec<(&str, f64, f64, f64)>)]) -> String {
    let pages = pages
        .iter()
        .map(|(page, glyphs)| {
            let glyphs = glyphs
                .iter()
                .map(|(text, x, baseline, width)| {
                    serde_json::json!({
                        "text": text,
                        "transform": [10.0, 0.0, 0.0, 10.0, x, baseline],
                        "width": width,
                        "height": 10.0,
                    })
                })
                .collect::<Vec<_>>();
            serde_json::json!({
                "page": page,
                "width": 400.0,
                "height": 400.0,
                "glyphs": glyphs,
            })
        })
        .collect::<Vec<_>>();
    serde_json::json!({ "document": document, "pages": pages }).to_string()
}
