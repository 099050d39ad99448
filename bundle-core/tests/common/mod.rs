#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A one-page PDF whose page is `width` points wide, so tests can tell pages apart.
pub fn one_page_pdf(width: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1_i64,
        }),
    );
    finish(doc, pages_id)
}

/// A one-page PDF whose size and resources are set only on the `Pages` node.
pub fn inherited_pdf(width: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1_i64,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), 842.into()],
            "Resources" => dictionary! { "Font" => dictionary! {} },
        }),
    );
    finish(doc, pages_id)
}

/// Three pages in a two-level tree.
///
/// ```text
/// root (MediaBox outer)
/// ├── inner (MediaBox inner, Rotate 90)
/// │   ├── page 1: inherits everything
/// │   └── page 2: own MediaBox 250
/// └── page 3: inherits from root
/// ```
pub fn nested_tree_pdf(outer: i64, inner: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let root_id = doc.new_object_id();
    let inner_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let first = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => inner_id,
        "Contents" => content_id,
    });
    let second = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => inner_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 250.into(), 842.into()],
    });
    let third = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => root_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        inner_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Parent" => root_id,
            "Kids" => vec![first.into(), second.into()],
            "Count" => 2_i64,
            "MediaBox" => vec![0.into(), 0.into(), inner.into(), 842.into()],
            "Rotate" => 90_i64,
        }),
    );
    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![inner_id.into(), third.into()],
            "Count" => 3_i64,
            "MediaBox" => vec![0.into(), 0.into(), outer.into(), 842.into()],
        }),
    );
    finish(doc, root_id)
}

fn finish(mut doc: Document, pages_id: lopdf::ObjectId) -> Vec<u8> {
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialise test PDF");
    bytes
}

/// `key` as a page sees it: on the page itself or on the nearest ancestor.
fn effective<'a>(doc: &'a Document, page_id: lopdf::ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    loop {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
}

/// Effective page widths of `pdf`, in page order.
pub fn page_widths(pdf: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(pdf).expect("load PDF");
    doc.get_pages()
        .values()
        .map(|page_id| {
            let media_box = effective(&doc, *page_id, b"MediaBox")
                .and_then(|b| b.as_array().ok())
                .expect("MediaBox");
            media_box[2].as_i64().expect("integer width")
        })
        .collect()
}

/// Effective page rotations of `pdf`, 0 when unset.
pub fn page_rotations(pdf: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(pdf).expect("load PDF");
    doc.get_pages()
        .values()
        .map(|page_id| {
            effective(&doc, *page_id, b"Rotate")
                .and_then(|r| r.as_i64().ok())
                .unwrap_or(0)
        })
        .collect()
}

/// Whether each page of `pdf` carries `key` in its own dictionary.
pub fn pages_own(pdf: &[u8], key: &[u8]) -> Vec<bool> {
    let doc = Document::load_mem(pdf).expect("load PDF");
    doc.get_pages()
        .values()
        .map(|page_id| doc.get_dictionary(*page_id).expect("page dictionary").has(key))
        .collect()
}

/// Write a ZIP at `path`. Entries ending in `/` become directories.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = ZipWriter::new(File::create(path).expect("create zip"));
    let options = SimpleFileOptions::default();
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("add directory");
        } else {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(content.as_bytes()).expect("write entry");
        }
    }
    zip.finish().expect("finish zip");
}
