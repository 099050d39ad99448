//! In-process PDF concatenation with `lopdf`.
//!
//! Each input document is renumbered above the previous one and its pages are
//! re-parented under a single new page tree. Attributes a page inherits from its
//! original page tree (`Resources`, `MediaBox`, `CropBox`, `Rotate`) are copied onto
//! the page first, so every page keeps the look it had in its own document. One
//! catalog is kept; outlines of the inputs are dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

use crate::aggregate::SkippedEntry;
use crate::contract::{BoxError, Merged, Merger};

/// Page attributes that may be set on any ancestor `Pages` node.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Bound on the `Parent` chain walked per page; guards against cyclic trees.
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("cannot load PDF {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: lopdf::Error,
    },
    #[error("no page tree found in the merged documents")]
    NoPages,
    #[error("no catalog found in the merged documents")]
    NoCatalog,
    #[error("cannot serialise merged PDF: {0}")]
    Save(#[from] std::io::Error),
    #[error("merge task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Merges documents on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct LopdfMerger;

impl LopdfMerger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Merger for LopdfMerger {
    async fn merge(&self, first: Vec<u8>, rest: Vec<PathBuf>) -> Result<Merged, BoxError> {
        let merged = tokio::task::spawn_blocking(move || merge_documents(first, &rest))
            .await
            .map_err(MergeError::from)??;
        Ok(merged)
    }
}

/// Load `first` from memory and every path of `rest` from disk, then concatenate them.
///
/// Files of `rest` that do not load are logged and skipped.
pub fn merge_documents(first: Vec<u8>, rest: &[PathBuf]) -> Result<Merged, MergeError> {
    info!(attachments = rest.len(), "Merging PDFs");
    let mut documents = Vec::with_capacity(rest.len() + 1);
    documents.push(Document::load_mem(&first).map_err(|source| MergeError::Load {
        name: "rendered aggregate".to_string(),
        source,
    })?);
    let mut skipped = Vec::new();
    for path in rest {
        match load(path) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Skipping attachment that is not a loadable PDF");
                skipped.push(SkippedEntry {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    let mut merged = concatenate(documents)?;

    let mut pdf = Vec::new();
    merged.save_to(&mut pdf)?;
    info!(size = pdf.len(), skipped = skipped.len(), "Merged PDF ready");
    Ok(Merged { pdf, skipped })
}

fn load(path: &Path) -> Result<Document, MergeError> {
    debug!(path = %path.display(), "Loading PDF for merge");
    Document::load(path).map_err(|source| MergeError::Load {
        name: path.display().to_string(),
        source,
    })
}

/// The page dictionary of `page_id` with inherited attributes made explicit.
fn flatten_page(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut page = doc.get_dictionary(page_id).ok()?.clone();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(node_id) = parent {
        if depth == MAX_TREE_DEPTH {
            warn!(?page_id, "Page tree too deep, stopping attribute inheritance");
            break;
        }
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key, value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    Some(page)
}

/// Concatenate the pages of `documents`, in order, into a new document.
pub fn concatenate(documents: Vec<Document>) -> Result<Document, MergeError> {
    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects = Vec::new();

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;
        for (_, page_id) in doc.get_pages() {
            if let Some(page) = flatten_page(&doc, page_id) {
                pages.push((page_id, page));
            }
        }
        objects.extend(doc.objects);
    }

    let mut merged = Document::with_version("1.5");
    let mut catalog: Option<(ObjectId, Object)> = None;
    let mut tree_id: Option<ObjectId> = None;

    for (object_id, object) in objects {
        let type_name = object.type_name().unwrap_or("").to_string();
        match type_name.as_str() {
            "Catalog" => {
                if catalog.is_none() {
                    catalog = Some((object_id, object));
                }
            }
            // Pages carry everything they inherited, so the old tree nodes go.
            "Pages" => {
                tree_id.get_or_insert(object_id);
            }
            "Page" | "Outlines" | "Outline" => {}
            _ => {
                merged.objects.insert(object_id, object);
            }
        }
    }

    let tree_id = tree_id.ok_or(MergeError::NoPages)?;
    let (catalog_id, catalog) = catalog.ok_or(MergeError::NoCatalog)?;

    let kids: Vec<Object> = pages
        .iter()
        .map(|(page_id, _)| Object::Reference(*page_id))
        .collect();
    let count = pages.len();
    for (page_id, mut page) in pages {
        page.set("Parent", tree_id);
        merged.objects.insert(page_id, Object::Dictionary(page));
    }

    let mut tree = Dictionary::new();
    tree.set("Type", Object::Name(b"Pages".to_vec()));
    tree.set("Count", count as i64);
    tree.set("Kids", kids);
    merged.objects.insert(tree_id, Object::Dictionary(tree));

    if let Ok(dictionary) = catalog.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Pages", tree_id);
        dictionary.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(dictionary));
    }

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
    merged.renumber_objects();
    merged.compress();
    debug!(pages = count, "Concatenated page trees");
    Ok(merged)
}
