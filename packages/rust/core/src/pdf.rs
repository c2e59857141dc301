//! PDF-aware merging of staged agreement documents.
//!
//! Every part is loaded, its objects renumbered into a shared id space, and
//! its pages hung under one new page tree. The output has a single header,
//! cross-reference table, and trailer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use articulator_shared::{ArticulatorError, Result};

use crate::retrieval::ArtifactMerger;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guards against cyclic `Parent` links in malformed files.
const MAX_TREE_DEPTH: usize = 64;

/// Merges parts into one PDF, pages in part order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfMerger;

impl ArtifactMerger for PdfMerger {
    fn merge(&self, parts: &[PathBuf], target: &Path) -> Result<()> {
        let mut merged = Document::with_version("1.5");
        let mut next_id: u32 = 1;
        let mut page_ids: Vec<ObjectId> = Vec::new();

        for part in parts {
            let mut doc = Document::load(part).map_err(|e| {
                ArticulatorError::parse(format!("{} is not a readable PDF: {e}", part.display()))
            })?;

            doc.renumber_objects_with(next_id);
            next_id = doc
                .objects
                .keys()
                .map(|(id, _)| *id)
                .max()
                .map_or(next_id, |max| max + 1);

            let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
            for &page_id in &pages {
                let inherited = inherited_attributes(&doc, page_id);
                if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
                    for (key, value) in inherited {
                        page.set(key, value);
                    }
                }
            }

            debug!(part = %part.display(), pages = pages.len(), "part loaded");
            page_ids.extend(pages);
            merged.objects.extend(doc.objects);
        }

        if page_ids.is_empty() {
            return Err(ArticulatorError::parse(format!(
                "no pages found in {} part(s) for {}",
                parts.len(),
                target.display()
            )));
        }

        merged.max_id = next_id.saturating_sub(1);
        let tree_id = merged.new_object_id();

        for &page_id in &page_ids {
            if let Ok(page) = merged.get_object_mut(page_id).and_then(Object::as_dict_mut) {
                page.set("Parent", Object::Reference(tree_id));
            }
        }

        let mut tree = Dictionary::new();
        tree.set("Type", Object::Name(b"Pages".to_vec()));
        tree.set("Count", Object::Integer(page_ids.len() as i64));
        tree.set(
            "Kids",
            Object::Array(page_ids.iter().map(|&id| Object::Reference(id)).collect()),
        );
        merged.objects.insert(tree_id, Object::Dictionary(tree));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(tree_id));
        let catalog_id = merged.add_object(Object::Dictionary(catalog));
        merged.trailer.set("Root", Object::Reference(catalog_id));

        // Old catalogs and page-tree nodes are unreachable now.
        merged.prune_objects();

        let file = File::create(target).map_err(|e| ArticulatorError::io(target, e))?;
        let mut out = BufWriter::new(file);
        merged
            .save_to(&mut out)
            .map_err(|e| ArticulatorError::io(target, std::io::Error::other(e.to_string())))?;
        out.flush().map_err(|e| ArticulatorError::io(target, e))?;

        debug!(target = %target.display(), pages = page_ids.len(), "pdf merged");
        Ok(())
    }
}

/// Attributes `page_id` lacks itself but inherits from an ancestor node.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(&'static [u8], Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for key in INHERITABLE {
        if page.has(key) {
            continue;
        }

        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let Some(node_id) = parent {
            if depth == MAX_TREE_DEPTH {
                break;
            }
            let Ok(node) = doc.get_dictionary(node_id) else {
                break;
            };
            if let Ok(value) = node.get(key) {
                found.push((key, value.clone()));
                break;
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }
    }
    found
}

/// A minimal PDF with `pages` pages, each tagged with `tag`. The media box
/// lives on the page tree node so merging has to carry it down.
#[cfg(test)]
pub(crate) fn sample_pdf(pages: usize, tag: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let tree_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(tree_id));
            page.set("Tag", Object::Integer(tag));
            Object::Reference(doc.add_object(Object::Dictionary(page)))
        })
        .collect();

    let mut tree = Dictionary::new();
    tree.set("Type", Object::Name(b"Pages".to_vec()));
    tree.set("Count", Object::Integer(pages as i64));
    tree.set("Kids", Object::Array(kids));
    tree.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ]),
    );
    doc.objects.insert(tree_id, Object::Dictionary(tree));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(tree_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
