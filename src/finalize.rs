use crate::error::ReportError;
use crate::pagination::PageEntry;
use crate::pdf::RenderedPdf;
use crate::types::Pt;
use chrono::{DateTime, Utc};
use lopdf::{
    Dictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId,
    Stream as LoStream, StringFormat, dictionary,
};
use std::io::Write;
use std::path::Path;

const FRONT_FORM_NAME: &str = "FolioFront";
pub const PRODUCER: &str = concat!("folio ", env!("CARGO_PKG_VERSION"));

/// Named destination: the top of a heading on a 1-based page.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: String,
    pub page: usize,
    pub top: Pt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineItem {
    pub title: String,
    pub dest: String,
    pub children: Vec<OutlineItem>,
}

/// Bookmark tree from placed headings: level-0 entries with their level-1 entries nested.
pub fn outline_from_entries(entries: &[PageEntry]) -> Vec<OutlineItem> {
    let mut items: Vec<OutlineItem> = Vec::new();
    for entry in entries {
        let item = OutlineItem {
            title: entry.title.clone(),
            dest: entry.bookmark_id.clone(),
            children: Vec::new(),
        };
        match (entry.level, items.last_mut()) {
            (0, _) | (_, None) => items.push(item),
            (_, Some(parent)) => parent.children.push(item),
        }
    }
    items
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub title: String,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub keywords: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FinalizeOptions<'a> {
    /// Validated PDF whose first page is drawn under page 1.
    pub front_page: Option<&'a [u8]>,
    pub destinations: Vec<Destination>,
    pub outline: Vec<OutlineItem>,
    pub info: DocumentInfo,
    /// Horizontal position of `/XYZ` destinations.
    pub dest_left: Pt,
}

/// Attaches front page, destinations, bookmarks and metadata, and serializes the PDF.
pub fn finalize(rendered: RenderedPdf, options: &FinalizeOptions<'_>) -> Result<Vec<u8>, ReportError> {
    let RenderedPdf {
        mut doc,
        catalog_id,
        page_ids,
        page_height,
        ..
    } = rendered;

    if let Some(front) = options.front_page {
        let first = page_ids
            .first()
            .copied()
            .ok_or_else(|| ReportError::Rendering("document has no pages".to_string()))?;
        merge_front_page(&mut doc, first, front)?;
    }

    if !options.destinations.is_empty() {
        let mut dests = Dictionary::new();
        for dest in &options.destinations {
            let Some(page_id) = dest.page.checked_sub(1).and_then(|idx| page_ids.get(idx)) else {
                log::warn!("destination '{}' points at missing page {}", dest.id, dest.page);
                continue;
            };
            dests.set(
                dest.id.as_bytes().to_vec(),
                xyz_destination(*page_id, options.dest_left, page_height - dest.top),
            );
        }
        let dests_id = doc.add_object(dests);
        catalog_mut(&mut doc, catalog_id)?.set("Dests", dests_id);
    }

    if !options.outline.is_empty() {
        let outlines_id = doc.new_object_id();
        let (first, last, count) = add_outline_items(&mut doc, outlines_id, &options.outline);
        doc.objects.insert(
            outlines_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => first,
                "Last" => last,
                "Count" => count,
            }),
        );
        let catalog = catalog_mut(&mut doc, catalog_id)?;
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }

    let info_id = doc.add_object(info_dictionary(&options.info));
    doc.trailer.set("Info", info_id);

    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

fn catalog_mut(doc: &mut LoDocument, catalog_id: LoObjectId) -> Result<&mut Dictionary, ReportError> {
    Ok(doc.get_object_mut(catalog_id).and_then(LoObject::as_dict_mut)?)
}

fn xyz_destination(page_id: LoObjectId, left: Pt, top: Pt) -> LoObject {
    LoObject::Array(vec![
        page_id.into(),
        "XYZ".into(),
        left.to_f32().into(),
        top.to_f32().into(),
        LoObject::Null,
    ])
}

// Returns (first, last, visible descendant count) of the sibling chain.
fn add_outline_items(
    doc: &mut LoDocument,
    parent: LoObjectId,
    items: &[OutlineItem],
) -> (LoObjectId, LoObjectId, i64) {
    let ids: Vec<LoObjectId> = items.iter().map(|_| doc.new_object_id()).collect();
    let mut count = 0i64;
    for (idx, item) in items.iter().enumerate() {
        let mut dict = dictionary! {
            "Title" => text_string(&item.title),
            "Parent" => parent,
            "Dest" => LoObject::Name(item.dest.as_bytes().to_vec()),
        };
        if idx > 0 {
            dict.set("Prev", ids[idx - 1]);
        }
        if let Some(next) = ids.get(idx + 1) {
            dict.set("Next", *next);
        }
        count += 1;
        if !item.children.is_empty() {
            let (first, last, children) = add_outline_items(doc, ids[idx], &item.children);
            dict.set("First", first);
            dict.set("Last", last);
            dict.set("Count", children);
            count += children;
        }
        doc.objects.insert(ids[idx], LoObject::Dictionary(dict));
    }
    (ids[0], ids[ids.len() - 1], count)
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> LoObject {
    if text.is_ascii() {
        return LoObject::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

fn info_dictionary(info: &DocumentInfo) -> Dictionary {
    let mut dict = dictionary! {
        "Title" => text_string(&info.title),
        "Producer" => text_string(PRODUCER),
        "CreationDate" => LoObject::string_literal(pdf_date(&info.created)),
    };
    for (key, value) in [
        ("Author", &info.author),
        ("Subject", &info.subject),
        ("Creator", &info.creator),
        ("Keywords", &info.keywords),
    ] {
        if let Some(value) = value {
            dict.set(key, text_string(value));
        }
    }
    dict
}

pub fn pdf_date(at: &DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

fn page_box(page: &Dictionary) -> Vec<LoObject> {
    if let Ok(arr) = page.get(b"CropBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    if let Ok(arr) = page.get(b"MediaBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    vec![0.into(), 0.into(), 612.into(), 792.into()]
}

fn box_extent(bbox: &[LoObject]) -> Option<[f32; 4]> {
    let mut out = [0.0f32; 4];
    if bbox.len() != 4 {
        return None;
    }
    for (slot, value) in out.iter_mut().zip(bbox) {
        *slot = value.as_float().ok()?;
    }
    Some(out)
}

fn resolve_dict(doc: &LoDocument, object: Result<&LoObject, lopdf::Error>) -> Dictionary {
    match object {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

fn import_document_objects(
    dst: &mut LoDocument,
    mut src: LoDocument,
) -> Result<Vec<LoObjectId>, ReportError> {
    if src.is_encrypted() {
        return Err(ReportError::Rendering("front page PDF is encrypted".to_string()));
    }
    src.renumber_objects_with(dst.max_id + 1);
    let page_ids: Vec<LoObjectId> = src.get_pages().values().copied().collect();
    dst.max_id = dst.max_id.max(src.max_id);
    dst.objects.extend(src.objects);
    Ok(page_ids)
}

/// Draws the first page of `front` as a form XObject, scaled to fit and centred, beneath
/// whatever page 1 already paints.
fn merge_front_page(doc: &mut LoDocument, target: LoObjectId, front: &[u8]) -> Result<(), ReportError> {
    let source = LoDocument::load_mem(front)?;
    let source_pages = import_document_objects(doc, source)?;
    let source_page_id = source_pages
        .first()
        .copied()
        .ok_or_else(|| ReportError::Rendering("front page PDF has no pages".to_string()))?;

    let source_page = doc.get_object(source_page_id).and_then(LoObject::as_dict)?.clone();
    let content = doc.get_page_content(source_page_id)?;
    let bbox = page_box(&source_page);
    let source_resources = resolve_dict(doc, source_page.get(b"Resources"));
    let form_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => LoObject::Array(bbox.clone()),
            "Resources" => source_resources,
        },
        content,
    ));

    let target_page = doc.get_object(target).and_then(LoObject::as_dict)?.clone();
    let target_box = box_extent(&page_box(&target_page))
        .ok_or_else(|| ReportError::Rendering("page 1 has no usable MediaBox".to_string()))?;
    let source_box = box_extent(&bbox)
        .ok_or_else(|| ReportError::Rendering("front page has no usable MediaBox".to_string()))?;
    let placement = fit_transform(source_box, target_box);

    // Page resources are shared across pages; page 1 gets its own copy.
    let mut resources = resolve_dict(doc, target_page.get(b"Resources"));
    let mut xobjects = resolve_dict(doc, resources.get(b"XObject"));
    xobjects.set(FRONT_FORM_NAME, form_id);
    resources.set("XObject", xobjects);

    let draw = format!(
        "q {} 0 0 {} {} {} cm /{FRONT_FORM_NAME} Do Q\n",
        placement[0], placement[0], placement[1], placement[2]
    );
    let draw_id = doc.add_object(LoStream::new(dictionary! {}, draw.into_bytes()));
    let mut contents: Vec<LoObject> = vec![draw_id.into()];
    match target_page.get(b"Contents") {
        Ok(LoObject::Array(existing)) => contents.extend(existing.iter().cloned()),
        Ok(existing) => contents.push(existing.clone()),
        Err(_) => {}
    }

    let page = doc.get_object_mut(target).and_then(LoObject::as_dict_mut)?;
    page.set("Resources", resources);
    page.set("Contents", contents);
    log::debug!("front page merged with scale {:.3}", placement[0]);
    Ok(())
}

/// `[scale, tx, ty]` placing `source` inside `target` preserving aspect ratio, centred.
fn fit_transform(source: [f32; 4], target: [f32; 4]) -> [f32; 3] {
    let src_w = (source[2] - source[0]).abs().max(1.0);
    let src_h = (source[3] - source[1]).abs().max(1.0);
    let dst_w = (target[2] - target[0]).abs();
    let dst_h = (target[3] - target[1]).abs();
    let scale = (dst_w / src_w).min(dst_h / src_h);
    let tx = target[0] + (dst_w - src_w * scale) / 2.0 - source[0] * scale;
    let ty = target[1] + (dst_h - src_h * scale) / 2.0 - source[1] * scale;
    [scale, tx, ty]
}

/// Writes through a temp file in the destination directory and renames it into place, so an
/// interrupted run never leaves a truncated PDF behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.into_temp_path().persist(path).map_err(|e| e.error)?;
    Ok(())
}
