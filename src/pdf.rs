use crate::canvas::{Command, Document, Page};
use crate::error::ReportError;
use crate::flowable::{FONT_BOLD, FONT_REGULAR};
use crate::types::{Color, Pt};
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream, dictionary};

/// A laid-out document converted to PDF objects, before outlines and metadata are attached.
pub struct RenderedPdf {
    pub doc: LoDocument,
    pub catalog_id: LoObjectId,
    pub page_ids: Vec<LoObjectId>,
    pub page_height: Pt,
    /// Characters replaced by `?` because WinAnsi cannot encode them.
    pub replaced_chars: usize,
}

struct FontResource {
    resource: &'static str,
    base: &'static str,
}

const FONTS: [FontResource; 2] = [
    FontResource {
        resource: "F1",
        base: FONT_REGULAR,
    },
    FontResource {
        resource: "F2",
        base: FONT_BOLD,
    },
];

fn font_resource(name: &str) -> &'static str {
    FONTS
        .iter()
        .find(|font| font.base == name)
        .map(|font| font.resource)
        .unwrap_or("F1")
}

pub fn document_to_pdf(document: &Document) -> Result<RenderedPdf, ReportError> {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut font_dict = lopdf::Dictionary::new();
    for font in &FONTS {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base,
            "Encoding" => "WinAnsiEncoding",
        });
        font_dict.set(font.resource, font_id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => font_dict,
    });

    let page_width = document.page_size.width;
    let page_height = document.page_size.height;
    let media_box: Vec<LoObject> = vec![
        0.into(),
        0.into(),
        page_width.to_f32().into(),
        page_height.to_f32().into(),
    ];

    let mut page_ids = Vec::with_capacity(document.pages.len());
    let mut replaced_chars = 0usize;
    for page in &document.pages {
        let (content, replaced) = render_page(page, page_height);
        replaced_chars += replaced;
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content.into_bytes()));
        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => media_box.clone(),
        };
        let annots: Vec<LoObject> = link_annotations(page, page_height)
            .into_iter()
            .map(|annot| doc.add_object(annot).into())
            .collect();
        if !annots.is_empty() {
            page_dict.set("Annots", annots);
        }
        page_ids.push(doc.add_object(page_dict));
    }

    let kids: Vec<LoObject> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if replaced_chars > 0 {
        log::warn!("{replaced_chars} character(s) outside WinAnsi were replaced with '?'");
    }

    Ok(RenderedPdf {
        doc,
        catalog_id,
        page_ids,
        page_height,
        replaced_chars,
    })
}

fn link_annotations(page: &Page, page_height: Pt) -> Vec<lopdf::Dictionary> {
    page.commands
        .iter()
        .filter_map(|command| match command {
            Command::Link {
                x,
                y,
                width,
                height,
                dest,
            } => Some(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Link",
                "Rect" => vec![
                    x.to_f32().into(),
                    (page_height - *y - *height).to_f32().into(),
                    (*x + *width).to_f32().into(),
                    (page_height - *y).to_f32().into(),
                ],
                "Border" => vec![0.into(), 0.into(), 0.into()],
                "Dest" => LoObject::Name(dest.as_bytes().to_vec()),
            }),
            _ => None,
        })
        .collect()
}

/// Content stream for one page plus the count of characters WinAnsi could not encode.
fn render_page(page: &Page, page_height: Pt) -> (String, usize) {
    let mut out = String::new();
    let mut replaced = 0usize;
    let mut current_font_size = Pt::from_f32(12.0);
    let mut current_font_name = FONT_REGULAR.to_string();

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::Meta { .. } | Command::Link { .. } => {}
            Command::SetFillColor(color) => out.push_str(&color_to_pdf(*color, "rg")),
            Command::SetStrokeColor(color) => out.push_str(&color_to_pdf(*color, "RG")),
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", width.to_pdf_number()));
            }
            Command::SetFontName(name) => current_font_name = name.clone(),
            Command::SetFontSize(size) => current_font_size = *size,
            Command::MoveTo { x, y } => {
                out.push_str(&format!(
                    "{} {} m\n",
                    x.to_pdf_number(),
                    (page_height - *y).to_pdf_number()
                ));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!(
                    "{} {} l\n",
                    x.to_pdf_number(),
                    (page_height - *y).to_pdf_number()
                ));
            }
            // Paths are built with MoveTo/LineTo or DrawRect; Fill/Stroke paint them.
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawString { x, y, text } => {
                let encoded = encode_winansi_pdf_string(text);
                replaced += encoded.replaced;
                out.push_str("BT\n");
                out.push_str(&format!(
                    "/{} {} Tf\n",
                    font_resource(&current_font_name),
                    current_font_size.to_pdf_number()
                ));
                out.push_str(&format!(
                    "{} {} Td\n",
                    x.to_pdf_number(),
                    (page_height - *y - current_font_size).to_pdf_number()
                ));
                out.push_str(&format!("({}) Tj\n", encoded.text));
                out.push_str("ET\n");
            }
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\n",
                    x.to_pdf_number(),
                    (page_height - *y - *height).to_pdf_number(),
                    width.to_pdf_number(),
                    height.to_pdf_number()
                ));
            }
        }
    }

    (out, replaced)
}

fn color_to_pdf(color: Color, op: &str) -> String {
    format!(
        "{} {} {} {op}\n",
        unit_number(color.r),
        unit_number(color.g),
        unit_number(color.b)
    )
}

fn unit_number(value: f32) -> String {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    Pt::from_f32(value).to_pdf_number()
}

pub(crate) struct WinAnsiEncoded {
    pub text: String,
    pub replaced: usize,
}

/// Escaped PDF literal-string body in WinAnsi (cp1252); unencodable characters become `?`.
pub(crate) fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        match ch {
            '\u{2265}' => {
                out.push_str(">=");
                continue;
            }
            '\u{2264}' => {
                out.push_str("<=");
                continue;
            }
            _ => {}
        }

        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if !(0x20..0x7f).contains(&b) => out.push_str(&format!("\\{b:03o}")),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded { text: out, replaced }
}
