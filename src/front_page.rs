use crate::canvas::Canvas;
use crate::error::ReportError;
use crate::flowable::{Flowable, TextStyle, measure_text};
use crate::types::{Color, Pt, Size};
use chrono::NaiveDate;
use folio_config::ReportMeta;
use lopdf::Document as LoDocument;
use std::path::PathBuf;

/// External producer of the pre-rendered front page (a PDF whose first page becomes page 1).
pub trait FrontPageRenderer {
    fn render(&self, meta: &ReportMeta) -> Result<Vec<u8>, ReportError>;
}

/// Front page supplied as in-memory PDF bytes.
#[derive(Debug, Clone)]
pub struct PdfBytes(pub Vec<u8>);

impl FrontPageRenderer for PdfBytes {
    fn render(&self, _meta: &ReportMeta) -> Result<Vec<u8>, ReportError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct PdfFile(pub PathBuf);

impl FrontPageRenderer for PdfFile {
    fn render(&self, _meta: &ReportMeta) -> Result<Vec<u8>, ReportError> {
        std::fs::read(&self.0).map_err(|err| {
            ReportError::Rendering(format!("cannot read {}: {err}", self.0.display()))
        })
    }
}

impl<F> FrontPageRenderer for F
where
    F: Fn(&ReportMeta) -> Result<Vec<u8>, ReportError>,
{
    fn render(&self, meta: &ReportMeta) -> Result<Vec<u8>, ReportError> {
        self(meta)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrontMatter {
    /// Validated PDF whose first page is merged under page 1.
    External(Vec<u8>),
    Builtin,
}

impl FrontMatter {
    pub fn is_fallback(&self) -> bool {
        matches!(self, FrontMatter::Builtin)
    }
}

/// Runs the renderer and checks its output; any failure degrades to the built-in page.
pub fn resolve(renderer: Option<&dyn FrontPageRenderer>, meta: &ReportMeta) -> FrontMatter {
    let Some(renderer) = renderer else {
        return FrontMatter::Builtin;
    };
    match renderer.render(meta).and_then(|bytes| validate(&bytes).map(|()| bytes)) {
        Ok(bytes) => FrontMatter::External(bytes),
        Err(err) => {
            log::warn!("front page unavailable, using built-in page: {err}");
            FrontMatter::Builtin
        }
    }
}

fn validate(bytes: &[u8]) -> Result<(), ReportError> {
    let doc = LoDocument::load_mem(bytes)
        .map_err(|err| ReportError::Rendering(format!("front page is not a PDF: {err}")))?;
    if doc.is_encrypted() {
        return Err(ReportError::Rendering("front page PDF is encrypted".to_string()));
    }
    if doc.get_pages().is_empty() {
        return Err(ReportError::Rendering("front page PDF has no pages".to_string()));
    }
    Ok(())
}

/// `2024-03-31` → `March 31, 2024`; anything unparsable is printed as given.
pub fn format_effective_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => date.format("%B %d, %Y").to_string(),
        Err(_) => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FallbackLine {
    text: String,
    style: TextStyle,
    gap_before: f32,
}

/// Occupies the whole first frame. Draws the built-in front page, or nothing when an
/// external page will be merged underneath.
#[derive(Debug, Clone)]
pub struct FrontPagePlaceholder {
    lines: Vec<FallbackLine>,
}

impl FrontPagePlaceholder {
    pub fn external() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn fallback(meta: &ReportMeta, generated_on: NaiveDate) -> Self {
        let mut lines = vec![FallbackLine {
            text: meta.title.clone(),
            style: TextStyle::sized(28.0).bold(),
            gap_before: 0.0,
        }];
        if let Some(subtitle) = &meta.subtitle {
            lines.push(FallbackLine {
                text: subtitle.clone(),
                style: TextStyle::sized(16.0),
                gap_before: 12.0,
            });
        }
        if let Some(company) = &meta.company {
            lines.push(FallbackLine {
                text: company.clone(),
                style: TextStyle::sized(14.0),
                gap_before: 24.0,
            });
        }
        let effective = match &meta.effective_date {
            Some(raw) => format_effective_date(raw),
            None => generated_on.format("%B %d, %Y").to_string(),
        };
        lines.push(FallbackLine {
            text: format!("Effective Date: {effective}"),
            style: TextStyle::sized(12.0),
            gap_before: 24.0,
        });
        lines.push(FallbackLine {
            text: "CONFIDENTIAL".to_string(),
            style: TextStyle::sized(14.0).bold().with_color(Color::RED),
            gap_before: 36.0,
        });
        Self { lines }
    }

    pub fn for_front_matter(front: &FrontMatter, meta: &ReportMeta, generated_on: NaiveDate) -> Self {
        match front {
            FrontMatter::External(_) => Self::external(),
            FrontMatter::Builtin => Self::fallback(meta, generated_on),
        }
    }

    fn block_height(&self) -> Pt {
        self.lines
            .iter()
            .map(|line| Pt::from_f32(line.gap_before) + line.style.line_height)
            .sum()
    }
}

impl Flowable for FrontPagePlaceholder {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size {
        Size {
            width: avail_width,
            height: avail_height,
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt) {
        if self.lines.is_empty() {
            return;
        }
        // Vertically centred in the upper two thirds.
        let mut cursor = y + (avail_height.mul_ratio(2, 3) - self.block_height())
            .max(Pt::ZERO)
            .mul_ratio(1, 2);
        for line in &self.lines {
            cursor += Pt::from_f32(line.gap_before);
            line.style.apply(canvas);
            let width = measure_text(&line.text, line.style.font_size);
            let offset = (avail_width - width).max(Pt::ZERO).mul_ratio(1, 2);
            canvas.draw_string(x + offset, cursor, line.text.clone());
            cursor += line.style.line_height;
        }
    }
}
