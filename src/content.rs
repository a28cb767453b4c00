use crate::bookmarks::BookmarkRegistry;
use crate::data::Dataset;
use crate::flags::FlagIndex;
use crate::flowable::{Flowable, GridFlowable, HeadingFlowable, Paragraph, Spacer, TextStyle};
use crate::pagination::{HeadingKey, HeadingMark};
use crate::table::{TableBuilder, TableGrid};
use crate::types::{Color, Pt};
use folio_config::{ReportConfig, ResolvedTable, hex_sha256};

pub const EMPTY_TABLE_TEXT: &str = "No records match the criteria for this section.";

/// Type sizes for generated body content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStyles {
    pub section_heading: TextStyle,
    pub subsection_heading: TextStyle,
    pub description: TextStyle,
    pub toc_title: TextStyle,
    pub toc_entry: TextStyle,
}

impl Default for ContentStyles {
    fn default() -> Self {
        Self {
            section_heading: TextStyle::sized(16.0).bold(),
            subsection_heading: TextStyle::sized(13.0).bold(),
            description: TextStyle::sized(9.0).with_color(Color::rgb(0.3, 0.3, 0.3)),
            toc_title: TextStyle::sized(18.0).bold(),
            toc_entry: TextStyle::sized(10.0),
        }
    }
}

/// Front matter and body flowables, built once and replayed unchanged by every pass.
#[derive(Debug, Clone)]
pub struct ContentStream {
    front: Vec<Box<dyn Flowable>>,
    body: Vec<Box<dyn Flowable>>,
    outline: Vec<HeadingMark>,
    digest: String,
    sections_rendered: usize,
}

impl ContentStream {
    pub fn builder<'a>(config: &'a ReportConfig, dataset: &'a Dataset) -> ContentBuilder<'a> {
        ContentBuilder {
            config,
            dataset,
            flags: None,
            front: Vec::new(),
            styles: ContentStyles::default(),
            content_width: Pt::from_f32(770.0),
        }
    }

    /// Every heading in declared order, including sections left out of the body.
    pub fn outline(&self) -> &[HeadingMark] {
        &self.outline
    }

    /// SHA-256 over the fingerprints of the front matter and body flowables.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn sections_rendered(&self) -> usize {
        self.sections_rendered
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Story for one pass: front matter, the given TOC block, then the body. The digest
    /// is taken over the copies actually handed to the pass.
    pub fn for_pass(&self, toc: Vec<Box<dyn Flowable>>) -> PassStory {
        let front = self.front.clone();
        let body = self.body.clone();
        let digest = Self::digest_of(&front, &body);
        let mut flowables = Vec::with_capacity(front.len() + toc.len() + body.len());
        flowables.extend(front);
        flowables.extend(toc);
        flowables.extend(body);
        PassStory { flowables, digest }
    }

    /// Recomputes the digest of a story's non-TOC part, for comparison with [`Self::digest`].
    pub fn digest_of(front: &[Box<dyn Flowable>], body: &[Box<dyn Flowable>]) -> String {
        let mut canonical = String::new();
        for flowable in front.iter().chain(body) {
            canonical.push_str(&flowable.fingerprint());
            canonical.push('\n');
        }
        hex_sha256(canonical.as_bytes())
    }

    pub fn verify_digest(&self) -> bool {
        Self::digest_of(&self.front, &self.body) == self.digest
    }
}

/// One pass's copy of the content stream.
pub struct PassStory {
    pub flowables: Vec<Box<dyn Flowable>>,
    pub digest: String,
}

pub struct ContentBuilder<'a> {
    config: &'a ReportConfig,
    dataset: &'a Dataset,
    flags: Option<&'a FlagIndex>,
    front: Vec<Box<dyn Flowable>>,
    styles: ContentStyles,
    content_width: Pt,
}

impl<'a> ContentBuilder<'a> {
    pub fn flags(mut self, flags: &'a FlagIndex) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn front_matter(mut self, flowable: Box<dyn Flowable>) -> Self {
        self.front.push(flowable);
        self
    }

    pub fn styles(mut self, styles: ContentStyles) -> Self {
        self.styles = styles;
        self
    }

    pub fn content_width(mut self, width: Pt) -> Self {
        self.content_width = width;
        self
    }

    pub fn build(self) -> ContentStream {
        let mut registry = BookmarkRegistry::new();
        let mut outline = Vec::new();
        let mut body: Vec<Box<dyn Flowable>> = Vec::new();
        let mut sections_rendered = 0usize;

        for section in &self.config.sections {
            let section_mark = HeadingMark::new(
                HeadingKey::section(&section.title),
                registry.assign(&section.title),
            );
            outline.push(section_mark.clone());
            let sub_marks: Vec<HeadingMark> = section
                .subsections
                .iter()
                .map(|sub| {
                    HeadingMark::new(
                        HeadingKey::subsection(&section.title, &sub.title),
                        registry.assign(&sub.title),
                    )
                })
                .collect();
            outline.extend(sub_marks.iter().cloned());

            let section_grid = self.grid(&section.resolve());
            let sub_grids: Vec<Option<TableGrid>> = section
                .subsections
                .iter()
                .map(|sub| self.grid(&section.resolve_subsection(sub)))
                .collect();

            if section.omit_when_empty && !has_rows(&section_grid, &sub_grids) {
                log::info!("section '{}' has no matching rows; omitted", section.title);
                continue;
            }
            sections_rendered += 1;

            body.push(Box::new(HeadingFlowable::new(
                section_mark,
                self.styles.section_heading.clone(),
                true,
            )));
            self.push_description(&mut body, section.description.as_deref());
            self.push_table(&mut body, section_grid);

            for ((sub, mark), grid) in section.subsections.iter().zip(sub_marks).zip(sub_grids) {
                body.push(Box::new(Spacer::new(12.0)));
                body.push(Box::new(HeadingFlowable::new(
                    mark,
                    self.styles.subsection_heading.clone(),
                    false,
                )));
                self.push_description(&mut body, sub.description.as_deref());
                self.push_table(&mut body, grid);
            }
            log::debug!(
                "section '{}' built with {} subsection(s)",
                section.title,
                section.subsections.len()
            );
        }

        let digest = ContentStream::digest_of(&self.front, &body);
        ContentStream {
            front: self.front,
            body,
            outline,
            digest,
            sections_rendered,
        }
    }

    // `None` when the table declares no columns.
    fn grid(&self, table: &ResolvedTable<'_>) -> Option<TableGrid> {
        if table.columns.is_empty() {
            return None;
        }
        let mut builder = TableBuilder::new(table.columns, table.style)
            .with_aggregates(table.aggregates)
            .with_available_width(self.content_width);
        if let Some(flags) = self.flags {
            builder = builder.with_flags(flags);
        }
        Some(builder.build(self.dataset, &table.criteria))
    }

    fn push_description(&self, body: &mut Vec<Box<dyn Flowable>>, description: Option<&str>) {
        if let Some(text) = description.filter(|text| !text.trim().is_empty()) {
            body.push(Box::new(
                Paragraph::new(text).with_style(self.styles.description.clone()),
            ));
        }
        body.push(Box::new(Spacer::new(6.0)));
    }

    fn push_table(&self, body: &mut Vec<Box<dyn Flowable>>, grid: Option<TableGrid>) {
        match grid {
            Some(grid) if grid.is_empty() => body.push(Box::new(
                Paragraph::new(EMPTY_TABLE_TEXT).with_style(self.styles.description.clone()),
            )),
            Some(grid) => body.push(Box::new(GridFlowable::new(grid))),
            None => {}
        }
    }
}

fn has_rows(section: &Option<TableGrid>, subsections: &[Option<TableGrid>]) -> bool {
    std::iter::once(section)
        .chain(subsections)
        .flatten()
        .any(|grid| !grid.is_empty())
}
