use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

mod bookmarks;
mod canvas;
mod condition;
mod content;
mod data;
mod debug;
mod decorations;
mod doc_context;
mod doc_template;
mod error;
mod finalize;
mod flags;
mod flowable;
mod frame;
mod front_page;
mod metrics;
mod page_template;
mod pagination;
mod pdf;
mod table;
mod toc;
mod types;

pub use bookmarks::{BookmarkRegistry, bookmark_id};
pub use canvas::{Canvas, Command, Document, Page};
pub use condition::{evaluate, evaluate_condition, try_evaluate};
pub use content::{ContentStream, ContentStyles, EMPTY_TABLE_TEXT, PassStory};
pub use data::{DataSource, Dataset, Record, record};
pub use debug::LayoutTrace;
pub use decorations::{DecorationTemplates, Decorations, PlaceholderValues, substitute_placeholders};
pub use doc_context::DocContext;
pub use doc_template::{DocTemplate, META_PAGE_TEMPLATE_KEY};
pub use error::ReportError;
pub use finalize::{Destination, DocumentInfo, OutlineItem, PRODUCER, outline_from_entries, write_atomic};
pub use flags::{CellHighlight, FlagIndex, FlaggedCell, rule_matches};
pub use flowable::{
    BreakBefore, BreakInside, Flowable, GridFlowable, HeadingFlowable, Pagination, Paragraph,
    Spacer, TextAlign, TextStyle,
};
pub use frame::{AddResult, Frame};
pub use front_page::{
    FrontMatter, FrontPagePlaceholder, FrontPageRenderer, PdfBytes, PdfFile, format_effective_date,
};
pub use metrics::{PassMetrics, RenderSummary};
pub use page_template::{OnPageCallback, PageRole, PageTemplate, report_templates};
pub use pagination::{
    HeadingKey, HeadingMark, HeadingPlacement, LayoutContext, PageEntry, PaginationTracker,
    PassKind, SectionPageMap, TrackerState,
};
pub use table::{
    FilterPredicate, GridCell, GridRow, RowKind, TableBuilder, TableGrid, filter_rows,
    format_cell, parse_comparison,
};
pub use toc::{TocBlock, TocEntry, TocLine, leader_dots};
pub use types::{Color, Margins, Pt, Rect, Size};

pub use folio_config::{
    Aggregates, ColumnSpec, Condition, ConfigError, FilterCondition, FilterCriteria, FlagRule,
    GroupBy, Operator,
    ReportConfig, ReportMeta, Section, Severity, Subsection, TableStyle, TocSettings, Value,
};

/// Applies every flag rule to every row.
pub fn apply_flag_rules(dataset: &Dataset, rules: &[FlagRule]) -> Vec<FlaggedCell> {
    flags::apply(dataset, rules)
}

/// Builds the TOC block from a measured map; see [`toc`] for the entry format.
pub fn build_toc(map: &SectionPageMap, outline: &[HeadingMark], settings: &TocSettings) -> TocBlock {
    toc::build(map, outline, settings)
}

pub struct ReportEngine {
    page_size: Size,
    margins: Margins,
    timeout: Option<Duration>,
    generated_on: NaiveDate,
    created: DateTime<Utc>,
    trace: Option<LayoutTrace>,
    front_page: Option<Box<dyn FrontPageRenderer + Send + Sync>>,
    decorations: DecorationTemplates,
    styles: ContentStyles,
}

pub struct ReportEngineBuilder {
    page_size: Size,
    margins: Margins,
    timeout: Option<Duration>,
    generated_on: Option<NaiveDate>,
    debug_path: Option<PathBuf>,
    front_page: Option<Box<dyn FrontPageRenderer + Send + Sync>>,
    decorations: DecorationTemplates,
    styles: ContentStyles,
}

impl Default for ReportEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEngineBuilder {
    /// A4 landscape with half-inch margins.
    pub fn new() -> Self {
        Self {
            page_size: Size::a4().landscape(),
            margins: Margins::inches(0.5),
            timeout: None,
            generated_on: None,
            debug_path: None,
            front_page: None,
            decorations: DecorationTemplates::default(),
            styles: ContentStyles::default(),
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.margins = Margins::all(value);
        self
    }

    /// Overall budget for one render; exceeding it aborts without writing output.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Date printed in footers and, at midnight UTC, the PDF creation date.
    pub fn generated_on(mut self, date: NaiveDate) -> Self {
        self.generated_on = Some(date);
        self
    }

    // JSONL trace of both layout passes.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn front_page(mut self, renderer: impl FrontPageRenderer + Send + Sync + 'static) -> Self {
        self.front_page = Some(Box::new(renderer));
        self
    }

    pub fn decorations(mut self, templates: DecorationTemplates) -> Self {
        self.decorations = templates;
        self
    }

    pub fn styles(mut self, styles: ContentStyles) -> Self {
        self.styles = styles;
        self
    }

    pub fn build(self) -> Result<ReportEngine, ReportError> {
        let content = self.margins.content_rect(self.page_size);
        if content.width <= Pt::ZERO || content.height <= Pt::ZERO {
            return Err(ReportError::Configuration(ConfigError::Invalid(
                "margins leave no room for content".to_string(),
            )));
        }
        let trace = match self.debug_path {
            Some(path) => Some(LayoutTrace::new(path)?),
            None => None,
        };
        let (generated_on, created) = match self.generated_on {
            Some(date) => (date, date.and_time(NaiveTime::MIN).and_utc()),
            None => {
                let now = Utc::now();
                (chrono::Local::now().date_naive(), now)
            }
        };
        Ok(ReportEngine {
            page_size: self.page_size,
            margins: self.margins,
            timeout: self.timeout,
            generated_on,
            created,
            trace,
            front_page: self.front_page,
            decorations: self.decorations,
            styles: self.styles,
        })
    }
}

/// Output of a render held in memory.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub summary: RenderSummary,
}

impl ReportEngine {
    pub fn builder() -> ReportEngineBuilder {
        ReportEngineBuilder::new()
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    /// Renders the report and atomically writes it to `output`. Nothing is written when
    /// any fatal error occurs.
    pub fn render(
        &self,
        config: &ReportConfig,
        dataset: &Dataset,
        output: impl AsRef<Path>,
    ) -> Result<RenderSummary, ReportError> {
        let output = output.as_ref();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let RenderedReport { bytes, mut summary } = self.compose(config, dataset, deadline)?;
        check_deadline(deadline, "write")?;
        write_atomic(output, &bytes)?;
        summary.output = output.to_path_buf();
        if let Some(trace) = &self.trace {
            if let Ok(value) = serde_json::to_value(&summary) {
                trace.log_event(serde_json::json!({"type": "report.summary", "summary": value}));
                trace.flush();
            }
        }
        log::info!(
            "wrote {} ({} pages, {} bytes)",
            output.display(),
            summary.pages,
            summary.total_bytes
        );
        Ok(summary)
    }

    pub fn render_from_source(
        &self,
        config: &ReportConfig,
        source: &dyn DataSource,
        output: impl AsRef<Path>,
    ) -> Result<RenderSummary, ReportError> {
        config.validate()?;
        let dataset = source.load()?;
        self.render(config, &dataset, output)
    }

    pub fn render_to_bytes(
        &self,
        config: &ReportConfig,
        dataset: &Dataset,
    ) -> Result<RenderedReport, ReportError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        self.compose(config, dataset, deadline)
    }

    fn compose(
        &self,
        config: &ReportConfig,
        dataset: &Dataset,
        deadline: Option<Instant>,
    ) -> Result<RenderedReport, ReportError> {
        config.validate()?;
        let fingerprint = config.fingerprint();
        log::debug!("rendering '{}' (config {fingerprint})", config.report.title);

        let flagged = flags::apply(dataset, &config.flag_rules);
        let flag_index = FlagIndex::new(&flagged);
        check_deadline(deadline, "flagging")?;

        let renderer = self
            .front_page
            .as_deref()
            .map(|renderer| renderer as &dyn FrontPageRenderer);
        let front = front_page::resolve(renderer, &config.report);
        let placeholder =
            FrontPagePlaceholder::for_front_matter(&front, &config.report, self.generated_on);

        let content_rect = self.margins.content_rect(self.page_size);
        let stream = ContentStream::builder(config, dataset)
            .flags(&flag_index)
            .front_matter(Box::new(placeholder))
            .styles(self.styles.clone())
            .content_width(content_rect.width)
            .build();
        let templates = self.page_templates(config);
        check_deadline(deadline, "content")?;

        let mut tracker = PaginationTracker::new()
            .with_deadline(deadline)
            .with_trace(self.trace.clone());
        let mut passes = Vec::with_capacity(2);

        let mut ctx = tracker.begin_measuring()?;
        let reserved = toc::placeholder(stream.outline(), &config.toc);
        let story = stream.for_pass(self.toc_flowables(&reserved));
        layout(&templates, story.flowables, &mut ctx)?;
        let map = tracker.finish_measuring(&ctx, &story.digest)?;
        passes.push(pass_metrics(&ctx));
        log::debug!(
            "measured {} heading(s) over {} page(s)",
            map.len(),
            map.page_count()
        );

        let toc_block = toc::build(&map, stream.outline(), &config.toc);
        let mut ctx = tracker.begin_finalizing()?;
        let story = stream.for_pass(self.toc_flowables(&toc_block));
        let document = layout(&templates, story.flowables, &mut ctx)?;
        tracker.finish(&ctx, &story.digest)?;
        passes.push(pass_metrics(&ctx));
        check_deadline(deadline, "finalize")?;

        let rendered = pdf::document_to_pdf(&document)?;
        let replaced_chars = rendered.replaced_chars;
        let front_bytes = match &front {
            FrontMatter::External(bytes) => Some(bytes.as_slice()),
            FrontMatter::Builtin => None,
        };
        let options = finalize::FinalizeOptions {
            front_page: front_bytes,
            destinations: destinations(&map, stream.outline()),
            outline: outline_from_entries(map.entries()),
            info: DocumentInfo {
                title: config.report.title.clone(),
                author: config.report.author.clone(),
                subject: config.report.subject.clone(),
                creator: config.report.creator.clone(),
                keywords: Some(fingerprint.clone()),
                created: self.created,
            },
            dest_left: self.margins.left,
        };
        let bytes = finalize::finalize(rendered, &options)?;

        let summary = RenderSummary {
            output: PathBuf::new(),
            pages: document.pages.len(),
            sections: stream.sections_rendered(),
            flagged_cells: flagged.len(),
            config_fingerprint: fingerprint,
            content_digest: stream.digest().to_string(),
            fallback_front_page: front.is_fallback(),
            replaced_chars,
            passes,
            total_bytes: bytes.len(),
        };
        Ok(RenderedReport { bytes, summary })
    }

    fn toc_flowables(&self, block: &TocBlock) -> Vec<Box<dyn Flowable>> {
        block.flowables(&self.styles.toc_title, &self.styles.toc_entry)
    }

    fn page_templates(&self, config: &ReportConfig) -> Vec<PageTemplate> {
        let decorations = Decorations::new(
            self.decorations.clone(),
            config.report.title.clone(),
            config.report.display_name(),
            self.generated_on.format("%Y-%m-%d").to_string(),
            self.page_size,
            self.margins,
        )
        .into_callback();
        report_templates(self.page_size, self.margins, Some(decorations))
    }
}

fn layout(
    templates: &[PageTemplate],
    story: Vec<Box<dyn Flowable>>,
    ctx: &mut LayoutContext,
) -> Result<Document, ReportError> {
    let mut doc = DocTemplate::new(templates.to_vec());
    doc.extend(story);
    doc.build(ctx)
}

fn check_deadline(deadline: Option<Instant>, phase: &'static str) -> Result<(), ReportError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ReportError::Timeout(phase)),
        _ => Ok(()),
    }
}

fn pass_metrics(ctx: &LayoutContext) -> PassMetrics {
    PassMetrics {
        pass: ctx.pass().as_str(),
        page_count: ctx.page_count(),
        headings: ctx.placements().len(),
        flowables: ctx.flowables(),
        page_breaks: ctx.page_breaks(),
        layout_ms: ctx.elapsed_ms(),
    }
}

// Headings that never reached the body still get a target so TOC links resolve.
fn destinations(map: &SectionPageMap, outline: &[HeadingMark]) -> Vec<Destination> {
    outline
        .iter()
        .map(|mark| match map.entry(&mark.key) {
            Some(entry) => Destination {
                id: entry.bookmark_id.clone(),
                page: entry.page,
                top: entry.top,
            },
            None => Destination {
                id: mark.bookmark_id.clone(),
                page: 1,
                top: Pt::ZERO,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Document as LoDocument, Object as LoObject};

    const CONFIG: &str = r##"{
        "report": {"title": "Risk Oversight Report", "name": "Risk", "author": "Risk Office"},
        "sections": [
            {
                "title": "Overview",
                "description": "All positions",
                "columns": ["team", "sub", "value"],
                "aggregates": {"total_field": "value"}
            },
            {
                "title": "Team Detail",
                "columns": ["team", "value"],
                "subsections": [
                    {"title": "Team A", "filter_criteria": {"team": "A"}}
                ]
            },
            {
                "title": "Dormant",
                "columns": ["team"],
                "filter_criteria": {"team": "Z"},
                "omit_when_empty": true
            }
        ],
        "flag_rules": [
            {"name": "Large", "field": "value", "operator": ">", "value": 1500}
        ]
    }"##;

    const DATA: &str = r#"[
        {"team": "A", "sub": "A1", "value": 1000.0},
        {"team": "A", "sub": "A2", "value": 2000.0}
    ]"#;

    fn engine() -> ReportEngine {
        ReportEngine::builder()
            .generated_on(NaiveDate::from_ymd_opt(2024, 4, 2).expect("date"))
            .build()
            .expect("engine")
    }

    fn page_text(doc: &LoDocument, page: u32) -> String {
        let id = doc.get_pages()[&page];
        String::from_utf8_lossy(&doc.get_page_content(id).expect("content")).into_owned()
    }

    #[test]
    fn renders_front_toc_and_sections() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(DATA).expect("data");
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("report.pdf");

        let summary = engine().render(&config, &dataset, &out).expect("render");
        assert_eq!(summary.output, out);
        assert_eq!(summary.flagged_cells, 1);
        assert_eq!(summary.sections, 2);
        assert!(summary.fallback_front_page);
        assert_eq!(summary.replaced_chars, 0);
        assert_eq!(summary.passes.len(), 2);
        assert_eq!(summary.passes[0].page_count, summary.passes[1].page_count);

        let doc = LoDocument::load(&out).expect("reload");
        assert_eq!(doc.get_pages().len(), summary.pages);
        assert_eq!(summary.pages, 4);

        let front = page_text(&doc, 1);
        assert!(front.contains("(CONFIDENTIAL) Tj"));
        assert!(front.contains("(Effective Date: April 02, 2024) Tj"));
        assert!(front.contains("(Page 1) Tj"));

        let toc = page_text(&doc, 2);
        let overview = format!("(Overview {}) Tj", ".".repeat(50 - "Overview".len() - 1));
        assert!(toc.contains(&overview), "{toc}");
        assert!(toc.contains("(3) Tj"));
        assert!(toc.contains("(Dormant "));
        assert!(toc.contains("(1) Tj"));

        let body = page_text(&doc, 3);
        assert!(body.contains("(3000.00) Tj"));
        assert!(body.contains("(Grand Total) Tj"));
        assert!(body.contains("(Generated: 2024-04-02) Tj"));
        assert!(body.contains("(Risk Oversight Report) Tj"));
        assert!(body.contains("(Risk) Tj"));
    }

    #[test]
    fn bookmarks_and_destinations_point_at_heading_pages() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(DATA).expect("data");
        let report = engine().render_to_bytes(&config, &dataset).expect("render");
        let doc = LoDocument::load_mem(&report.bytes).expect("reload");
        let pages = doc.get_pages();

        let catalog = doc.catalog().expect("catalog");
        let dests_id = catalog
            .get(b"Dests")
            .and_then(LoObject::as_reference)
            .expect("dests");
        let dests = doc.get_dictionary(dests_id).expect("dests dict");
        let target = |name: &[u8]| {
            dests
                .get(name)
                .and_then(LoObject::as_array)
                .ok()
                .and_then(|arr| arr.first())
                .and_then(|obj| obj.as_reference().ok())
                .expect("destination page")
        };
        assert_eq!(target(b"overview"), pages[&3]);
        assert_eq!(target(b"team_detail"), pages[&4]);
        assert_eq!(target(b"team_a"), pages[&4]);
        assert_eq!(target(b"dormant"), pages[&1]);

        let outlines_id = catalog
            .get(b"Outlines")
            .and_then(LoObject::as_reference)
            .expect("outlines");
        let outlines = doc.get_dictionary(outlines_id).expect("outlines dict");
        assert_eq!(outlines.get(b"Count").and_then(LoObject::as_i64).expect("count"), 3);

        let info_id = doc.trailer.get(b"Info").and_then(LoObject::as_reference).expect("info");
        let info = doc.get_dictionary(info_id).expect("info dict");
        assert_eq!(
            info.get(b"Keywords").and_then(LoObject::as_str).expect("keywords"),
            config.fingerprint().as_bytes()
        );
    }

    #[test]
    fn identical_content_measures_identically() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(DATA).expect("data");
        let stream = ContentStream::builder(&config, &dataset).build();
        let templates = engine().page_templates(&config);

        let measure = || {
            let mut tracker = PaginationTracker::new();
            let mut ctx = tracker.begin_measuring().expect("begin");
            let reserved = toc::placeholder(stream.outline(), &config.toc);
            let story = stream.for_pass(
                reserved.flowables(&TextStyle::sized(18.0), &TextStyle::sized(10.0)),
            );
            layout(&templates, story.flowables, &mut ctx).expect("layout");
            tracker.finish_measuring(&ctx, &story.digest).expect("map")
        };
        assert_eq!(measure(), measure());
    }

    #[test]
    fn unencodable_text_is_reported_in_the_summary() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(
            r#"[{"team": "\u03a9", "sub": "A1", "value": 10.0}]"#,
        )
        .expect("data");
        let report = engine().render_to_bytes(&config, &dataset).expect("render");
        assert!(report.summary.replaced_chars > 0);
    }

    #[test]
    fn missing_sections_abort_without_output() {
        let config = ReportConfig::new(Vec::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("report.pdf");
        let err = engine()
            .render(&config, &Dataset::new(), &out)
            .expect_err("no sections");
        assert!(matches!(err, ReportError::Configuration(_)));
        assert!(!out.exists());
    }

    #[test]
    fn expired_deadline_leaves_no_file() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(DATA).expect("data");
        let engine = ReportEngine::builder()
            .timeout(Duration::ZERO)
            .build()
            .expect("engine");
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("report.pdf");
        let err = engine.render(&config, &dataset, &out).expect_err("timeout");
        assert!(matches!(err, ReportError::Timeout(_)));
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[test]
    fn unavailable_source_is_a_data_access_error() {
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let source = || -> Result<Dataset, ReportError> {
            Err(ReportError::DataAccess("warehouse offline".to_string()))
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let err = engine()
            .render_from_source(&config, &source, dir.path().join("r.pdf"))
            .expect_err("source");
        assert!(matches!(err, ReportError::DataAccess(_)));
    }

    #[test]
    fn external_front_page_replaces_the_builtin_one() {
        let front = {
            let mut canvas = Canvas::new(Size::a4());
            canvas.draw_string(Pt::from_f32(72.0), Pt::from_f32(72.0), "Cover Art");
            let rendered = pdf::document_to_pdf(&canvas.finish()).expect("pdf");
            let mut doc = rendered.doc;
            let mut bytes = Vec::new();
            doc.save_to(&mut bytes).expect("save");
            bytes
        };
        let config = ReportConfig::from_json_str(CONFIG).expect("config");
        let dataset = Dataset::from_json_str(DATA).expect("data");
        let engine = ReportEngine::builder()
            .generated_on(NaiveDate::from_ymd_opt(2024, 4, 2).expect("date"))
            .front_page(PdfBytes(front))
            .build()
            .expect("engine");
        let report = engine.render_to_bytes(&config, &dataset).expect("render");
        assert!(!report.summary.fallback_front_page);

        let doc = LoDocument::load_mem(&report.bytes).expect("reload");
        let first = page_text(&doc, 1);
        assert!(first.contains("/FolioFront Do"));
        assert!(!first.contains("CONFIDENTIAL"));
        assert!(first.contains("(Page 1) Tj"));
    }
}
