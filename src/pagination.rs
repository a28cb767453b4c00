use crate::debug::LayoutTrace;
use crate::error::ReportError;
use crate::types::Pt;
use serde_json::json;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Measure,
    Finalize,
}

impl PassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PassKind::Measure => "measure",
            PassKind::Finalize => "finalize",
        }
    }
}

/// Identity of a heading: the section title plus, for subsections, their own title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadingKey {
    pub section: String,
    pub subsection: Option<String>,
}

impl HeadingKey {
    pub fn section(title: impl Into<String>) -> Self {
        Self {
            section: title.into(),
            subsection: None,
        }
    }

    pub fn subsection(section: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            subsection: Some(title.into()),
        }
    }

    /// 0 for sections, 1 for subsections.
    pub fn level(&self) -> u8 {
        u8::from(self.subsection.is_some())
    }
}

impl fmt::Display for HeadingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subsection {
            Some(sub) => write!(f, "{} / {sub}", self.section),
            None => f.write_str(&self.section),
        }
    }
}

/// Carried by heading flowables so the layout loop can register them.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingMark {
    pub key: HeadingKey,
    pub title: String,
    pub level: u8,
    pub bookmark_id: String,
}

impl HeadingMark {
    pub fn new(key: HeadingKey, bookmark_id: impl Into<String>) -> Self {
        let title = key
            .subsection
            .clone()
            .unwrap_or_else(|| key.section.clone());
        Self {
            level: key.level(),
            key,
            title,
            bookmark_id: bookmark_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadingPlacement {
    pub mark: HeadingMark,
    pub page: usize,
    pub top: Pt,
}

/// Layout state threaded through one pass. Nothing here outlives the pass.
#[derive(Debug)]
pub struct LayoutContext {
    pass: PassKind,
    deadline: Option<Instant>,
    page_count_hint: Option<usize>,
    placements: Vec<HeadingPlacement>,
    page_count: usize,
    page_breaks: usize,
    flowables: usize,
    trace: Option<LayoutTrace>,
    started: Instant,
}

impl LayoutContext {
    pub fn new(pass: PassKind) -> Self {
        Self {
            pass,
            deadline: None,
            page_count_hint: None,
            placements: Vec::new(),
            page_count: 0,
            page_breaks: 0,
            flowables: 0,
            trace: None,
            started: Instant::now(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_trace(mut self, trace: Option<LayoutTrace>) -> Self {
        self.trace = trace;
        self
    }

    /// Total pages known from an earlier pass, used for `{pages}` decorations.
    pub fn with_page_count_hint(mut self, pages: Option<usize>) -> Self {
        self.page_count_hint = pages;
        self
    }

    pub fn pass(&self) -> PassKind {
        self.pass
    }

    pub fn page_count_hint(&self) -> Option<usize> {
        self.page_count_hint
    }

    pub fn check_deadline(&self) -> Result<(), ReportError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(ReportError::Timeout(self.pass.as_str()))
            }
            _ => Ok(()),
        }
    }

    pub fn begin(&self) {
        if let Some(trace) = &self.trace {
            trace.log_event(json!({"type": "layout.pass_begin", "pass": self.pass.as_str()}));
        }
    }

    pub fn record_heading(&mut self, mark: &HeadingMark, page: usize, top: Pt) {
        if let Some(trace) = &self.trace {
            trace.log_event(json!({
                "type": "layout.heading",
                "pass": self.pass.as_str(),
                "title": mark.title,
                "level": mark.level,
                "page": page,
                "bookmark": mark.bookmark_id,
            }));
            trace.increment("layout.heading", 1);
        }
        self.placements.push(HeadingPlacement {
            mark: mark.clone(),
            page,
            top,
        });
    }

    pub fn note_page_break(&mut self, from_page: usize, reason: &str, flowable: &str, frame: usize) {
        self.page_breaks += 1;
        if let Some(trace) = &self.trace {
            trace.page_break(self.pass.as_str(), from_page, reason, flowable, frame);
        }
    }

    pub fn note_flowable(&mut self) {
        self.flowables += 1;
    }

    pub fn finish(&mut self, page_count: usize) {
        self.page_count = page_count;
        if let Some(trace) = &self.trace {
            trace.log_event(json!({
                "type": "layout.pass_end",
                "pass": self.pass.as_str(),
                "pages": page_count,
                "headings": self.placements.len(),
                "page_breaks": self.page_breaks,
            }));
            trace.emit_summary(self.pass.as_str());
            trace.flush();
        }
    }

    pub fn placements(&self) -> &[HeadingPlacement] {
        &self.placements
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn page_breaks(&self) -> usize {
        self.page_breaks
    }

    pub fn flowables(&self) -> usize {
        self.flowables
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageEntry {
    pub key: HeadingKey,
    pub title: String,
    pub level: u8,
    pub page: usize,
    pub top: Pt,
    pub bookmark_id: String,
}

/// Heading → page mapping recorded by the measuring pass. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionPageMap {
    entries: Vec<PageEntry>,
    page_count: usize,
    digest: String,
}

impl SectionPageMap {
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_context(ctx: &LayoutContext, digest: &str) -> Self {
        let entries = ctx
            .placements()
            .iter()
            .map(|placement| PageEntry {
                key: placement.mark.key.clone(),
                title: placement.mark.title.clone(),
                level: placement.mark.level,
                page: placement.page,
                top: placement.top,
                bookmark_id: placement.mark.bookmark_id.clone(),
            })
            .collect();
        Self {
            entries,
            page_count: ctx.page_count(),
            digest: digest.to_string(),
        }
    }

    pub fn page_of(&self, key: &HeadingKey) -> Option<usize> {
        self.entry(key).map(|entry| entry.page)
    }

    pub fn entry(&self, key: &HeadingKey) -> Option<&PageEntry> {
        self.entries.iter().find(|entry| &entry.key == key)
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Measuring,
    Measured,
    Finalizing,
    Done,
}

/// Drives the measure → finalize protocol and guards its transitions.
#[derive(Debug)]
pub struct PaginationTracker {
    state: TrackerState,
    deadline: Option<Instant>,
    trace: Option<LayoutTrace>,
    measured: Option<SectionPageMap>,
}

impl Default for PaginationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationTracker {
    pub fn new() -> Self {
        Self {
            state: TrackerState::Idle,
            deadline: None,
            trace: None,
            measured: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_trace(mut self, trace: Option<LayoutTrace>) -> Self {
        self.trace = trace;
        self
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    fn transition(
        &mut self,
        action: &'static str,
        from: TrackerState,
        to: TrackerState,
    ) -> Result<(), ReportError> {
        if self.state != from {
            return Err(ReportError::InvalidState {
                action,
                state: format!("{:?}", self.state),
            });
        }
        log::debug!("pagination: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn context(&self, pass: PassKind) -> LayoutContext {
        LayoutContext::new(pass)
            .with_deadline(self.deadline)
            .with_trace(self.trace.clone())
    }

    pub fn begin_measuring(&mut self) -> Result<LayoutContext, ReportError> {
        self.transition("begin_measuring", TrackerState::Idle, TrackerState::Measuring)?;
        let ctx = self.context(PassKind::Measure);
        ctx.begin();
        Ok(ctx)
    }

    /// Freezes the measured map. `digest` identifies the content stream that was laid out.
    pub fn finish_measuring(
        &mut self,
        ctx: &LayoutContext,
        digest: &str,
    ) -> Result<SectionPageMap, ReportError> {
        if ctx.pass() != PassKind::Measure {
            return Err(ReportError::InvalidState {
                action: "finish_measuring",
                state: format!("{:?} pass context", ctx.pass()),
            });
        }
        self.transition("finish_measuring", TrackerState::Measuring, TrackerState::Measured)?;
        let map = SectionPageMap::from_context(ctx, digest);
        self.measured = Some(map.clone());
        Ok(map)
    }

    pub fn begin_finalizing(&mut self) -> Result<LayoutContext, ReportError> {
        self.transition("begin_finalizing", TrackerState::Measured, TrackerState::Finalizing)?;
        let pages = self.measured.as_ref().map(SectionPageMap::page_count);
        let ctx = self.context(PassKind::Finalize).with_page_count_hint(pages);
        ctx.begin();
        Ok(ctx)
    }

    /// Checks that the final pass laid out the same content on the same pages.
    pub fn finish(&mut self, ctx: &LayoutContext, digest: &str) -> Result<(), ReportError> {
        if self.state != TrackerState::Finalizing {
            return Err(ReportError::InvalidState {
                action: "finish",
                state: format!("{:?}", self.state),
            });
        }
        let measured = self.measured.as_ref().ok_or_else(|| ReportError::InvalidState {
            action: "finish",
            state: "no measured map".to_string(),
        })?;
        verify(measured, &SectionPageMap::from_context(ctx, digest))?;
        self.transition("finish", TrackerState::Finalizing, TrackerState::Done)
    }
}

fn verify(measured: &SectionPageMap, finalized: &SectionPageMap) -> Result<(), ReportError> {
    if measured.digest != finalized.digest {
        return Err(ReportError::LayoutConsistency(format!(
            "content digest changed between passes ({} != {})",
            measured.digest, finalized.digest
        )));
    }
    if measured.page_count != finalized.page_count {
        return Err(ReportError::LayoutConsistency(format!(
            "page count changed between passes ({} != {})",
            measured.page_count, finalized.page_count
        )));
    }
    if measured.entries.len() != finalized.entries.len() {
        return Err(ReportError::LayoutConsistency(format!(
            "{} headings measured but {} laid out",
            measured.entries.len(),
            finalized.entries.len()
        )));
    }
    for (before, after) in measured.entries.iter().zip(&finalized.entries) {
        if before.key != after.key || before.page != after.page {
            return Err(ReportError::LayoutConsistency(format!(
                "heading '{}' measured on page {} but laid out as '{}' on page {}",
                before.key, before.page, after.key, after.page
            )));
        }
    }
    Ok(())
}
