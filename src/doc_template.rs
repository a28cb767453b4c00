use crate::canvas::{Canvas, Document};
use crate::doc_context::DocContext;
use crate::error::ReportError;
use crate::flowable::{BreakBefore, Flowable};
use crate::frame::{AddResult, Frame};
use crate::page_template::{PageTemplate, select_template};
use crate::pagination::LayoutContext;
use crate::types::Pt;
use std::collections::VecDeque;

pub const META_PAGE_TEMPLATE_KEY: &str = "folio.page_template";

// Space a keep-with-next flowable wants to see below itself, capped at the follower's height.
const KEEP_WITH_NEXT_MIN: f32 = 36.0;

pub struct DocTemplate {
    page_templates: Vec<PageTemplate>,
    story: Vec<Box<dyn Flowable>>,
}

impl DocTemplate {
    pub fn new(page_templates: Vec<PageTemplate>) -> Self {
        Self {
            page_templates,
            story: Vec::new(),
        }
    }

    pub fn add_flowable(&mut self, flowable: Box<dyn Flowable>) {
        self.story.push(flowable);
    }

    pub fn extend(&mut self, flowables: impl IntoIterator<Item = Box<dyn Flowable>>) {
        self.story.extend(flowables);
    }

    /// Lays the story out page by page. Heading placements, page breaks and the final
    /// page count are recorded into `ctx`.
    pub fn build(self, ctx: &mut LayoutContext) -> Result<Document, ReportError> {
        let mut pager = Pager::start(&self.page_templates, ctx.page_count_hint())?;
        let mut story: VecDeque<Box<dyn Flowable>> = self.story.into();

        while let Some(flowable) = story.pop_front() {
            ctx.check_deadline()?;
            ctx.note_flowable();
            let mut current = flowable;
            let mut suppress_break_before = false;
            loop {
                let name = current.debug_name();
                let pagination = current.pagination();
                if !suppress_break_before
                    && matches!(pagination.break_before, BreakBefore::Page)
                    && (pager.placed_on_page || pager.frame_index > 0)
                {
                    pager.next_page(ctx, "break_before_page", name);
                }

                if pager.frame_index >= pager.frames.len() {
                    pager.next_page(ctx, "frame_exhausted", name);
                }

                if pager.frames.is_empty() {
                    return Err(ReportError::MissingPageTemplate);
                }

                let is_last_frame = pager.frame_index + 1 >= pager.frames.len();
                if pagination.keep_with_next
                    && pager.keeps_apart(current.as_ref(), story.front())
                {
                    if is_last_frame {
                        pager.next_page(ctx, "keep_with_next", name);
                    } else {
                        pager.frame_index += 1;
                    }
                    continue;
                }

                let mark = current.heading().cloned();
                let page_number = pager.page_number;
                let frame = &mut pager.frames[pager.frame_index];
                let top = frame.cursor_top();
                let frame_rect = frame.rect();
                let unplaceable_details = (!pager.placed_on_page && is_last_frame).then(|| {
                    let size = current.wrap(frame_rect.width, frame_rect.height);
                    format!(
                        "{} size={}x{}pt frame={}x{}pt",
                        name,
                        size.width.to_f32(),
                        size.height.to_f32(),
                        frame_rect.width.to_f32(),
                        frame_rect.height.to_f32(),
                    )
                });

                match frame.add(current, &mut pager.canvas) {
                    AddResult::Placed => {
                        if let Some(mark) = &mark {
                            ctx.record_heading(mark, page_number, top);
                        }
                        pager.placed_on_page = true;
                        break;
                    }
                    AddResult::Split(remaining) => {
                        if let Some(mark) = &mark {
                            ctx.record_heading(mark, page_number, top);
                        }
                        pager.placed_on_page = true;
                        suppress_break_before = true;
                        current = remaining;
                        pager.frame_index += 1;
                        if is_last_frame {
                            pager.next_page(ctx, "flowable_split", name);
                        }
                    }
                    AddResult::Overflow(remaining) => {
                        if let Some(details) = unplaceable_details {
                            return Err(ReportError::UnplaceableFlowable(details));
                        }
                        current = remaining;
                        pager.frame_index += 1;
                        if is_last_frame {
                            pager.next_page(ctx, "frame_overflow", name);
                        }
                    }
                }
            }
        }

        let document = pager.canvas.finish();
        ctx.finish(document.pages.len());
        Ok(document)
    }
}

struct Pager<'a> {
    templates: &'a [PageTemplate],
    canvas: Canvas,
    page_number: usize,
    page_count_hint: Option<usize>,
    frames: Vec<Frame>,
    frame_index: usize,
    placed_on_page: bool,
}

impl<'a> Pager<'a> {
    fn start(
        templates: &'a [PageTemplate],
        page_count_hint: Option<usize>,
    ) -> Result<Self, ReportError> {
        let first = select_template(templates, 1).ok_or(ReportError::MissingPageTemplate)?;
        let mut pager = Self {
            templates,
            canvas: Canvas::new(first.page_size),
            page_number: 1,
            page_count_hint,
            frames: Vec::new(),
            frame_index: 0,
            placed_on_page: false,
        };
        pager.open_page();
        Ok(pager)
    }

    // Without a template the page gets no frames; the layout loop reports that.
    fn open_page(&mut self) {
        self.frame_index = 0;
        self.placed_on_page = false;
        let Some(template) = select_template(self.templates, self.page_number) else {
            self.frames.clear();
            return;
        };
        self.frames = vec![template.content_frame()];
        if let Some(callback) = template.on_page() {
            callback(
                &mut self.canvas,
                &DocContext::new(self.page_number, self.page_count_hint, template.name()),
            );
        }
        self.canvas.meta(META_PAGE_TEMPLATE_KEY, template.name());
    }

    fn next_page(&mut self, ctx: &mut LayoutContext, reason: &str, flowable: &str) {
        ctx.note_page_break(self.page_number, reason, flowable, self.frame_index);
        self.canvas.show_page();
        self.page_number += 1;
        self.open_page();
    }

    // True when `current` would land at the bottom of a non-empty frame without
    // room for the start of `next`.
    fn keeps_apart(&self, current: &dyn Flowable, next: Option<&Box<dyn Flowable>>) -> bool {
        let (Some(frame), Some(next)) = (self.frames.get(self.frame_index), next) else {
            return false;
        };
        if frame.is_empty() {
            return false;
        }
        let rect = frame.rect();
        let remaining = frame.remaining_height();
        let own = current.wrap(rect.width, remaining).height;
        let follow = next
            .wrap(rect.width, rect.height)
            .height
            .min(Pt::from_f32(KEEP_WITH_NEXT_MIN));
        own + follow > remaining
    }
}
