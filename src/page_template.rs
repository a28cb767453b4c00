use crate::canvas::Canvas;
use crate::doc_context::DocContext;
use crate::frame::Frame;
use crate::types::{Margins, Rect, Size};
use std::sync::Arc;

/// Page 1 carries the front page; every later page is a body page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Front,
    Body,
}

impl PageRole {
    pub fn for_page(page_number: usize) -> Self {
        if page_number <= 1 {
            PageRole::Front
        } else {
            PageRole::Body
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageRole::Front => "front",
            PageRole::Body => "body",
        }
    }
}

pub type OnPageCallback = Arc<dyn Fn(&mut Canvas, &DocContext) + Send + Sync>;

/// Geometry of one kind of page: a single content frame inside the margins, plus the
/// callback that paints headers and footers when the page opens.
#[derive(Clone)]
pub struct PageTemplate {
    pub role: PageRole,
    pub page_size: Size,
    pub content: Rect,
    on_page: Option<OnPageCallback>,
}

impl PageTemplate {
    pub fn new(role: PageRole, page_size: Size, margins: Margins) -> Self {
        Self {
            role,
            page_size,
            content: margins.content_rect(page_size),
            on_page: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.role.name()
    }

    pub fn decorated<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Canvas, &DocContext) + Send + Sync + 'static,
    {
        self.on_page = Some(Arc::new(callback));
        self
    }

    pub fn with_on_page(mut self, callback: Option<OnPageCallback>) -> Self {
        self.on_page = callback;
        self
    }

    pub fn on_page(&self) -> Option<&OnPageCallback> {
        self.on_page.as_ref()
    }

    /// Fresh, empty frame for a newly opened page.
    pub fn content_frame(&self) -> Frame {
        Frame::new(self.content)
    }
}

/// Front and body templates sharing page size, margins and decorations.
pub fn report_templates(
    page_size: Size,
    margins: Margins,
    on_page: Option<OnPageCallback>,
) -> Vec<PageTemplate> {
    [PageRole::Front, PageRole::Body]
        .into_iter()
        .map(|role| PageTemplate::new(role, page_size, margins).with_on_page(on_page.clone()))
        .collect()
}

/// Template for `page_number`: the one whose role matches, else the last one given.
pub fn select_template(templates: &[PageTemplate], page_number: usize) -> Option<&PageTemplate> {
    let role = PageRole::for_page(page_number);
    templates
        .iter()
        .find(|template| template.role == role)
        .or_else(|| templates.last())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pt;

    #[test]
    fn only_the_first_page_is_a_front_page() {
        assert_eq!(PageRole::for_page(1), PageRole::Front);
        assert_eq!(PageRole::for_page(2), PageRole::Body);
        assert_eq!(PageRole::for_page(40).name(), "body");
    }

    #[test]
    fn report_templates_share_the_content_area() {
        let page = Size::a4().landscape();
        let margins = Margins::inches(0.5);
        let templates = report_templates(page, margins, None);
        let names: Vec<&str> = templates.iter().map(PageTemplate::name).collect();
        assert_eq!(names, vec!["front", "body"]);
        assert!(templates.iter().all(|t| t.content == margins.content_rect(page)));
        assert_eq!(templates[1].content_frame().rect().x, Pt::from_f32(36.0));
    }

    #[test]
    fn selection_falls_back_to_the_last_template() {
        let page = Size::new(300.0, 200.0);
        let body_only = vec![PageTemplate::new(PageRole::Body, page, Margins::all(10.0))];
        assert_eq!(select_template(&body_only, 1).map(PageTemplate::name), Some("body"));

        let both = report_templates(page, Margins::all(10.0), None);
        assert_eq!(select_template(&both, 1).map(PageTemplate::name), Some("front"));
        assert_eq!(select_template(&both, 3).map(PageTemplate::name), Some("body"));
        assert!(select_template(&[], 1).is_none());
    }
}
