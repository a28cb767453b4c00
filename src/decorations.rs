use crate::canvas::Canvas;
use crate::doc_context::DocContext;
use crate::flowable::{TextStyle, measure_text};
use crate::page_template::OnPageCallback;
use crate::types::{Color, Margins, Pt, Size};
use std::sync::Arc;

/// Values available to header/footer templates.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderValues {
    pub page: usize,
    pub pages: Option<usize>,
    pub date: String,
    pub report: String,
    pub title: String,
}

/// Replaces `{page}`, `{pages}`, `{date}`, `{report}` and `{title}`. Unknown or unclosed
/// tokens are kept as written. `{pages}` renders as `?` until the page count is known.
pub fn substitute_placeholders(template: &str, values: &PlaceholderValues) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start + 1..];
        let Some(end) = rest.find('}') else {
            out.push('{');
            out.push_str(rest);
            return out;
        };
        let token = &rest[..end];
        match token {
            "page" => out.push_str(&values.page.to_string()),
            "pages" => match values.pages {
                Some(pages) => out.push_str(&pages.to_string()),
                None => out.push('?'),
            },
            "date" => out.push_str(&values.date),
            "report" => out.push_str(&values.report),
            "title" => out.push_str(&values.title),
            _ => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecorationTemplates {
    pub header: String,
    pub footer_left: String,
    pub footer_center: String,
    pub footer_right: String,
}

impl Default for DecorationTemplates {
    fn default() -> Self {
        Self {
            header: "{title}".to_string(),
            footer_left: "Page {page}".to_string(),
            footer_center: "Generated: {date}".to_string(),
            footer_right: "{report}".to_string(),
        }
    }
}

/// Running header (skipped on page 1) and footer (every page), drawn in the margins.
#[derive(Debug, Clone)]
pub struct Decorations {
    templates: DecorationTemplates,
    title: String,
    report: String,
    date: String,
    page_size: Size,
    margins: Margins,
    style: TextStyle,
    rule_color: Color,
}

impl Decorations {
    pub fn new(
        templates: DecorationTemplates,
        title: impl Into<String>,
        report: impl Into<String>,
        date: impl Into<String>,
        page_size: Size,
        margins: Margins,
    ) -> Self {
        let grey = Color::rgb(0.4, 0.4, 0.4);
        Self {
            templates,
            title: title.into(),
            report: report.into(),
            date: date.into(),
            page_size,
            margins,
            style: TextStyle::sized(8.0).with_color(grey),
            rule_color: Color::rgb(0.75, 0.75, 0.75),
        }
    }

    fn values(&self, page: &DocContext) -> PlaceholderValues {
        PlaceholderValues {
            page: page.page_number,
            pages: page.page_count,
            date: self.date.clone(),
            report: self.report.clone(),
            title: self.title.clone(),
        }
    }

    pub fn draw(&self, canvas: &mut Canvas, page: &DocContext) {
        let values = self.values(page);
        let left = self.margins.left;
        let right = self.page_size.width - self.margins.right;
        let width = right - left;
        let font_size = self.style.font_size;

        canvas.save_state();
        if !page.is_first_page() {
            let text = substitute_placeholders(&self.templates.header, &values);
            let baseline = (self.margins.top - font_size).mul_ratio(1, 2);
            self.text(canvas, &text, left, width, baseline, Align::Center);
            self.rule(canvas, left, right, self.margins.top - Pt::from_f32(4.0));
        }

        let footer_top = self.page_size.height - self.margins.bottom;
        self.rule(canvas, left, right, footer_top + Pt::from_f32(4.0));
        let baseline = footer_top + (self.margins.bottom - font_size).mul_ratio(1, 2);
        for (template, align) in [
            (&self.templates.footer_left, Align::Left),
            (&self.templates.footer_center, Align::Center),
            (&self.templates.footer_right, Align::Right),
        ] {
            let text = substitute_placeholders(template, &values);
            self.text(canvas, &text, left, width, baseline, align);
        }
        canvas.restore_state();
    }

    fn text(&self, canvas: &mut Canvas, text: &str, left: Pt, width: Pt, y: Pt, align: Align) {
        if text.is_empty() {
            return;
        }
        self.style.apply(canvas);
        let text_width = measure_text(text, self.style.font_size);
        let x = match align {
            Align::Left => left,
            Align::Center => left + (width - text_width).max(Pt::ZERO).mul_ratio(1, 2),
            Align::Right => left + (width - text_width).max(Pt::ZERO),
        };
        canvas.draw_string(x, y, text);
    }

    fn rule(&self, canvas: &mut Canvas, left: Pt, right: Pt, y: Pt) {
        canvas.set_stroke_color(self.rule_color);
        canvas.set_line_width(Pt::from_f32(0.5));
        canvas.move_to(left, y);
        canvas.line_to(right, y);
        canvas.stroke();
    }

    pub fn into_callback(self) -> OnPageCallback {
        Arc::new(move |canvas: &mut Canvas, page: &DocContext| self.draw(canvas, page))
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Center,
    Right,
}
