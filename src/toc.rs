use crate::canvas::Canvas;
use crate::flowable::{Flowable, Pagination, Paragraph, Spacer, TextStyle, measure_text};
use crate::pagination::{HeadingMark, SectionPageMap};
use crate::types::{Pt, Size};
use folio_config::TocSettings;

const INDENT_PER_LEVEL: f32 = 18.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub ordinal: Option<String>,
    pub level: u8,
    pub title: String,
    pub page: usize,
    pub dots: usize,
    pub bookmark_id: String,
    /// `label dots page` as one line of text.
    pub text: String,
}

impl TocEntry {
    /// Label and dot leader; the page number is drawn separately against the right edge.
    pub fn leader(&self) -> &str {
        let page_len = self.page.to_string().len();
        &self.text[..self.text.len() - page_len - 1]
    }

    pub fn page_text(&self) -> String {
        self.page.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocBlock {
    pub title: String,
    pub entries: Vec<TocEntry>,
}

/// `max(minimum_dots, fixed_width - len(label) - len(page))` dots between label and page.
pub fn leader_dots(label: &str, page_text: &str, settings: &TocSettings) -> usize {
    let used = label.chars().count() + page_text.chars().count();
    settings
        .fixed_width
        .saturating_sub(used)
        .max(settings.minimum_dots)
}

pub fn format_entry(label: &str, page: usize, settings: &TocSettings) -> (usize, String) {
    let page_text = page.to_string();
    let dots = leader_dots(label, &page_text, settings);
    (dots, format!("{label} {} {page_text}", ".".repeat(dots)))
}

/// Builds the TOC for `outline` (every heading in declared order) from the measured pages.
/// A heading the measuring pass never saw is listed on page 1.
pub fn build(map: &SectionPageMap, outline: &[HeadingMark], settings: &TocSettings) -> TocBlock {
    assemble(outline, settings, |mark| {
        map.page_of(&mark.key).unwrap_or_else(|| {
            log::warn!("'{}' was never laid out; TOC lists it on page 1", mark.key);
            1
        })
    })
}

/// Same geometry as [`build`] with every page unknown; reserves the TOC in the measuring pass.
pub fn placeholder(outline: &[HeadingMark], settings: &TocSettings) -> TocBlock {
    assemble(outline, settings, |_| 1)
}

fn assemble(
    outline: &[HeadingMark],
    settings: &TocSettings,
    page_of: impl Fn(&HeadingMark) -> usize,
) -> TocBlock {
    let mut section_no = 0usize;
    let mut sub_no = 0usize;
    let mut entries = Vec::new();
    for mark in outline {
        let ordinal = if mark.level == 0 {
            section_no += 1;
            sub_no = 0;
            format!("{section_no}.")
        } else {
            sub_no += 1;
            format!("{section_no}.{sub_no}")
        };
        if mark.level > 0 && !settings.include_subsections {
            continue;
        }
        let ordinal = settings.numbered.then_some(ordinal);
        let label = match &ordinal {
            Some(ordinal) => format!("{ordinal} {}", mark.title),
            None => mark.title.clone(),
        };
        let page = page_of(mark);
        let (dots, text) = format_entry(&label, page, settings);
        entries.push(TocEntry {
            ordinal,
            level: mark.level,
            title: mark.title.clone(),
            page,
            dots,
            bookmark_id: mark.bookmark_id.clone(),
            text,
        });
    }
    TocBlock {
        title: settings.title.clone(),
        entries,
    }
}

impl TocBlock {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Title, spacing and one line per entry.
    pub fn flowables(&self, title_style: &TextStyle, entry_style: &TextStyle) -> Vec<Box<dyn Flowable>> {
        let mut out: Vec<Box<dyn Flowable>> = Vec::with_capacity(self.entries.len() + 2);
        out.push(Box::new(
            Paragraph::new(self.title.clone()).with_style(title_style.clone()),
        ));
        out.push(Box::new(Spacer::new(12.0)));
        for entry in &self.entries {
            out.push(Box::new(TocLine::new(entry.clone(), entry_style.clone())));
        }
        out
    }
}

/// One TOC entry: always a single line, clickable to its bookmark.
#[derive(Debug, Clone)]
pub struct TocLine {
    entry: TocEntry,
    style: TextStyle,
}

impl TocLine {
    pub fn new(entry: TocEntry, style: TextStyle) -> Self {
        Self { entry, style }
    }

    fn indent(&self) -> Pt {
        Pt::from_f32(INDENT_PER_LEVEL) * i32::from(self.entry.level)
    }
}

impl Flowable for TocLine {
    // Spans the frame so page numbers share one right edge.
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        Size {
            width: avail_width,
            height: self.style.line_height,
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
        let size = self.wrap(avail_width, avail_height);
        let mut style = self.style.clone();
        style.bold = self.entry.level == 0 && style.bold;
        style.apply(canvas);
        canvas.draw_string(x + self.indent(), y, self.entry.leader());
        let page_text = self.entry.page_text();
        let page_width = measure_text(&page_text, style.font_size);
        canvas.draw_string(x + size.width - page_width, y, page_text);
        canvas.link(
            x + self.indent(),
            y,
            size.width - self.indent(),
            size.height,
            self.entry.bookmark_id.clone(),
        );
    }

    fn pagination(&self) -> Pagination {
        Pagination {
            orphans: 1,
            widows: 1,
            ..Pagination::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::pagination::{HeadingKey, LayoutContext, PaginationTracker};

    fn outline() -> Vec<HeadingMark> {
        vec![
            HeadingMark::new(HeadingKey::section("Overview"), "overview"),
            HeadingMark::new(HeadingKey::subsection("Overview", "Large Positions"), "large_positions"),
            HeadingMark::new(HeadingKey::section("Filtered Away"), "filtered_away"),
        ]
    }

    fn measured(pages: &[(usize, usize)]) -> SectionPageMap {
        let marks = outline();
        let mut tracker = PaginationTracker::new();
        let mut ctx: LayoutContext = tracker.begin_measuring().expect("begin");
        for (idx, page) in pages {
            ctx.record_heading(&marks[*idx], *page, Pt::ZERO);
        }
        ctx.finish(5);
        tracker.finish_measuring(&ctx, "d").expect("map")
    }

    #[test]
    fn overview_on_page_three() {
        let toc = build(&measured(&[(0, 3), (1, 4)]), &outline(), &TocSettings::default());
        let entry = &toc.entries[0];
        assert!(entry.text.starts_with("Overview ."));
        assert!(entry.text.ends_with(" 3"));
        assert_eq!(entry.dots, 50 - "Overview".len() - 1);
        assert_eq!(entry.bookmark_id, "overview");
        assert_eq!(toc.entries[1].page, 4);
        assert_eq!(toc.entries[1].level, 1);
    }

    #[test]
    fn unmeasured_section_defaults_to_page_one() {
        let toc = build(&measured(&[(0, 3)]), &outline(), &TocSettings::default());
        assert_eq!(toc.entries[2].page, 1);
        assert_eq!(toc.entries[1].page, 1);
    }

    #[test]
    fn long_titles_keep_the_dot_floor() {
        let settings = TocSettings::default();
        let title = "A".repeat(80);
        let (dots, text) = format_entry(&title, 120, &settings);
        assert_eq!(dots, settings.minimum_dots);
        assert!(text.contains(&".".repeat(settings.minimum_dots)));
    }

    #[test]
    fn numbering_and_subsection_filtering() {
        let settings = TocSettings {
            numbered: true,
            include_subsections: false,
            ..TocSettings::default()
        };
        let toc = placeholder(&outline(), &settings);
        let labels: Vec<&str> = toc.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(toc.len(), 2);
        assert!(labels[0].starts_with("1. Overview ."));
        assert!(labels[1].starts_with("2. Filtered Away ."));
    }

    #[test]
    fn toc_line_links_to_its_bookmark() {
        let toc = placeholder(&outline(), &TocSettings::default());
        let line = TocLine::new(toc.entries[0].clone(), TextStyle::default());
        let mut canvas = Canvas::new(Size::a4());
        line.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_f32(500.0), Pt::from_f32(100.0));
        let doc = canvas.finish();
        assert!(doc.pages[0].commands.iter().any(|c| matches!(
            c,
            Command::Link { dest, .. } if dest == "overview"
        )));
    }

    #[test]
    fn page_numbers_share_the_right_edge() {
        let map = measured(&[(0, 3), (1, 12)]);
        let toc = build(&map, &outline(), &TocSettings::default());
        let style = TextStyle::default();
        let width = Pt::from_f32(500.0);
        let mut canvas = Canvas::new(Size::a4());
        for entry in &toc.entries[..2] {
            TocLine::new(entry.clone(), style.clone()).draw(
                &mut canvas,
                Pt::ZERO,
                Pt::ZERO,
                width,
                Pt::from_f32(100.0),
            );
        }
        let doc = canvas.finish();
        let strings: Vec<(Pt, &str)> = doc.pages[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { x, text, .. } => Some((*x, text.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(strings.len(), 4);
        assert_eq!(strings[0].1, toc.entries[0].leader());
        assert!(strings[0].1.ends_with('.'));
        assert_eq!(strings[1].1, "3");
        assert_eq!(strings[3].1, "12");
        let right = |(x, text): (Pt, &str)| x + measure_text(text, style.font_size);
        assert_eq!(right(strings[1]), width);
        assert_eq!(right(strings[3]), width);
    }
}
