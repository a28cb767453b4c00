use crate::canvas::Canvas;
use crate::pagination::HeadingMark;
use crate::table::{GridRow, RowKind, TableGrid};
use crate::types::{Color, Pt, Size};
use std::ops::Range;
use std::sync::Arc;

pub const FONT_REGULAR: &str = "Helvetica";
pub const FONT_BOLD: &str = "Helvetica-Bold";

fn huge_pt() -> Pt {
    // Large but safe sentinel for "unbounded" layout measurements.
    Pt::from_f32(1.0e9)
}

/// Width of `text` with the built-in Helvetica approximation (0.6 em per char).
pub fn measure_text(text: &str, font_size: Pt) -> Pt {
    let advance = font_size.mul_ratio(3, 5).max(Pt::from_f32(1.0));
    advance * (text.chars().count() as i32)
}

/// Greedy word wrap; words wider than `max_width` are broken by character.
pub fn wrap_words(text: &str, font_size: Pt, max_width: Pt) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if measure_text(&candidate, font_size) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if measure_text(word, font_size) <= max_width {
                current = word.to_string();
            } else {
                let mut parts = split_long_word(word, font_size, max_width);
                current = parts.pop().unwrap_or_default();
                lines.extend(parts);
            }
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn split_long_word(word: &str, font_size: Pt, max_width: Pt) -> Vec<String> {
    let char_width = measure_text("x", font_size);
    let per_line = if char_width <= Pt::ZERO {
        1
    } else {
        ((max_width.to_milli_i64() / char_width.to_milli_i64().max(1)) as usize).max(1)
    };
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(per_line)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakBefore {
    Auto,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakInside {
    Auto,
    Avoid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pagination {
    pub break_before: BreakBefore,
    pub break_inside: BreakInside,
    pub keep_with_next: bool,
    pub orphans: usize,
    pub widows: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            break_before: BreakBefore::Auto,
            break_inside: BreakInside::Auto,
            keep_with_next: false,
            orphans: 2,
            widows: 2,
        }
    }
}

impl Pagination {
    fn continuation(self) -> Self {
        Self {
            break_before: BreakBefore::Auto,
            ..self
        }
    }
}

pub trait Flowable: FlowableClone + std::fmt::Debug + Send + Sync {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size;
    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)>;
    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt);

    fn pagination(&self) -> Pagination {
        Pagination::default()
    }

    /// Set on section/subsection headings so the layout loop can record where they land.
    fn heading(&self) -> Option<&HeadingMark> {
        None
    }

    /// Canonical description used to prove both passes lay out the same content.
    fn fingerprint(&self) -> String {
        format!("{self:?}")
    }

    fn debug_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub trait FlowableClone {
    fn clone_box(&self) -> Box<dyn Flowable>;
}

impl<T> FlowableClone for T
where
    T: 'static + Flowable + Clone,
{
    fn clone_box(&self) -> Box<dyn Flowable> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Flowable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_size: Pt,
    pub line_height: Pt,
    pub color: Color,
    pub bold: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self::sized(10.0)
    }
}

impl TextStyle {
    pub fn sized(font_size: f32) -> Self {
        let font_size = Pt::from_f32(font_size);
        Self {
            font_size,
            line_height: font_size.mul_ratio(6, 5),
            color: Color::BLACK,
            bold: false,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn font_name(&self) -> &'static str {
        if self.bold { FONT_BOLD } else { FONT_REGULAR }
    }

    pub(crate) fn apply(&self, canvas: &mut Canvas) {
        canvas.set_font_name(self.font_name());
        canvas.set_font_size(self.font_size);
        canvas.set_fill_color(self.color);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone)]
pub struct Paragraph {
    text: String,
    style: TextStyle,
    align: TextAlign,
    pagination: Pagination,
}

impl Paragraph {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: TextStyle::default(),
            align: TextAlign::Left,
            pagination: Pagination::default(),
        }
    }

    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_align(mut self, align: TextAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn layout_lines(&self, avail_width: Pt) -> Vec<String> {
        wrap_words(&self.text, self.style.font_size, avail_width)
    }

    fn with_text(&self, text: String, pagination: Pagination) -> Paragraph {
        Paragraph {
            text,
            style: self.style.clone(),
            align: self.align,
            pagination,
        }
    }
}

impl Flowable for Paragraph {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let lines = self.layout_lines(avail_width);
        let width = lines
            .iter()
            .fold(Pt::ZERO, |acc, line| acc.max(measure_text(line, self.style.font_size)))
            .min(avail_width);
        Size {
            width,
            height: self.style.line_height * (lines.len() as i32),
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        if matches!(self.pagination.break_inside, BreakInside::Avoid) {
            return None;
        }
        let lines = self.layout_lines(avail_width);
        let lh = self.style.line_height.to_milli_i64();
        let ah = avail_height.to_milli_i64();
        if lh <= 0 || ah <= 0 {
            return None;
        }
        let total = lines.len();
        let max_lines = (ah / lh) as usize;
        if max_lines == 0 || max_lines >= total {
            return None;
        }

        let orphans = self.pagination.orphans.max(1);
        let widows = self.pagination.widows.max(1);
        let mut split_at = max_lines;
        if total - split_at < widows {
            split_at = total.saturating_sub(widows);
        }
        if split_at < orphans {
            return None;
        }

        let first = self.with_text(lines[..split_at].join("\n"), self.pagination);
        let second = self.with_text(lines[split_at..].join("\n"), self.pagination.continuation());
        Some((Box::new(first), Box::new(second)))
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        self.style.apply(canvas);
        let mut cursor_y = y;
        for line in self.layout_lines(avail_width) {
            let line_width = measure_text(&line, self.style.font_size);
            let offset = match self.align {
                TextAlign::Left => Pt::ZERO,
                TextAlign::Center => (avail_width - line_width).max(Pt::ZERO).mul_ratio(1, 2),
                TextAlign::Right => (avail_width - line_width).max(Pt::ZERO),
            };
            canvas.draw_string(x + offset, cursor_y, line);
            cursor_y += self.style.line_height;
        }
    }

    fn pagination(&self) -> Pagination {
        self.pagination
    }
}

#[derive(Debug, Clone)]
pub struct Spacer {
    height: Pt,
}

impl Spacer {
    pub fn new(height: f32) -> Self {
        Self {
            height: Pt::from_f32(height),
        }
    }
}

impl Flowable for Spacer {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size {
        // Collapses at the bottom of a frame instead of forcing a page break.
        Size {
            width: avail_width,
            height: self.height.max(Pt::ZERO).min(avail_height.max(Pt::ZERO)),
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, _canvas: &mut Canvas, _x: Pt, _y: Pt, _avail_width: Pt, _avail_height: Pt) {}
}

/// Section or subsection title. Never split; kept with the content that follows.
#[derive(Debug, Clone)]
pub struct HeadingFlowable {
    mark: HeadingMark,
    paragraph: Paragraph,
}

impl HeadingFlowable {
    pub fn new(mark: HeadingMark, style: TextStyle, page_break_before: bool) -> Self {
        let paragraph = Paragraph::new(mark.title.clone())
            .with_style(style)
            .with_pagination(Pagination {
                break_before: if page_break_before {
                    BreakBefore::Page
                } else {
                    BreakBefore::Auto
                },
                break_inside: BreakInside::Avoid,
                keep_with_next: true,
                ..Pagination::default()
            });
        Self { mark, paragraph }
    }
}

impl Flowable for HeadingFlowable {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size {
        self.paragraph.wrap(avail_width, avail_height)
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt) {
        canvas.meta("folio.heading", self.mark.bookmark_id.clone());
        self.paragraph.draw(canvas, x, y, avail_width, avail_height);
    }

    fn pagination(&self) -> Pagination {
        self.paragraph.pagination()
    }

    fn heading(&self) -> Option<&HeadingMark> {
        Some(&self.mark)
    }
}

const CELL_PADDING: f32 = 4.0;

/// Renders a [`TableGrid`]; splits between body rows and repeats the header rows.
#[derive(Debug, Clone)]
pub struct GridFlowable {
    grid: Arc<TableGrid>,
    body: Arc<Vec<GridRow>>,
    body_range: Range<usize>,
    include_header: bool,
}

impl GridFlowable {
    pub fn new(grid: TableGrid) -> Self {
        let body: Vec<GridRow> = grid.body_rows().cloned().collect();
        let len = body.len();
        Self {
            grid: Arc::new(grid),
            body: Arc::new(body),
            body_range: 0..len,
            include_header: true,
        }
    }

    fn slice(&self, body_range: Range<usize>, include_header: bool) -> GridFlowable {
        GridFlowable {
            grid: self.grid.clone(),
            body: self.body.clone(),
            body_range,
            include_header,
        }
    }

    fn line_height(&self) -> Pt {
        self.grid.font_size.mul_ratio(6, 5)
    }

    fn column_widths(&self, avail_width: Pt) -> Vec<Pt> {
        let total: Pt = self.grid.column_widths.iter().sum();
        if total <= avail_width || total <= Pt::ZERO {
            return self.grid.column_widths.clone();
        }
        let scale = avail_width.to_f32() / total.to_f32();
        self.grid
            .column_widths
            .iter()
            .map(|w| *w * scale)
            .collect()
    }

    // Yields (x offset, width) for each cell, honouring spans.
    fn cell_boxes(row: &GridRow, widths: &[Pt]) -> Vec<(Pt, Pt)> {
        let mut boxes = Vec::with_capacity(row.cells.len());
        let mut column = 0usize;
        let mut x = Pt::ZERO;
        for cell in &row.cells {
            let span = cell.span.max(1);
            let end = (column + span).min(widths.len());
            let width: Pt = widths[column.min(end)..end].iter().sum();
            boxes.push((x, width));
            x += width;
            column = end;
        }
        boxes
    }

    fn cell_lines(&self, text: &str, width: Pt) -> Vec<String> {
        let inner = (width - Pt::from_f32(CELL_PADDING * 2.0)).max(Pt::from_f32(1.0));
        wrap_words(text, self.grid.font_size, inner)
    }

    fn row_height(&self, row: &GridRow, widths: &[Pt]) -> Pt {
        let lines = Self::cell_boxes(row, widths)
            .iter()
            .zip(&row.cells)
            .map(|((_, width), cell)| self.cell_lines(&cell.text, *width).len())
            .max()
            .unwrap_or(1)
            .max(1);
        self.line_height() * (lines as i32) + Pt::from_f32(CELL_PADDING * 2.0)
    }

    fn header_height(&self, widths: &[Pt]) -> Pt {
        if !self.include_header {
            return Pt::ZERO;
        }
        self.grid
            .header_rows
            .iter()
            .map(|row| self.row_height(row, widths))
            .sum()
    }

    fn draw_row(&self, canvas: &mut Canvas, row: &GridRow, widths: &[Pt], x: Pt, y: Pt) -> Pt {
        let height = self.row_height(row, widths);
        let boxes = Self::cell_boxes(row, widths);
        let total_width: Pt = widths.iter().sum();
        let padding = Pt::from_f32(CELL_PADDING);

        if let Some(background) = row.background {
            canvas.set_fill_color(background);
            canvas.draw_rect(x, y, total_width, height);
            canvas.fill();
        }
        for ((offset, width), cell) in boxes.iter().zip(&row.cells) {
            if let Some(background) = cell.background {
                canvas.set_fill_color(background);
                canvas.draw_rect(x + *offset, y, *width, height);
                canvas.fill();
            }
        }

        canvas.set_stroke_color(self.grid.grid_color);
        canvas.set_line_width(Pt::from_f32(0.25));
        for (offset, width) in &boxes {
            canvas.draw_rect(x + *offset, y, *width, height);
            canvas.stroke();
        }

        let header = matches!(row.kind, RowKind::GroupHeader | RowKind::ColumnHeader);
        for ((offset, width), cell) in boxes.iter().zip(&row.cells) {
            let mut style = TextStyle {
                font_size: self.grid.font_size,
                line_height: self.line_height(),
                color: cell.color.unwrap_or(self.grid.text_color),
                bold: cell.bold,
            };
            if header {
                style.bold = true;
            }
            style.apply(canvas);
            let mut line_y = y + padding;
            for line in self.cell_lines(&cell.text, *width) {
                let line_x = if header {
                    let line_width = measure_text(&line, style.font_size);
                    x + *offset + (*width - line_width).max(Pt::ZERO).mul_ratio(1, 2)
                } else {
                    x + *offset + padding
                };
                canvas.draw_string(line_x, line_y, line);
                line_y += style.line_height;
            }
        }
        height
    }
}

impl Flowable for GridFlowable {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let widths = self.column_widths(avail_width);
        let body: Pt = self.body[self.body_range.clone()]
            .iter()
            .map(|row| self.row_height(row, &widths))
            .sum();
        Size {
            width: widths.iter().sum::<Pt>().min(avail_width),
            height: self.header_height(&widths) + body,
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let widths = self.column_widths(avail_width);
        let available = avail_height - self.header_height(&widths);
        if available <= Pt::ZERO {
            return None;
        }
        let start = self.body_range.start;
        let end = self.body_range.end;
        let mut used = Pt::ZERO;
        let mut split_at = start;
        for row in &self.body[self.body_range.clone()] {
            let h = self.row_height(row, &widths);
            if used + h > available {
                break;
            }
            used += h;
            split_at += 1;
        }
        if split_at == start || split_at >= end {
            return None;
        }
        let first = self.slice(start..split_at, self.include_header);
        let second = self.slice(split_at..end, self.grid.repeat_header);
        Some((Box::new(first), Box::new(second)))
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let widths = self.column_widths(avail_width);
        let mut cursor_y = y;
        if self.include_header {
            for row in &self.grid.header_rows {
                cursor_y += self.draw_row(canvas, row, &widths, x, cursor_y);
            }
        }
        for row in &self.body[self.body_range.clone()] {
            cursor_y += self.draw_row(canvas, row, &widths, x, cursor_y);
        }
    }

    fn pagination(&self) -> Pagination {
        Pagination {
            orphans: 1,
            widows: 1,
            ..Pagination::default()
        }
    }

    fn fingerprint(&self) -> String {
        let rows: Vec<String> = self
            .grid
            .header_rows
            .iter()
            .chain(self.body[self.body_range.clone()].iter())
            .map(|row| {
                let texts = row.texts().join("\u{1f}");
                format!("{:?}:{texts}", row.kind)
            })
            .collect();
        format!(
            "grid|{:?}|{}|{}",
            self.grid.column_widths,
            self.include_header,
            rows.join("\u{1e}")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::data::{Dataset, record};
    use crate::table::build;
    use folio_config::{ColumnSpec, TableStyle, Value};

    #[test]
    fn text_metric_is_point_six_em_per_char() {
        assert_eq!(measure_text("abcde", Pt::from_f32(10.0)), Pt::from_f32(30.0));
    }

    #[test]
    fn wrap_words_breaks_on_width_and_long_words() {
        let lines = wrap_words("alpha beta gamma", Pt::from_f32(10.0), Pt::from_f32(66.0));
        assert_eq!(lines, vec!["alpha beta", "gamma"]);
        let lines = wrap_words("abcdefghij", Pt::from_f32(10.0), Pt::from_f32(24.0));
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn paragraph_split_respects_orphans_and_widows() {
        let text = vec!["word"; 5].join("\n");
        let para = Paragraph::new(text);
        let lh = TextStyle::default().line_height;
        let (first, second) = para
            .split(Pt::from_f32(200.0), lh * 4)
            .expect("split");
        assert_eq!(first.wrap(Pt::from_f32(200.0), huge_pt()).height, lh * 3);
        assert_eq!(second.wrap(Pt::from_f32(200.0), huge_pt()).height, lh * 2);
        assert!(para.split(Pt::from_f32(200.0), lh).is_none());
    }

    fn grid_of(rows: usize) -> TableGrid {
        let ds = Dataset::from_records(
            (0..rows)
                .map(|i| record([("n", Value::Number(i as f64))]))
                .collect(),
        );
        build(&ds, &[], &[ColumnSpec::new("n")], &TableStyle::default())
    }

    #[test]
    fn grid_split_repeats_header() {
        let grid = GridFlowable::new(grid_of(30));
        let width = Pt::from_f32(400.0);
        let full = grid.wrap(width, huge_pt()).height;
        let (first, second) = grid.split(width, full.mul_ratio(1, 2)).expect("split");
        let first_h = first.wrap(width, huge_pt()).height;
        let second_h = second.wrap(width, huge_pt()).height;
        let row_h = grid.row_height(&grid.grid.header_rows[0], &grid.column_widths(width));
        assert!(first_h <= full.mul_ratio(1, 2));
        assert_eq!(first_h + second_h, full + row_h);
    }

    #[test]
    fn grid_draw_emits_cell_text() {
        let grid = GridFlowable::new(grid_of(2));
        let mut canvas = Canvas::new(Size::a4());
        grid.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_f32(400.0), huge_pt());
        let doc = canvas.finish();
        let texts: Vec<&str> = doc.pages[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["n", "0.00", "1.00"]);
    }
}
