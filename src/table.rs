use crate::condition::values_equal;
use crate::data::{Dataset, Record};
use crate::flags::FlagIndex;
use crate::flowable::measure_text;
use crate::types::{Color, Pt};
use folio_config::{Aggregates, ColumnSpec, FilterCondition, Operator, Severity, TableStyle, Value};
use std::collections::BTreeMap;

const CELL_PADDING: f32 = 4.0;
const MAX_AUTO_COLUMN_SHARE: f32 = 0.4;

/// Compiled form of one `filter_criteria` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    OneOf(Vec<Value>),
    Compare(Operator, f64),
    Equals(Value),
}

impl FilterPredicate {
    pub fn compile(condition: &FilterCondition) -> Self {
        match condition {
            FilterCondition::List(values) => FilterPredicate::OneOf(values.clone()),
            FilterCondition::Single(Value::Text(raw)) => match parse_comparison(raw) {
                Some((op, threshold)) => FilterPredicate::Compare(op, threshold),
                None => FilterPredicate::Equals(Value::Text(raw.clone())),
            },
            FilterCondition::Single(value) => FilterPredicate::Equals(value.clone()),
        }
    }

    /// Missing and null values never pass a filter.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value.filter(|v| !v.is_missing()) else {
            return false;
        };
        match self {
            FilterPredicate::OneOf(options) => options.iter().any(|o| values_equal(value, o)),
            FilterPredicate::Equals(expected) => values_equal(value, expected),
            FilterPredicate::Compare(op, threshold) => {
                let Some(actual) = value.as_f64() else {
                    return false;
                };
                match op {
                    Operator::Gt => actual > *threshold,
                    Operator::Lt => actual < *threshold,
                    Operator::Ge => actual >= *threshold,
                    Operator::Le => actual <= *threshold,
                    Operator::Eq => actual == *threshold,
                    _ => false,
                }
            }
        }
    }
}

/// Parses `<op><number>` with op in `<`, `>`, `<=`, `>=`, `==`.
pub fn parse_comparison(raw: &str) -> Option<(Operator, f64)> {
    let trimmed = raw.trim();
    let (op, rest) = [">=", "<=", "==", ">", "<"]
        .iter()
        .find_map(|op| trimmed.strip_prefix(op).map(|rest| (*op, rest)))?;
    let number = rest.trim_start();
    let digits = number.strip_prefix('-').unwrap_or(number);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return None;
    }
    let value = number.parse::<f64>().ok()?;
    Some((Operator::parse(op), value))
}

/// Indices of the rows that satisfy every criterion, in dataset order. A column may appear
/// more than once; each of its conditions must hold.
pub fn filter_rows(dataset: &Dataset, criteria: &[(String, FilterCondition)]) -> Vec<usize> {
    let compiled: Vec<(&str, FilterPredicate)> = criteria
        .iter()
        .map(|(column, condition)| (column.as_str(), FilterPredicate::compile(condition)))
        .collect();
    for (column, _) in &compiled {
        if !dataset.has_column(column) {
            log::warn!("filter references absent column '{column}'; no rows will match");
        }
    }
    dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            compiled
                .iter()
                .all(|(column, predicate)| predicate.matches(row.get(*column)))
        })
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub text: String,
    pub bold: bool,
    /// Number of columns covered; only group header cells span more than one.
    pub span: usize,
    pub background: Option<Color>,
    pub color: Option<Color>,
    pub flag: Option<Severity>,
}

impl GridCell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            span: 1,
            background: None,
            color: None,
            flag: None,
        }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        Self {
            bold: true,
            ..Self::text(text)
        }
    }

    pub fn blank() -> Self {
        Self::text("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    GroupHeader,
    ColumnHeader,
    Data { source_row: usize },
    GrandTotal,
    Subtotal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    pub kind: RowKind,
    pub cells: Vec<GridCell>,
    pub background: Option<Color>,
}

impl GridRow {
    fn new(kind: RowKind, cells: Vec<GridCell>) -> Self {
        Self {
            kind,
            cells,
            background: None,
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Abstract table produced per section, before any drawing happens.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGrid {
    pub header_rows: Vec<GridRow>,
    pub data_rows: Vec<GridRow>,
    pub total_row: Option<GridRow>,
    pub subtotal_rows: Vec<GridRow>,
    pub column_widths: Vec<Pt>,
    pub font_size: Pt,
    pub grid_color: Color,
    pub text_color: Color,
    pub repeat_header: bool,
}

impl TableGrid {
    pub fn column_count(&self) -> usize {
        self.column_widths.len()
    }

    /// Data, grand total and subtotal rows in render order.
    pub fn body_rows(&self) -> impl Iterator<Item = &GridRow> {
        self.data_rows
            .iter()
            .chain(self.total_row.iter())
            .chain(self.subtotal_rows.iter())
    }

    pub fn source_rows(&self) -> Vec<usize> {
        self.data_rows
            .iter()
            .filter_map(|row| match row.kind {
                RowKind::Data { source_row } => Some(source_row),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.data_rows.is_empty()
    }
}

pub struct TableBuilder<'a> {
    columns: &'a [ColumnSpec],
    style: &'a TableStyle,
    aggregates: Option<&'a Aggregates>,
    flags: Option<&'a FlagIndex>,
    available_width: Pt,
}

impl<'a> TableBuilder<'a> {
    pub fn new(columns: &'a [ColumnSpec], style: &'a TableStyle) -> Self {
        Self {
            columns,
            style,
            aggregates: None,
            flags: None,
            available_width: Pt::from_f32(770.0),
        }
    }

    pub fn with_aggregates(mut self, aggregates: &'a Aggregates) -> Self {
        self.aggregates = Some(aggregates);
        self
    }

    pub fn with_flags(mut self, flags: &'a FlagIndex) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_available_width(mut self, width: Pt) -> Self {
        self.available_width = width;
        self
    }

    pub fn build(&self, dataset: &Dataset, criteria: &[(String, FilterCondition)]) -> TableGrid {
        let selected = filter_rows(dataset, criteria);
        let rows = dataset.rows();

        let mut header_rows = Vec::new();
        if let Some(group_row) = self.group_header_row() {
            header_rows.push(group_row);
        }
        header_rows.push(self.column_header_row());

        let alt = Color::from_hex_or(&self.style.alt_row_color, Color::WHITE);
        let data_rows: Vec<GridRow> = selected
            .iter()
            .enumerate()
            .map(|(position, &source_row)| {
                let mut row = self.data_row(source_row, &rows[source_row]);
                if position % 2 == 1 {
                    row.background = Some(alt);
                }
                row
            })
            .collect();

        let mut total_row = None;
        let mut subtotal_rows = Vec::new();
        if let Some(aggregates) = self.aggregates {
            if let Some(total_field) = aggregates
                .total_field
                .as_deref()
                .filter(|field| dataset.has_column(field))
            {
                let total: f64 = selected
                    .iter()
                    .filter_map(|&idx| rows[idx].get(total_field).and_then(Value::as_f64))
                    .sum();
                total_row = Some(GridRow::new(
                    RowKind::GrandTotal,
                    self.aggregate_cells(
                        vec![GridCell::bold(aggregates.total_label.clone())],
                        format_amount(total),
                    ),
                ));
                if let Some(group_by) = aggregates.group_by.as_ref().filter(|g| {
                    dataset.has_column(&g.primary) && dataset.has_column(&g.secondary)
                }) {
                    subtotal_rows = self.subtotal_rows(
                        selected.iter().map(|&idx| &rows[idx]),
                        &group_by.primary,
                        &group_by.secondary,
                        total_field,
                    );
                }
            }
        }

        let mut grid = TableGrid {
            header_rows,
            data_rows,
            total_row,
            subtotal_rows,
            column_widths: Vec::new(),
            font_size: Pt::from_f32(self.style.font_size),
            grid_color: Color::from_hex_or(&self.style.grid_color, Color::BLACK),
            text_color: Color::from_hex_or(&self.style.text_color, Color::BLACK),
            repeat_header: self.style.repeat_header,
        };
        grid.column_widths = self.allocate_widths(&grid);
        grid
    }

    // Consecutive equal group labels coalesce; a label that reappears later starts a new span.
    fn group_header_row(&self) -> Option<GridRow> {
        if self.columns.iter().all(|c| c.group.is_none()) {
            return None;
        }
        let level1 = Color::from_hex_or(&self.style.header_colors.level1, Color::BLACK);
        let text = Color::from_hex_or(&self.style.header_text_color, Color::WHITE);
        let mut cells: Vec<GridCell> = Vec::new();
        let mut current: Option<Option<&str>> = None;
        for column in self.columns {
            let label = column.group.as_deref();
            if current == Some(label) {
                if let Some(last) = cells.last_mut() {
                    last.span += 1;
                }
                continue;
            }
            current = Some(label);
            let mut cell = GridCell::bold(label.unwrap_or(""));
            cell.background = Some(
                label
                    .and_then(|l| self.style.group_colors.get(l))
                    .and_then(|hex| Color::from_hex(hex))
                    .unwrap_or(level1),
            );
            cell.color = Some(text);
            cells.push(cell);
        }
        Some(GridRow::new(RowKind::GroupHeader, cells))
    }

    fn column_header_row(&self) -> GridRow {
        let default_bg = Color::from_hex_or(&self.style.header_color, Color::BLACK);
        let text = Color::from_hex_or(&self.style.header_text_color, Color::WHITE);
        let cells = self
            .columns
            .iter()
            .map(|column| {
                let mut cell = GridCell::bold(column.label());
                cell.background = Some(match column.level {
                    Some(level) => Color::from_hex_or(
                        self.style.header_colors.for_level(level),
                        default_bg,
                    ),
                    None => default_bg,
                });
                cell.color = Some(text);
                cell
            })
            .collect();
        GridRow::new(RowKind::ColumnHeader, cells)
    }

    fn data_row(&self, source_row: usize, record: &Record) -> GridRow {
        let cells = self
            .columns
            .iter()
            .map(|column| {
                let mut cell = GridCell::text(
                    record
                        .get(&column.name)
                        .map(format_cell)
                        .unwrap_or_default(),
                );
                if let Some(highlight) = self
                    .flags
                    .and_then(|flags| flags.highlight(source_row, &column.name))
                {
                    cell.background = Some(highlight.background);
                    cell.color = Some(highlight.text);
                    cell.flag = Some(highlight.severity);
                }
                cell
            })
            .collect();
        GridRow::new(RowKind::Data { source_row }, cells)
    }

    fn subtotal_rows<'r>(
        &self,
        rows: impl Iterator<Item = &'r Record>,
        primary: &str,
        secondary: &str,
        total_field: &str,
    ) -> Vec<GridRow> {
        let mut sums: BTreeMap<(String, String), f64> = BTreeMap::new();
        for row in rows {
            let (Some(p), Some(s)) = (row.get(primary), row.get(secondary)) else {
                continue;
            };
            if p.is_missing() || s.is_missing() {
                continue;
            }
            let amount = row.get(total_field).and_then(Value::as_f64).unwrap_or(0.0);
            *sums.entry((p.to_text(), s.to_text())).or_insert(0.0) += amount;
        }

        let mut previous: Option<String> = None;
        sums.into_iter()
            .map(|((p, s), sum)| {
                let first = if previous.as_deref() == Some(p.as_str()) {
                    GridCell::blank()
                } else {
                    GridCell::bold(p.clone())
                };
                previous = Some(p);
                GridRow::new(
                    RowKind::Subtotal,
                    self.aggregate_cells(vec![first, GridCell::text(s)], format_amount(sum)),
                )
            })
            .collect()
    }

    // Lead cells, blank padding, amount in the last column; narrow tables drop lead cells.
    fn aggregate_cells(&self, mut lead: Vec<GridCell>, amount: String) -> Vec<GridCell> {
        let n = self.columns.len().max(1);
        lead.truncate(n - 1);
        while lead.len() < n - 1 {
            lead.push(GridCell::blank());
        }
        lead.push(GridCell::bold(amount));
        lead
    }

    fn allocate_widths(&self, grid: &TableGrid) -> Vec<Pt> {
        let n = self.columns.len();
        if n == 0 {
            return Vec::new();
        }
        let available = self.available_width.to_f32().max(1.0);

        if self.columns.iter().any(|c| c.width.is_some()) {
            let weights: Vec<f32> = self.columns.iter().map(|c| c.width.unwrap_or(1.0)).collect();
            let total: f32 = weights.iter().sum();
            return weights
                .iter()
                .map(|w| Pt::from_f32(available * w / total))
                .collect();
        }

        let font_size = grid.font_size;
        // One point of slack keeps the widest text on a single line after rounding.
        let padding = CELL_PADDING * 2.0 + 1.0;
        let cap = available * MAX_AUTO_COLUMN_SHARE;
        let mut widths = vec![0.0f32; n];
        let header = grid.header_rows.last();
        for row in header.into_iter().chain(grid.body_rows()) {
            for (idx, cell) in row.cells.iter().enumerate().take(n) {
                let w = measure_text(&cell.text, font_size).to_f32() + padding;
                widths[idx] = widths[idx].max(w.min(cap));
            }
        }
        let sum: f32 = widths.iter().sum();
        let scale = if sum > available { available / sum } else { 1.0 };
        widths.iter().map(|w| Pt::from_f32(w * scale)).collect()
    }
}

/// Contract entry point without aggregates or flags.
pub fn build(
    dataset: &Dataset,
    criteria: &[(String, FilterCondition)],
    columns: &[ColumnSpec],
    style: &TableStyle,
) -> TableGrid {
    TableBuilder::new(columns, style).build(dataset, criteria)
}

pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_nan() => String::new(),
        Value::Number(n) => format_amount(*n),
        other => other.to_text(),
    }
}

fn format_amount(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // Avoid "-0.00".
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record;
    use crate::flags::{FlagIndex, apply};
    use folio_config::{Condition, FlagRule, GroupBy};

    fn values(values: &[f64]) -> Dataset {
        Dataset::from_records(
            values
                .iter()
                .map(|v| record([("value", Value::Number(*v))]))
                .collect(),
        )
    }

    fn teams() -> Dataset {
        Dataset::from_records(vec![
            record([
                ("team", Value::from("A")),
                ("sub", Value::from("A1")),
                ("value", Value::Number(1000.0)),
            ]),
            record([
                ("team", Value::from("A")),
                ("sub", Value::from("A2")),
                ("value", Value::Number(2000.0)),
            ]),
        ])
    }

    fn criteria(column: &str, condition: FilterCondition) -> Vec<(String, FilterCondition)> {
        vec![(column.to_string(), condition)]
    }

    fn columns(names: &[&str]) -> Vec<ColumnSpec> {
        names.iter().map(|n| ColumnSpec::new(*n)).collect()
    }

    #[test]
    fn comparison_strings_parse() {
        assert_eq!(parse_comparison(">=1000"), Some((Operator::Ge, 1000.0)));
        assert_eq!(parse_comparison("< 2.5"), Some((Operator::Lt, 2.5)));
        assert_eq!(parse_comparison("==7"), Some((Operator::Eq, 7.0)));
        assert_eq!(parse_comparison(">=abc"), None);
        assert_eq!(parse_comparison("1000"), None);
        assert_eq!(parse_comparison(">1."), None);
    }

    #[test]
    fn numeric_comparison_filter_keeps_matching_rows() {
        let ds = values(&[500.0, 1000.0, 1500.0]);
        let grid = build(
            &ds,
            &criteria("value", FilterCondition::Single(Value::from(">=1000"))),
            &columns(&["value"]),
            &TableStyle::default(),
        );
        let kept: Vec<Vec<&str>> = grid.data_rows.iter().map(GridRow::texts).collect();
        assert_eq!(kept, vec![vec!["1000.00"], vec!["1500.00"]]);
    }

    #[test]
    fn repeated_column_conditions_are_all_applied() {
        let ds = values(&[500.0, 1000.0, 4000.0, 6000.0]);
        let mut both = criteria("value", FilterCondition::Single(Value::from(">=1000")));
        both.push(("value".to_string(), FilterCondition::Single(Value::from("<5000"))));
        assert_eq!(filter_rows(&ds, &both), vec![1, 2]);
    }

    #[test]
    fn unparseable_comparison_falls_back_to_equality() {
        let ds = Dataset::from_records(vec![
            record([("code", Value::from(">=abc"))]),
            record([("code", Value::from("abc"))]),
        ]);
        let rows = filter_rows(&ds, &criteria("code", FilterCondition::Single(Value::from(">=abc"))));
        assert_eq!(rows, vec![0]);
    }

    #[test]
    fn list_filters_test_membership() {
        let ds = teams();
        let rows = filter_rows(
            &ds,
            &criteria(
                "sub",
                FilterCondition::List(vec![Value::from("A2"), Value::from("Z9")]),
            ),
        );
        assert_eq!(rows, vec![1]);
    }

    #[test]
    fn empty_criteria_keeps_every_row_in_order() {
        let ds = values(&[3.0, 1.0, 2.0]);
        let grid = build(&ds, &[], &columns(&["value"]), &TableStyle::default());
        assert_eq!(grid.source_rows(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_and_null_fields_render_empty() {
        let ds = Dataset::from_records(vec![record([
            ("a", Value::Null),
            ("b", Value::Number(f64::NAN)),
        ])]);
        let grid = build(&ds, &[], &columns(&["a", "b", "c"]), &TableStyle::default());
        assert_eq!(grid.data_rows[0].texts(), vec!["", "", ""]);
    }

    #[test]
    fn group_spans_coalesce_only_contiguous_labels() {
        let cols = vec![
            ColumnSpec::new("a").with_group("Risk"),
            ColumnSpec::new("b").with_group("Risk"),
            ColumnSpec::new("c").with_group("Exposure"),
            ColumnSpec::new("d").with_group("Risk"),
        ];
        let grid = build(&teams(), &[], &cols, &TableStyle::default());
        assert_eq!(grid.header_rows.len(), 2);
        let spans: Vec<(&str, usize)> = grid.header_rows[0]
            .cells
            .iter()
            .map(|c| (c.text.as_str(), c.span))
            .collect();
        assert_eq!(spans, vec![("Risk", 2), ("Exposure", 1), ("Risk", 1)]);
    }

    #[test]
    fn header_labels_fall_back_to_field_names() {
        let cols = vec![ColumnSpec::new("team").with_display_name("Team"), ColumnSpec::new("value")];
        let grid = build(&teams(), &[], &cols, &TableStyle::default());
        assert_eq!(grid.header_rows.len(), 1);
        assert_eq!(grid.header_rows[0].texts(), vec!["Team", "value"]);
    }

    #[test]
    fn grand_total_and_flags_end_to_end() {
        let ds = teams();
        let rule = FlagRule::new("large", vec![Condition::new("value", ">", 1500.0)]);
        let flags = apply(&ds, &[rule]);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].row_index, 1);

        let index = FlagIndex::new(&flags);
        let aggregates = Aggregates {
            total_field: Some("value".to_string()),
            ..Aggregates::default()
        };
        let cols = columns(&["team", "sub", "value"]);
        let style = TableStyle::default();
        let grid = TableBuilder::new(&cols, &style)
            .with_aggregates(&aggregates)
            .with_flags(&index)
            .build(&ds, &[]);

        let total = grid.total_row.as_ref().expect("total row");
        assert_eq!(total.texts(), vec!["Grand Total", "", "3000.00"]);
        assert!(total.cells[0].bold);
        assert!(grid.data_rows[1].cells[2].flag.is_some());
        assert!(grid.data_rows[0].cells[2].flag.is_none());
        assert!(grid.data_rows[1].background.is_some());
    }

    #[test]
    fn subtotals_suppress_repeated_primary_labels() {
        let ds = Dataset::from_records(vec![
            record([
                ("team", Value::from("TeamA")),
                ("sub", Value::from("Sub1")),
                ("value", Value::Number(1.0)),
            ]),
            record([
                ("team", Value::from("TeamA")),
                ("sub", Value::from("Sub2")),
                ("value", Value::Number(2.0)),
            ]),
            record([
                ("team", Value::from("TeamB")),
                ("sub", Value::from("Sub1")),
                ("value", Value::Number(4.0)),
            ]),
        ]);
        let aggregates = Aggregates {
            total_field: Some("value".to_string()),
            group_by: Some(GroupBy {
                primary: "team".to_string(),
                secondary: "sub".to_string(),
            }),
            ..Aggregates::default()
        };
        let cols = columns(&["team", "sub", "note", "value"]);
        let style = TableStyle::default();
        let grid = TableBuilder::new(&cols, &style)
            .with_aggregates(&aggregates)
            .build(&ds, &[]);

        let rows: Vec<Vec<&str>> = grid.subtotal_rows.iter().map(GridRow::texts).collect();
        assert_eq!(
            rows,
            vec![
                vec!["TeamA", "Sub1", "", "1.00"],
                vec!["", "Sub2", "", "2.00"],
                vec!["TeamB", "Sub1", "", "4.00"],
            ]
        );
        assert!(grid.subtotal_rows[0].cells[0].bold);
        assert!(!grid.subtotal_rows[1].cells[0].bold);
        assert!(grid.subtotal_rows[2].cells[0].bold);
    }

    #[test]
    fn aggregates_skip_absent_total_field() {
        let aggregates = Aggregates {
            total_field: Some("market_value".to_string()),
            ..Aggregates::default()
        };
        let cols = columns(&["team"]);
        let style = TableStyle::default();
        let grid = TableBuilder::new(&cols, &style)
            .with_aggregates(&aggregates)
            .build(&teams(), &[]);
        assert!(grid.total_row.is_none());
    }

    #[test]
    fn relative_widths_fill_available_width() {
        let cols = vec![ColumnSpec::new("a").with_width(1.0), ColumnSpec::new("b").with_width(3.0)];
        let style = TableStyle::default();
        let grid = TableBuilder::new(&cols, &style)
            .with_available_width(Pt::from_f32(400.0))
            .build(&teams(), &[]);
        assert_eq!(grid.column_widths, vec![Pt::from_f32(100.0), Pt::from_f32(300.0)]);
    }

    #[test]
    fn auto_widths_are_capped_and_fit() {
        let ds = Dataset::from_records(vec![record([
            ("long", Value::from("x".repeat(400))),
            ("short", Value::from("y")),
        ])]);
        let cols = columns(&["long", "short"]);
        let style = TableStyle::default();
        let grid = TableBuilder::new(&cols, &style)
            .with_available_width(Pt::from_f32(500.0))
            .build(&ds, &[]);
        let total: Pt = grid.column_widths.iter().sum();
        assert!(total <= Pt::from_f32(500.0));
        assert!(grid.column_widths[0] <= Pt::from_f32(200.0));
    }
}
