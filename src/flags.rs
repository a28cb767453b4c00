use crate::condition::evaluate_condition;
use crate::data::{Dataset, Record};
use crate::types::Color;
use folio_config::{FlagRule, Severity};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedCell {
    pub row_index: usize,
    pub column: String,
    pub rule: String,
    pub severity: Severity,
    pub highlight_color: String,
    pub text_color: String,
}

/// True when every condition matches. A rule without conditions never matches.
pub fn rule_matches(rule: &FlagRule, record: &Record) -> bool {
    !rule.conditions.is_empty()
        && rule
            .conditions
            .iter()
            .all(|condition| evaluate_condition(record, condition))
}

/// Evaluates every rule against every row. Results are ordered by rule, then row,
/// and are not deduplicated.
pub fn apply(dataset: &Dataset, rules: &[FlagRule]) -> Vec<FlaggedCell> {
    let mut flagged = Vec::new();
    for rule in rules {
        let Some(column) = rule.target_column() else {
            log::debug!("flag rule '{}' has no conditions; skipped", rule.name);
            continue;
        };
        let mut hits = 0usize;
        for (row_index, record) in dataset.rows().iter().enumerate() {
            if rule_matches(rule, record) {
                hits += 1;
                flagged.push(FlaggedCell {
                    row_index,
                    column: column.to_string(),
                    rule: rule.name.clone(),
                    severity: rule.severity,
                    highlight_color: rule.highlight_color.clone(),
                    text_color: rule.text_color.clone(),
                });
            }
        }
        log::debug!("flag rule '{}' matched {hits} row(s)", rule.name);
    }
    flagged
}

/// Resolved highlight for one rendered cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellHighlight {
    pub background: Color,
    pub text: Color,
    pub severity: Severity,
}

/// Lookup of flags by (row, column) for the table renderer.
#[derive(Debug, Clone, Default)]
pub struct FlagIndex {
    cells: BTreeMap<(usize, String), Vec<FlaggedCell>>,
}

impl FlagIndex {
    pub fn new(flags: &[FlaggedCell]) -> Self {
        let mut cells: BTreeMap<(usize, String), Vec<FlaggedCell>> = BTreeMap::new();
        for flag in flags {
            cells
                .entry((flag.row_index, flag.column.clone()))
                .or_default()
                .push(flag.clone());
        }
        Self { cells }
    }

    pub fn flags_for(&self, row_index: usize, column: &str) -> &[FlaggedCell] {
        self.cells
            .get(&(row_index, column.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Highest severity wins; ties keep the earliest rule.
    pub fn highlight(&self, row_index: usize, column: &str) -> Option<CellHighlight> {
        let flags = self.flags_for(row_index, column);
        let mut best: Option<&FlaggedCell> = None;
        for flag in flags {
            if best.is_none_or(|b| flag.severity > b.severity) {
                best = Some(flag);
            }
        }
        best.map(|flag| CellHighlight {
            background: Color::from_hex_or(&flag.highlight_color, Color::WHITE),
            text: Color::from_hex_or(&flag.text_color, Color::BLACK),
            severity: flag.severity,
        })
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record;
    use folio_config::{Condition, Value};

    fn dataset() -> Dataset {
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

    #[test]
    fn rule_without_conditions_flags_nothing() {
        let rule = FlagRule::new("empty", Vec::new());
        assert!(apply(&dataset(), &[rule]).is_empty());
    }

    #[test]
    fn value_above_threshold_flags_second_row_only() {
        let rule = FlagRule::new("large", vec![Condition::new("value", ">", 1500.0)]);
        let flags = apply(&dataset(), &[rule]);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].row_index, 1);
        assert_eq!(flags[0].column, "value");
    }

    #[test]
    fn conditions_are_and_combined() {
        let rule = FlagRule::new(
            "team a large",
            vec![
                Condition::new("team", "==", "A"),
                Condition::new("value", "<", 1500.0),
            ],
        );
        let flags = apply(&dataset(), &[rule]);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].row_index, 0);
        assert_eq!(flags[0].column, "team");
    }

    #[test]
    fn overlapping_rules_are_all_retained() {
        let low = FlagRule::new("any", vec![Condition::new("value", ">", 0.0)])
            .with_severity(Severity::Low);
        let high = FlagRule::new("big", vec![Condition::new("value", ">=", "2000")])
            .with_severity(Severity::High)
            .with_colors("#FF0000", "#FFFFFF");
        let flags = apply(&dataset(), &[low, high]);
        assert_eq!(flags.len(), 3);

        let index = FlagIndex::new(&flags);
        assert_eq!(index.flags_for(1, "value").len(), 2);
        let highlight = index.highlight(1, "value").expect("highlight");
        assert_eq!(highlight.severity, Severity::High);
        assert_eq!(highlight.background, Color::RED);
        assert!(index.highlight(0, "team").is_none());
    }
}
