use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const CONFIG_SCHEMA: &str = "folio.report_config";
pub const CONFIG_SCHEMA_VERSION: &str = "1";

pub const DEFAULT_TOC_TITLE: &str = "Table of Contents";
pub const DEFAULT_TOC_WIDTH: usize = 50;
pub const DEFAULT_TOC_MIN_DOTS: usize = 5;
pub const DEFAULT_TOTAL_LABEL: &str = "Grand Total";
pub const DEFAULT_REPORT_TITLE: &str = "Risk Oversight Report";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// A scalar cell or comparison value.
///
/// `Number(NaN)` is treated exactly like `Null` by [`Value::is_missing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Plain text rendering used by string operators and grouping keys.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.is_nan() => String::new(),
            Value::Number(n) => format!("{n}"),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    /// Kept so that a bad operator degrades to a non-match instead of failing the load.
    Unknown(String),
}

impl Operator {
    pub fn parse(raw: &str) -> Operator {
        let trimmed = raw.trim();
        match trimmed {
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            "==" | "=" => Operator::Eq,
            "!=" => Operator::Ne,
            _ => match trimmed.to_ascii_lowercase().as_str() {
                "contains" => Operator::Contains,
                "startswith" => Operator::StartsWith,
                "endswith" => Operator::EndsWith,
                _ => Operator::Unknown(trimmed.to_string()),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Contains => "contains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le
        )
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        Operator::parse(&value)
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default = "null_value")]
    pub value: Value,
}

fn null_value() -> Value {
    Value::Null
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::parse(operator),
            value: value.into(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[default]
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Critical", alias = "CRITICAL")]
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFlagRule")]
pub struct FlagRule {
    pub name: String,
    pub category: Option<String>,
    pub conditions: Vec<Condition>,
    pub severity: Severity,
    pub highlight_color: String,
    pub text_color: String,
    /// Column that receives the highlight; defaults to the first condition's field.
    pub column: Option<String>,
}

impl FlagRule {
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            name: name.into(),
            category: None,
            conditions,
            severity: Severity::default(),
            highlight_color: default_highlight_color(),
            text_color: default_flag_text_color(),
            column: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_colors(mut self, highlight: impl Into<String>, text: impl Into<String>) -> Self {
        self.highlight_color = highlight.into();
        self.text_color = text.into();
        self
    }

    pub fn target_column(&self) -> Option<&str> {
        self.column
            .as_deref()
            .or_else(|| self.conditions.first().map(|c| c.field.as_str()))
    }
}

// Accepts both the structured form and the legacy single-condition shorthand
// (`field`/`operator`/`value` on the rule itself).
#[derive(Deserialize)]
struct RawFlagRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    operator: Option<Operator>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    severity: Severity,
    #[serde(default = "default_highlight_color", alias = "color")]
    highlight_color: String,
    #[serde(default = "default_flag_text_color")]
    text_color: String,
    #[serde(default)]
    column: Option<String>,
}

impl From<RawFlagRule> for FlagRule {
    fn from(raw: RawFlagRule) -> Self {
        let mut conditions = raw.conditions;
        if conditions.is_empty() {
            if let (Some(field), Some(operator)) = (raw.field.clone(), raw.operator) {
                conditions.push(Condition {
                    field,
                    operator,
                    value: raw.value.unwrap_or(Value::Null),
                });
            }
        }
        let name = raw.name.unwrap_or_else(|| {
            let subject = raw
                .category
                .as_deref()
                .or(raw.field.as_deref())
                .unwrap_or("unnamed");
            format!("Rule for {subject}")
        });
        Self {
            name,
            category: raw.category,
            conditions,
            severity: raw.severity,
            highlight_color: raw.highlight_color,
            text_color: raw.text_color,
            column: raw.column.or(raw.field),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRuleSet {
    List(Vec<FlagRule>),
    ByCategory(BTreeMap<String, Vec<FlagRule>>),
}

fn deserialize_rules<'de, D>(deserializer: D) -> Result<Vec<FlagRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawRuleSet>::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(RawRuleSet::List(rules)) => rules,
        Some(RawRuleSet::ByCategory(map)) => map
            .into_iter()
            .flat_map(|(category, rules)| {
                rules.into_iter().map(move |mut rule| {
                    if rule.category.is_none() {
                        rule.category = Some(category.clone());
                    }
                    rule
                })
            })
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawColumnSpec")]
pub struct ColumnSpec {
    pub name: String,
    pub display_name: Option<String>,
    pub group: Option<String>,
    pub width: Option<f32>,
    pub level: Option<u8>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            group: None,
            width: None,
            level: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_width(mut self, width: f32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumnSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        width: Option<f32>,
        #[serde(default)]
        level: Option<u8>,
    },
}

impl From<RawColumnSpec> for ColumnSpec {
    fn from(raw: RawColumnSpec) -> Self {
        match raw {
            RawColumnSpec::Name(name) => ColumnSpec::new(name),
            RawColumnSpec::Full {
                name,
                display_name,
                group,
                width,
                level,
            } => ColumnSpec {
                name,
                display_name,
                group,
                width,
                level,
            },
        }
    }
}

/// Filter predicate for one column, interpreted by the table builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterCondition {
    List(Vec<Value>),
    Single(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderColors {
    #[serde(default = "default_level1")]
    pub level1: String,
    #[serde(default = "default_level2")]
    pub level2: String,
    #[serde(default = "default_level3")]
    pub level3: String,
}

impl Default for HeaderColors {
    fn default() -> Self {
        Self {
            level1: default_level1(),
            level2: default_level2(),
            level3: default_level3(),
        }
    }
}

impl HeaderColors {
    pub fn for_level(&self, level: u8) -> &str {
        match level {
            0 | 1 => &self.level1,
            2 => &self.level2,
            _ => &self.level3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStyle {
    #[serde(default = "default_level1")]
    pub header_color: String,
    #[serde(default = "default_white")]
    pub header_text_color: String,
    #[serde(default)]
    pub header_colors: HeaderColors,
    #[serde(default)]
    pub group_colors: BTreeMap<String, String>,
    #[serde(default = "default_alt_row_color")]
    pub alt_row_color: String,
    #[serde(default = "default_grid_color")]
    pub grid_color: String,
    #[serde(default = "default_black")]
    pub text_color: String,
    #[serde(default = "default_table_font_size")]
    pub font_size: f32,
    #[serde(default = "default_true")]
    pub repeat_header: bool,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            header_color: default_level1(),
            header_text_color: default_white(),
            header_colors: HeaderColors::default(),
            group_colors: BTreeMap::new(),
            alt_row_color: default_alt_row_color(),
            grid_color: default_grid_color(),
            text_color: default_black(),
            font_size: default_table_font_size(),
            repeat_header: true,
        }
    }
}

impl TableStyle {
    fn colors(&self) -> impl Iterator<Item = &str> {
        [
            self.header_color.as_str(),
            self.header_text_color.as_str(),
            self.header_colors.level1.as_str(),
            self.header_colors.level2.as_str(),
            self.header_colors.level3.as_str(),
            self.alt_row_color.as_str(),
            self.grid_color.as_str(),
            self.text_color.as_str(),
        ]
        .into_iter()
        .chain(self.group_colors.values().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBy {
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregates {
    #[serde(default)]
    pub total_field: Option<String>,
    #[serde(default)]
    pub group_by: Option<GroupBy>,
    #[serde(default = "default_total_label")]
    pub total_label: String,
}

impl Default for Aggregates {
    fn default() -> Self {
        Self {
            total_field: None,
            group_by: None,
            total_label: default_total_label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subsection {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filter_criteria: BTreeMap<String, FilterCondition>,
    /// `None` inherits the parent section's columns.
    #[serde(default)]
    pub columns: Option<Vec<ColumnSpec>>,
    #[serde(default)]
    pub table_style: Option<TableStyle>,
    #[serde(default)]
    pub aggregates: Option<Aggregates>,
}

impl Subsection {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            filter_criteria: BTreeMap::new(),
            columns: None,
            table_style: None,
            aggregates: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subsections: Vec<Subsection>,
    #[serde(default)]
    pub filter_criteria: BTreeMap<String, FilterCondition>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub table_style: TableStyle,
    #[serde(default)]
    pub aggregates: Aggregates,
    #[serde(default)]
    pub omit_when_empty: bool,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            subsections: Vec::new(),
            filter_criteria: BTreeMap::new(),
            columns: Vec::new(),
            table_style: TableStyle::default(),
            aggregates: Aggregates::default(),
            omit_when_empty: false,
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_subsection(mut self, subsection: Subsection) -> Self {
        self.subsections.push(subsection);
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, condition: FilterCondition) -> Self {
        self.filter_criteria.insert(column.into(), condition);
        self
    }

    /// Effective (criteria, columns, style, aggregates) for a subsection of this section.
    /// The subsection's criteria are appended after the parent's, so a condition on a
    /// column the parent already filters narrows it further.
    pub fn resolve_subsection<'a>(&'a self, sub: &'a Subsection) -> ResolvedTable<'a> {
        let mut criteria = criteria_list(&self.filter_criteria);
        criteria.extend(criteria_list(&sub.filter_criteria));
        ResolvedTable {
            criteria,
            columns: sub.columns.as_deref().unwrap_or(&self.columns),
            style: sub.table_style.as_ref().unwrap_or(&self.table_style),
            aggregates: sub.aggregates.as_ref().unwrap_or(&self.aggregates),
        }
    }

    pub fn resolve(&self) -> ResolvedTable<'_> {
        ResolvedTable {
            criteria: criteria_list(&self.filter_criteria),
            columns: &self.columns,
            style: &self.table_style,
            aggregates: &self.aggregates,
        }
    }
}

/// Ordered `(column, condition)` pairs, all of which must hold.
pub type FilterCriteria = Vec<(String, FilterCondition)>;

fn criteria_list(criteria: &BTreeMap<String, FilterCondition>) -> FilterCriteria {
    criteria
        .iter()
        .map(|(column, condition)| (column.clone(), condition.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResolvedTable<'a> {
    pub criteria: FilterCriteria,
    pub columns: &'a [ColumnSpec],
    pub style: &'a TableStyle,
    pub aggregates: &'a Aggregates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocSettings {
    #[serde(default = "default_toc_title")]
    pub title: String,
    #[serde(default = "default_toc_width")]
    pub fixed_width: usize,
    #[serde(default = "default_toc_min_dots")]
    pub minimum_dots: usize,
    #[serde(default = "default_true")]
    pub include_subsections: bool,
    #[serde(default)]
    pub numbered: bool,
}

impl Default for TocSettings {
    fn default() -> Self {
        Self {
            title: default_toc_title(),
            fixed_width: DEFAULT_TOC_WIDTH,
            minimum_dots: DEFAULT_TOC_MIN_DOTS,
            include_subsections: true,
            numbered: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    #[serde(default = "default_report_title")]
    pub title: String,
    /// Name printed in the footer; falls back to `title`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub effective_date: Option<String>,
}

impl Default for ReportMeta {
    fn default() -> Self {
        Self {
            title: default_report_title(),
            name: None,
            subtitle: None,
            company: None,
            author: None,
            subject: None,
            creator: None,
            effective_date: None,
        }
    }
}

impl ReportMeta {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub report: ReportMeta,
    #[serde(default, alias = "reports")]
    pub sections: Vec<Section>,
    #[serde(default, deserialize_with = "deserialize_rules")]
    pub flag_rules: Vec<FlagRule>,
    #[serde(default)]
    pub toc: TocSettings,
}

impl ReportConfig {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            report: ReportMeta::default(),
            sections,
            flag_rules: Vec::new(),
            toc: TocSettings::default(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ReportConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: ReportConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sections.is_empty() {
            return Err(invalid("report defines no sections"));
        }
        if self.toc.fixed_width == 0 {
            return Err(invalid("toc.fixed_width must be greater than zero"));
        }

        let mut titles = BTreeSet::new();
        for section in &self.sections {
            if section.title.trim().is_empty() {
                return Err(invalid("section title must not be empty"));
            }
            if !titles.insert(section.title.as_str()) {
                return Err(invalid(format!(
                    "duplicate section title '{}'",
                    section.title
                )));
            }
            validate_table(&section.title, &section.columns, &section.table_style, &section.aggregates)?;

            let mut sub_titles = BTreeSet::new();
            for sub in &section.subsections {
                if sub.title.trim().is_empty() {
                    return Err(invalid(format!(
                        "subsection of '{}' has an empty title",
                        section.title
                    )));
                }
                if !sub_titles.insert(sub.title.as_str()) {
                    return Err(invalid(format!(
                        "duplicate subsection title '{}' in section '{}'",
                        sub.title, section.title
                    )));
                }
                let resolved = section.resolve_subsection(sub);
                let context = format!("{} / {}", section.title, sub.title);
                validate_table(&context, resolved.columns, resolved.style, resolved.aggregates)?;
            }
        }

        for rule in &self.flag_rules {
            for color in [&rule.highlight_color, &rule.text_color] {
                if parse_hex_color(color).is_none() {
                    return Err(invalid(format!(
                        "flag rule '{}' has invalid color '{}'",
                        rule.name, color
                    )));
                }
            }
            for condition in &rule.conditions {
                if condition.field.trim().is_empty() {
                    return Err(invalid(format!(
                        "flag rule '{}' has a condition without a field",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Hex SHA-256 over the schema tag and the canonical JSON form of the config.
    pub fn fingerprint(&self) -> String {
        let mut bytes = format!("{CONFIG_SCHEMA}.v{CONFIG_SCHEMA_VERSION}\n").into_bytes();
        bytes.extend(serde_json::to_vec(self).unwrap_or_default());
        hex_sha256(&bytes)
    }
}

fn validate_table(
    context: &str,
    columns: &[ColumnSpec],
    style: &TableStyle,
    aggregates: &Aggregates,
) -> Result<(), ConfigError> {
    for column in columns {
        if column.name.trim().is_empty() {
            return Err(invalid(format!("'{context}' has a column without a name")));
        }
        if let Some(level) = column.level {
            if !(1..=3).contains(&level) {
                return Err(invalid(format!(
                    "'{context}' column '{}' has header level {level}; expected 1..=3",
                    column.name
                )));
            }
        }
        if let Some(width) = column.width {
            if !width.is_finite() || width <= 0.0 {
                return Err(invalid(format!(
                    "'{context}' column '{}' has a non-positive width",
                    column.name
                )));
            }
        }
    }
    for color in style.colors() {
        if parse_hex_color(color).is_none() {
            return Err(invalid(format!("'{context}' has invalid color '{color}'")));
        }
    }
    if !style.font_size.is_finite() || style.font_size <= 0.0 {
        return Err(invalid(format!("'{context}' has a non-positive font size")));
    }
    if aggregates.group_by.is_some() && aggregates.total_field.is_none() {
        return Err(invalid(format!(
            "'{context}' declares group_by without a total_field"
        )));
    }
    Ok(())
}

/// Parses `#RRGGBB`, `RRGGBB`, `#RGB` or `RGB`.
pub fn parse_hex_color(raw: &str) -> Option<(u8, u8, u8)> {
    let hex = raw.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some((r, g, b))
        }
        3 => {
            let mut out = [0u8; 3];
            for (idx, ch) in hex.chars().enumerate() {
                let v = ch.to_digit(16)? as u8;
                out[idx] = v * 16 + v;
            }
            Some((out[0], out[1], out[2]))
        }
        _ => None,
    }
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn default_true() -> bool {
    true
}

fn default_level1() -> String {
    "#2C3E50".to_string()
}

fn default_level2() -> String {
    "#34495E".to_string()
}

fn default_level3() -> String {
    "#446CB3".to_string()
}

fn default_white() -> String {
    "#FFFFFF".to_string()
}

fn default_black() -> String {
    "#000000".to_string()
}

fn default_alt_row_color() -> String {
    "#F8F9FA".to_string()
}

fn default_grid_color() -> String {
    "#BDC3C7".to_string()
}

fn default_highlight_color() -> String {
    "#FFCCCC".to_string()
}

fn default_flag_text_color() -> String {
    "#000000".to_string()
}

fn default_table_font_size() -> f32 {
    8.0
}

fn default_total_label() -> String {
    DEFAULT_TOTAL_LABEL.to_string()
}

fn default_toc_title() -> String {
    DEFAULT_TOC_TITLE.to_string()
}

fn default_toc_width() -> usize {
    DEFAULT_TOC_WIDTH
}

fn default_toc_min_dots() -> usize {
    DEFAULT_TOC_MIN_DOTS
}

fn default_report_title() -> String {
    DEFAULT_REPORT_TITLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "report": { "title": "Quarterly Risk" },
            "sections": [
                { "title": "Overview", "columns": ["team", { "name": "value", "display_name": "Value" }] }
            ]
        })
    }

    #[test]
    fn minimal_config_loads_with_documented_defaults() {
        let config = ReportConfig::from_json_value(minimal()).expect("config");
        assert_eq!(config.toc.fixed_width, 50);
        assert_eq!(config.toc.minimum_dots, 5);
        assert_eq!(config.toc.title, "Table of Contents");
        assert!(config.toc.include_subsections);
        let section = &config.sections[0];
        assert_eq!(section.columns[0].label(), "team");
        assert_eq!(section.columns[1].label(), "Value");
        assert_eq!(section.table_style.alt_row_color, "#F8F9FA");
        assert_eq!(section.aggregates.total_label, "Grand Total");
        assert_eq!(config.report.display_name(), "Quarterly Risk");
    }

    #[test]
    fn missing_sections_is_a_configuration_error() {
        let err = ReportConfig::from_json_value(json!({ "report": {} })).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn duplicate_section_titles_are_rejected() {
        let err = ReportConfig::from_json_value(json!({
            "sections": [ { "title": "Overview" }, { "title": "Overview" } ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate section title"));
    }

    #[test]
    fn legacy_rule_shorthand_becomes_single_condition() {
        let config = ReportConfig::from_json_value(json!({
            "sections": [ { "title": "Overview" } ],
            "flag_rules": [ { "field": "value", "operator": ">", "value": 1500, "severity": "high" } ]
        }))
        .expect("config");
        let rule = &config.flag_rules[0];
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(rule.conditions[0].operator, Operator::Gt);
        assert_eq!(rule.conditions[0].value, Value::Number(1500.0));
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.target_column(), Some("value"));
        assert_eq!(rule.name, "Rule for value");
    }

    #[test]
    fn categorised_rules_are_flattened_with_category() {
        let config = ReportConfig::from_json_value(json!({
            "sections": [ { "title": "Overview" } ],
            "flag_rules": {
                "exposure": [ { "name": "big", "conditions": [ { "field": "value", "operator": ">=", "value": "10" } ] } ],
                "names": [ { "name": "acme", "conditions": [ { "field": "issuer", "operator": "CONTAINS", "value": "acme" } ] } ]
            }
        }))
        .expect("config");
        assert_eq!(config.flag_rules.len(), 2);
        assert_eq!(config.flag_rules[0].category.as_deref(), Some("exposure"));
        assert_eq!(config.flag_rules[1].conditions[0].operator, Operator::Contains);
    }

    #[test]
    fn unknown_operator_is_kept_not_rejected() {
        assert_eq!(Operator::parse("~="), Operator::Unknown("~=".to_string()));
        assert_eq!(Operator::parse("StartsWith"), Operator::StartsWith);
    }

    #[test]
    fn group_by_without_total_field_is_rejected() {
        let err = ReportConfig::from_json_value(json!({
            "sections": [ { "title": "Overview", "aggregates": { "group_by": { "primary": "team", "secondary": "sub" } } } ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("group_by"));
    }

    #[test]
    fn bad_colors_are_rejected() {
        let err = ReportConfig::from_json_value(json!({
            "sections": [ { "title": "Overview", "table_style": { "alt_row_color": "not-a-color" } } ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not-a-color"));
        assert_eq!(parse_hex_color("#fff"), Some((255, 255, 255)));
        assert_eq!(parse_hex_color("2C3E50"), Some((0x2C, 0x3E, 0x50)));
    }

    #[test]
    fn subsection_inherits_and_extends_parent_filters() {
        let config = ReportConfig::from_json_value(json!({
            "sections": [ {
                "title": "Overview",
                "columns": ["team", "value"],
                "filter_criteria": { "team": "A" },
                "subsections": [ { "title": "Large", "filter_criteria": { "value": ">=1000" } } ]
            } ]
        }))
        .expect("config");
        let section = &config.sections[0];
        let resolved = section.resolve_subsection(&section.subsections[0]);
        assert_eq!(resolved.columns.len(), 2);
        assert_eq!(
            resolved.criteria,
            vec![
                ("team".to_string(), FilterCondition::Single(Value::Text("A".to_string()))),
                ("value".to_string(), FilterCondition::Single(Value::Text(">=1000".to_string()))),
            ]
        );
    }

    #[test]
    fn subsection_filter_on_parent_column_keeps_both_conditions() {
        let config = ReportConfig::from_json_value(json!({
            "sections": [ {
                "title": "Overview",
                "columns": ["value"],
                "filter_criteria": { "value": ">=1000" },
                "subsections": [ { "title": "Mid", "filter_criteria": { "value": "<5000" } } ]
            } ]
        }))
        .expect("config");
        let section = &config.sections[0];
        let resolved = section.resolve_subsection(&section.subsections[0]);
        assert_eq!(
            resolved.criteria,
            vec![
                ("value".to_string(), FilterCondition::Single(Value::Text(">=1000".to_string()))),
                ("value".to_string(), FilterCondition::Single(Value::Text("<5000".to_string()))),
            ]
        );
    }

    #[test]
    fn fingerprint_is_stable_and_tracks_changes() {
        let a = ReportConfig::from_json_value(minimal()).expect("config");
        let b = ReportConfig::from_json_value(minimal()).expect("config");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut c = a.clone();
        c.sections[0].title = "Summary".to_string();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn nan_counts_as_missing() {
        assert!(Value::Number(f64::NAN).is_missing());
        assert!(Value::Null.is_missing());
        assert!(!Value::Number(0.0).is_missing());
        assert_eq!(Value::Number(1500.0).to_text(), "1500");
    }
}
