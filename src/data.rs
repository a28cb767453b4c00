use crate::error::ReportError;
use folio_config::Value;
use std::collections::BTreeMap;

pub type Record = BTreeMap<String, Value>;

/// Tabular input: named, nullable fields per row, in row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(rows: Vec<Record>) -> Self {
        let mut dataset = Dataset::new();
        for row in rows {
            dataset.push(row);
        }
        dataset
    }

    /// Loads an array of JSON objects. Nested arrays/objects are stored as text.
    pub fn from_json_str(raw: &str) -> Result<Self, ReportError> {
        let parsed: serde_json::Value = serde_json::from_str(raw)
            .map_err(|err| ReportError::DataAccess(format!("invalid dataset json: {err}")))?;
        let serde_json::Value::Array(items) = parsed else {
            return Err(ReportError::DataAccess(
                "dataset json must be an array of objects".to_string(),
            ));
        };
        let mut dataset = Dataset::new();
        for (idx, item) in items.into_iter().enumerate() {
            let serde_json::Value::Object(map) = item else {
                return Err(ReportError::DataAccess(format!(
                    "dataset row {idx} is not an object"
                )));
            };
            let record = map
                .into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect();
            dataset.push(record);
        }
        Ok(dataset)
    }

    pub fn push(&mut self, row: Record) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

/// External provider of the report dataset (CSV, database, ...).
pub trait DataSource {
    fn load(&self) -> Result<Dataset, ReportError>;
}

impl DataSource for Dataset {
    fn load(&self) -> Result<Dataset, ReportError> {
        Ok(self.clone())
    }
}

impl<F> DataSource for F
where
    F: Fn() -> Result<Dataset, ReportError>,
{
    fn load(&self) -> Result<Dataset, ReportError> {
        self()
    }
}

/// Builds a record from `(field, value)` pairs.
pub fn record<K, V, I>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_follow_first_seen_order() {
        let ds = Dataset::from_records(vec![
            record([("b", 1.0)]),
            record([("a", 2.0), ("b", 3.0)]),
        ]);
        assert_eq!(ds.columns(), &["b".to_string(), "a".to_string()]);
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn json_rows_load_with_nulls_and_numbers() {
        let ds = Dataset::from_json_str(r#"[{"team":"A","value":1000},{"team":null,"value":2.5}]"#)
            .expect("dataset");
        assert_eq!(ds.rows()[0].get("value"), Some(&Value::Number(1000.0)));
        assert_eq!(ds.rows()[1].get("team"), Some(&Value::Null));
    }

    #[test]
    fn non_array_json_is_a_data_access_error() {
        let err = Dataset::from_json_str(r#"{"team":"A"}"#).unwrap_err();
        assert!(matches!(err, ReportError::DataAccess(_)));
    }

    #[test]
    fn closures_act_as_data_sources() {
        let source = || -> Result<Dataset, ReportError> {
            Err(ReportError::DataAccess("database offline".to_string()))
        };
        assert!(matches!(source.load(), Err(ReportError::DataAccess(_))));
    }
}
