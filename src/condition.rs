use crate::data::Record;
use crate::error::ReportError;
use folio_config::{Condition, Operator, Value};
use std::cmp::Ordering;

/// Evaluates one condition against a record. Never fails: a missing or null field,
/// an uncoercible operand or an unknown operator all yield `false` and a warning.
pub fn evaluate(record: &Record, field: &str, operator: &Operator, value: &Value) -> bool {
    match try_evaluate(record, field, operator, value) {
        Ok(matched) => matched,
        Err(err) => {
            log::warn!("condition {field} {operator} {value}: {err}; treated as non-match");
            false
        }
    }
}

pub fn evaluate_condition(record: &Record, condition: &Condition) -> bool {
    evaluate(record, &condition.field, &condition.operator, &condition.value)
}

/// Strict variant of [`evaluate`] that reports why a condition could not be evaluated.
pub fn try_evaluate(
    record: &Record,
    field: &str,
    operator: &Operator,
    value: &Value,
) -> Result<bool, ReportError> {
    let Some(actual) = record.get(field) else {
        return Err(ReportError::Evaluation(format!("field '{field}' is absent")));
    };
    if actual.is_missing() {
        return Err(ReportError::Evaluation(format!("field '{field}' is null")));
    }

    match operator {
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let ordering = compare_ordered(actual, value)?;
            Ok(match operator {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Ge => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        Operator::Eq => Ok(values_equal(actual, value)),
        Operator::Ne => Ok(!values_equal(actual, value)),
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            let haystack = actual.to_text().to_lowercase();
            let needle = value.to_text().to_lowercase();
            Ok(match operator {
                Operator::Contains => haystack.contains(&needle),
                Operator::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            })
        }
        Operator::Unknown(raw) => Err(ReportError::Evaluation(format!(
            "unsupported operator '{raw}'"
        ))),
    }
}

// Numeric field: text operands are parsed first. Text field: lexicographic order.
fn compare_ordered(actual: &Value, expected: &Value) -> Result<Ordering, ReportError> {
    if let Some(lhs) = actual.as_f64() {
        let rhs = match expected {
            Value::Number(n) if !n.is_nan() => *n,
            Value::Text(raw) => raw.trim().parse::<f64>().map_err(|_| {
                ReportError::Evaluation(format!("cannot compare number with '{raw}'"))
            })?,
            other => {
                return Err(ReportError::Evaluation(format!(
                    "cannot compare number with '{other}'"
                )));
            }
        };
        if rhs.is_nan() {
            return Err(ReportError::Evaluation("comparison value is NaN".to_string()));
        }
        return lhs
            .partial_cmp(&rhs)
            .ok_or_else(|| ReportError::Evaluation("unordered numbers".to_string()));
    }
    match (actual, expected) {
        (Value::Text(lhs), Value::Text(rhs)) => Ok(lhs.as_str().cmp(rhs.as_str())),
        (Value::Bool(lhs), Value::Bool(rhs)) => Ok(lhs.cmp(rhs)),
        _ => Err(ReportError::Evaluation(format!(
            "cannot order '{actual}' against '{expected}'"
        ))),
    }
}

pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record;

    fn row() -> Record {
        record([
            ("value", Value::Number(1500.0)),
            ("issuer", Value::from("Acme Holdings")),
            ("rating", Value::Null),
            ("ratio", Value::Number(f64::NAN)),
        ])
    }

    fn op(raw: &str) -> Operator {
        Operator::parse(raw)
    }

    #[test]
    fn missing_null_and_nan_fields_never_match() {
        let r = row();
        for operator in [">", "<", "==", "!=", "contains"] {
            assert!(!evaluate(&r, "absent", &op(operator), &Value::from("x")));
            assert!(!evaluate(&r, "rating", &op(operator), &Value::from("x")));
            assert!(!evaluate(&r, "ratio", &op(operator), &Value::Number(1.0)));
        }
    }

    #[test]
    fn numeric_operators_coerce_text_operands() {
        let r = row();
        assert!(evaluate(&r, "value", &op(">"), &Value::from("1000")));
        assert!(evaluate(&r, "value", &op(">="), &Value::from(" 1500 ")));
        assert!(!evaluate(&r, "value", &op("<"), &Value::Number(1500.0)));
        assert!(evaluate(&r, "value", &op("<="), &Value::Number(1500.0)));
    }

    #[test]
    fn failed_coercion_is_a_non_match() {
        let r = row();
        assert!(!evaluate(&r, "value", &op(">"), &Value::from("lots")));
        assert!(try_evaluate(&r, "value", &op(">"), &Value::from("lots")).is_err());
    }

    #[test]
    fn equality_does_not_coerce() {
        let r = row();
        assert!(evaluate(&r, "value", &op("=="), &Value::Number(1500.0)));
        assert!(!evaluate(&r, "value", &op("=="), &Value::from("1500")));
        assert!(evaluate(&r, "value", &op("!="), &Value::from("1500")));
    }

    #[test]
    fn string_operators_are_case_insensitive() {
        let r = row();
        assert!(evaluate(&r, "issuer", &op("CONTAINS"), &Value::from("holdings")));
        assert!(evaluate(&r, "issuer", &op("startswith"), &Value::from("ACME")));
        assert!(evaluate(&r, "issuer", &op("EndsWith"), &Value::from("HOLDINGS")));
        assert!(evaluate(&r, "value", &op("startswith"), &Value::from("15")));
    }

    #[test]
    fn unknown_operator_is_non_matching() {
        let r = row();
        assert!(!evaluate(&r, "value", &op("~="), &Value::Number(1.0)));
        assert!(matches!(
            try_evaluate(&r, "value", &op("~="), &Value::Number(1.0)),
            Err(ReportError::Evaluation(_))
        ));
    }
}
