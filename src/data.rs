use std::fmt;

use anyhow::{Context, Result};

/// A single attribute cell, shared by the tabular side and the DBF side.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Integral year label, accepting `2022`, `2022.0` and `"2022"`.
    pub fn as_year(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    String::new()
                } else if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// Narrowest type able to hold every non-missing value. An all-missing
    /// column infers as Integer.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
        let mut integer = true;
        let mut numeric = true;
        for value in values {
            match value {
                Value::Null => {}
                Value::Integer(_) => {}
                Value::Float(f) if f.is_nan() => {}
                Value::Float(_) => integer = false,
                Value::Text(_) => {
                    integer = false;
                    numeric = false;
                }
            }
        }
        if integer && numeric {
            ColumnType::Integer
        } else if numeric {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

pub fn is_missing_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "na" | "n/a" | "nan" | "null" | "none"
        )
}

pub fn parse_typed_value(raw: &str, ty: ColumnType) -> Result<Value> {
    if is_missing_token(raw) {
        return Ok(Value::Null);
    }
    let trimmed = raw.trim();
    let parsed = match ty {
        ColumnType::Text => Value::Text(raw.to_string()),
        ColumnType::Integer => Value::Integer(
            trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{raw}' as integer"))?,
        ),
        ColumnType::Float => Value::Float(
            trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{raw}' as float"))?,
        ),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_drops_fraction_of_integral_floats() {
        assert_eq!(Value::Float(3106200.0).as_display(), "3106200");
        assert_eq!(Value::Float(2.5).as_display(), "2.5");
        assert_eq!(Value::Null.as_display(), "");
        assert_eq!(Value::Float(f64::NAN).as_display(), "");
    }

    #[test]
    fn missing_tokens_parse_to_null() {
        for token in ["", "  ", "NA", "n/a", "NaN", "null", "None"] {
            assert_eq!(
                parse_typed_value(token, ColumnType::Integer).unwrap(),
                Value::Null
            );
        }
        assert!(parse_typed_value("abc", ColumnType::Integer).is_err());
    }

    #[test]
    fn infer_prefers_narrowest_type() {
        let ints = [Value::Integer(1), Value::Null];
        assert_eq!(ColumnType::infer(&ints), ColumnType::Integer);
        let floats = [Value::Integer(1), Value::Float(2.5)];
        assert_eq!(ColumnType::infer(&floats), ColumnType::Float);
        let text = [Value::Integer(1), Value::Text("x".into())];
        assert_eq!(ColumnType::infer(&text), ColumnType::Text);
        let missing = [Value::Null, Value::Null];
        assert_eq!(ColumnType::infer(&missing), ColumnType::Integer);
    }

    #[test]
    fn as_year_accepts_numeric_and_text_labels() {
        assert_eq!(Value::Integer(2022).as_year(), Some(2022));
        assert_eq!(Value::Float(2023.0).as_year(), Some(2023));
        assert_eq!(Value::Text(" 2024 ".into()).as_year(), Some(2024));
        assert_eq!(Value::Float(2023.5).as_year(), None);
        assert_eq!(Value::Null.as_year(), None);
    }
}
