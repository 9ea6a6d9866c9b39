//! Bind values shared by the validator, the dialects and the drivers

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use dynrest_common::types::ParamKind;

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, JsonValue>;

/// True for `[+-]?digits(.digits)?`
#[must_use]
pub fn is_numeric_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

/// A typed value handed to the database driver
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDateTime),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a driver-returned JSON value into a bind value
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            JsonValue::Bool(b) => Self::Integer(i64::from(*b)),
            other => Self::Text(other.to_string()),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            Self::Date(d) => JsonValue::String(d.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }

    /// Render as an inline SQL literal.
    ///
    /// Text and dates are quote-wrapped with embedded quotes doubled;
    /// numbers are written verbatim. Text that reads as a number is a number.
    #[must_use]
    pub fn to_literal(&self) -> String {
        self.render_literal(|s| s.replace('\'', "''"))
    }

    /// Like [`SqlValue::to_literal`], for engines where a backslash escapes
    /// inside string literals
    #[must_use]
    pub fn to_backslash_literal(&self) -> String {
        self.render_literal(|s| s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn render_literal(&self, escape: impl Fn(&str) -> String) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(s) if is_numeric_literal(s.trim()) => s.trim().to_string(),
            Self::Text(s) => format!("'{}'", escape(s)),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) if f.is_finite() => f.to_string(),
            Self::Float(_) => "NULL".to_string(),
            Self::Date(d) => format!("'{}'", d.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Declared type of an OUT parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutType {
    Text { max_len: usize },
    Number,
    Date,
}

impl OutType {
    /// Size used for text outputs whose length is not declared
    pub const DEFAULT_TEXT_LEN: usize = 4000;

    #[must_use]
    pub fn for_kind(kind: &ParamKind) -> Self {
        match kind {
            ParamKind::Number { .. } => Self::Number,
            ParamKind::Date { .. } => Self::Date,
            ParamKind::String {
                max_length: Some(len),
                ..
            } => Self::Text { max_len: *len },
            _ => Self::Text {
                max_len: Self::DEFAULT_TEXT_LEN,
            },
        }
    }

    /// Coerce a raw driver value to this declared type.
    ///
    /// Numeric text becomes a number for number outputs. Everything else
    /// keeps the type the driver returned.
    #[must_use]
    pub fn coerce(self, value: SqlValue) -> SqlValue {
        match (self, value) {
            (Self::Number, SqlValue::Text(text)) => {
                let trimmed = text.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    SqlValue::Integer(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    SqlValue::Float(f)
                } else {
                    SqlValue::Text(text)
                }
            }
            (_, value) => value,
        }
    }
}

/// A validated parameter ready for binding
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: SqlValue,
    /// Declared date template, kept for dialects that bind dates as text
    pub date_format: Option<String>,
}

impl BoundParam {
    pub fn new(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
            date_format: None,
        }
    }
}

/// Ordered set of bound parameters, unique by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindSet {
    params: Vec<BoundParam>,
}

impl BindSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter; an existing entry with the same name is replaced
    pub fn insert(&mut self, param: BoundParam) {
        if let Some(existing) = self.params.iter_mut().find(|p| p.name == param.name) {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoundParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Value bound under `name`, or SQL NULL when nothing was bound
    #[must_use]
    pub fn value_or_null(&self, name: &str) -> SqlValue {
        self.get(name).map_or(SqlValue::Null, |p| p.value.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundParam> {
        self.params.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_quotes_text() {
        assert_eq!(SqlValue::Text("O'Brien".into()).to_literal(), "'O''Brien'");
        assert_eq!(SqlValue::Integer(42).to_literal(), "42");
        assert_eq!(SqlValue::Null.to_literal(), "NULL");
    }

    #[test]
    fn test_number_output_coercion() {
        assert_eq!(
            OutType::Number.coerce(SqlValue::Text("42".into())),
            SqlValue::Integer(42)
        );
        assert_eq!(
            OutType::Number.coerce(SqlValue::Text("4.5".into())),
            SqlValue::Float(4.5)
        );
        assert_eq!(
            OutType::Text { max_len: 10 }.coerce(SqlValue::Integer(7)),
            SqlValue::Integer(7)
        );
    }

    #[test]
    fn test_numeric_text_is_inlined_bare() {
        assert_eq!(SqlValue::Text("42".into()).to_literal(), "42");
        assert_eq!(SqlValue::Text(" -1.5 ".into()).to_literal(), "-1.5");
        assert_eq!(SqlValue::Text("1e5".into()).to_literal(), "'1e5'");
        assert_eq!(SqlValue::Float(f64::NAN).to_literal(), "NULL");
    }

    #[test]
    fn test_backslash_literal_cannot_escape_its_quotes() {
        let value = SqlValue::Text("x\\".into());
        assert_eq!(value.to_literal(), "'x\\'");
        assert_eq!(value.to_backslash_literal(), "'x\\\\'");
        assert_eq!(
            SqlValue::Text("a\\' OR 1=1 --".into()).to_backslash_literal(),
            "'a\\\\'' OR 1=1 --'"
        );
    }

    #[test]
    fn test_numeric_grammar() {
        for good in ["0", "-3", "+7", "1.25"] {
            assert!(is_numeric_literal(good), "{good}");
        }
        for bad in ["", "1.", ".5", "1e5", "--1", "0x10", "4 2"] {
            assert!(!is_numeric_literal(bad), "{bad}");
        }
    }

    #[test]
    fn test_out_type_for_kind() {
        assert_eq!(
            OutType::for_kind(&ParamKind::unconstrained_string()),
            OutType::Text { max_len: 4000 }
        );
        assert_eq!(
            OutType::for_kind(&ParamKind::Number {
                minimum: None,
                maximum: None,
                precision: None
            }),
            OutType::Number
        );
    }

    #[test]
    fn test_bind_set_replaces_by_name() {
        let mut binds = BindSet::new();
        binds.insert(BoundParam::new("id", SqlValue::Integer(1)));
        binds.insert(BoundParam::new("id", SqlValue::Integer(2)));
        assert_eq!(binds.len(), 1);
        assert_eq!(binds.value_or_null("id"), SqlValue::Integer(2));
        assert_eq!(binds.value_or_null("missing"), SqlValue::Null);
    }
}
