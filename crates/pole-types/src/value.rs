use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar carried by a SQL literal or a document field.
///
/// Integers and floats are kept apart so that an integer renders without a
/// fractional part: the display form of a value is what becomes a document
/// identifier or an indexed text term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// The numeric interpretation used by numeric fields. Non-numeric text
    /// decays to `0.0`, mirroring lossy numeric coercion in the catalog's
    /// field construction.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Integer(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s.parse().unwrap_or(0.0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_integers_integral() {
        assert_eq!(Value::Integer(1).to_string(), "1");
        assert_eq!(Value::Float(42.5).to_string(), "42.5");
        assert_eq!(Value::Text("hello".into()).to_string(), "hello");
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Integer(30).as_f64(), 30.0);
        assert_eq!(Value::Text("12.5".into()).as_f64(), 12.5);
        assert_eq!(Value::Text("nope".into()).as_f64(), 0.0);
    }
}
