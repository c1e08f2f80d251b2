use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;

pub type Variables = HashMap<String, Value>;

/// A numeric-looking string whose text is significant, e.g. `"007"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericalString(String);

impl NumericalString {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for NumericalString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dialed or presented number, kept exactly as the switch sent it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ISN (freenum) form: `extension*itad`.
    pub fn is_isn(&self) -> bool {
        match self.0.split_once('*') {
            Some((ext, itad)) => is_digits(ext) && is_digits(itad),
            None => false,
        }
    }

    pub fn is_local_number(&self) -> bool {
        self.0.len() == 7 && is_digits(&self.0)
    }

    pub fn is_national_number(&self) -> bool {
        self.0.len() == 10 && is_digits(&self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Q.931 type of number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeOfNumber {
    Unknown,
    International,
    National,
    NetworkSpecific,
    Subscriber,
    Abbreviated,
}

impl TypeOfNumber {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeOfNumber::Unknown => "unknown",
            TypeOfNumber::International => "international",
            TypeOfNumber::National => "national",
            TypeOfNumber::NetworkSpecific => "network_specific",
            TypeOfNumber::Subscriber => "subscriber",
            TypeOfNumber::Abbreviated => "abbreviated",
        }
    }
}

impl fmt::Display for TypeOfNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    PhoneNumber(PhoneNumber),
    NumericalString(NumericalString),
    Uri(Url),
    Map(HashMap<String, String>),
    TypeOfNumber(TypeOfNumber),
}

impl Value {
    /// Textual view of string-like values. Numbers, booleans, null and maps
    /// return `None`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::PhoneNumber(n) => Some(n.as_str()),
            Value::NumericalString(n) => Some(n.as_str()),
            Value::Uri(u) => Some(u.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::NumericalString(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => Ok(()),
            Value::PhoneNumber(n) => write!(f, "{}", n),
            Value::NumericalString(n) => write!(f, "{}", n),
            Value::Uri(u) => f.write_str(u.as_str()),
            Value::Map(m) => {
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort();
                let joined = pairs
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&");
                f.write_str(&joined)
            }
            Value::TypeOfNumber(t) => write!(f, "{}", t),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Lifts a raw header mapping into untyped variables, ready for the pipeline.
pub fn from_raw(raw: HashMap<String, String>) -> Variables {
    raw.into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}
