//! Ordered coercion of the raw AGI header block into typed call variables.
//!
//! Stages run in a fixed order because later ones read what earlier ones
//! produce: the query decomposition needs the parsed `request` URI, and the
//! type-of-number lookup needs `callingtns` already turned into an integer.
//! Running [`CoercionPipeline::apply`] on its own output yields the same map.
use super::variables::{from_raw, NumericalString, PhoneNumber, TypeOfNumber, Value, Variables};
use crate::error::CoercionError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_KEY_PREFIX: &str = "agi_";

pub const EXTENSION: &str = "extension";
pub const UNIQUEID: &str = "uniqueid";
pub const REQUEST: &str = "request";
pub const QUERY: &str = "query";
pub const CONTEXT: &str = "context";
pub const CALLING_TNS: &str = "callingtns";
pub const TYPE_OF_CALLING_NUMBER: &str = "type_of_calling_number";

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").unwrap());

/// Maps numeric type-of-number codes to their symbolic form.
pub trait TypeOfNumberLookup: Send + Sync {
    fn lookup(&self, code: i64) -> TypeOfNumber;
}

/// ITU-T Q.931 table. Unassigned codes map to `Unknown`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Q931TypeOfNumber;

impl TypeOfNumberLookup for Q931TypeOfNumber {
    fn lookup(&self, code: i64) -> TypeOfNumber {
        match code {
            1 => TypeOfNumber::International,
            2 => TypeOfNumber::National,
            3 => TypeOfNumber::NetworkSpecific,
            4 => TypeOfNumber::Subscriber,
            6 => TypeOfNumber::Abbreviated,
            _ => TypeOfNumber::Unknown,
        }
    }
}

#[derive(Clone)]
pub struct CoercionPipeline {
    key_prefix: String,
    type_of_number: Arc<dyn TypeOfNumberLookup>,
}

impl Default for CoercionPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl CoercionPipeline {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            type_of_number: Arc::new(Q931TypeOfNumber),
        }
    }

    pub fn with_type_of_number_lookup(mut self, lookup: Arc<dyn TypeOfNumberLookup>) -> Self {
        self.type_of_number = lookup;
        self
    }

    pub fn coerce(&self, raw: HashMap<String, String>) -> Result<Variables, CoercionError> {
        self.apply(from_raw(raw))
    }

    pub fn apply(&self, variables: Variables) -> Result<Variables, CoercionError> {
        let variables = strip_prefix_and_trim(variables, &self.key_prefix);
        let variables = symbolize_keys(variables);
        let variables = coerce_extension(variables);
        let variables = coerce_numerics(variables);
        let variables = nullify_unknowns(variables);
        let variables = booleanize(variables);
        let variables = parse_request_uri(variables)?;
        let variables = decompose_query(variables);
        let variables = merge_query(variables);
        let variables = normalize_context(variables);
        Ok(lookup_type_of_number(
            variables,
            self.type_of_number.as_ref(),
        ))
    }
}

/// Canonical key form used throughout the variable map.
pub fn symbolize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

pub fn strip_prefix_and_trim(variables: Variables, prefix: &str) -> Variables {
    variables
        .into_iter()
        .map(|(key, value)| {
            let key = match key.strip_prefix(prefix) {
                Some(name) if !name.is_empty() && !prefix.is_empty() => name.to_string(),
                _ => key,
            };
            let value = match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other,
            };
            (key, value)
        })
        .collect()
}

pub fn symbolize_keys(variables: Variables) -> Variables {
    variables
        .into_iter()
        .map(|(key, value)| (symbolize(&key), value))
        .collect()
}

pub fn coerce_extension(mut variables: Variables) -> Variables {
    if let Some(Value::String(s)) = variables.get(EXTENSION) {
        let number = PhoneNumber::new(s.as_str());
        variables.insert(EXTENSION.to_string(), Value::PhoneNumber(number));
    }
    variables
}

fn coerce_numeric(key: &str, value: Value) -> Value {
    let text = match value {
        Value::String(ref s) if key != UNIQUEID && NUMERIC.is_match(s) => s,
        other => return other,
    };
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.starts_with('0') && digits != "0" {
        return Value::NumericalString(NumericalString::new(text.as_str()));
    }
    if digits.contains('.') {
        return match text.parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(_) => value,
        };
    }
    match text.parse::<i64>() {
        Ok(i) => Value::Integer(i),
        // too wide for an integer, keep the digits
        Err(_) => Value::NumericalString(NumericalString::new(text.as_str())),
    }
}

fn nullify_unknown(value: Value) -> Value {
    match value {
        Value::String(s) if s == "unknown" => Value::Null,
        other => other,
    }
}

fn booleanize_value(value: Value) -> Value {
    match value {
        Value::String(s) if s == "yes" => Value::Bool(true),
        Value::String(s) if s == "no" => Value::Bool(false),
        other => other,
    }
}

pub fn coerce_numerics(variables: Variables) -> Variables {
    variables
        .into_iter()
        .map(|(key, value)| {
            let value = coerce_numeric(&key, value);
            (key, value)
        })
        .collect()
}

pub fn nullify_unknowns(variables: Variables) -> Variables {
    variables
        .into_iter()
        .map(|(key, value)| (key, nullify_unknown(value)))
        .collect()
}

pub fn booleanize(variables: Variables) -> Variables {
    variables
        .into_iter()
        .map(|(key, value)| (key, booleanize_value(value)))
        .collect()
}

pub fn parse_request_uri(mut variables: Variables) -> Result<Variables, CoercionError> {
    let uri = match variables.get(REQUEST) {
        None | Some(Value::Null) | Some(Value::Uri(_)) => return Ok(variables),
        Some(Value::String(s)) => Url::parse(s).map_err(|source| CoercionError::InvalidUri {
            value: s.clone(),
            source,
        })?,
        Some(other) => return Err(CoercionError::NotAUri(other.to_string())),
    };
    variables.insert(REQUEST.to_string(), Value::Uri(uri));
    Ok(variables)
}

pub fn decompose_query(mut variables: Variables) -> Variables {
    let query = match variables.get(REQUEST) {
        Some(Value::Uri(uri)) => uri.query().map(split_query).unwrap_or_default(),
        _ => HashMap::new(),
    };
    variables.insert(QUERY.to_string(), Value::Map(query));
    variables
}

fn split_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Query parameters land as plain strings. `request` and `query` belong to
/// the pipeline itself and are never overwritten from the query.
pub fn merge_query(mut variables: Variables) -> Variables {
    let params = match variables.get(QUERY) {
        Some(Value::Map(params)) => params.clone(),
        _ => return variables,
    };
    for (key, value) in params {
        let key = symbolize(&key);
        if key == REQUEST || key == QUERY {
            continue;
        }
        variables.insert(key, Value::String(value));
    }
    variables
}

/// Absent context is left alone; meta calls from some switches omit it.
pub fn normalize_context(mut variables: Variables) -> Variables {
    if let Some(Value::String(context)) = variables.get_mut(CONTEXT) {
        *context = context.replace('-', "_");
    }
    variables
}

pub fn lookup_type_of_number(
    mut variables: Variables,
    table: &dyn TypeOfNumberLookup,
) -> Variables {
    if let Some(raw) = variables.remove(CALLING_TNS) {
        let kind = raw
            .as_i64()
            .map(|code| table.lookup(code))
            .unwrap_or(TypeOfNumber::Unknown);
        variables.insert(
            TYPE_OF_CALLING_NUMBER.to_string(),
            Value::TypeOfNumber(kind),
        );
    }
    variables
}
