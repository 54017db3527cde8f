//! Parser for free-form filter queries.
//!
//! Accepted forms, all normalized to a list of [`RawCondition`]:
//! - text: `status_id:Open, owner_id:jane@example.com`
//! - text with operator: `status_id:is_not:Done`, `owner_id:is_in:Jane|Sam`
//! - JSON object: `{"status_id": "Open", "owner_id": {"operator": "is_not", "value": 3}}`
//! - JSON array (the shape of a built query): `[{"field": "status_id", "operator": "is", "value": 5}]`
//!
//! In the text form a comma only starts a new condition when the piece after
//! it has a colon, so `title:Fix, login` is one condition. A value that itself
//! contains `, x:` needs a JSON form.
//!
//! Text that starts with `{` or `[` is parsed as JSON. This module does no
//! resolution; field names and values come out exactly as written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::error::ResolveError;

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
  #[default]
  Is,
  IsNot,
  IsIn,
  IsNotIn,
  Contains,
  Gt,
  Gte,
  Lt,
  Lte,
  Between,
}

impl Operator {
  pub fn token(&self) -> &'static str {
    match self {
      Operator::Is => "is",
      Operator::IsNot => "is_not",
      Operator::IsIn => "is_in",
      Operator::IsNotIn => "is_not_in",
      Operator::Contains => "contains",
      Operator::Gt => "gt",
      Operator::Gte => "gte",
      Operator::Lt => "lt",
      Operator::Lte => "lte",
      Operator::Between => "between",
    }
  }

  /// Operators whose text-form value is a `|`-separated list
  fn takes_list(&self) -> bool {
    matches!(self, Operator::IsIn | Operator::IsNotIn | Operator::Between)
  }
}

impl fmt::Display for Operator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.token())
  }
}

impl FromStr for Operator {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "is" | "eq" | "=" => Ok(Operator::Is),
      "is_not" | "ne" | "!=" => Ok(Operator::IsNot),
      "is_in" | "in" => Ok(Operator::IsIn),
      "is_not_in" | "not_in" => Ok(Operator::IsNotIn),
      "contains" => Ok(Operator::Contains),
      "gt" | ">" => Ok(Operator::Gt),
      "gte" | ">=" => Ok(Operator::Gte),
      "lt" | "<" => Ok(Operator::Lt),
      "lte" | "<=" => Ok(Operator::Lte),
      "between" => Ok(Operator::Between),
      other => Err(format!("unknown operator '{}'", other)),
    }
  }
}

/// A condition before classification and resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RawCondition {
  pub field: String,
  pub operator: Operator,
  pub value: Value,
}

/// Parse a query given as a JSON value: strings use the text form, objects
/// and arrays the structured forms, `null` means no conditions.
pub fn parse_query(query: &Value) -> Result<Vec<RawCondition>, ResolveError> {
  match query {
    Value::Null => Ok(Vec::new()),
    Value::String(text) => parse_text(text),
    Value::Object(map) => parse_object(map),
    Value::Array(items) => items.iter().map(parse_record).collect(),
    other => Err(ResolveError::query_format(
      other.to_string(),
      "query must be a string, object or array",
    )),
  }
}

/// Parse the text form
pub fn parse_text(text: &str) -> Result<Vec<RawCondition>, ResolveError> {
  let trimmed = text.trim();
  if trimmed.starts_with('{') || trimmed.starts_with('[') {
    let value: Value = serde_json::from_str(trimmed)
      .map_err(|e| ResolveError::query_format(trimmed, format!("invalid JSON: {}", e)))?;
    return parse_query(&value);
  }

  split_fragments(trimmed)
    .iter()
    .map(|fragment| parse_fragment(fragment))
    .collect()
}

/// Split on commas, gluing a piece without a colon back onto the fragment
/// before it.
fn split_fragments(text: &str) -> Vec<String> {
  let mut fragments: Vec<String> = Vec::new();
  for piece in text.split(',') {
    let trimmed = piece.trim();
    if trimmed.is_empty() {
      continue;
    }
    match fragments.last_mut() {
      Some(last) if !trimmed.contains(':') => {
        last.push(',');
        last.push_str(piece.trim_end());
      }
      _ => fragments.push(trimmed.to_string()),
    }
  }
  fragments
}

fn parse_fragment(fragment: &str) -> Result<RawCondition, ResolveError> {
  let (field, rest) = fragment
    .split_once(':')
    .ok_or_else(|| ResolveError::query_format(fragment, "expected field:value"))?;

  let field = field.trim();
  if field.is_empty() {
    return Err(ResolveError::query_format(fragment, "missing field name"));
  }

  // "field:op:value" only when the middle part is a known operator, so
  // values may contain colons
  let (operator, value) = match rest.split_once(':') {
    Some((op, value)) => match op.parse::<Operator>() {
      Ok(operator) => (operator, value),
      Err(_) => (Operator::Is, rest),
    },
    None => (Operator::Is, rest),
  };

  let value = value.trim();
  if value.is_empty() {
    return Err(ResolveError::query_format(fragment, "missing value"));
  }

  let value = if operator.takes_list() {
    Value::Array(
      value
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Value::from)
        .collect(),
    )
  } else {
    Value::from(value)
  };

  Ok(RawCondition {
    field: field.to_string(),
    operator,
    value,
  })
}

fn parse_object(map: &Map<String, Value>) -> Result<Vec<RawCondition>, ResolveError> {
  let mut conditions = Vec::with_capacity(map.len());
  for (field, value) in map {
    if let Some(condition) = condition_from_value(field, value)? {
      conditions.push(condition);
    }
  }
  Ok(conditions)
}

/// `{"field": ..., "operator": ..., "value": ...}`; "condition" is accepted
/// for "field" as the filter API names it that way.
fn parse_record(record: &Value) -> Result<RawCondition, ResolveError> {
  let map = record
    .as_object()
    .ok_or_else(|| ResolveError::query_format(record.to_string(), "expected a condition object"))?;

  let field = map
    .get("field")
    .or_else(|| map.get("condition"))
    .and_then(Value::as_str)
    .ok_or_else(|| ResolveError::query_format(record.to_string(), "condition has no field"))?;

  let operator = match map.get("operator") {
    None | Some(Value::Null) => Operator::Is,
    Some(op) => parse_operator(op, record)?,
  };

  let value = map.get("value").cloned().unwrap_or(Value::Null);
  if value.is_null() {
    return Err(ResolveError::query_format(
      record.to_string(),
      "condition has no value",
    ));
  }

  Ok(RawCondition {
    field: field.to_string(),
    operator,
    value,
  })
}

fn parse_operator(op: &Value, context: &Value) -> Result<Operator, ResolveError> {
  op.as_str()
    .ok_or_else(|| "operator must be a string".to_string())
    .and_then(|op| op.parse::<Operator>())
    .map_err(|reason| ResolveError::query_format(context.to_string(), reason))
}

/// Turn one `field: value` pair into a condition. The value may be a bare
/// value or `{"operator": ..., "value": ...}`. Returns `None` for null.
pub fn condition_from_value(
  field: &str,
  value: &Value,
) -> Result<Option<RawCondition>, ResolveError> {
  if field.trim().is_empty() {
    return Err(ResolveError::query_format(
      value.to_string(),
      "missing field name",
    ));
  }

  let (operator, value) = match value {
    Value::Null => return Ok(None),
    Value::Object(map) if map.contains_key("value") => {
      let operator = match map.get("operator").or_else(|| map.get("op")) {
        None | Some(Value::Null) => Operator::Is,
        Some(op) => parse_operator(op, value)?,
      };
      (operator, map["value"].clone())
    }
    other => (Operator::Is, other.clone()),
  };

  if value.is_null() {
    return Ok(None);
  }

  Ok(Some(RawCondition {
    field: field.trim().to_string(),
    operator,
    value,
  }))
}
