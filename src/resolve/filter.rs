//! Builds resolved, replayable filter queries.

use chrono::NaiveDate;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::freshrelease::gateway::Gateway;
use crate::freshrelease::types::{EntityKind, EntityRef, ProjectScope};

use super::error::ResolveError;
use super::fields::{FieldName, FieldRegistry, ValueType};
use super::parse::{condition_from_value, parse_query, Operator, RawCondition};
use super::resolver::Resolver;

/// One resolved condition of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: String,
  pub operator: Operator,
  pub value: Value,
}

/// A fully resolved filter, in canonical order.
///
/// Serializes as a JSON array of conditions, which `build` accepts back as
/// a query, so a saved filter can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryHash(Vec<Condition>);

impl QueryHash {
  pub fn conditions(&self) -> &[Condition] {
    &self.0
  }

  pub fn to_json(&self) -> Value {
    serde_json::to_value(&self.0).unwrap_or(Value::Null)
  }

  /// SHA-256 of the canonical JSON; equal for logically identical builds
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_json().to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Builds a [`QueryHash`] from a free-form query and individual fields.
pub struct FilterBuilder<'a, G: Gateway> {
  resolver: &'a Resolver<G>,
  registry: &'a FieldRegistry<G>,
}

impl<'a, G: Gateway> FilterBuilder<'a, G> {
  pub fn new(resolver: &'a Resolver<G>, registry: &'a FieldRegistry<G>) -> Self {
    Self { resolver, registry }
  }

  /// Build a filter.
  ///
  /// Conditions from `query` come first; an individual field replaces a
  /// query condition on the same field. Every value is resolved, then the
  /// result is ordered: standard fields in declared order, custom fields as
  /// first seen, unknown fields as first seen.
  pub async fn build(
    &self,
    scope: &ProjectScope,
    query: Option<&Value>,
    individual_fields: &BTreeMap<String, Value>,
  ) -> Result<QueryHash, ResolveError> {
    let mut raw = match query {
      Some(query) => parse_query(query)?,
      None => Vec::new(),
    };
    for (field, value) in individual_fields {
      if let Some(condition) = condition_from_value(field, value)? {
        raw.push(condition);
      }
    }

    // Merge by wire name so "Priority Level" and "cf_priority_level" collide
    let mut merged: Vec<(FieldName, RawCondition)> = Vec::new();
    for condition in raw {
      let name = self.registry.classify(scope, &condition.field).await?;
      match merged
        .iter_mut()
        .find(|(existing, _)| existing.wire_name() == name.wire_name())
      {
        Some(slot) => *slot = (name, condition),
        None => merged.push((name, condition)),
      }
    }

    let mut conditions = Vec::with_capacity(merged.len());
    for (name, condition) in &merged {
      let value = self
        .coerce(scope, name, &condition.value)
        .await
        .map_err(|e| e.for_field(name.wire_name()))?;
      conditions.push((
        name,
        Condition {
          field: name.wire_name().to_string(),
          operator: condition.operator,
          value,
        },
      ));
    }

    // Stable sort keeps first-seen order within custom and unknown fields
    conditions.sort_by_key(|(name, _)| match name {
      FieldName::Standard(i) => (0, *i),
      name if name.is_custom() => (1, 0),
      _ => (2, 0),
    });

    debug!("Built filter with {} conditions for {}", conditions.len(), scope);
    Ok(QueryHash(conditions.into_iter().map(|(_, c)| c).collect()))
  }

  async fn coerce(
    &self,
    scope: &ProjectScope,
    name: &FieldName,
    value: &Value,
  ) -> Result<Value, ResolveError> {
    match value {
      Value::Array(items) => {
        let resolved = try_join_all(
          items
            .iter()
            .map(|item| self.coerce_scalar(scope, name, item)),
        )
        .await?;
        Ok(Value::Array(resolved))
      }
      scalar => self.coerce_scalar(scope, name, scalar).await,
    }
  }

  async fn coerce_scalar(
    &self,
    scope: &ProjectScope,
    name: &FieldName,
    value: &Value,
  ) -> Result<Value, ResolveError> {
    match name.value_type() {
      ValueType::Entity(kind) => self.resolve_entity(scope, kind, name, value).await,
      ValueType::Date => coerce_date(name, value),
      ValueType::Number => coerce_number(name, value),
      ValueType::Text => Ok(value.clone()),
    }
  }

  async fn resolve_entity(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
    name: &FieldName,
    value: &Value,
  ) -> Result<Value, ResolveError> {
    let entity = EntityRef::from_json(kind, value).ok_or_else(|| {
      ResolveError::query_format(
        format!("{}:{}", name.wire_name(), value),
        format!("expected a {} ID or name", kind),
      )
    })?;
    let id = self.resolver.resolve_numeric(scope, kind, &entity).await?;
    Ok(Value::from(id))
  }
}

fn coerce_date(name: &FieldName, value: &Value) -> Result<Value, ResolveError> {
  let text = value.as_str().map(str::trim).unwrap_or_default();
  NaiveDate::parse_from_str(text, "%Y-%m-%d")
    .map(|date| Value::from(date.format("%Y-%m-%d").to_string()))
    .map_err(|_| {
      ResolveError::query_format(
        format!("{}:{}", name.wire_name(), value),
        "expected a date as YYYY-MM-DD",
      )
    })
}

fn coerce_number(name: &FieldName, value: &Value) -> Result<Value, ResolveError> {
  let invalid = || {
    ResolveError::query_format(
      format!("{}:{}", name.wire_name(), value),
      "expected a number",
    )
  };

  match value {
    Value::Number(_) => Ok(value.clone()),
    Value::String(text) => {
      let text = text.trim();
      if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
      }
      text
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(invalid)
    }
    _ => Err(invalid()),
  }
}
