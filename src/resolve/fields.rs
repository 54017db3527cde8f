//! Standard field table and per-project custom field registry.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheKey, CacheLayer};
use crate::freshrelease::gateway::Gateway;
use crate::freshrelease::types::{CustomFieldDef, EntityKind, ProjectScope};

use super::error::ResolveError;

/// Wire prefix carried by every custom field key
pub const CUSTOM_PREFIX: &str = "cf_";

/// How a field's values are interpreted when building a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
  /// Resolved to an ID through the resolver
  Entity(EntityKind),
  /// YYYY-MM-DD
  Date,
  Number,
  /// Passed through unchanged
  Text,
}

/// Built-in fields, in the order they appear in a built query.
pub const STANDARD_FIELDS: [(&str, ValueType); 19] = [
  ("project_id", ValueType::Entity(EntityKind::Project)),
  ("issue_type_id", ValueType::Entity(EntityKind::IssueType)),
  ("status_id", ValueType::Entity(EntityKind::Status)),
  ("priority_id", ValueType::Number),
  ("owner_id", ValueType::Entity(EntityKind::User)),
  ("reporter_id", ValueType::Entity(EntityKind::User)),
  ("parent_id", ValueType::Entity(EntityKind::Issue)),
  ("epic_id", ValueType::Entity(EntityKind::Issue)),
  ("sprint_id", ValueType::Entity(EntityKind::Sprint)),
  ("release_id", ValueType::Entity(EntityKind::Release)),
  ("sub_project_id", ValueType::Entity(EntityKind::Subproject)),
  ("title", ValueType::Text),
  ("description", ValueType::Text),
  ("tags", ValueType::Text),
  ("story_points", ValueType::Number),
  ("start_date", ValueType::Date),
  ("due_by", ValueType::Date),
  ("created_at", ValueType::Date),
  ("updated_at", ValueType::Date),
];

fn standard_position(name: &str) -> Option<usize> {
  let name = name.trim().to_lowercase();
  STANDARD_FIELDS.iter().position(|(field, _)| *field == name)
}

/// A field name after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldName {
  /// Index into [`STANDARD_FIELDS`]
  Standard(usize),
  /// Registered custom field, already prefixed
  Custom(String),
  /// Neither standard nor known to the project; passed through as given
  Unknown(String),
}

impl FieldName {
  pub fn wire_name(&self) -> &str {
    match self {
      FieldName::Standard(i) => STANDARD_FIELDS[*i].0,
      FieldName::Custom(name) | FieldName::Unknown(name) => name,
    }
  }

  pub fn value_type(&self) -> ValueType {
    match self {
      FieldName::Standard(i) => STANDARD_FIELDS[*i].1,
      FieldName::Custom(_) | FieldName::Unknown(_) => ValueType::Text,
    }
  }

  pub fn is_standard(&self) -> bool {
    matches!(self, FieldName::Standard(_))
  }

  pub fn is_custom(&self) -> bool {
    matches!(self, FieldName::Custom(_))
  }
}

/// Normalize a field name or label for alias matching:
/// "Priority Level", "priority-level" and "priority_level" are equal.
fn alias_key(name: &str) -> String {
  name
    .trim()
    .to_lowercase()
    .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("_")
}

/// A custom field as registered for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomField {
  /// Key as sent on the wire, with prefix
  pub key: String,
  pub label: String,
}

/// Custom fields of one project and their aliases
#[derive(Debug, Default)]
pub struct FieldSet {
  fields: Vec<CustomField>,
  aliases: HashMap<String, usize>,
}

impl FieldSet {
  pub fn build(defs: &[CustomFieldDef]) -> Self {
    let mut set = FieldSet::default();

    for def in defs {
      let raw = def.key.trim();
      let bare = raw.strip_prefix(CUSTOM_PREFIX).unwrap_or(raw);
      if bare.is_empty() || standard_position(raw).is_some() {
        continue;
      }
      let key = format!("{}{}", CUSTOM_PREFIX, bare);
      if set.fields.iter().any(|f| f.key == key) {
        continue;
      }

      let position = set.fields.len();
      set.fields.push(CustomField {
        key: key.clone(),
        label: def.label.clone(),
      });

      // Keys take precedence over labels that happen to look alike
      for alias in [alias_key(&key), alias_key(bare)] {
        set.aliases.insert(alias, position);
      }
      if !def.label.trim().is_empty() {
        set.aliases.entry(alias_key(&def.label)).or_insert(position);
      }
    }

    set
  }

  /// Prefixed key of the custom field a name or label refers to
  pub fn find(&self, name: &str) -> Option<&str> {
    self
      .aliases
      .get(&alias_key(name))
      .map(|&i| self.fields[i].key.as_str())
  }

  pub fn fields(&self) -> &[CustomField] {
    &self.fields
  }
}

impl CacheKey for ProjectScope {
  fn description(&self) -> String {
    format!("custom fields of {}", self)
  }
}

/// Classifies field names as standard or custom, per project.
///
/// The form schema is fetched once per project and kept until cleared.
pub struct FieldRegistry<G: Gateway> {
  gateway: Arc<G>,
  cache: CacheLayer<ProjectScope, FieldSet>,
}

impl<G: Gateway> FieldRegistry<G> {
  pub fn new(gateway: Arc<G>) -> Self {
    Self {
      gateway,
      cache: CacheLayer::new(),
    }
  }

  /// Classify a field name. Standard names never touch the gateway.
  pub async fn classify(
    &self,
    scope: &ProjectScope,
    name: &str,
  ) -> Result<FieldName, ResolveError> {
    if let Some(i) = standard_position(name) {
      return Ok(FieldName::Standard(i));
    }

    let set = self.custom_fields(scope).await?;
    Ok(match set.find(name) {
      Some(key) => FieldName::Custom(key.to_string()),
      None => FieldName::Unknown(name.trim().to_string()),
    })
  }

  /// All custom fields registered for a project
  pub async fn custom_fields(&self, scope: &ProjectScope) -> Result<Arc<FieldSet>, ResolveError> {
    let result = self
      .cache
      .fetch_partition(
        scope,
        |_| true,
        || async move {
          let defs = self.gateway.custom_fields(scope).await?;
          let set = FieldSet::build(&defs);
          info!(
            "Registered {} custom fields for {}",
            set.fields().len(),
            scope
          );
          Ok::<_, ResolveError>(set)
        },
      )
      .await?;

    Ok(result.data)
  }

  pub fn clear(&self) -> usize {
    self.cache.clear()
  }

  pub fn partition_count(&self) -> usize {
    self.cache.partition_count()
  }
}
