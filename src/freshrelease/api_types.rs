//! Serde-deserializable types matching Freshrelease API responses.
//!
//! These types are separate from domain types to allow lenient
//! deserialization (IDs as numbers or strings, names under several keys)
//! while keeping domain types focused on resolution.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

use super::types::{CustomFieldDef, Entity, EntityKind, ProjectScope, Section};

/// Decode a list of raw JSON items into typed records.
pub fn decode_all<T: DeserializeOwned>(items: Vec<Value>) -> serde_json::Result<Vec<T>> {
  items.into_iter().map(serde_json::from_value).collect()
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Number(u64),
    Text(String),
  }

  match RawId::deserialize(deserializer)? {
    RawId::Number(n) => Ok(n),
    RawId::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
  }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  struct Wrapper(#[serde(deserialize_with = "id_from_number_or_string")] u64);

  Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|Wrapper(id)| id))
}

// ============================================================================
// Endpoints
// ============================================================================

/// Path and collection name for listing entities of a kind.
///
/// List endpoints either return a bare array or wrap it in an object under
/// the collection name.
pub fn list_endpoint(scope: &ProjectScope, kind: EntityKind) -> (String, &'static str) {
  let project = scope.path_segment();
  match kind {
    EntityKind::User => (format!("/{}/users", project), "users"),
    EntityKind::IssueType => (format!("/{}/project_issue_types", project), "issue_types"),
    EntityKind::Status => (format!("/{}/statuses", project), "statuses"),
    EntityKind::Sprint => (format!("/{}/sprints", project), "sprints"),
    EntityKind::Release => (format!("/{}/releases", project), "releases"),
    EntityKind::Tag => (format!("/{}/tags", project), "tags"),
    EntityKind::Subproject => (format!("/{}/sub_projects", project), "sub_projects"),
    EntityKind::Project => ("/projects".to_string(), "projects"),
    EntityKind::Issue => (format!("/{}/issues", project), "issues"),
  }
}

/// Pull the item array out of a list response.
pub fn extract_collection(body: Value, collection: &str) -> Option<Vec<Value>> {
  match body {
    Value::Array(items) => Some(items),
    Value::Object(mut map) => match map.remove(collection) {
      Some(Value::Array(items)) => Some(items),
      _ => None,
    },
    _ => None,
  }
}

/// Unwrap a single-record response (`{"issue": {...}}` or the bare record).
pub fn extract_record(body: Value, record: &str) -> Value {
  match body {
    Value::Object(mut map) => match map.remove(record) {
      Some(inner @ Value::Object(_)) => inner,
      Some(other) => {
        map.insert(record.to_string(), other);
        Value::Object(map)
      }
      None => Value::Object(map),
    },
    other => other,
  }
}

/// Pull form fields out of a form response (`{"form": {"fields": [...]}}`,
/// `{"fields": [...]}` or a bare array).
pub fn extract_form_fields(body: Value) -> Option<Vec<Value>> {
  match body {
    Value::Object(mut map) => match map.remove("form") {
      Some(form) => extract_collection(form, "fields"),
      None => extract_collection(Value::Object(map), "fields"),
    },
    other => extract_collection(other, "fields"),
  }
}

/// Page number of the `rel="next"` link in a `Link` header.
pub fn next_page(link_header: &str) -> Option<u32> {
  link_header.split(',').find_map(|link| {
    let (target, params) = link.split_once(';')?;
    if !params.contains("rel=\"next\"") {
      return None;
    }
    let url = target.trim().trim_start_matches('<').trim_end_matches('>');
    let (_, query) = url.split_once('?')?;
    query
      .split('&')
      .find_map(|pair| pair.strip_prefix("page="))
      .and_then(|page| page.parse().ok())
  })
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiEntity {
  #[serde(deserialize_with = "id_from_number_or_string")]
  pub id: u64,
  pub name: Option<String>,
  pub title: Option<String>,
  pub key: Option<String>,
  pub email: Option<String>,
}

impl ApiEntity {
  pub fn into_entity(self) -> Entity {
    Entity {
      id: self.id,
      name: self.name.or(self.title).unwrap_or_default(),
      email: self.email.filter(|e| !e.is_empty()),
      key: self.key.filter(|k| !k.is_empty()),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiFormField {
  #[serde(alias = "key")]
  pub name: String,
  #[serde(default)]
  pub label: String,
  pub custom: Option<bool>,
}

impl ApiFormField {
  /// Custom fields are flagged explicitly or recognizable by their prefix.
  pub fn into_custom_field(self) -> Option<CustomFieldDef> {
    let is_custom = self.custom.unwrap_or_else(|| self.name.starts_with("cf_"));
    is_custom.then(|| CustomFieldDef {
      label: if self.label.is_empty() {
        self.name.clone()
      } else {
        self.label
      },
      key: self.name,
    })
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSection {
  #[serde(deserialize_with = "id_from_number_or_string")]
  pub id: u64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional_id")]
  pub parent_id: Option<u64>,
}

impl From<ApiSection> for Section {
  fn from(section: ApiSection) -> Self {
    Section {
      id: section.id,
      name: section.name,
      parent_id: section.parent_id,
    }
  }
}
