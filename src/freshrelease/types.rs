use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Project a lookup is scoped to, by numeric ID or key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ProjectScope {
  Id(u64),
  Key(String),
}

impl ProjectScope {
  /// Parse a project identifier. Digits become an ID, anything else a key.
  /// Keys are upper-cased so "webapp" and "WEBAPP" share cache entries.
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if raw.is_empty() {
      return None;
    }
    Some(match parse_numeric(raw) {
      Some(id) => ProjectScope::Id(id),
      None => ProjectScope::Key(raw.to_uppercase()),
    })
  }

  /// Path segment used in API URLs
  pub fn path_segment(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for ProjectScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProjectScope::Id(id) => write!(f, "{}", id),
      ProjectScope::Key(key) => write!(f, "{}", key),
    }
  }
}

impl FromStr for ProjectScope {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ProjectScope::parse(s).ok_or_else(|| "project identifier is empty".to_string())
  }
}

/// Kind of entity a name can be resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  User,
  IssueType,
  Status,
  Sprint,
  Release,
  Tag,
  Subproject,
  Project,
  Issue,
}

/// Which cache holds resolved names for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
  /// Sprint, release, tag and subproject names
  Lookup,
  /// Everything else, including project keys
  Resolution,
}

impl EntityKind {
  pub const ALL: [EntityKind; 9] = [
    EntityKind::User,
    EntityKind::IssueType,
    EntityKind::Status,
    EntityKind::Sprint,
    EntityKind::Release,
    EntityKind::Tag,
    EntityKind::Subproject,
    EntityKind::Project,
    EntityKind::Issue,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      EntityKind::User => "user",
      EntityKind::IssueType => "issue type",
      EntityKind::Status => "status",
      EntityKind::Sprint => "sprint",
      EntityKind::Release => "release",
      EntityKind::Tag => "tag",
      EntityKind::Subproject => "subproject",
      EntityKind::Project => "project",
      EntityKind::Issue => "issue",
    }
  }

  /// Whether a textual key (e.g. "WEBAPP", "WEBAPP-12") is already canonical
  pub fn accepts_key(&self) -> bool {
    matches!(self, EntityKind::Issue | EntityKind::Project)
  }

  /// Whether the tracker guarantees name uniqueness within a project
  pub fn names_unique(&self) -> bool {
    matches!(
      self,
      EntityKind::IssueType | EntityKind::Status | EntityKind::Tag | EntityKind::Project
    )
  }

  /// Projects are listed account-wide; every other kind is per project
  pub fn is_project_scoped(&self) -> bool {
    !matches!(self, EntityKind::Project)
  }

  pub fn tier(&self) -> CacheTier {
    match self {
      EntityKind::Sprint | EntityKind::Release | EntityKind::Tag | EntityKind::Subproject => {
        CacheTier::Lookup
      }
      _ => CacheTier::Resolution,
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
      "user" | "users" | "owner" => Ok(EntityKind::User),
      "issue_type" | "issue_types" | "type" => Ok(EntityKind::IssueType),
      "status" | "statuses" => Ok(EntityKind::Status),
      "sprint" | "sprints" => Ok(EntityKind::Sprint),
      "release" | "releases" => Ok(EntityKind::Release),
      "tag" | "tags" => Ok(EntityKind::Tag),
      "subproject" | "sub_project" | "subprojects" | "sub_projects" => Ok(EntityKind::Subproject),
      "project" | "projects" => Ok(EntityKind::Project),
      "issue" | "issues" | "task" => Ok(EntityKind::Issue),
      _ => {
        let known: Vec<&str> = EntityKind::ALL.iter().map(EntityKind::label).collect();
        Err(format!(
          "unknown entity kind '{}' (expected one of: {})",
          s,
          known.join(", ")
        ))
      }
    }
  }
}

/// Canonical identifier returned by resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedId {
  Numeric(u64),
  /// Issue or project key passed through unchanged
  Key(String),
}

impl ResolvedId {
  pub fn to_json(&self) -> Value {
    match self {
      ResolvedId::Numeric(id) => Value::from(*id),
      ResolvedId::Key(key) => Value::from(key.as_str()),
    }
  }
}

impl fmt::Display for ResolvedId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResolvedId::Numeric(id) => write!(f, "{}", id),
      ResolvedId::Key(key) => f.write_str(key),
    }
  }
}

/// A reference to an entity as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
  NumericId(u64),
  /// Matches the key pattern of the kind it was parsed for
  TextualKey(String),
  /// Name, title or email
  DisplayName(String),
}

impl EntityRef {
  pub fn parse(kind: EntityKind, raw: &str) -> Self {
    let trimmed = raw.trim();
    if let Some(id) = parse_numeric(trimmed) {
      return EntityRef::NumericId(id);
    }
    match kind {
      EntityKind::Project if is_project_key(trimmed) => EntityRef::TextualKey(trimmed.to_string()),
      // Issue keys are case-insensitive: "webapp-12" is WEBAPP-12
      EntityKind::Issue if is_issue_key(&trimmed.to_uppercase()) => {
        EntityRef::TextualKey(trimmed.to_uppercase())
      }
      _ => EntityRef::DisplayName(trimmed.to_string()),
    }
  }

  /// Interpret a JSON scalar. Returns `None` for anything that cannot name
  /// an entity (negative or fractional numbers, objects, booleans).
  pub fn from_json(kind: EntityKind, value: &Value) -> Option<Self> {
    match value {
      Value::Number(n) => n.as_u64().map(EntityRef::NumericId),
      Value::String(s) => Some(EntityRef::parse(kind, s)),
      _ => None,
    }
  }
}

fn parse_numeric(s: &str) -> Option<u64> {
  if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  s.parse().ok()
}

fn is_project_key(s: &str) -> bool {
  let mut chars = s.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
    && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_issue_key(s: &str) -> bool {
  s.rsplit_once('-')
    .is_some_and(|(project, number)| is_project_key(project) && parse_numeric(number).is_some())
}

/// An entity as listed by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
  pub id: u64,
  /// Display name, or title for issues
  pub name: String,
  /// Users only
  pub email: Option<String>,
  /// Projects and issues only
  pub key: Option<String>,
}

/// A custom field from a project's form schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDef {
  /// Raw key; may or may not carry the `cf_` prefix
  pub key: String,
  pub label: String,
}

/// Test case section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
  pub id: u64,
  pub name: String,
  pub parent_id: Option<u64>,
}
