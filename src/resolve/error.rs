use thiserror::Error;

use crate::freshrelease::gateway::GatewayError;
use crate::freshrelease::types::EntityKind;

use super::index::Candidate;

/// Errors surfaced by the resolution engine.
///
/// None of them leave a cache entry behind; a caller may retry once the
/// entity exists upstream.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("no {kind} matching '{value}' in {scope}{}", field_suffix(.field))]
  Resolution {
    scope: String,
    kind: EntityKind,
    value: String,
    field: Option<String>,
  },

  #[error(
    "'{value}' matches several {kind} entries in {scope}{}: {}",
    field_suffix(.field),
    describe(.candidates)
  )]
  Ambiguous {
    scope: String,
    kind: EntityKind,
    value: String,
    field: Option<String>,
    candidates: Vec<Candidate>,
  },

  #[error("invalid query fragment '{fragment}': {reason}")]
  QueryFormat { fragment: String, reason: String },

  #[error("no project given and no default project configured (set FRESHRELEASE_PROJECT_KEY)")]
  MissingProject,

  #[error(transparent)]
  Gateway(#[from] GatewayError),
}

impl ResolveError {
  pub fn query_format(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
    ResolveError::QueryFormat {
      fragment: fragment.into(),
      reason: reason.into(),
    }
  }

  /// Attach the filter field whose value failed to resolve.
  pub fn for_field(self, name: &str) -> Self {
    match self {
      ResolveError::Resolution {
        scope, kind, value, ..
      } => ResolveError::Resolution {
        scope,
        kind,
        value,
        field: Some(name.to_string()),
      },
      ResolveError::Ambiguous {
        scope,
        kind,
        value,
        candidates,
        ..
      } => ResolveError::Ambiguous {
        scope,
        kind,
        value,
        field: Some(name.to_string()),
        candidates,
      },
      other => other,
    }
  }
}

fn field_suffix(field: &Option<String>) -> String {
  field
    .as_ref()
    .map(|f| format!(" (field {})", f))
    .unwrap_or_default()
}

fn describe(candidates: &[Candidate]) -> String {
  candidates
    .iter()
    .map(|c| format!("{} (id {})", c.name, c.id))
    .collect::<Vec<_>>()
    .join(", ")
}
