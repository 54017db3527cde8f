//! Name resolution and filter construction for Freshrelease.
//!
//! The [`Engine`] owns every cache and is meant to live as long as the
//! process: a CLI invocation or a `serve` session.

mod error;
mod fields;
mod filter;
mod index;
mod parse;
mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ResolveError;
pub use fields::{CustomField, FieldName};
pub use filter::QueryHash;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::freshrelease::gateway::Gateway;
use crate::freshrelease::types::{EntityKind, EntityRef, ProjectScope, ResolvedId};

use fields::FieldRegistry;
use filter::FilterBuilder;
use resolver::Resolver;

/// Which cache a clear applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
  CustomFields,
  /// Sprint, release, tag and subproject names
  Lookup,
  /// Project keys, issue keys and every other entity kind
  Resolution,
  All,
}

impl fmt::Display for CacheScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CacheScope::CustomFields => "custom_fields",
      CacheScope::Lookup => "lookup",
      CacheScope::Resolution => "resolution",
      CacheScope::All => "all",
    };
    f.write_str(name)
  }
}

impl FromStr for CacheScope {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().replace('-', "_").as_str() {
      "custom_fields" | "fields" => Ok(CacheScope::CustomFields),
      "lookup" => Ok(CacheScope::Lookup),
      "resolution" => Ok(CacheScope::Resolution),
      "all" => Ok(CacheScope::All),
      other => Err(format!(
        "unknown cache '{}' (expected custom_fields, lookup, resolution or all)",
        other
      )),
    }
  }
}

/// Populated partitions per cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub custom_fields: usize,
  pub lookup: usize,
  pub resolution: usize,
}

/// Outcome of a clear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cleared {
  pub scope: CacheScope,
  pub partitions: usize,
}

pub struct Engine<G: Gateway> {
  resolver: Resolver<G>,
  registry: FieldRegistry<G>,
  default_project: Option<ProjectScope>,
}

impl<G: Gateway> Engine<G> {
  pub fn new(gateway: Arc<G>, default_project: Option<ProjectScope>) -> Self {
    Self {
      resolver: Resolver::new(Arc::clone(&gateway)),
      registry: FieldRegistry::new(gateway),
      default_project,
    }
  }

  /// The explicit scope, else the configured default
  pub fn scope(&self, explicit: Option<&ProjectScope>) -> Result<ProjectScope, ResolveError> {
    explicit
      .or(self.default_project.as_ref())
      .cloned()
      .ok_or(ResolveError::MissingProject)
  }

  /// Resolve a JSON scalar (number or string) to the ID the API expects.
  pub async fn resolve(
    &self,
    scope: Option<&ProjectScope>,
    kind: EntityKind,
    value: &Value,
  ) -> Result<ResolvedId, ResolveError> {
    let scope = self.scope(scope)?;
    let entity = EntityRef::from_json(kind, value).ok_or_else(|| {
      ResolveError::query_format(value.to_string(), format!("expected a {} ID or name", kind))
    })?;
    self.resolver.resolve(&scope, kind, &entity).await
  }

  pub async fn project_id(&self, scope: Option<&ProjectScope>) -> Result<u64, ResolveError> {
    let scope = self.scope(scope)?;
    self.resolver.project_id(&scope).await
  }

  /// Numeric ID of an issue key such as "WEBAPP-12"
  pub async fn issue_id(&self, scope: Option<&ProjectScope>, key: &str) -> Result<u64, ResolveError> {
    let scope = self.scope(scope)?;
    self.resolver.issue_id(&scope, key).await
  }

  pub async fn classify(
    &self,
    scope: Option<&ProjectScope>,
    field: &str,
  ) -> Result<FieldName, ResolveError> {
    let scope = self.scope(scope)?;
    self.registry.classify(&scope, field).await
  }

  pub async fn custom_fields(
    &self,
    scope: Option<&ProjectScope>,
  ) -> Result<Vec<CustomField>, ResolveError> {
    let scope = self.scope(scope)?;
    Ok(self.registry.custom_fields(&scope).await?.fields().to_vec())
  }

  /// Build a resolved filter. See [`FilterBuilder::build`] for precedence
  /// and ordering.
  pub async fn build_filter(
    &self,
    scope: Option<&ProjectScope>,
    query: Option<&Value>,
    individual_fields: &BTreeMap<String, Value>,
  ) -> Result<QueryHash, ResolveError> {
    let scope = self.scope(scope)?;
    FilterBuilder::new(&self.resolver, &self.registry)
      .build(&scope, query, individual_fields)
      .await
  }

  pub async fn resolve_section_path(
    &self,
    scope: Option<&ProjectScope>,
    path: &str,
  ) -> Result<Vec<u64>, ResolveError> {
    let scope = self.scope(scope)?;
    self.resolver.resolve_section_path(&scope, path).await
  }

  /// Empty one cache, or all of them. Fetches already running when this is
  /// called finish normally but do not repopulate the cleared cache.
  pub fn clear_cache(&self, scope: CacheScope) -> Cleared {
    let partitions = match scope {
      CacheScope::CustomFields => self.registry.clear(),
      CacheScope::Lookup => self.resolver.clear_lookup(),
      CacheScope::Resolution => self.resolver.clear_resolution(),
      CacheScope::All => {
        self.registry.clear() + self.resolver.clear_lookup() + self.resolver.clear_resolution()
      }
    };
    info!("Cleared {} cache ({} partitions)", scope, partitions);
    Cleared { scope, partitions }
  }

  pub fn stats(&self) -> CacheStats {
    let (lookup, resolution) = self.resolver.partition_counts();
    CacheStats {
      custom_fields: self.registry.partition_count(),
      lookup,
      resolution,
    }
  }
}
