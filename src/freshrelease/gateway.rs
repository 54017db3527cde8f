//! Boundary between the resolution engine and the Freshrelease API.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{CustomFieldDef, Entity, EntityKind, ProjectScope, Section};

/// Errors raised by a gateway. The engine propagates them unchanged.
#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned HTTP {status}: {body}")]
  Status { url: String, status: u16, body: String },

  #[error("unexpected response from {url}: {reason}")]
  Decode { url: String, reason: String },
}

/// Source of the entities names are resolved against.
///
/// Every call returns the complete list for the scope; the engine caches
/// the result, so implementations should not cache themselves.
#[async_trait]
pub trait Gateway: Send + Sync {
  /// List every entity of `kind` in `scope`. For [`EntityKind::Project`]
  /// the scope is ignored and all projects are listed.
  async fn list_entities(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
  ) -> Result<Vec<Entity>, GatewayError>;

  /// Fetch one issue by key ("WEBAPP-12"). `None` when the project has no
  /// such issue.
  async fn issue_by_key(
    &self,
    scope: &ProjectScope,
    key: &str,
  ) -> Result<Option<Entity>, GatewayError>;

  /// Custom fields declared in the project's issue form
  async fn custom_fields(&self, scope: &ProjectScope) -> Result<Vec<CustomFieldDef>, GatewayError>;

  /// Test case sections of the project
  async fn sections(&self, scope: &ProjectScope) -> Result<Vec<Section>, GatewayError>;
}
