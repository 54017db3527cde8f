//! JSON-lines request loop used by agent tool servers.
//!
//! One request per line on stdin, one response per line on stdout:
//!
//! ```text
//! {"op":"resolve","project":"WEBAPP","kind":"sprint","value":"Sprint 1"}
//! {"ok":true,"result":1}
//! ```

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::freshrelease::gateway::Gateway;
use crate::freshrelease::types::{EntityKind, ProjectScope};
use crate::resolve::{CacheScope, Engine, FieldName, QueryHash, ResolveError};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
  Resolve {
    project: Option<String>,
    kind: EntityKind,
    value: Value,
  },
  ProjectId {
    project: Option<String>,
  },
  IssueId {
    project: Option<String>,
    key: String,
  },
  Classify {
    project: Option<String>,
    field: String,
  },
  CustomFields {
    project: Option<String>,
  },
  BuildFilter {
    project: Option<String>,
    query: Option<Value>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
  },
  Sections {
    project: Option<String>,
    path: String,
  },
  ClearCache {
    scope: CacheScope,
  },
  CacheStats,
}

#[derive(Debug, Serialize)]
pub struct Response {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub kind: &'static str,
  pub message: String,
}

impl Response {
  fn success(result: Value) -> Self {
    Self {
      ok: true,
      result: Some(result),
      error: None,
    }
  }

  fn failure(kind: &'static str, message: impl Into<String>) -> Self {
    Self {
      ok: false,
      result: None,
      error: Some(ErrorBody {
        kind,
        message: message.into(),
      }),
    }
  }
}

impl From<ResolveError> for Response {
  fn from(err: ResolveError) -> Self {
    let kind = match &err {
      ResolveError::Resolution { .. } => "resolution",
      ResolveError::Ambiguous { .. } => "ambiguous",
      ResolveError::QueryFormat { .. } => "query_format",
      ResolveError::MissingProject => "missing_project",
      ResolveError::Gateway(_) => "gateway",
    };
    Response::failure(kind, err.to_string())
  }
}

/// JSON shape of a classified field name
pub fn describe_field(field: &FieldName) -> Value {
  let class = if field.is_standard() {
    "standard"
  } else if field.is_custom() {
    "custom"
  } else {
    "unknown"
  };
  json!({ "field": field.wire_name(), "class": class })
}

/// JSON shape of a built filter
pub fn describe_filter(hash: &QueryHash) -> Value {
  json!({
    "query_hash": hash,
    "conditions": hash.conditions().len(),
    "fingerprint": hash.fingerprint(),
  })
}

fn scope_of(project: Option<String>) -> Option<ProjectScope> {
  project.as_deref().and_then(ProjectScope::parse)
}

/// Run one request against the engine
pub async fn handle<G: Gateway>(engine: &Engine<G>, request: Request) -> Response {
  let result = match request {
    Request::Resolve {
      project,
      kind,
      value,
    } => engine
      .resolve(scope_of(project).as_ref(), kind, &value)
      .await
      .map(|id| id.to_json()),
    Request::ProjectId { project } => engine
      .project_id(scope_of(project).as_ref())
      .await
      .map(Value::from),
    Request::IssueId { project, key } => engine
      .issue_id(scope_of(project).as_ref(), &key)
      .await
      .map(Value::from),
    Request::Classify { project, field } => engine
      .classify(scope_of(project).as_ref(), &field)
      .await
      .map(|name| describe_field(&name)),
    Request::CustomFields { project } => engine
      .custom_fields(scope_of(project).as_ref())
      .await
      .map(|fields| json!(fields)),
    Request::BuildFilter {
      project,
      query,
      fields,
    } => engine
      .build_filter(scope_of(project).as_ref(), query.as_ref(), &fields)
      .await
      .map(|hash| describe_filter(&hash)),
    Request::Sections { project, path } => engine
      .resolve_section_path(scope_of(project).as_ref(), &path)
      .await
      .map(|ids| json!(ids)),
    Request::ClearCache { scope } => Ok(json!(engine.clear_cache(scope))),
    Request::CacheStats => Ok(json!(engine.stats())),
  };

  match result {
    Ok(value) => Response::success(value),
    Err(err) => {
      debug!("Request failed: {}", err);
      err.into()
    }
  }
}

/// Serve requests from stdin until it closes
pub async fn serve<G: Gateway>(engine: &Engine<G>) -> Result<()> {
  let stdin = BufReader::new(tokio::io::stdin());
  let stdout = tokio::io::stdout();
  serve_lines(engine, stdin, stdout).await
}

async fn serve_lines<G, R, W>(engine: &Engine<G>, reader: R, mut writer: W) -> Result<()>
where
  G: Gateway,
  R: AsyncBufRead + Unpin,
  W: AsyncWrite + Unpin,
{
  info!("Serving JSON-line requests");
  let mut lines = reader.lines();
  let mut handled = 0usize;

  while let Some(line) = lines.next_line().await? {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }

    let response = match serde_json::from_str::<Request>(line) {
      Ok(request) => handle(engine, request).await,
      Err(e) => {
        warn!("Malformed request: {}", e);
        Response::failure("request", format!("malformed request: {}", e))
      }
    };

    let mut out = serde_json::to_vec(&response)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await?;
    handled += 1;
  }

  info!("Input closed after {} requests", handled);
  Ok(())
}
