use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, LINK};
use serde_json::Value;
use std::future::Future;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::freshrelease::api_types::{
  decode_all, extract_collection, extract_form_fields, extract_record, list_endpoint, next_page,
  ApiEntity, ApiFormField, ApiSection,
};
use crate::freshrelease::gateway::{Gateway, GatewayError};
use crate::freshrelease::types::{CustomFieldDef, Entity, EntityKind, ProjectScope, Section};

/// Upper bound on followed `rel="next"` links for one listing
const MAX_PAGES: u32 = 200;

/// Freshrelease API client
#[derive(Clone)]
pub struct FreshreleaseClient {
  http: reqwest::Client,
  base_url: Url,
}

impl FreshreleaseClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let domain = config.domain()?;

    let base_url = Url::parse(&format!("https://{}", domain))
      .map_err(|e| eyre!("Invalid Freshrelease domain '{}': {}", domain, e))?;

    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Token {}", api_key))
      .map_err(|e| eyre!("Invalid API key: {}", e))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  fn url(&self, path: &str, page: Option<u32>) -> Result<Url, GatewayError> {
    let mut url = self.base_url.join(path).map_err(|e| GatewayError::Decode {
      url: path.to_string(),
      reason: e.to_string(),
    })?;
    if let Some(page) = page {
      url.query_pairs_mut().append_pair("page", &page.to_string());
    }
    Ok(url)
  }

  /// GET a JSON document, returning it with the next page number if any
  async fn get_json(&self, url: Url) -> Result<(Value, Option<u32>), GatewayError> {
    let url_text = url.to_string();
    debug!("GET {}", url_text);

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|source| GatewayError::Http {
        url: url_text.clone(),
        source,
      })?;

    let status = response.status();
    let next = response
      .headers()
      .get(LINK)
      .and_then(|v| v.to_str().ok())
      .and_then(next_page);

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(GatewayError::Status {
        url: url_text,
        status: status.as_u16(),
        body,
      });
    }

    let body = response
      .json::<Value>()
      .await
      .map_err(|source| GatewayError::Http {
        url: url_text,
        source,
      })?;

    Ok((body, next))
  }

  /// Get every item of a paginated list endpoint
  async fn get_all(&self, path: &str, collection: &str) -> Result<Vec<Value>, GatewayError> {
    collect_pages(path, MAX_PAGES, |page| async move {
      let url = self.url(path, page)?;
      let url_text = url.to_string();
      let (body, next) = self.get_json(url).await?;

      let items = extract_collection(body, collection).ok_or_else(|| GatewayError::Decode {
        url: url_text,
        reason: format!("expected a list of {}", collection),
      })?;
      Ok((items, next))
    })
    .await
  }
}

/// Follow `next` pages until the last one.
///
/// A listing that still has a next page after `max_pages` is an error, never
/// a truncated result.
async fn collect_pages<F, Fut>(
  path: &str,
  max_pages: u32,
  mut fetch_page: F,
) -> Result<Vec<Value>, GatewayError>
where
  F: FnMut(Option<u32>) -> Fut,
  Fut: Future<Output = Result<(Vec<Value>, Option<u32>), GatewayError>>,
{
  let mut all_items = Vec::new();
  let mut page = None;

  for _ in 0..max_pages {
    let (items, next) = fetch_page(page).await?;
    all_items.extend(items);

    match next {
      // Guard against servers that echo the current page back
      Some(n) if Some(n) != page => page = Some(n),
      _ => return Ok(all_items),
    }
  }

  Err(GatewayError::Decode {
    url: path.to_string(),
    reason: format!("pagination exceeded {} pages", max_pages),
  })
}

fn decode_error(path: &str, e: serde_json::Error) -> GatewayError {
  GatewayError::Decode {
    url: path.to_string(),
    reason: e.to_string(),
  }
}

#[async_trait]
impl Gateway for FreshreleaseClient {
  async fn list_entities(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
  ) -> Result<Vec<Entity>, GatewayError> {
    let (path, collection) = list_endpoint(scope, kind);
    let items = self.get_all(&path, collection).await?;

    let entities = decode_all::<ApiEntity>(items)
      .map_err(|e| decode_error(&path, e))?
      .into_iter()
      .map(ApiEntity::into_entity)
      .collect();

    Ok(entities)
  }

  async fn issue_by_key(
    &self,
    scope: &ProjectScope,
    key: &str,
  ) -> Result<Option<Entity>, GatewayError> {
    let path = format!("/{}/issues/{}", scope.path_segment(), key);
    let url = self.url(&path, None)?;

    let body = match self.get_json(url).await {
      Ok((body, _)) => body,
      Err(GatewayError::Status { status: 404, .. }) => return Ok(None),
      Err(e) => return Err(e),
    };

    let issue = serde_json::from_value::<ApiEntity>(extract_record(body, "issue"))
      .map_err(|e| decode_error(&path, e))?;
    Ok(Some(issue.into_entity()))
  }

  async fn custom_fields(&self, scope: &ProjectScope) -> Result<Vec<CustomFieldDef>, GatewayError> {
    let path = format!("/{}/issues/form", scope.path_segment());
    let url = self.url(&path, None)?;
    let (body, _) = self.get_json(url).await?;

    let items = extract_form_fields(body).ok_or_else(|| GatewayError::Decode {
      url: path.clone(),
      reason: "expected form fields".to_string(),
    })?;

    let fields = decode_all::<ApiFormField>(items)
      .map_err(|e| decode_error(&path, e))?
      .into_iter()
      .filter_map(ApiFormField::into_custom_field)
      .collect();

    Ok(fields)
  }

  async fn sections(&self, scope: &ProjectScope) -> Result<Vec<Section>, GatewayError> {
    let path = format!("/{}/sections", scope.path_segment());
    let items = self.get_all(&path, "sections").await?;

    let sections = decode_all::<ApiSection>(items)
      .map_err(|e| decode_error(&path, e))?
      .into_iter()
      .map(Section::from)
      .collect();

    Ok(sections)
  }
}
