//! In-memory gateway that records every call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::freshrelease::gateway::{Gateway, GatewayError};
use crate::freshrelease::types::{CustomFieldDef, Entity, EntityKind, ProjectScope, Section};

pub fn named(id: u64, name: &str) -> Entity {
  Entity {
    id,
    name: name.to_string(),
    email: None,
    key: None,
  }
}

pub fn user(id: u64, name: &str, email: &str) -> Entity {
  Entity {
    id,
    name: name.to_string(),
    email: Some(email.to_string()),
    key: None,
  }
}

pub fn issue(id: u64, key: &str, title: &str) -> Entity {
  Entity {
    id,
    name: title.to_string(),
    email: None,
    key: Some(key.to_string()),
  }
}

pub fn project(id: u64, key: &str, name: &str) -> Entity {
  Entity {
    id,
    name: name.to_string(),
    email: None,
    key: Some(key.to_string()),
  }
}

pub fn custom_field(key: &str, label: &str) -> CustomFieldDef {
  CustomFieldDef {
    key: key.to_string(),
    label: label.to_string(),
  }
}

/// Lets a test hold a listing open while it does something else
#[derive(Default)]
pub struct Pause {
  pub entered: Notify,
  pub release: Notify,
}

#[derive(Default)]
pub struct FakeGateway {
  entities: Mutex<HashMap<EntityKind, Vec<Entity>>>,
  fields: Mutex<Vec<CustomFieldDef>>,
  sections: Vec<Section>,
  listings: Mutex<HashMap<EntityKind, usize>>,
  field_fetches: AtomicUsize,
  issue_fetches: AtomicUsize,
  section_fetches: AtomicUsize,
  fail_next: AtomicBool,
  delay: Option<Duration>,
  pause: Option<Arc<Pause>>,
}

impl FakeGateway {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, kind: EntityKind, entities: Vec<Entity>) -> Self {
    self
      .entities
      .lock()
      .unwrap()
      .entry(kind)
      .or_default()
      .extend(entities);
    self
  }

  pub fn with_fields(self, fields: Vec<CustomFieldDef>) -> Self {
    self.fields.lock().unwrap().extend(fields);
    self
  }

  pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
    self.sections = sections;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn with_pause(mut self, pause: Arc<Pause>) -> Self {
    self.pause = Some(pause);
    self
  }

  /// Simulate an entity created upstream after the first listing
  pub fn add(&self, kind: EntityKind, entity: Entity) {
    self
      .entities
      .lock()
      .unwrap()
      .entry(kind)
      .or_default()
      .push(entity);
  }

  pub fn add_field(&self, field: CustomFieldDef) {
    self.fields.lock().unwrap().push(field);
  }

  /// Make the next gateway call fail with HTTP 503
  pub fn fail_next(&self) {
    self.fail_next.store(true, Ordering::SeqCst);
  }

  pub fn listings(&self, kind: EntityKind) -> usize {
    self
      .listings
      .lock()
      .unwrap()
      .get(&kind)
      .copied()
      .unwrap_or(0)
  }

  pub fn field_fetches(&self) -> usize {
    self.field_fetches.load(Ordering::SeqCst)
  }

  pub fn issue_fetches(&self) -> usize {
    self.issue_fetches.load(Ordering::SeqCst)
  }

  pub fn total_calls(&self) -> usize {
    let listings: usize = self.listings.lock().unwrap().values().sum();
    listings
      + self.field_fetches()
      + self.issue_fetches()
      + self.section_fetches.load(Ordering::SeqCst)
  }

  async fn before_call(&self, url: &str) -> Result<(), GatewayError> {
    if let Some(pause) = &self.pause {
      pause.entered.notify_one();
      pause.release.notified().await;
    }
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_next.swap(false, Ordering::SeqCst) {
      return Err(GatewayError::Status {
        url: url.to_string(),
        status: 503,
        body: "unavailable".to_string(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl Gateway for FakeGateway {
  async fn list_entities(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
  ) -> Result<Vec<Entity>, GatewayError> {
    *self.listings.lock().unwrap().entry(kind).or_default() += 1;
    self
      .before_call(&format!("/{}/{}", scope, kind.label()))
      .await?;
    Ok(
      self
        .entities
        .lock()
        .unwrap()
        .get(&kind)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn issue_by_key(
    &self,
    scope: &ProjectScope,
    key: &str,
  ) -> Result<Option<Entity>, GatewayError> {
    self.issue_fetches.fetch_add(1, Ordering::SeqCst);
    self
      .before_call(&format!("/{}/issues/{}", scope, key))
      .await?;
    Ok(
      self
        .entities
        .lock()
        .unwrap()
        .get(&EntityKind::Issue)
        .and_then(|issues| {
          issues
            .iter()
            .find(|issue| issue.key.as_deref() == Some(key))
            .cloned()
        }),
    )
  }

  async fn custom_fields(&self, scope: &ProjectScope) -> Result<Vec<CustomFieldDef>, GatewayError> {
    self.field_fetches.fetch_add(1, Ordering::SeqCst);
    self
      .before_call(&format!("/{}/issues/form", scope))
      .await?;
    Ok(self.fields.lock().unwrap().clone())
  }

  async fn sections(&self, scope: &ProjectScope) -> Result<Vec<Section>, GatewayError> {
    self.section_fetches.fetch_add(1, Ordering::SeqCst);
    self.before_call(&format!("/{}/sections", scope)).await?;
    Ok(self.sections.clone())
  }
}
