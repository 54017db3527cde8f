use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheLayer, CacheSource};
use crate::freshrelease::gateway::Gateway;
use crate::freshrelease::types::{
  CacheTier, EntityKind, EntityRef, ProjectScope, ResolvedId, Section,
};

use super::error::ResolveError;
use super::index::{normalize, Match, NameIndex};

/// Cache partition for one kind of entity in one project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
  /// `None` for kinds listed account-wide
  scope: Option<ProjectScope>,
  kind: EntityKind,
}

impl PartitionKey {
  pub fn new(scope: &ProjectScope, kind: EntityKind) -> Self {
    Self {
      scope: kind.is_project_scoped().then(|| scope.clone()),
      kind,
    }
  }
}

impl CacheKey for PartitionKey {
  fn description(&self) -> String {
    match &self.scope {
      Some(scope) => format!("{} names in {}", self.kind, scope),
      None => format!("{} names", self.kind),
    }
  }
}

/// Cache entry for one issue key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
  scope: ProjectScope,
  key: String,
}

impl CacheKey for IssueKey {
  fn description(&self) -> String {
    format!("issue {} in {}", self.key, self.scope)
  }
}

/// Resolves human-readable references to canonical IDs.
///
/// Sprint, release, tag and subproject names live in the lookup cache;
/// every other kind (including project and issue keys) lives in the
/// resolution cache, so each can be cleared independently.
pub struct Resolver<G: Gateway> {
  gateway: Arc<G>,
  lookup: CacheLayer<PartitionKey, NameIndex>,
  resolution: CacheLayer<PartitionKey, NameIndex>,
  /// Issue key to ID; cleared along with `resolution`
  issues: CacheLayer<IssueKey, u64>,
}

impl<G: Gateway> Resolver<G> {
  pub fn new(gateway: Arc<G>) -> Self {
    Self {
      gateway,
      lookup: CacheLayer::new(),
      resolution: CacheLayer::new(),
      issues: CacheLayer::new(),
    }
  }

  fn cache(&self, kind: EntityKind) -> &CacheLayer<PartitionKey, NameIndex> {
    match kind.tier() {
      CacheTier::Lookup => &self.lookup,
      CacheTier::Resolution => &self.resolution,
    }
  }

  /// Resolve a reference to the ID the API expects.
  ///
  /// Numeric IDs (and issue/project keys) are returned as-is without any
  /// cache or gateway access.
  pub async fn resolve(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
    value: &EntityRef,
  ) -> Result<ResolvedId, ResolveError> {
    let name = match value {
      EntityRef::NumericId(id) => return Ok(ResolvedId::Numeric(*id)),
      EntityRef::TextualKey(key) if kind.accepts_key() => return Ok(ResolvedId::Key(key.clone())),
      EntityRef::TextualKey(name) | EntityRef::DisplayName(name) => name,
    };

    self
      .lookup_name(scope, kind, name)
      .await
      .map(ResolvedId::Numeric)
  }

  /// Numeric ID of a project, resolving keys through the resolution cache.
  pub async fn project_id(&self, scope: &ProjectScope) -> Result<u64, ResolveError> {
    match scope {
      ProjectScope::Id(id) => Ok(*id),
      ProjectScope::Key(key) => self.lookup_name(scope, EntityKind::Project, key).await,
    }
  }

  /// Numeric ID of an issue key such as "WEBAPP-12", fetched once per key.
  /// An unknown key is never cached.
  pub async fn issue_id(&self, scope: &ProjectScope, key: &str) -> Result<u64, ResolveError> {
    let key = key.trim().to_uppercase();
    let partition = IssueKey {
      scope: scope.clone(),
      key: key.clone(),
    };
    let key = key.as_str();

    let result = self
      .issues
      .fetch_partition(
        &partition,
        |_| true,
        || async move {
          let issue = self.gateway.issue_by_key(scope, key).await?;
          let id = issue
            .map(|issue| issue.id)
            .ok_or_else(|| ResolveError::Resolution {
              scope: scope.to_string(),
              kind: EntityKind::Issue,
              value: key.to_string(),
              field: None,
            })?;
          debug!("Issue {} in {} is {}", key, scope, id);
          Ok::<_, ResolveError>(id)
        },
      )
      .await?;

    Ok(*result.data)
  }

  /// Resolve to a numeric ID. Project and issue keys, which
  /// [`resolve`](Self::resolve) passes through, are looked up as well.
  pub async fn resolve_numeric(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
    value: &EntityRef,
  ) -> Result<u64, ResolveError> {
    match self.resolve(scope, kind, value).await? {
      ResolvedId::Numeric(id) => Ok(id),
      ResolvedId::Key(key) if kind == EntityKind::Project => {
        self.project_id(&ProjectScope::Key(key)).await
      }
      ResolvedId::Key(key) => self.issue_id(scope, &key).await,
    }
  }

  async fn lookup_name(
    &self,
    scope: &ProjectScope,
    kind: EntityKind,
    name: &str,
  ) -> Result<u64, ResolveError> {
    let needle = normalize(name);
    let unique = kind.names_unique();
    let key = PartitionKey::new(scope, kind);

    let not_found = || ResolveError::Resolution {
      scope: key.description(),
      kind,
      value: name.to_string(),
      field: None,
    };

    if needle.is_empty() {
      return Err(not_found());
    }

    // A cached partition answers unless the name is missing from it; a miss
    // refetches, since the name may have been created since. Ambiguity is
    // fully decided by the cached listing.
    let result = self
      .cache(kind)
      .fetch_partition(
        &key,
        |index| !index.lookup(&needle, unique).is_missing(),
        || async move {
          let entities = self.gateway.list_entities(scope, kind).await?;
          let index = NameIndex::build(&entities);
          info!(
            "Indexed {} {} entities ({} names) for {}",
            entities.len(),
            kind,
            index.len(),
            scope
          );
          Ok::<_, ResolveError>(index)
        },
      )
      .await?;

    match result.data.lookup(&needle, unique) {
      Match::Found(id) => {
        if result.source == CacheSource::Cache {
          debug!("Resolved {} '{}' -> {} from cache", kind, name, id);
        }
        Ok(id)
      }
      Match::Ambiguous(candidates) => Err(ResolveError::Ambiguous {
        scope: key.description(),
        kind,
        value: name.to_string(),
        field: None,
        candidates,
      }),
      Match::Missing => Err(not_found()),
    }
  }

  /// Resolve a section path like "Checkout > Payments > Cards" to the IDs
  /// of every section at the last level whose ancestry matches the path.
  ///
  /// Sections are listed on every call; they are not cached.
  pub async fn resolve_section_path(
    &self,
    scope: &ProjectScope,
    path: &str,
  ) -> Result<Vec<u64>, ResolveError> {
    let parts: Vec<String> = path.split('>').map(normalize).collect();
    if parts.iter().all(|p| p.is_empty()) {
      return Ok(Vec::new());
    }
    if parts.iter().any(|p| p.is_empty()) {
      return Err(ResolveError::query_format(path, "empty section name in path"));
    }

    let sections = self.gateway.sections(scope).await?;
    Ok(find_section_path(&sections, &parts))
  }

  pub fn clear_lookup(&self) -> usize {
    self.lookup.clear()
  }

  pub fn clear_resolution(&self) -> usize {
    self.resolution.clear() + self.issues.clear()
  }

  pub fn partition_counts(&self) -> (usize, usize) {
    (
      self.lookup.partition_count(),
      self.resolution.partition_count() + self.issues.partition_count(),
    )
  }
}

fn find_section_path(sections: &[Section], parts: &[String]) -> Vec<u64> {
  let mut children: HashMap<Option<u64>, Vec<&Section>> = HashMap::new();
  for section in sections {
    children.entry(section.parent_id).or_default().push(section);
  }

  let mut level: Vec<&Section> = children.get(&None).cloned().unwrap_or_default();
  for (depth, part) in parts.iter().enumerate() {
    let matched: Vec<&Section> = level
      .into_iter()
      .filter(|s| normalize(&s.name) == *part)
      .collect();

    if depth + 1 == parts.len() {
      return matched.iter().map(|s| s.id).collect();
    }

    level = matched
      .iter()
      .flat_map(|s| children.get(&Some(s.id)).cloned().unwrap_or_default())
      .collect();
  }

  Vec::new()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resolve::testing::{issue, named, user, FakeGateway};

  fn webapp() -> ProjectScope {
    ProjectScope::Key("WEBAPP".to_string())
  }

  fn sprints() -> FakeGateway {
    FakeGateway::new().with(
      EntityKind::Sprint,
      vec![named(1, "Sprint 1"), named(2, "Sprint 2")],
    )
  }

  #[tokio::test]
  async fn test_one_listing_serves_every_name() {
    let gateway = Arc::new(sprints());
    let resolver = Resolver::new(Arc::clone(&gateway));

    let first = resolver
      .resolve(&webapp(), EntityKind::Sprint, &EntityRef::parse(EntityKind::Sprint, "Sprint 1"))
      .await
      .unwrap();
    let second = resolver
      .resolve(&webapp(), EntityKind::Sprint, &EntityRef::parse(EntityKind::Sprint, "sprint 2"))
      .await
      .unwrap();

    assert_eq!(first, ResolvedId::Numeric(1));
    assert_eq!(second, ResolvedId::Numeric(2));
    assert_eq!(gateway.listings(EntityKind::Sprint), 1);
  }

  #[tokio::test]
  async fn test_repeated_resolve_is_cache_hit() {
    let gateway = Arc::new(sprints());
    let resolver = Resolver::new(Arc::clone(&gateway));
    let value = EntityRef::DisplayName("Sprint 1".to_string());

    for _ in 0..2 {
      resolver
        .resolve(&webapp(), EntityKind::Sprint, &value)
        .await
        .unwrap();
    }

    assert_eq!(gateway.listings(EntityKind::Sprint), 1);
  }

  #[tokio::test]
  async fn test_numeric_fast_path_skips_gateway() {
    let gateway = Arc::new(FakeGateway::new());
    let resolver = Resolver::new(Arc::clone(&gateway));

    let id = resolver
      .resolve(&webapp(), EntityKind::User, &EntityRef::parse(EntityKind::User, "12345"))
      .await
      .unwrap();

    assert_eq!(id, ResolvedId::Numeric(12345));
    assert_eq!(gateway.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_issue_key_passes_through() {
    let gateway = Arc::new(FakeGateway::new());
    let resolver = Resolver::new(Arc::clone(&gateway));

    let id = resolver
      .resolve(&webapp(), EntityKind::Issue, &EntityRef::parse(EntityKind::Issue, "WEBAPP-7"))
      .await
      .unwrap();

    assert_eq!(id, ResolvedId::Key("WEBAPP-7".to_string()));
    assert_eq!(gateway.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_no_negative_caching() {
    let gateway = Arc::new(sprints());
    let resolver = Resolver::new(Arc::clone(&gateway));
    let ghost = EntityRef::DisplayName("Ghost".to_string());

    let err = resolver
      .resolve(&webapp(), EntityKind::Sprint, &ghost)
      .await
      .unwrap_err();
    assert!(matches!(err, ResolveError::Resolution { .. }));

    gateway.add(EntityKind::Sprint, named(3, "Ghost"));

    let id = resolver
      .resolve(&webapp(), EntityKind::Sprint, &ghost)
      .await
      .unwrap();
    assert_eq!(id, ResolvedId::Numeric(3));
    assert_eq!(gateway.listings(EntityKind::Sprint), 2);
  }

  #[tokio::test]
  async fn test_user_email_preferred_over_name() {
    let gateway = Arc::new(FakeGateway::new().with(
      EntityKind::User,
      vec![
        user(10, "sam@example.com", "samuel@example.com"),
        user(11, "Sam Smith", "sam@example.com"),
      ],
    ));
    let resolver = Resolver::new(gateway);

    let id = resolver
      .resolve(
        &webapp(),
        EntityKind::User,
        &EntityRef::DisplayName("SAM@example.com".to_string()),
      )
      .await
      .unwrap();

    assert_eq!(id, ResolvedId::Numeric(11));
  }

  #[tokio::test]
  async fn test_duplicate_user_names_are_ambiguous() {
    let gateway = Arc::new(FakeGateway::new().with(
      EntityKind::User,
      vec![
        user(1, "Alex Kim", "alex.kim@example.com"),
        user(2, "Alex Kim", "akim@example.com"),
      ],
    ));
    let resolver = Resolver::new(gateway);

    let err = resolver
      .resolve(
        &webapp(),
        EntityKind::User,
        &EntityRef::DisplayName("alex kim".to_string()),
      )
      .await
      .unwrap_err();

    match err {
      ResolveError::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
      other => panic!("expected ambiguity, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_repeated_ambiguous_resolve_uses_cache() {
    let gateway = Arc::new(FakeGateway::new().with(
      EntityKind::User,
      vec![
        user(1, "Alex Kim", "alex.kim@example.com"),
        user(2, "Alex Kim", "akim@example.com"),
      ],
    ));
    let resolver = Resolver::new(Arc::clone(&gateway));
    let value = EntityRef::DisplayName("Alex Kim".to_string());

    for _ in 0..2 {
      let err = resolver
        .resolve(&webapp(), EntityKind::User, &value)
        .await
        .unwrap_err();
      assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    assert_eq!(gateway.listings(EntityKind::User), 1);
  }

  #[tokio::test]
  async fn test_scopes_do_not_share_entries() {
    let gateway = Arc::new(sprints());
    let resolver = Resolver::new(Arc::clone(&gateway));
    let value = EntityRef::DisplayName("Sprint 1".to_string());

    resolver
      .resolve(&webapp(), EntityKind::Sprint, &value)
      .await
      .unwrap();
    resolver
      .resolve(&ProjectScope::Key("MOBILE".to_string()), EntityKind::Sprint, &value)
      .await
      .unwrap();

    assert_eq!(gateway.listings(EntityKind::Sprint), 2);
  }

  #[tokio::test]
  async fn test_gateway_failure_leaves_cache_empty() {
    let gateway = Arc::new(sprints());
    let resolver = Resolver::new(Arc::clone(&gateway));
    let value = EntityRef::DisplayName("Sprint 1".to_string());

    gateway.fail_next();
    let err = resolver
      .resolve(&webapp(), EntityKind::Sprint, &value)
      .await
      .unwrap_err();
    assert!(matches!(err, ResolveError::Gateway(_)));
    assert_eq!(resolver.partition_counts(), (0, 0));

    resolver
      .resolve(&webapp(), EntityKind::Sprint, &value)
      .await
      .unwrap();
    assert_eq!(resolver.partition_counts(), (1, 0));
  }

  #[tokio::test]
  async fn test_concurrent_resolves_share_one_listing() {
    let gateway = Arc::new(sprints().with_delay(std::time::Duration::from_millis(20)));
    let resolver = Resolver::new(Arc::clone(&gateway));
    let one = EntityRef::DisplayName("Sprint 1".to_string());
    let two = EntityRef::DisplayName("Sprint 2".to_string());
    let scope = webapp();

    let (a, b) = tokio::join!(
      resolver.resolve(&scope, EntityKind::Sprint, &one),
      resolver.resolve(&scope, EntityKind::Sprint, &two),
    );

    assert_eq!(a.unwrap(), ResolvedId::Numeric(1));
    assert_eq!(b.unwrap(), ResolvedId::Numeric(2));
    assert_eq!(gateway.listings(EntityKind::Sprint), 1);
  }

  #[tokio::test]
  async fn test_project_key_to_id() {
    let gateway = Arc::new(FakeGateway::new().with(
      EntityKind::Project,
      vec![crate::freshrelease::types::Entity {
        id: 77,
        name: "Web App".to_string(),
        email: None,
        key: Some("WEBAPP".to_string()),
      }],
    ));
    let resolver = Resolver::new(Arc::clone(&gateway));

    assert_eq!(resolver.project_id(&webapp()).await.unwrap(), 77);
    assert_eq!(resolver.project_id(&webapp()).await.unwrap(), 77);
    assert_eq!(resolver.project_id(&ProjectScope::Id(5)).await.unwrap(), 5);
    assert_eq!(gateway.listings(EntityKind::Project), 1);
    assert_eq!(resolver.partition_counts(), (0, 1));
  }

  #[tokio::test]
  async fn test_issue_key_to_id() {
    let gateway = Arc::new(FakeGateway::new().with(
      EntityKind::Issue,
      vec![issue(501, "WEBAPP-12", "Login broken")],
    ));
    let resolver = Resolver::new(Arc::clone(&gateway));

    assert_eq!(resolver.issue_id(&webapp(), "WEBAPP-12").await.unwrap(), 501);
    assert_eq!(resolver.issue_id(&webapp(), "webapp-12").await.unwrap(), 501);
    assert_eq!(gateway.issue_fetches(), 1);
    assert_eq!(resolver.partition_counts(), (0, 1));

    let err = resolver.issue_id(&webapp(), "WEBAPP-99").await.unwrap_err();
    assert!(matches!(err, ResolveError::Resolution { .. }));
    assert_eq!(resolver.partition_counts(), (0, 1));

    assert_eq!(resolver.clear_resolution(), 1);
    resolver.issue_id(&webapp(), "WEBAPP-12").await.unwrap();
    assert_eq!(gateway.issue_fetches(), 3);
  }

  #[tokio::test]
  async fn test_resolve_numeric_looks_up_keys() {
    let gateway = Arc::new(
      FakeGateway::new()
        .with(EntityKind::Issue, vec![issue(501, "WEBAPP-12", "Login broken")])
        .with(
          EntityKind::Project,
          vec![crate::freshrelease::types::Entity {
            id: 77,
            name: "Web App".to_string(),
            email: None,
            key: Some("WEBAPP".to_string()),
          }],
        ),
    );
    let resolver = Resolver::new(Arc::clone(&gateway));

    let key = EntityRef::parse(EntityKind::Issue, "WEBAPP-12");
    assert_eq!(resolver.resolve(&webapp(), EntityKind::Issue, &key).await.unwrap(), ResolvedId::Key("WEBAPP-12".to_string()));
    assert_eq!(resolver.resolve_numeric(&webapp(), EntityKind::Issue, &key).await.unwrap(), 501);

    for raw in ["WEBAPP", "webapp", "77"] {
      let project = EntityRef::parse(EntityKind::Project, raw);
      assert_eq!(
        resolver
          .resolve_numeric(&webapp(), EntityKind::Project, &project)
          .await
          .unwrap(),
        77
      );
    }
  }

  #[tokio::test]
  async fn test_section_path() {
    let section = |id, name: &str, parent_id| Section {
      id,
      name: name.to_string(),
      parent_id,
    };
    let gateway = Arc::new(FakeGateway::new().with_sections(vec![
      section(1, "Checkout", None),
      section(2, "Payments", Some(1)),
      section(3, "Cards", Some(2)),
      section(4, "Payments", None),
      section(5, "Cards", Some(4)),
    ]));
    let resolver = Resolver::new(gateway);

    let ids = resolver
      .resolve_section_path(&webapp(), "checkout > payments > CARDS")
      .await
      .unwrap();
    assert_eq!(ids, vec![3]);

    let ids = resolver
      .resolve_section_path(&webapp(), "Payments")
      .await
      .unwrap();
    assert_eq!(ids, vec![4]);

    let ids = resolver.resolve_section_path(&webapp(), "  ").await.unwrap();
    assert!(ids.is_empty());

    assert!(resolver
      .resolve_section_path(&webapp(), "Checkout > > Cards")
      .await
      .is_err());
  }
}
