//! Name → ID index built from one gateway listing.

use serde::Serialize;
use std::collections::HashMap;

use crate::freshrelease::types::Entity;

/// An entity that matched a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
  pub id: u64,
  pub name: String,
}

/// Outcome of looking a name up in an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
  Found(u64),
  Ambiguous(Vec<Candidate>),
  Missing,
}

impl Match {
  pub fn is_missing(&self) -> bool {
    matches!(self, Match::Missing)
  }
}

/// Case-insensitive, trimmed form used for every comparison
pub fn normalize(name: &str) -> String {
  name.trim().to_lowercase()
}

/// Every entity of one kind in one project, indexed by normalized email
/// and by normalized name/key.
#[derive(Debug, Default)]
pub struct NameIndex {
  by_email: HashMap<String, Vec<Candidate>>,
  by_name: HashMap<String, Vec<Candidate>>,
}

impl NameIndex {
  pub fn build(entities: &[Entity]) -> Self {
    let mut index = NameIndex::default();

    for entity in entities {
      let candidate = Candidate {
        id: entity.id,
        name: entity.name.clone(),
      };
      if let Some(email) = &entity.email {
        push_unique(&mut index.by_email, normalize(email), candidate.clone());
      }
      if let Some(key) = &entity.key {
        push_unique(&mut index.by_name, normalize(key), candidate.clone());
      }
      if !entity.name.trim().is_empty() {
        push_unique(&mut index.by_name, normalize(&entity.name), candidate);
      }
    }

    index
  }

  /// Look up an already normalized name.
  ///
  /// An exact email match wins over any name match. Several distinct
  /// entities under one name are ambiguous unless `names_unique`, in which
  /// case the first listed wins.
  pub fn lookup(&self, needle: &str, names_unique: bool) -> Match {
    if let Some(found) = self.by_email.get(needle) {
      // Emails identify one account; duplicates mean the listing is suspect
      return pick(found, false);
    }
    match self.by_name.get(needle) {
      Some(found) => pick(found, names_unique),
      None => Match::Missing,
    }
  }

  pub fn len(&self) -> usize {
    self.by_name.len() + self.by_email.len()
  }
}

fn push_unique(map: &mut HashMap<String, Vec<Candidate>>, key: String, candidate: Candidate) {
  let entry = map.entry(key).or_default();
  if !entry.iter().any(|c| c.id == candidate.id) {
    entry.push(candidate);
  }
}

fn pick(candidates: &[Candidate], first_wins: bool) -> Match {
  match candidates {
    [] => Match::Missing,
    [only] => Match::Found(only.id),
    [first, ..] if first_wins => Match::Found(first.id),
    many => Match::Ambiguous(many.to_vec()),
  }
}
