use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args as ClapArgs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Profile, Subscription};
use crate::store::{FileStore, KvStore, StoreError, DATA_KEY};

#[derive(ClapArgs, Debug, Clone)]
pub struct RemoveArgs {
  /// Directory holding the key-value store files.
  #[arg(long, default_value = "data")]
  pub store_dir: PathBuf,

  /// Id of the subscription or manual node to delete.
  #[arg(long)]
  pub id: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
  #[error("duplicate record id: {0}")]
  DuplicateId(String),
  #[error("duplicate profile id: {0}")]
  DuplicateProfileId(String),
  #[error("duplicate profile customId: {0}")]
  DuplicateCustomId(String),
  #[error("profile customId may only contain [A-Za-z0-9_-]: {0:?}")]
  InvalidCustomId(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Subscriptions, manual nodes and the profiles grouping them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
  #[serde(default)]
  pub misubs: Vec<Subscription>,
  #[serde(default)]
  pub profiles: Vec<Profile>,
}

/// Typed records of a JSON array; entries that do not parse are logged and
/// dropped so one bad record cannot hide the others.
fn parse_records<T: DeserializeOwned>(kind: &str, value: Option<JsonValue>) -> Vec<T> {
  let items = match value {
    Some(JsonValue::Array(items)) => items,
    Some(JsonValue::Null) | None => return Vec::new(),
    Some(other) => {
      warn!(kind, found = %other, "expected an array of records, ignoring");
      return Vec::new();
    }
  };
  items
    .into_iter()
    .enumerate()
    .filter_map(|(idx, item)| match serde_json::from_value(item) {
      Ok(record) => Some(record),
      Err(err) => {
        warn!(kind, index = idx, %err, "skipping unreadable record");
        None
      }
    })
    .collect()
}

fn valid_custom_id(s: &str) -> bool {
  !s.is_empty()
    && s
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

impl Catalog {
  pub async fn load(store: &dyn KvStore) -> Result<Self, StoreError> {
    let Some(value) = store.get(DATA_KEY).await? else {
      return Ok(Self::default());
    };
    // A bare array is the legacy document holding only subscriptions.
    let (misubs, profiles) = match value {
      JsonValue::Object(mut doc) => (doc.remove("misubs"), doc.remove("profiles")),
      legacy @ JsonValue::Array(_) => (Some(legacy), None),
      other => {
        warn!(found = %other, "catalog document is not an object, treating as empty");
        (None, None)
      }
    };
    Ok(Self {
      misubs: parse_records("misub", misubs),
      profiles: parse_records("profile", profiles),
    })
  }

  pub async fn save(&self, store: &dyn KvStore) -> Result<(), CatalogError> {
    self.validate()?;
    store
      .put(DATA_KEY, serde_json::to_value(self).map_err(StoreError::from)?)
      .await?;
    Ok(())
  }

  pub fn validate(&self) -> Result<(), CatalogError> {
    let mut ids = HashSet::new();
    for record in &self.misubs {
      if !ids.insert(record.id.as_str()) {
        return Err(CatalogError::DuplicateId(record.id.clone()));
      }
    }
    let mut profile_ids = HashSet::new();
    let mut custom_ids = HashSet::new();
    for profile in &self.profiles {
      if !profile_ids.insert(profile.id.as_str()) {
        return Err(CatalogError::DuplicateProfileId(profile.id.clone()));
      }
      if let Some(custom) = profile.custom_id.as_deref().filter(|c| !c.is_empty()) {
        if !valid_custom_id(custom) {
          return Err(CatalogError::InvalidCustomId(custom.to_string()));
        }
        if !custom_ids.insert(custom) {
          return Err(CatalogError::DuplicateCustomId(custom.to_string()));
        }
      }
    }
    Ok(())
  }

  /// Looks a profile up by `customId` first, then by `id`.
  pub fn find_profile(&self, key: &str) -> Option<&Profile> {
    self
      .profiles
      .iter()
      .find(|p| p.custom_id.as_deref() == Some(key))
      .or_else(|| self.profiles.iter().find(|p| p.id == key))
  }

  /// Records referenced by `profile`, in catalog order.
  pub fn sources_for(&self, profile: &Profile) -> Vec<Subscription> {
    self
      .misubs
      .iter()
      .filter(|record| profile.references(&record.id))
      .cloned()
      .collect()
  }

  pub fn upsert_record(&mut self, record: Subscription) {
    match self.misubs.iter_mut().find(|r| r.id == record.id) {
      Some(existing) => *existing = record,
      None => self.misubs.push(record),
    }
  }

  /// Deletes a record and prunes every profile reference to it.
  pub fn remove_record(&mut self, id: &str) -> bool {
    let before = self.misubs.len();
    self.misubs.retain(|r| r.id != id);
    let removed = self.misubs.len() != before;
    for profile in &mut self.profiles {
      profile.subscriptions.retain(|r| r != id);
      profile.manual_nodes.retain(|r| r != id);
    }
    removed
  }
}

pub async fn run_remove(args: RemoveArgs) -> Result<()> {
  let store = FileStore::new(&args.store_dir);
  let mut catalog = Catalog::load(&store)
    .await
    .with_context(|| format!("load catalog from {}", args.store_dir.display()))?;
  if !catalog.remove_record(&args.id) {
    bail!("no subscription or manual node with id {:?}", args.id);
  }
  catalog.save(&store).await.context("save catalog")?;
  info!(id = %args.id, "record removed and profile references pruned");
  Ok(())
}
