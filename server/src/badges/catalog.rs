//! Badge catalog loading and the process-wide TTL cache.

use super::criteria::Criteria;
use crate::error::ServerError;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeDefinition {
    pub code: String,
    pub group_key: String,
    pub name: String,
    pub criteria: Criteria,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBadge {
    code: String,
    #[serde(default, alias = "group_key")]
    group_key: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    criteria: Value,
}

/// Parses a JSON array of catalog rows, keeping their order.
///
/// Rows whose criteria cannot be decoded are logged and left out; the rest
/// of the catalog still loads.
pub fn parse_catalog(raw: &str) -> Result<Vec<BadgeDefinition>, ServerError> {
    let rows: Vec<RawBadge> = serde_json::from_str(raw)?;
    let mut catalog = Vec::with_capacity(rows.len());

    for row in rows {
        match Criteria::from_value(&row.criteria) {
            Ok(criteria) => catalog.push(BadgeDefinition {
                code: row.code,
                group_key: row.group_key,
                name: row.name,
                criteria,
            }),
            Err(e) => warn!("Skipping badge {} with malformed criteria: {}", row.code, e),
        }
    }
    Ok(catalog)
}

/// Storage behind the catalog.
pub trait BadgeCatalogStore: Send {
    fn load(&mut self) -> Result<Vec<BadgeDefinition>, ServerError>;
}

impl<S: BadgeCatalogStore + ?Sized> BadgeCatalogStore for Box<S> {
    fn load(&mut self) -> Result<Vec<BadgeDefinition>, ServerError> {
        (**self).load()
    }
}

/// Fixed catalog held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogStore {
    badges: Vec<BadgeDefinition>,
}

impl StaticCatalogStore {
    pub fn new(badges: Vec<BadgeDefinition>) -> Self {
        Self { badges }
    }

    pub fn from_json(raw: &str) -> Result<Self, ServerError> {
        Ok(Self::new(parse_catalog(raw)?))
    }
}

impl BadgeCatalogStore for StaticCatalogStore {
    fn load(&mut self) -> Result<Vec<BadgeDefinition>, ServerError> {
        Ok(self.badges.clone())
    }
}

/// Re-reads a JSON file on every load, so edits show up after the TTL.
#[derive(Debug, Clone)]
pub struct JsonFileCatalogStore {
    path: PathBuf,
}

impl JsonFileCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BadgeCatalogStore for JsonFileCatalogStore {
    fn load(&mut self) -> Result<Vec<BadgeDefinition>, ServerError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let catalog = parse_catalog(&raw)?;
        info!("Loaded {} badges from {}", catalog.len(), self.path.display());
        Ok(catalog)
    }
}

pub struct BadgeCatalogCache<S: BadgeCatalogStore> {
    store: S,
    ttl: Duration,
    cached: Arc<Vec<BadgeDefinition>>,
    loaded_at: Option<Instant>,
}

impl<S: BadgeCatalogStore> BadgeCatalogCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Arc::new(Vec::new()),
            loaded_at: None,
        }
    }

    /// Current catalog, reloading it once the TTL has passed.
    ///
    /// A failed reload keeps serving the previous catalog and is retried on
    /// the next call.
    pub fn get(&mut self, now: Instant) -> Arc<Vec<BadgeDefinition>> {
        let fresh = self
            .loaded_at
            .map_or(false, |at| now.saturating_duration_since(at) < self.ttl);
        if fresh {
            return Arc::clone(&self.cached);
        }

        match self.store.load() {
            Ok(catalog) => {
                debug!("Badge catalog refreshed ({} entries)", catalog.len());
                self.cached = Arc::new(catalog);
                self.loaded_at = Some(now);
            }
            Err(e) => warn!("Badge catalog reload failed, serving stale copy: {}", e),
        }
        Arc::clone(&self.cached)
    }

    /// Forces the next [`get`](Self::get) to reload.
    pub fn invalidate(&mut self) {
        self.loaded_at = None;
    }
}
