//! Backbone registry: which physical backend and credentials each tenant's
//! content lives in. Built once at process start from enabled rows and
//! passed by reference into the services that need it.

use std::collections::HashMap;

use serde::Deserialize;

use crate::storage::models::{BackboneConfig, BackboneRecord, BackendKind};
use crate::storage::{Database, DatabaseError};

pub struct BackboneRegistry {
    by_id: HashMap<u64, BackboneRecord>,
    by_kind: HashMap<BackendKind, Vec<u64>>,
}

impl BackboneRegistry {
    /// Read backbone rows and index the enabled ones. Disabled backbones are
    /// invisible to every service.
    pub fn load(db: &Database) -> Result<Self, DatabaseError> {
        let mut by_id = HashMap::new();
        let mut by_kind: HashMap<BackendKind, Vec<u64>> = HashMap::new();

        for backbone in db.all_backbones()? {
            if !backbone.enabled {
                tracing::debug!(backbone = %backbone.name, "skipping disabled backbone");
                continue;
            }
            by_kind.entry(backbone.kind).or_default().push(backbone.id);
            by_id.insert(backbone.id, backbone);
        }

        Ok(Self { by_id, by_kind })
    }

    pub fn get(&self, id: u64) -> Option<&BackboneRecord> {
        self.by_id.get(&id)
    }

    pub fn of_kind(&self, kind: BackendKind) -> Vec<&BackboneRecord> {
        self.by_kind
            .get(&kind)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackboneRecord> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// One entry of the JSON seed file.
#[derive(Debug, Deserialize)]
struct SeedEntry {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    config: BackboneConfig,
}

fn default_enabled() -> bool {
    true
}

/// Seed the backbone table from a JSON file when it is empty. Backbone CRUD
/// otherwise belongs to the management API, not this core.
pub fn seed_backbones(db: &Database, path: &str) -> Result<usize, anyhow::Error> {
    if !db.all_backbones()?.is_empty() {
        return Ok(0);
    }

    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<SeedEntry> = serde_json::from_str(&raw)?;

    let mut created = 0;
    for entry in entries {
        let kind = match &entry.config {
            BackboneConfig::Filesystem { .. } => BackendKind::Filesystem,
            BackboneConfig::S3 { .. } => BackendKind::S3,
            BackboneConfig::Onedrive { .. } => BackendKind::Onedrive,
            BackboneConfig::Memory {} => BackendKind::Memory,
        };
        db.create_backbone(&BackboneRecord {
            id: 0,
            name: entry.name,
            kind,
            enabled: entry.enabled,
            config: entry.config,
        })?;
        created += 1;
    }
    tracing::info!(count = created, path, "seeded backbones");
    Ok(created)
}
