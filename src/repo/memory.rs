use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use super::{ActionStore, EnergyStatsStore, PriceStore, SettingsStore, StoreError, Versioned};
use crate::domain::{hour_start, Action, EnergyStats, Price, Settings};

#[derive(Default)]
pub struct MemoryActionStore {
    rows: RwLock<Vec<Action>>,
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn append(&self, action: &Action) -> Result<(), StoreError> {
        self.rows.write().push(action.clone());
        Ok(())
    }

    async fn range(&self, site_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Action>, StoreError> {
        let mut out: Vec<Action> = self
            .rows
            .read()
            .iter()
            .filter(|a| a.site_id == site_id && a.timestamp >= start && a.timestamp < end)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.timestamp);
        Ok(out)
    }
}

/// Rows identified by the hour they describe.
pub trait HourKeyed: Clone + PartialEq + Send + Sync + 'static {
    fn hour(&self) -> DateTime<Utc>;
}

impl HourKeyed for EnergyStats {
    fn hour(&self) -> DateTime<Utc> {
        hour_start(self.ts_hour_start)
    }
}

impl HourKeyed for Price {
    fn hour(&self) -> DateTime<Utc> {
        hour_start(self.ts_start)
    }
}

/// Upsert-by-hour store. Rewriting an hour with different data bumps its revision.
pub struct MemoryHourlyStore<T> {
    rows: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, Versioned<T>>>>,
}

impl<T> Default for MemoryHourlyStore<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: HourKeyed> MemoryHourlyStore<T> {
    fn upsert_rows(&self, key: &str, items: &[T]) -> usize {
        let mut rows = self.rows.write();
        let series = rows.entry(key.to_string()).or_default();
        let mut changed = 0;
        for item in items {
            let slot = series.entry(item.hour()).or_insert_with(|| Versioned {
                value: item.clone(),
                revision: 0,
            });
            if slot.revision == 0 || slot.value != *item {
                slot.value = item.clone();
                slot.revision += 1;
                changed += 1;
            }
        }
        changed
    }

    fn range_rows(&self, key: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Versioned<T>> {
        if start >= end {
            return Vec::new();
        }
        self.rows
            .read()
            .get(key)
            .map(|series| series.range(start..end).map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EnergyStatsStore for MemoryHourlyStore<EnergyStats> {
    async fn upsert(&self, site_id: &str, stats: &[EnergyStats]) -> Result<usize, StoreError> {
        let changed = self.upsert_rows(site_id, stats);
        debug!(site_id, changed, "energy stats upserted");
        Ok(changed)
    }

    async fn range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Versioned<EnergyStats>>, StoreError> {
        Ok(self.range_rows(site_id, start, end))
    }
}

#[async_trait]
impl PriceStore for MemoryHourlyStore<Price> {
    async fn upsert(&self, provider: &str, prices: &[Price]) -> Result<usize, StoreError> {
        let changed = self.upsert_rows(provider, prices);
        debug!(provider, changed, "prices upserted");
        Ok(changed)
    }

    async fn range(
        &self,
        provider: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Versioned<Price>>, StoreError> {
        Ok(self.range_rows(provider, start, end))
    }
}

/// Settings kept as raw JSON documents so older schema versions can be
/// read back and migrated.
#[derive(Default)]
pub struct MemorySettingsStore {
    rows: RwLock<HashMap<String, Versioned<Value>>>,
}

impl MemorySettingsStore {
    /// Seed a raw document, e.g. one written by an older release.
    pub fn insert_raw(&self, site_id: &str, document: Value) {
        let mut rows = self.rows.write();
        let revision = rows.get(site_id).map_or(0, |v| v.revision) + 1;
        rows.insert(
            site_id.to_string(),
            Versioned {
                value: document,
                revision,
            },
        );
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, site_id: &str) -> Result<Versioned<Settings>, StoreError> {
        let Some(stored) = self.rows.read().get(site_id).cloned() else {
            return Ok(Versioned {
                value: Settings::default(),
                revision: 0,
            });
        };
        let settings = Settings::migrate(stored.value).map_err(|e| StoreError::Corrupt {
            key: site_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(Versioned {
            value: settings,
            revision: stored.revision,
        })
    }

    async fn put(&self, site_id: &str, settings: &Settings, expected_revision: u64) -> Result<u64, StoreError> {
        let document = serde_json::to_value(settings).map_err(|e| StoreError::Corrupt {
            key: site_id.to_string(),
            message: e.to_string(),
        })?;
        let mut rows = self.rows.write();
        let found = rows.get(site_id).map_or(0, |v| v.revision);
        if found != expected_revision {
            return Err(StoreError::Conflict {
                key: site_id.to_string(),
                expected: expected_revision,
                found,
            });
        }
        let revision = found + 1;
        rows.insert(
            site_id.to_string(),
            Versioned {
                value: document,
                revision,
            },
        );
        info!(site_id, revision, "settings stored");
        Ok(revision)
    }
}
