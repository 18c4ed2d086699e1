//! Persistence contracts and in-memory reference stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Action, EnergyStats, Price, Settings};
use crate::error::ControlError;

pub mod memory;

pub use memory::{MemoryActionStore, MemoryHourlyStore, MemorySettingsStore};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("revision mismatch for {key}: expected {expected}, found {found}")]
    Conflict { key: String, expected: u64, found: u64 },

    #[error("stored document for {key} is unreadable: {message}")]
    Corrupt { key: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ControlError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { .. } => ControlError::Conflict(error.to_string()),
            other => ControlError::Storage(other.to_string()),
        }
    }
}

/// A stored value with its write revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    /// Zero when the value has never been written.
    pub revision: u64,
}

/// Append-only decision log.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn append(&self, action: &Action) -> Result<(), StoreError>;

    /// Actions in `[start, end)`, oldest first.
    async fn range(&self, site_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Action>, StoreError>;
}

#[async_trait]
pub trait EnergyStatsStore: Send + Sync {
    /// Insert or replace by hour. Returns how many hours changed.
    async fn upsert(&self, site_id: &str, stats: &[EnergyStats]) -> Result<usize, StoreError>;

    async fn range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Versioned<EnergyStats>>, StoreError>;
}

/// Settled prices, keyed by price provider.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn upsert(&self, provider: &str, prices: &[Price]) -> Result<usize, StoreError>;

    async fn range(
        &self,
        provider: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Versioned<Price>>, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings, migrated to the latest schema. Defaults when unset.
    async fn get(&self, site_id: &str) -> Result<Versioned<Settings>, StoreError>;

    /// Store `settings` if the stored revision still equals `expected_revision`.
    async fn put(&self, site_id: &str, settings: &Settings, expected_revision: u64) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct Repositories {
    pub actions: Arc<dyn ActionStore>,
    pub energy: Arc<dyn EnergyStatsStore>,
    pub prices: Arc<dyn PriceStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            actions: Arc::new(MemoryActionStore::default()),
            energy: Arc::new(MemoryHourlyStore::<EnergyStats>::default()),
            prices: Arc::new(MemoryHourlyStore::<Price>::default()),
            settings: Arc::new(MemorySettingsStore::default()),
        }
    }
}
