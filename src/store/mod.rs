//! # Persistence Seam
//!
//! The kernel never owns a persistence schema; it talks to a record store
//! through this contract, each call atomic from the caller's perspective.
//! [`InMemoryStore`] backs tests and single-process embedding.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::resource::ResourceRecord;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new record
    async fn persist(&self, record: ResourceRecord) -> Result<()>;

    /// Write the record and return the stored copy
    async fn update_and_refresh(&self, record: ResourceRecord) -> Result<ResourceRecord>;

    /// Fetch the current copy of a record
    async fn reload(&self, id: Uuid) -> Result<ResourceRecord>;

    /// All records of the given kind
    async fn query_by_kind(&self, kind: &str) -> Result<Vec<ResourceRecord>>;

    /// Delete a record; deleting an absent record is not an error
    async fn remove(&self, id: Uuid) -> Result<()>;
}

/// Concurrent-map store for tests and embedding
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<Uuid, ResourceRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn persist(&self, record: ResourceRecord) -> Result<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn update_and_refresh(&self, record: ResourceRecord) -> Result<ResourceRecord> {
        if !self.records.contains_key(&record.id) {
            return Err(OrchestrationError::ResourceNotFound { id: record.id });
        }
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn reload(&self, id: Uuid) -> Result<ResourceRecord> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestrationError::ResourceNotFound { id })
    }

    async fn query_by_kind(&self, kind: &str) -> Result<Vec<ResourceRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        self.records.remove(&id);
        Ok(())
    }
}
