//! In-memory storage adapter
//!
//! An id-keyed arena guarded by a single `RwLock`. Edges live on the records
//! themselves and are resolved by id, so there are no owning references
//! between records.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{GraphNeighbor, StorageAdapter, WriteOp};
use crate::error::{Error, Result};
use crate::filter::RecordFilter;
use crate::types::{MemoryRecord, RelationType};

/// Storage adapter backed by a `HashMap<id, record>`.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records in any status.
    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryRecord>>> {
        self.records.read().map_err(|_| Error::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryRecord>>> {
        self.records.write().map_err(|_| Error::LockPoisoned)
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn create(&self, mut record: MemoryRecord) -> Result<MemoryRecord> {
        let mut records = self.write()?;
        if records.contains_key(&record.id) {
            return Err(Error::AlreadyExists(record.id));
        }
        if super::active_duplicate(records.values(), &record).is_some() {
            return Err(Error::DuplicateContent {
                content_hash: record.content_hash,
            });
        }
        record.version = 1;
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn update(&self, mut record: MemoryRecord, expected_version: u64) -> Result<MemoryRecord> {
        let mut records = self.write()?;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| Error::NotFound(record.id.clone()))?;
        if stored.version != expected_version {
            return Err(Error::version_conflict(
                &record.id,
                expected_version,
                stored.version,
            ));
        }
        record.version = stored.version + 1;
        *stored = record.clone();
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let records = self.read()?;
        let matching = records.values().filter(|r| filter.matches(r)).cloned().collect();
        Ok(super::page(matching, limit, offset))
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>> {
        let records = self.read()?;
        Ok(super::rank_by_vector(
            embedding,
            k,
            records.values().filter(|r| filter.matches(r)),
        ))
    }

    async fn text_search(
        &self,
        query: &str,
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f64)>> {
        let records = self.read()?;
        Ok(super::rank_by_text(
            query,
            k,
            records.values().filter(|r| filter.matches(r)),
        ))
    }

    async fn graph_neighbors(
        &self,
        id: &str,
        relation_types: &[RelationType],
        max_hops: usize,
        max_nodes: usize,
    ) -> Result<Vec<GraphNeighbor>> {
        let records = self.read()?;
        Ok(super::traverse(
            &records,
            id,
            relation_types,
            max_hops,
            max_nodes,
        ))
    }

    async fn find_by_hash(
        &self,
        filter: &RecordFilter,
        hash: &str,
    ) -> Result<Option<MemoryRecord>> {
        let records = self.read()?;
        let mut matches: Vec<&MemoryRecord> = records
            .values()
            .filter(|r| r.content_hash == hash && filter.matches(r))
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<Vec<MemoryRecord>> {
        let mut records = self.write()?;
        let prepared = super::prepare_batch(&records, ops)?;
        for record in &prepared {
            records.insert(record.id.clone(), record.clone());
        }
        Ok(prepared)
    }
}
