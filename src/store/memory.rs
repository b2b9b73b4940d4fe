use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::{Mutex, MutexGuard};

use super::{classify, DocumentStore};
use crate::dto::{DocumentKey, Record, UpsertOutcome};
use crate::error::ServiceError;

type Collections = FxHashMap<String, FxHashMap<DocumentKey, Record>>;

/// In-process store. Backs dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, ServiceError> {
        self.collections
            .lock()
            .map_err(|_| ServiceError::internal_server_error("memory store lock poisoned"))
    }

    /// Names of the collections holding at least one document, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, ServiceError> {
        let collections = self.lock()?;
        let mut names: Vec<String> = collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();
        match classify(docs.get(key), &document) {
            Some(outcome) => {
                docs.insert(key.clone(), document);
                Ok(outcome)
            }
            None => Ok(UpsertOutcome::Unchanged),
        }
    }

    async fn put_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<(), ServiceError> {
        let mut collections = self.lock()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.clone(), document);
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        key: &DocumentKey,
    ) -> Result<Option<Record>, ServiceError> {
        let collections = self.lock()?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError> {
        let collections = self.lock()?;
        let mut docs: Vec<(&DocumentKey, &Record)> = collections
            .get(collection)
            .map(|docs| docs.iter().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.0.cmp(b.0));
        Ok(docs.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError> {
        let collections = self.lock()?;
        Ok(collections.get(collection).map_or(0, |docs| docs.len()))
    }
}
