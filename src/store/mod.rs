//! Document store seam.
//!
//! A store holds collections of JSON documents addressed by a `DocumentKey`.
//! Every document written by the pipeline carries a `_unique_id` fingerprint;
//! `replace_one` compares fingerprints to decide between replacing the
//! document and leaving it untouched.

mod memory;
mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use serde_json::Value;

use crate::dto::{DocumentKey, Record, UpsertOutcome};
use crate::error::ServiceError;

pub const FINGERPRINT_FIELD: &str = "_unique_id";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create-if-absent, replace-if-changed, keyed by `key`. The lookup and
    /// the write form one operation per document.
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError>;

    /// Unconditional overwrite. For changes that keep the fingerprint, such
    /// as enrichment fields added to a stored document.
    async fn put_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<(), ServiceError>;

    async fn find_one(
        &self,
        collection: &str,
        key: &DocumentKey,
    ) -> Result<Option<Record>, ServiceError>;

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError>;

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError>;
}

/// `None` means the stored document already has the incoming fingerprint.
pub(crate) fn classify(existing: Option<&Record>, incoming: &Record) -> Option<UpsertOutcome> {
    let Some(stored) = existing else {
        return Some(UpsertOutcome::Created);
    };
    match (fingerprint_of(stored), fingerprint_of(incoming)) {
        (Some(old), Some(new)) if old == new => None,
        _ => Some(UpsertOutcome::Updated),
    }
}

fn fingerprint_of(document: &Record) -> Option<&str> {
    document.get(FINGERPRINT_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fingerprint: &str) -> Record {
        let Value::Object(map) = json!({ FINGERPRINT_FIELD: fingerprint, "name": "A. Example" }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn classify_outcomes() {
        assert_eq!(classify(None, &doc("a")), Some(UpsertOutcome::Created));
        assert_eq!(classify(Some(&doc("a")), &doc("a")), None);
        assert_eq!(classify(Some(&doc("a")), &doc("b")), Some(UpsertOutcome::Updated));
    }

    #[test]
    fn stored_document_without_fingerprint_is_replaced() {
        let legacy = Record::new();
        assert_eq!(classify(Some(&legacy), &doc("a")), Some(UpsertOutcome::Updated));
    }
}
