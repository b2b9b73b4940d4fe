use async_trait::async_trait;
use futures::future::try_join_all;
use rusoto_core::{Client, Region};
use rusoto_s3::S3Client;

use super::{classify, DocumentStore};
use crate::dto::{DocumentKey, Record, UpsertOutcome};
use crate::error::ServiceError;
use crate::util::{check_bucket, fetch_object_from_s3, list_keys_in_s3, upload_object_to_s3};

/// Documents as JSON objects at `{database}/{collection}/{key}.json`.
///
/// The object key is derived from the document key, so a collection can never
/// hold two documents for one key. `replace_one` is a GET followed by an
/// unconditional PUT (rusoto 0.48 has no conditional put): two runs racing on
/// one key still end with one object, the last write winning, but both may
/// report `Created` or `Updated` for it. Outcome tallies are exact only when
/// one run writes a collection at a time.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    database: String,
}

impl S3Store {
    /// Checks that the bucket is reachable before any record is ingested.
    pub async fn connect(region: Region, bucket: &str, database: &str) -> Result<Self, ServiceError> {
        let client = S3Client::new_with_client(Client::shared(), region);
        check_bucket(&client, bucket.to_string()).await?;
        tracing::info!(bucket, database, "connected to S3 document store");
        Ok(Self::with_client(client, bucket, database))
    }

    pub fn with_client(client: S3Client, bucket: &str, database: &str) -> Self {
        S3Store {
            client,
            bucket: bucket.to_string(),
            database: database.to_string(),
        }
    }

    fn decode(bytes: &[u8], object_key: &str) -> Result<Record, ServiceError> {
        serde_json::from_slice(bytes).map_err(|err| {
            ServiceError::internal_server_error(format!("corrupt document {object_key}: {err}"))
        })
    }

    async fn save(&self, object_key: String, document: &Record) -> Result<(), ServiceError> {
        let body = serde_json::to_vec(document).map_err(ServiceError::internal_server_error)?;
        upload_object_to_s3(&self.client, body, self.bucket.clone(), object_key).await
    }

    async fn load(&self, object_key: String) -> Result<Option<Record>, ServiceError> {
        match fetch_object_from_s3(&self.client, self.bucket.clone(), object_key.clone()).await? {
            Some(bytes) => Self::decode(&bytes, &object_key).map(Some),
            None => Ok(None),
        }
    }
}

fn collection_prefix(database: &str, collection: &str) -> String {
    format!("{database}/{collection}/")
}

fn object_key(database: &str, collection: &str, key: &DocumentKey) -> String {
    format!("{}{}.json", collection_prefix(database, collection), key)
}

#[async_trait]
impl DocumentStore for S3Store {
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        let object_key = object_key(&self.database, collection, key);
        let existing = self.load(object_key.clone()).await?;
        let Some(outcome) = classify(existing.as_ref(), &document) else {
            return Ok(UpsertOutcome::Unchanged);
        };
        self.save(object_key, &document).await?;
        Ok(outcome)
    }

    async fn put_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<(), ServiceError> {
        self.save(object_key(&self.database, collection, key), &document)
            .await
    }

    async fn find_one(
        &self,
        collection: &str,
        key: &DocumentKey,
    ) -> Result<Option<Record>, ServiceError> {
        self.load(object_key(&self.database, collection, key)).await
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError> {
        let mut keys = list_keys_in_s3(
            &self.client,
            self.bucket.clone(),
            collection_prefix(&self.database, collection),
        )
        .await?;
        keys.sort();
        let docs = try_join_all(keys.into_iter().map(|key| self.load(key))).await?;
        // A key listed but deleted in between is simply skipped.
        Ok(docs.into_iter().flatten().collect())
    }

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError> {
        list_keys_in_s3(
            &self.client,
            self.bucket.clone(),
            collection_prefix(&self.database, collection),
        )
        .await
        .map(|keys| keys.len())
    }
}
