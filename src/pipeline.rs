//! Idempotent ingestion of extracted records into a document store.
//!
//! Records are keyed by their content identity (or by a natural key when the
//! dataset defines one) and written with create-if-absent/replace semantics.
//! Each record succeeds or fails on its own; nothing spans two records, and
//! nothing is retried. A failed record is picked up by the next full run.

use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::dataset::{Dataset, KeyPolicy};
use crate::dto::{BatchReport, DocumentKey, IdentityKey, Partitioned, Record, RunReport, UpsertOutcome};
use crate::error::ServiceError;
use crate::identity::{compute_identity, fingerprint};
use crate::store::{DocumentStore, FINGERPRINT_FIELD};

pub const DEFAULT_UPSERT_CONCURRENCY: usize = 4;

/// A source category resolved against the dataset catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Label written into every record's `category` field.
    pub category: String,
    pub collection: String,
    pub policy: KeyPolicy,
}

/// Everything one run needs: the store connection and the dataset it writes.
/// Built once at startup and handed to each operation; dropping it releases
/// the store.
pub struct PipelineContext {
    store: Box<dyn DocumentStore>,
    dataset: &'static Dataset,
    database: String,
    concurrency: usize,
}

impl PipelineContext {
    pub fn new(store: Box<dyn DocumentStore>, dataset: &'static Dataset) -> Self {
        PipelineContext {
            store,
            dataset,
            database: dataset.database.to_string(),
            concurrency: DEFAULT_UPSERT_CONCURRENCY,
        }
    }

    /// Name reported for the target database when it differs from the dataset default.
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dataset(&self) -> &'static Dataset {
        self.dataset
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn partition(&self, category: &str) -> Partition {
        Partition {
            category: category.to_string(),
            collection: self.dataset.collection_for(category).to_string(),
            policy: self.dataset.key_policy_for(category),
        }
    }

    /// Writes one annotated record. The record must carry its identity in
    /// `_unique_id`; it is computed here when absent.
    pub async fn upsert(
        &self,
        partition: &Partition,
        mut record: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        let identity = ensure_identity(&mut record);
        let key = partition.policy.document_key(&record, &identity);
        self.write(partition, key, record).await
    }

    async fn write(
        &self,
        partition: &Partition,
        key: DocumentKey,
        mut record: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        record.insert("_id".to_string(), json!(key.as_str()));
        self.store
            .replace_one(&partition.collection, &key, record)
            .await
    }

    /// Ingests one partition. `Err` entries are extraction failures: they are
    /// counted as failed and never reach the store.
    pub async fn ingest_batch(
        &self,
        partition: &Partition,
        records: Vec<Result<Record, ServiceError>>,
    ) -> BatchReport {
        let mut report = BatchReport::new(&partition.category);
        let ingested_at = now();

        let annotated: Vec<Result<Record, ServiceError>> = records
            .into_par_iter()
            .map(|record| record.map(|r| annotate(r, &partition.category, &ingested_at)))
            .collect();

        let mut pending = Vec::with_capacity(annotated.len());
        for record in annotated {
            match record {
                Ok(record) => pending.push(record),
                Err(err) => {
                    tracing::warn!(partition = %partition.category, "record not extracted: {}", err.msg);
                    report.add_failures(1);
                }
            }
        }

        let (groups, duplicates) = group_by_key(partition, pending);
        report.unchanged += duplicates;
        let mut keyed = Vec::with_capacity(groups.len());
        for (key, mut group) in groups {
            if group.len() == 1 {
                keyed.extend(group.pop().map(|(_, record)| (key, record)));
                continue;
            }
            let held = self.held_identity(partition, &key).await;
            keyed.extend(split_collision(partition, key, group, held.as_ref()));
        }

        let outcomes: Vec<Result<UpsertOutcome, ServiceError>> = stream::iter(keyed)
            .map(|(key, record)| async move {
                let label = display_name(&record);
                let outcome = self.write(partition, key, record).await;
                if let Err(err) = &outcome {
                    tracing::error!(
                        partition = %partition.category,
                        collection = %partition.collection,
                        "failed to save {}: {}",
                        label,
                        err.msg
                    );
                }
                outcome
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        tracing::info!("{}", report);
        report
    }

    /// Identity of the document currently stored under `key`, if any.
    async fn held_identity(&self, partition: &Partition, key: &DocumentKey) -> Option<IdentityKey> {
        match self.store.find_one(&partition.collection, key).await {
            Ok(stored) => stored
                .as_ref()
                .and_then(|doc| doc.get(FINGERPRINT_FIELD))
                .and_then(Value::as_str)
                .map(|id| IdentityKey(id.to_string())),
            Err(err) => {
                tracing::debug!("cannot read {}/{}: {}", partition.collection, key, err.msg);
                None
            }
        }
    }

    /// Convenience over `ingest_batch` for records that are already extracted.
    pub async fn ingest_records(&self, category: &str, records: Vec<Record>) -> BatchReport {
        let partition = self.partition(category);
        self.ingest_batch(&partition, records.into_iter().map(Ok).collect())
            .await
    }

    /// Ingests every list of a data file, one batch per category.
    pub async fn ingest_all(&self, data: &Partitioned) -> Vec<BatchReport> {
        for category in self.dataset.categories {
            if data.get(category.source).is_none() {
                tracing::warn!("category '{}' not found in the data", category.source);
            }
        }
        let mut reports = Vec::with_capacity(data.partitions.len());
        for (category, records) in &data.partitions {
            if !self.dataset.is_known(category) {
                tracing::warn!(
                    "category '{}' is not part of dataset '{}', storing it under its own name",
                    category,
                    self.dataset.name
                );
            }
            if records.is_empty() {
                tracing::warn!("no records for category '{}'", category);
            }
            reports.push(self.ingest_records(category, records.clone()).await);
        }
        reports
    }

    /// Overwrites the dataset's single snapshot document. An identical
    /// aggregate leaves the stored snapshot, timestamp included, untouched.
    pub async fn snapshot_all(&self, data: &Partitioned) -> Result<UpsertOutcome, ServiceError> {
        let statistics = data.statistics();
        let contents = Partitioned {
            partitions: data.partitions.clone(),
            extras: Default::default(),
        };
        let fingerprint = fingerprint(&json!({
            "data": contents.to_value(),
            "statistics": statistics,
        }));
        let snapshot = json!({
            "_id": self.dataset.snapshot_id,
            FINGERPRINT_FIELD: fingerprint,
            "data": data.to_value(),
            "last_updated": now(),
            "total_categories": data.partitions.len(),
            "statistics": statistics,
        });
        let Value::Object(document) = snapshot else {
            unreachable!("json! object literal")
        };
        let outcome = self
            .store
            .replace_one(
                self.dataset.snapshot_collection,
                &DocumentKey(self.dataset.snapshot_id.to_string()),
                document,
            )
            .await?;
        tracing::info!(
            "snapshot '{}/{}': {:?}",
            self.dataset.snapshot_collection,
            self.dataset.snapshot_id,
            outcome
        );
        Ok(outcome)
    }

    /// Current contents of every catalog collection, keyed by source category.
    pub async fn read_back(&self) -> Result<Partitioned, ServiceError> {
        let mut data = Partitioned::default();
        for category in self.dataset.categories {
            let docs = self.store.find_all(category.collection).await?;
            data.insert(category.source, docs);
        }
        Ok(data)
    }

    /// Document counts per catalog collection, for the final report.
    pub async fn collection_counts(&self) -> Vec<(String, Result<usize, ServiceError>)> {
        let mut counts = Vec::with_capacity(self.dataset.categories.len());
        for category in self.dataset.categories {
            let count = self.store.count_documents(category.collection).await;
            counts.push((category.collection.to_string(), count));
        }
        counts
    }

    /// Full import: every partition, then the snapshot. Only a snapshot
    /// failure is reported as an error, and only after all records were tried.
    pub async fn run(&self, data: &Partitioned) -> RunReport {
        self.run_with_snapshot(data, data).await
    }

    /// Ingests `data` but snapshots `complete`, for runs that refreshed only
    /// some categories of a larger data file.
    pub async fn run_with_snapshot(&self, data: &Partitioned, complete: &Partitioned) -> RunReport {
        let batches = self.ingest_all(data).await;
        let snapshot = match self.snapshot_all(complete).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::error!("failed to save the snapshot: {}", err.msg);
                None
            }
        };
        RunReport {
            dataset: self.dataset.name.to_string(),
            database: self.database.clone(),
            batches,
            snapshot,
        }
    }
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Identity over the extracted content, then the ingestion annotations.
fn annotate(mut record: Record, category: &str, ingested_at: &str) -> Record {
    let identity = compute_identity(&record);
    record.insert(FINGERPRINT_FIELD.to_string(), json!(identity));
    record.insert("category".to_string(), json!(category));
    record.insert("last_updated".to_string(), json!(ingested_at));
    record
}

fn ensure_identity(record: &mut Record) -> IdentityKey {
    match record.get(FINGERPRINT_FIELD).and_then(Value::as_str) {
        Some(id) => IdentityKey(id.to_string()),
        None => {
            let id = compute_identity(record);
            record.insert(FINGERPRINT_FIELD.to_string(), json!(id));
            id
        }
    }
}

/// Groups records by the key their partition's policy gives them. Exact
/// duplicates inside a group are dropped; returns how many were.
fn group_by_key(
    partition: &Partition,
    records: Vec<Record>,
) -> (BTreeMap<DocumentKey, Vec<(IdentityKey, Record)>>, usize) {
    let mut groups: BTreeMap<DocumentKey, Vec<(IdentityKey, Record)>> = BTreeMap::new();
    for mut record in records {
        let identity = ensure_identity(&mut record);
        let key = partition.policy.document_key(&record, &identity);
        groups.entry(key).or_default().push((identity, record));
    }
    let mut duplicates = 0;
    for group in groups.values_mut() {
        let before = group.len();
        group.sort_by(|a, b| a.0.cmp(&b.0));
        group.dedup_by(|a, b| a.0 == b.0);
        if group.len() < before {
            tracing::warn!(
                partition = %partition.category,
                "{} duplicate(s) of {} skipped",
                before - group.len(),
                display_name(&group[0].1)
            );
            duplicates += before - group.len();
        }
    }
    (groups, duplicates)
}

/// Different records sharing one key: the one already stored under it
/// (`held`) keeps it, every other one is keyed by its content identity.
fn split_collision(
    partition: &Partition,
    key: DocumentKey,
    group: Vec<(IdentityKey, Record)>,
    held: Option<&IdentityKey>,
) -> Vec<(DocumentKey, Record)> {
    tracing::warn!(
        partition = %partition.category,
        "{} different records share the key of {}, keeping each one",
        group.len(),
        display_name(&group[0].1)
    );
    group
        .into_iter()
        .map(|(identity, record)| {
            if Some(&identity) == held {
                (key.clone(), record)
            } else {
                (DocumentKey::from(&identity), record)
            }
        })
        .collect()
}

fn display_name(record: &Record) -> String {
    ["name", "titre", "title", "url"]
        .iter()
        .find_map(|field| record.get(*field).and_then(Value::as_str))
        .unwrap_or("unknown record")
        .to_string()
}
