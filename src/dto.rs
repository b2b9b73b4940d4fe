use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ServiceError;

pub type Record = Map<String, Value>;

/// Content digest of a record, volatile fields excluded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(pub String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(pub String);

impl DocumentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&IdentityKey> for DocumentKey {
    fn from(key: &IdentityKey) -> Self {
        DocumentKey(key.0.clone())
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchReport {
    pub partition: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn new(partition: &str) -> Self {
        BatchReport {
            partition: partition.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &Result<UpsertOutcome, ServiceError>) {
        match outcome {
            Ok(UpsertOutcome::Created) => self.created += 1,
            Ok(UpsertOutcome::Updated) => self.updated += 1,
            Ok(UpsertOutcome::Unchanged) => self.unchanged += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Counts records that never reached the store (fetch or extraction failed).
    pub fn add_failures(&mut self, n: usize) {
        self.failed += n;
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.failed
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "'{}': {} created, {} updated, {} unchanged, {} failed",
            self.partition, self.created, self.updated, self.unchanged, self.failed
        )
    }
}

/// Result of ingesting a whole dataset, returned by the lambda and printed by the CLI.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RunReport {
    pub dataset: String,
    pub database: String,
    pub batches: Vec<BatchReport>,
    pub snapshot: Option<UpsertOutcome>,
}

impl RunReport {
    /// Adds sources that never became records to the batches of their
    /// categories.
    pub fn add_failures(&mut self, failures: &BTreeMap<String, usize>) {
        for (partition, n) in failures {
            match self.batches.iter_mut().find(|b| &b.partition == partition) {
                Some(batch) => batch.add_failures(*n),
                None => {
                    let mut batch = BatchReport::new(partition);
                    batch.add_failures(*n);
                    self.batches.push(batch);
                }
            }
        }
    }

    pub fn totals(&self) -> BatchReport {
        self.batches
            .iter()
            .fold(BatchReport::new("total"), |mut acc, batch| {
                acc.created += batch.created;
                acc.updated += batch.updated;
                acc.unchanged += batch.unchanged;
                acc.failed += batch.failed;
                acc
            })
    }
}

/// Records grouped by source category, the layout of every JSON data file.
///
/// Top-level entries that are not lists (the offers file carries a `metadata`
/// object) are kept in `extras` and never ingested.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partitioned {
    pub partitions: BTreeMap<String, Vec<Record>>,
    pub extras: Map<String, Value>,
}

impl Partitioned {
    pub fn insert(&mut self, category: &str, records: Vec<Record>) {
        self.partitions.insert(category.to_string(), records);
    }

    pub fn get(&self, category: &str) -> Option<&Vec<Record>> {
        self.partitions.get(category)
    }

    pub fn from_value(value: Value) -> Result<Self, ServiceError> {
        let Value::Object(map) = value else {
            return Err(ServiceError::bad_request(
                "data file must hold an object of category -> list of records",
            ));
        };
        let mut out = Partitioned::default();
        for (category, entry) in map {
            match entry {
                Value::Array(items) => {
                    let records = items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(record) => Ok(record),
                            other => Err(ServiceError::bad_request(format!(
                                "category '{category}' holds a non-object entry: {other}"
                            ))),
                        })
                        .collect::<Result<Vec<Record>, ServiceError>>()?;
                    out.partitions.insert(category, records);
                }
                other => {
                    out.extras.insert(category, other);
                }
            }
        }
        Ok(out)
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.extras.clone();
        for (category, records) in &self.partitions {
            let items = records.iter().cloned().map(Value::Object).collect();
            map.insert(category.clone(), Value::Array(items));
        }
        Value::Object(map)
    }

    pub fn statistics(&self) -> BTreeMap<String, usize> {
        self.partitions
            .iter()
            .map(|(category, records)| (category.clone(), records.len()))
            .collect()
    }
}

#[derive(Deserialize, Serialize)]
pub struct DataFile {
    pub bucket: String,
    pub key: String,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConfig {
    pub data: DataFile,
    pub dataset: String,
    #[serde(default)]
    pub database: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partitioned_keeps_metadata_aside() {
        let value = json!({
            "metadata": {"source_url": "https://example.org"},
            "theses": [{"titre": "Sujet A", "url": "a.pdf"}],
            "stages": []
        });
        let data = Partitioned::from_value(value.clone()).unwrap();
        assert_eq!(data.partitions.len(), 2);
        assert_eq!(data.get("theses").unwrap().len(), 1);
        assert!(data.extras.contains_key("metadata"));
        assert_eq!(data.to_value(), value);
    }

    #[test]
    fn partitioned_rejects_scalars_in_lists() {
        let err = Partitioned::from_value(json!({"doctorants": ["just a name"]})).unwrap_err();
        assert_eq!(err.status, crate::response::Status::BadRequest);
    }

    #[test]
    fn report_counts_failures_and_totals() {
        let mut report = BatchReport::new("doctorants");
        report.record(&Ok(UpsertOutcome::Created));
        report.record(&Ok(UpsertOutcome::Unchanged));
        report.record(&Err(ServiceError::internal_server_error("write rejected")));
        report.add_failures(2);
        assert_eq!(report.total(), 5);
        assert_eq!(report.failed, 3);
        assert_eq!(
            report.to_string(),
            "'doctorants': 1 created, 0 updated, 1 unchanged, 3 failed"
        );
    }

    #[test]
    fn extraction_failures_join_their_batch() {
        let mut run = RunReport {
            batches: vec![BatchReport::new("doctorants")],
            ..Default::default()
        };
        let failures = BTreeMap::from([("doctorants".to_string(), 2), ("émérite".to_string(), 1)]);
        run.add_failures(&failures);
        assert_eq!(run.batches[0].failed, 2);
        assert_eq!(run.batches[1].partition, "émérite");
        assert_eq!(run.totals().failed, 3);
    }

    #[test]
    fn import_event_database_is_optional() {
        let config: ImportConfig = serde_json::from_value(json!({
            "data": {"bucket": "listic-input", "key": "Enseignants.json"},
            "dataset": "personnel"
        }))
        .unwrap();
        assert!(config.database.is_none());
    }
}
