use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use listic_ingest::dataset::{OFFERS, PERSONNEL, PROJECTS};
use listic_ingest::dto::{DocumentKey, Partitioned, Record, UpsertOutcome};
use listic_ingest::error::ServiceError;
use listic_ingest::files::{parse_partitioned, save_partitioned};
use listic_ingest::identity::compute_identity;
use listic_ingest::pipeline::PipelineContext;
use listic_ingest::scrape::offers::parse_offer_listing;
use listic_ingest::store::{DocumentStore, MemoryStore};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// Lets several contexts write into one `MemoryStore`.
#[derive(Clone, Default)]
struct Shared(Arc<MemoryStore>);

#[async_trait]
impl DocumentStore for Shared {
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        self.0.replace_one(collection, key, document).await
    }

    async fn put_one(&self, collection: &str, key: &DocumentKey, document: Record) -> Result<(), ServiceError> {
        self.0.put_one(collection, key, document).await
    }

    async fn find_one(&self, collection: &str, key: &DocumentKey) -> Result<Option<Record>, ServiceError> {
        self.0.find_one(collection, key).await
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError> {
        self.0.find_all(collection).await
    }

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError> {
        self.0.count_documents(collection).await
    }
}

/// Rejects writes of documents whose `name` is in `broken`.
struct Flaky {
    inner: MemoryStore,
    broken: Vec<&'static str>,
}

#[async_trait]
impl DocumentStore for Flaky {
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        let name = document.get("name").and_then(Value::as_str).unwrap_or_default();
        if self.broken.contains(&name) {
            return Err(ServiceError::internal_server_error("write rejected"));
        }
        self.inner.replace_one(collection, key, document).await
    }

    async fn put_one(&self, collection: &str, key: &DocumentKey, document: Record) -> Result<(), ServiceError> {
        self.inner.put_one(collection, key, document).await
    }

    async fn find_one(&self, collection: &str, key: &DocumentKey) -> Result<Option<Record>, ServiceError> {
        self.inner.find_one(collection, key).await
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError> {
        self.inner.find_all(collection).await
    }

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError> {
        self.inner.count_documents(collection).await
    }
}

/// Read, then write unconditionally, with a yield in between: the way
/// `S3Store` sees a key, without an object store.
#[derive(Clone, Default)]
struct ReadThenPut(Arc<MemoryStore>);

#[async_trait]
impl DocumentStore for ReadThenPut {
    async fn replace_one(
        &self,
        collection: &str,
        key: &DocumentKey,
        document: Record,
    ) -> Result<UpsertOutcome, ServiceError> {
        let existing = self.0.find_one(collection, key).await?;
        let outcome = match existing {
            None => UpsertOutcome::Created,
            Some(stored) if stored.get("_unique_id") == document.get("_unique_id") => {
                return Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => UpsertOutcome::Updated,
        };
        tokio::task::yield_now().await;
        self.0.put_one(collection, key, document).await?;
        Ok(outcome)
    }

    async fn put_one(&self, collection: &str, key: &DocumentKey, document: Record) -> Result<(), ServiceError> {
        self.0.put_one(collection, key, document).await
    }

    async fn find_one(&self, collection: &str, key: &DocumentKey) -> Result<Option<Record>, ServiceError> {
        self.0.find_one(collection, key).await
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, ServiceError> {
        self.0.find_all(collection).await
    }

    async fn count_documents(&self, collection: &str) -> Result<usize, ServiceError> {
        self.0.count_documents(collection).await
    }
}

fn people() -> Partitioned {
    parse_partitioned(
        r#"{
            "doctorants": [
                {"name": "Alice MARTIN", "title": "Doctorante", "email": "alice.martin@univ-smb.fr"},
                {"name": "Bruno PETIT", "title": "Doctorant"}
            ],
            "émérite": [
                {"name": "Claude ROUX", "title": "Professeur émérite"}
            ]
        }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn changed_title_updates_the_same_document() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let partition = ctx.partition("doctorants");
    let first = record(json!({"name": "A", "title": "PhD student"}));

    assert_eq!(ctx.upsert(&partition, first.clone()).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(ctx.upsert(&partition, first).await.unwrap(), UpsertOutcome::Unchanged);

    let changed = record(json!({"name": "A", "title": "Dr."}));
    assert_eq!(ctx.upsert(&partition, changed).await.unwrap(), UpsertOutcome::Updated);

    let stored = ctx.store().find_all("doctorants").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["title"], "Dr.");
}

#[tokio::test]
async fn rerun_of_the_same_data_changes_nothing() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let data = people();

    let first = ctx.run(&data).await;
    assert_eq!(first.totals().created, 3);
    assert_eq!(first.snapshot, Some(UpsertOutcome::Created));
    let before = ctx.store().find_all("doctorants").await.unwrap();

    let second = ctx.run(&data).await;
    let totals = second.totals();
    assert_eq!(totals.unchanged, 3);
    assert_eq!(totals.created + totals.updated + totals.failed, 0);
    assert_eq!(second.snapshot, Some(UpsertOutcome::Unchanged));
    // Timestamps included: unchanged documents are not rewritten.
    assert_eq!(ctx.store().find_all("doctorants").await.unwrap(), before);
}

#[tokio::test]
async fn categories_land_in_their_collections() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    ctx.run(&people()).await;
    assert_eq!(ctx.store().count_documents("doctorants").await.unwrap(), 2);
    assert_eq!(ctx.store().count_documents("emerites").await.unwrap(), 1);
    let emeriti = ctx.store().find_all("emerites").await.unwrap();
    assert_eq!(emeriti[0]["category"], "émérite");
    assert!(emeriti[0].contains_key("last_updated"));
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_batch() {
    let store = Flaky {
        inner: MemoryStore::new(),
        broken: vec!["Bruno PETIT"],
    };
    let ctx = PipelineContext::new(Box::new(store), &PERSONNEL);
    let partition = ctx.partition("doctorants");
    let records = vec![
        Ok(record(json!({"name": "Alice MARTIN"}))),
        Ok(record(json!({"name": "Bruno PETIT"}))),
        Err(ServiceError::bad_gateway("404 Not Found")),
        Ok(record(json!({"name": "Chloé BERNARD"}))),
    ];
    let report = ctx.ingest_batch(&partition, records).await;
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.total(), 4);
    assert_eq!(ctx.store().count_documents("doctorants").await.unwrap(), 2);
}

#[tokio::test]
async fn ingest_order_does_not_matter() {
    let forward = vec![
        record(json!({"name": "A", "title": "x"})),
        record(json!({"name": "B", "title": "y"})),
        record(json!({"title": "z", "name": "C"})),
    ];
    let mut backward = forward.clone();
    backward.reverse();

    let a = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let b = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    a.ingest_records("doctorants", forward).await;
    b.ingest_records("doctorants", backward).await;

    let ids = |docs: Vec<Record>| -> Vec<Value> { docs.into_iter().map(|d| d["_unique_id"].clone()).collect() };
    assert_eq!(
        ids(a.store().find_all("doctorants").await.unwrap()),
        ids(b.store().find_all("doctorants").await.unwrap())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_leave_one_document_per_key() {
    let shared = Shared::default();
    let data = people();
    let contexts: Vec<PipelineContext> = (0..4)
        .map(|_| PipelineContext::new(Box::new(shared.clone()), &PERSONNEL).with_concurrency(8))
        .collect();
    futures::future::join_all(contexts.iter().map(|ctx| ctx.run(&data))).await;

    assert_eq!(shared.count_documents("doctorants").await.unwrap(), 2);
    assert_eq!(shared.count_documents("emerites").await.unwrap(), 1);
    assert_eq!(shared.count_documents("complete_structure").await.unwrap(), 1);
}

#[tokio::test]
async fn content_keyed_projects_keep_old_versions() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PROJECTS);
    ctx.ingest_records("Nationaux", vec![record(json!({"Acronyme": "ANR X", "Financeur": "ANR"}))])
        .await;
    let report = ctx
        .ingest_records("Nationaux", vec![record(json!({"Acronyme": "ANR X", "Financeur": "ANR/PIA"}))])
        .await;
    assert_eq!(report.created, 1);
    assert_eq!(ctx.store().count_documents("Nationaux").await.unwrap(), 2);
}

#[tokio::test]
async fn snapshot_follows_the_data() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let mut data = people();
    assert_eq!(ctx.snapshot_all(&data).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(ctx.snapshot_all(&data).await.unwrap(), UpsertOutcome::Unchanged);

    data.insert("doctorants", vec![record(json!({"name": "Alice MARTIN"}))]);
    assert_eq!(ctx.snapshot_all(&data).await.unwrap(), UpsertOutcome::Updated);

    let snapshots = ctx.store().find_all("complete_structure").await.unwrap();
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(snapshot["_id"], "all_enseignants");
    assert_eq!(snapshot["total_categories"], 2);
    assert_eq!(snapshot["statistics"]["doctorants"], 1);
    assert_eq!(snapshot["data"]["émérite"][0]["name"], "Claude ROUX");
}

#[test]
fn identity_ignores_field_order_and_pipeline_fields() {
    let a = record(json!({"name": "A", "title": "x", "tags": {"b": 1, "a": 2}}));
    let b = record(json!({
        "tags": {"a": 2, "b": 1},
        "title": "x",
        "name": "A",
        "category": "doctorants",
        "last_updated": "2025-01-01T00:00:00Z"
    }));
    assert_eq!(compute_identity(&a), compute_identity(&b));
}

#[tokio::test]
async fn homonyms_are_both_kept_and_stable_across_runs() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let homonyms = || {
        vec![
            record(json!({"name": "Homonyme", "url_listic": "a"})),
            record(json!({"name": "Homonyme", "url_listic": "b"})),
        ]
    };

    let first = ctx.ingest_records("doctorants", homonyms()).await;
    assert_eq!(first.created, 2);
    let second = ctx.ingest_records("doctorants", homonyms()).await;
    assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 2));

    let stored = ctx.store().find_all("doctorants").await.unwrap();
    assert_eq!(stored.len(), 2);
    let mut urls: Vec<&str> = stored.iter().filter_map(|d| d["url_listic"].as_str()).collect();
    urls.sort();
    assert_eq!(urls, vec!["a", "b"]);
}

#[tokio::test]
async fn offer_linked_twice_is_stored_once() {
    let listing = r#"
      <html><body>
        <h3>OFFRES DE THÈSES</h3>
        <p><a href="/listic/wp-content/uploads/these/t1.pdf">Thèse IA frugale</a></p>
        <p>Rappel : <a href="/listic/wp-content/uploads/these/t1.pdf">Thèse IA frugale</a></p>
      </body></html>
    "#;
    let data = parse_offer_listing(listing, "https://www.univ-smb.fr/listic/informations/emplois/");
    assert_eq!(data.get("theses").unwrap().len(), 2);

    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &OFFERS);
    let first = ctx.run(&data).await.totals();
    assert_eq!((first.created, first.unchanged), (1, 1));
    assert_eq!(ctx.store().count_documents("theses").await.unwrap(), 1);

    let second = ctx.run(&data).await.totals();
    assert_eq!(second.created + second.updated + second.failed, 0);
    assert_eq!(second.unchanged, 2);
}

#[tokio::test]
async fn partial_scrape_still_snapshots_every_saved_category() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.json");
    save_partitioned(&path, &people()).unwrap();

    let mut refreshed = Partitioned::default();
    refreshed.insert("doctorants", vec![record(json!({"name": "Alice MARTIN", "title": "Docteure"}))]);
    let complete = save_partitioned(&path, &refreshed).unwrap();

    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let report = ctx.run_with_snapshot(&refreshed, &complete).await;
    assert_eq!(report.batches.len(), 1);
    assert_eq!(ctx.store().count_documents("emerites").await.unwrap(), 0);

    let snapshot = &ctx.store().find_all("complete_structure").await.unwrap()[0];
    assert_eq!(snapshot["total_categories"], 2);
    assert_eq!(snapshot["statistics"]["émérite"], 1);
    assert_eq!(snapshot["data"]["doctorants"][0]["title"], "Docteure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_read_then_put_runs_keep_one_document_per_key() {
    let store = ReadThenPut::default();
    let data = people();
    let contexts: Vec<PipelineContext> = (0..4)
        .map(|_| PipelineContext::new(Box::new(store.clone()), &PERSONNEL).with_concurrency(8))
        .collect();
    let reports = futures::future::join_all(contexts.iter().map(|ctx| ctx.run(&data))).await;

    assert_eq!(store.count_documents("doctorants").await.unwrap(), 2);
    assert_eq!(store.count_documents("emerites").await.unwrap(), 1);
    // Several runs may each claim the creation; none loses a record.
    for report in &reports {
        let totals = report.totals();
        assert_eq!(totals.failed, 0);
        assert_eq!(totals.total(), 3);
    }
    let created: usize = reports.iter().map(|r| r.totals().created).sum();
    assert!(created >= 3);
}

#[tokio::test]
async fn homonym_arriving_later_leaves_the_stored_person_in_place() {
    let ctx = PipelineContext::new(Box::new(MemoryStore::new()), &PERSONNEL);
    let first = record(json!({"name": "Homonyme", "url_listic": "a"}));
    let second = record(json!({"name": "Homonyme", "url_listic": "b"}));
    ctx.ingest_records("doctorants", vec![first.clone()]).await;

    let report = ctx.ingest_records("doctorants", vec![first.clone(), second.clone()]).await;
    assert_eq!((report.created, report.unchanged), (1, 1));
    assert_eq!(ctx.store().count_documents("doctorants").await.unwrap(), 2);

    let rerun = ctx.ingest_records("doctorants", vec![second, first]).await;
    assert_eq!((rerun.created, rerun.updated, rerun.unchanged), (0, 0, 2));
    assert_eq!(ctx.store().count_documents("doctorants").await.unwrap(), 2);
}
