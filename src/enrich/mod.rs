//! Publication data added to stored personnel documents.
//!
//! Enrichment writes over documents the pipeline already stored, keeping
//! their `_unique_id`: the added fields are not part of the scraped content,
//! so a rerun of the same scrape still reports them unchanged.

mod dblp;
mod hal;

pub use dblp::{normalize_name, parse_author_page, DblpEnricher, DBLP_SEARCH_URL};
pub use hal::{hal_data, parse_hal_response, HalEnricher, HAL_SEARCH_URL};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dto::{BatchReport, DocumentKey, IdentityKey, Record};
use crate::error::ServiceError;
use crate::pipeline::{now, Partition, PipelineContext};
use crate::scrape::pool::run_pool;
use crate::scrape::{Fetcher, ScrapeConfig};
use crate::store::FINGERPRINT_FIELD;

#[async_trait]
pub trait Enricher: Send + Sync {
    fn field(&self) -> &'static str;

    /// Field holding the time of the last successful lookup.
    fn stamp_field(&self) -> &'static str;

    /// `Ok(None)` when the source knows nothing about `name`.
    async fn lookup(&self, fetcher: &Fetcher, name: &str) -> Result<Option<Value>, ServiceError>;
}

/// Looks up every stored person of the context's dataset, one batch per
/// collection. Documents already holding the field are skipped unless
/// `refresh` is set. A store that cannot be listed stops the run.
pub async fn enrich(
    ctx: &PipelineContext,
    config: &ScrapeConfig,
    enricher: &dyn Enricher,
    refresh: bool,
) -> Result<Vec<BatchReport>, ServiceError> {
    let fetcher = Fetcher::new(config)?;
    let fetcher = &fetcher;
    let field = enricher.field();
    let mut reports = Vec::with_capacity(ctx.dataset().categories.len());

    for category in ctx.dataset().categories {
        let partition = ctx.partition(category.source);
        let mut report = BatchReport::new(&partition.category);
        let mut pending = Vec::new();
        for doc in ctx.store().find_all(&partition.collection).await? {
            let name = doc.get("name").and_then(Value::as_str).map(str::to_string);
            match name {
                Some(name) if refresh || !doc.contains_key(field) => pending.push((name, doc)),
                _ => report.unchanged += 1,
            }
        }
        tracing::info!(
            "{}: looking up {} of {} people",
            partition.collection,
            pending.len(),
            pending.len() + report.unchanged
        );

        let results = run_pool(pending, config.workers, config.delay, |(name, _)| async move {
            enricher.lookup(fetcher, &name).await
        })
        .await;
        for ((name, mut doc), result) in results {
            match result {
                Ok(Some(data)) => {
                    doc.insert(field.to_string(), data);
                    doc.insert(enricher.stamp_field().to_string(), json!(now()));
                    let written = match stored_key(&partition, &doc) {
                        Some(key) => ctx.store().put_one(&partition.collection, &key, doc).await,
                        None => Err(ServiceError::internal_server_error("stored document has no key")),
                    };
                    match written {
                        Ok(()) => report.updated += 1,
                        Err(err) => {
                            tracing::error!("failed to save {} for {}: {}", field, name, err.msg);
                            report.add_failures(1);
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("{}: nothing found for {}", field, name);
                    report.unchanged += 1;
                }
                Err(err) => {
                    tracing::warn!("{} lookup for {} failed: {}", field, name, err.msg);
                    report.add_failures(1);
                }
            }
        }
        tracing::info!("{} {}", field, report);
        reports.push(report);
    }
    Ok(reports)
}

/// The key a document was stored under: its `_id`, or the one its
/// partition's policy derives from the stored content.
fn stored_key(partition: &Partition, doc: &Record) -> Option<DocumentKey> {
    if let Some(id) = doc.get("_id").and_then(Value::as_str) {
        return Some(DocumentKey(id.to_string()));
    }
    let identity = doc.get(FINGERPRINT_FIELD).and_then(Value::as_str)?;
    Some(partition.policy.document_key(doc, &IdentityKey(identity.to_string())))
}
