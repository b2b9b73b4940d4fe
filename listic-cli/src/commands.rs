use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use listic_ingest::dataset::{self, Dataset, OFFERS, PERSONNEL, PROJECTS};
use listic_ingest::dto::{Partitioned, RunReport};
use listic_ingest::enrich::{self as publications, DblpEnricher, Enricher, HalEnricher};
use listic_ingest::error::ServiceError;
use listic_ingest::files::{load_partitioned, save_partitioned, write_csv};
use listic_ingest::pipeline::PipelineContext;
use listic_ingest::scrape::offers::{parse_offer_listing, OfferPdfExtractor};
use listic_ingest::scrape::profile::ProfileExtractor;
use listic_ingest::scrape::projects::parse_project_tables;
use listic_ingest::scrape::tables::parse_member_table;
use listic_ingest::scrape::{harvest, Fetcher, Harvest, Source, SourceList};
use listic_ingest::store::{DocumentStore, MemoryStore, S3Store};
use listic_ingest::util::parse_region;

use crate::{GlobalOpts, Publications, StoreKind};

const STAFF_CATEGORY: &str = "administratif_et_technique";

pub async fn scrape_people(
    global: &GlobalOpts,
    sources: &Path,
    staff_page: Option<&str>,
    output: &Path,
    ingest: bool,
) -> Result<(), ServiceError> {
    let text = fs::read_to_string(sources).map_err(|err| {
        ServiceError::bad_request(format!("cannot read {}: {}", sources.display(), err))
    })?;
    let list = SourceList::parse(&text)?;
    let pages: BTreeMap<String, Vec<Source>> = list
        .0
        .into_iter()
        .map(|(category, urls)| (category, urls.iter().map(|url| Source::new(url)).collect()))
        .collect();

    let config = global.scrape_config();
    let mut harvested = harvest(&config, &ProfileExtractor, pages).await?;
    if let Some(url) = staff_page {
        match Fetcher::new(&config)?.get_text(url).await {
            Ok(html) => {
                let staff = parse_member_table(&html, url);
                tracing::info!("{} staff members listed on {}", staff.len(), url);
                harvested.data.insert(STAFF_CATEGORY, staff);
            }
            Err(err) => {
                tracing::warn!("staff page {}: {}", url, err.msg);
                *harvested.failures.entry(STAFF_CATEGORY.to_string()).or_insert(0) += 1;
            }
        }
    }
    let complete = save_partitioned(output, &harvested.data)?;
    if ingest {
        ingest_harvest(global, &PERSONNEL, harvested, &complete).await?;
    }
    Ok(())
}

pub async fn scrape_projects(
    global: &GlobalOpts,
    url: &str,
    output: &Path,
    ingest: bool,
) -> Result<(), ServiceError> {
    let html = Fetcher::new(&global.scrape_config())?.get_text(url).await?;
    let data = parse_project_tables(&html);
    for (category, records) in &data.partitions {
        tracing::info!("{}: {} projects", category, records.len());
    }
    let complete = save_partitioned(output, &data)?;
    if ingest {
        let harvested = Harvest {
            data,
            ..Default::default()
        };
        ingest_harvest(global, &PROJECTS, harvested, &complete).await?;
    }
    Ok(())
}

pub async fn scrape_offers(
    global: &GlobalOpts,
    url: &str,
    output: &Path,
    with_pdf: bool,
    ingest: bool,
) -> Result<(), ServiceError> {
    let config = global.scrape_config();
    let html = Fetcher::new(&config)?.get_text(url).await?;
    let listing = parse_offer_listing(&html, url);

    let harvested = if with_pdf {
        let sources: BTreeMap<String, Vec<Source>> = listing
            .partitions
            .iter()
            .map(|(category, offers)| {
                let sources = offers
                    .iter()
                    .filter_map(|offer| {
                        let url = offer.get("url")?.as_str()?;
                        Some(Source::with_seed(url, offer.clone()))
                    })
                    .collect();
                (category.clone(), sources)
            })
            .collect();
        let mut harvested = harvest(&config, &OfferPdfExtractor, sources).await?;
        harvested.data.extras = listing.extras;
        harvested
    } else {
        Harvest {
            data: listing,
            ..Default::default()
        }
    };
    let complete = save_partitioned(output, &harvested.data)?;
    if ingest {
        ingest_harvest(global, &OFFERS, harvested, &complete).await?;
    }
    Ok(())
}

pub async fn import(global: &GlobalOpts, dataset: &str, input: &Path) -> Result<(), ServiceError> {
    let dataset = dataset::lookup(dataset)?;
    let data = load_partitioned(input)?;
    let complete = data.clone();
    ingest_harvest(global, dataset, Harvest { data, ..Default::default() }, &complete).await
}

pub async fn enrich(global: &GlobalOpts, source: Publications, refresh: bool) -> Result<(), ServiceError> {
    let enrichers: Vec<Box<dyn Enricher>> = match source {
        Publications::Hal => vec![Box::new(HalEnricher::default())],
        Publications::Dblp => vec![Box::new(DblpEnricher::default())],
        Publications::All => vec![Box::new(HalEnricher::default()), Box::new(DblpEnricher::default())],
    };
    let database = global.database.as_deref().unwrap_or(PERSONNEL.database);
    let store = open_store(global, database).await?;
    let ctx = PipelineContext::new(store, &PERSONNEL).with_database(database);
    let config = global.scrape_config();

    let mut reports = Vec::new();
    for enricher in &enrichers {
        let batches = publications::enrich(&ctx, &config, enricher.as_ref(), refresh).await?;
        reports.push(RunReport {
            dataset: format!("{} {}", PERSONNEL.name, enricher.field()),
            database: database.to_string(),
            batches,
            snapshot: None,
        });
    }
    for report in &reports {
        tracing::info!("{}: {}", report.dataset, report.totals());
    }
    match serde_json::to_string_pretty(&reports) {
        Ok(json) => println!("{json}"),
        Err(err) => tracing::warn!("cannot print the report: {}", err),
    }
    Ok(())
}

pub fn export_csv(input: &Path, output_dir: &Path) -> Result<(), ServiceError> {
    let data = load_partitioned(input)?;
    fs::create_dir_all(output_dir).map_err(ServiceError::internal_server_error)?;
    for (category, records) in &data.partitions {
        let path = output_dir.join(format!("{category}.csv"));
        let file = File::create(&path).map_err(|err| {
            ServiceError::internal_server_error(format!("cannot create {}: {}", path.display(), err))
        })?;
        write_csv(records, file)?;
        tracing::info!("{} rows written to {}", records.len(), path.display());
    }
    Ok(())
}

async fn open_store(
    global: &GlobalOpts,
    database: &str,
) -> Result<Box<dyn DocumentStore>, ServiceError> {
    match global.store {
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store: nothing outlives this run");
            Ok(Box::new(MemoryStore::new()))
        }
        StoreKind::S3 => {
            let bucket = global
                .bucket
                .as_deref()
                .ok_or_else(|| ServiceError::bad_request("--bucket (or STORE_BUCKET) is required with --store s3"))?;
            let region = global
                .region
                .as_deref()
                .ok_or_else(|| ServiceError::bad_request("--region (or REGION) is required with --store s3"))?;
            let store = S3Store::connect(parse_region(region)?, bucket, database).await?;
            Ok(Box::new(store))
        }
    }
}

async fn ingest_harvest(
    global: &GlobalOpts,
    dataset: &'static Dataset,
    harvested: Harvest,
    complete: &Partitioned,
) -> Result<(), ServiceError> {
    let database = global.database.as_deref().unwrap_or(dataset.database);
    let store = open_store(global, database).await?;
    let ctx = PipelineContext::new(store, dataset).with_database(database);
    let mut report = ctx.run_with_snapshot(&harvested.data, complete).await;
    report.add_failures(&harvested.failures);
    print_report(&ctx, &report, complete).await;
    Ok(())
}

async fn print_report(ctx: &PipelineContext, report: &RunReport, data: &Partitioned) {
    for batch in &report.batches {
        tracing::info!("{}", batch);
    }
    tracing::info!("{}", report.totals());
    match report.snapshot {
        Some(outcome) => tracing::info!(
            "snapshot: {:?} ({} categories, {} records)",
            outcome,
            data.partitions.len(),
            data.statistics().values().sum::<usize>()
        ),
        None => tracing::error!("snapshot not saved"),
    }
    for (collection, count) in ctx.collection_counts().await {
        match count {
            Ok(n) => tracing::info!("{}.{}: {} documents", report.database, collection, n),
            Err(err) => tracing::warn!("{}.{}: {}", report.database, collection, err.msg),
        }
    }
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => tracing::warn!("cannot print the report: {}", err),
    }
}
