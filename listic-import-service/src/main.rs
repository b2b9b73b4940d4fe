mod util;

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use lazy_static::lazy_static;
use listic_ingest::dataset;
use listic_ingest::dto::ImportConfig;
use listic_ingest::error::ServiceError;
use listic_ingest::pipeline::PipelineContext;
use listic_ingest::response::make_response_payload;
use listic_ingest::store::S3Store;
use listic_ingest::util::{get_env_var, get_region};
use rusoto_core::{Client, Region};
use rusoto_s3::S3Client;
use serde_json::Value;

lazy_static! {
    // AWS Region
    static ref REGION: Region = get_region().unwrap();
    // Bucket holding the document collections
    static ref STORE_BUCKET: String = get_env_var("STORE_BUCKET").unwrap();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .without_time()
        .init();
    run(service_fn(process)).await?;
    Ok(())
}

async fn process(event: LambdaEvent<ImportConfig>) -> Result<Value, Error> {
    let (config, _context) = event.into_parts();
    let result = import(config).await;
    make_response_payload(result)
}

async fn import(config: ImportConfig) -> Result<Value, ServiceError> {
    let start = std::time::Instant::now();
    let dataset = dataset::lookup(&config.dataset)?;
    let client = S3Client::new_with_client(Client::shared(), REGION.clone());
    let data = util::pull_data_file(&client, &config.data).await?;
    tracing::info!(
        "data file downloaded in {:.4} secs: {} categories",
        start.elapsed().as_secs_f64(),
        data.partitions.len()
    );

    let database = config.database.as_deref().unwrap_or(dataset.database);
    let store = S3Store::connect(REGION.clone(), &STORE_BUCKET, database).await?;
    let ctx = PipelineContext::new(Box::new(store), dataset).with_database(database);
    let start = std::time::Instant::now();
    let report = ctx.run(&data).await;
    tracing::info!(
        "import completed in {:.4} secs, {}",
        start.elapsed().as_secs_f64(),
        report.totals()
    );
    util::push_report(&client, &config.data, &report).await
}
