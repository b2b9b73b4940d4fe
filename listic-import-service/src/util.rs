use listic_ingest::dto::{DataFile, Partitioned, RunReport};
use listic_ingest::error::ServiceError;
use listic_ingest::files::parse_partitioned;
use listic_ingest::util::{download_object_from_s3, upload_object_to_s3};
use rusoto_s3::S3Client;
use serde_json::{json, Value};

pub async fn pull_data_file(client: &S3Client, data: &DataFile) -> Result<Partitioned, ServiceError> {
    let bytes = download_object_from_s3(client, data.bucket.clone(), data.key.clone()).await?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ServiceError::bad_request(format!("'{}' is not UTF-8 text", data.key)))?;
    parse_partitioned(&text)
}

/// Stores the report next to the data file and returns where it went along
/// with the report itself.
pub async fn push_report(
    client: &S3Client,
    data: &DataFile,
    report: &RunReport,
) -> Result<Value, ServiceError> {
    let object = serde_json::to_vec_pretty(report).map_err(ServiceError::internal_server_error)?;
    let key = report_key(&data.key);
    upload_object_to_s3(client, object, data.bucket.clone(), key.clone()).await?;
    Ok(json!({ "bucket": data.bucket, "key": key, "report": report }))
}

fn report_key(data_key: &str) -> String {
    let stem = data_key.strip_suffix(".json").unwrap_or(data_key);
    format!("{stem}.report.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lands_beside_the_data_file() {
        assert_eq!(report_key("input/Enseignants.json"), "input/Enseignants.report.json");
        assert_eq!(report_key("input/raw"), "input/raw.report.json");
    }
}
