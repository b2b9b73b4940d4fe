use crate::error::ServiceError;
use crate::response::Status;
use futures::stream::TryStreamExt;
use rusoto_core::{Region, RusotoError};
use rusoto_s3::{
    GetObjectError, GetObjectRequest, HeadBucketRequest, ListObjectsV2Request, PutObjectRequest,
    S3Client, S3,
};
use std::env;
use std::str::FromStr;

pub fn get_region() -> Result<Region, ServiceError> {
    match env::var("REGION") {
        Ok(val) => parse_region(&val),
        _ => Err(ServiceError::internal_server_error(
            "Environment variable 'REGION' not found",
        )),
    }
}

pub fn parse_region(val: &str) -> Result<Region, ServiceError> {
    Region::from_str(val).map_err(|_| ServiceError {
        msg: format!("Unable to parse region {}", val),
        status: Status::InternalServerError,
    })
}

pub fn get_env_var(name: &str) -> Result<String, ServiceError> {
    env::var(name).map_err(|_| {
        ServiceError::internal_server_error(&format!("Environment variable '{}' not found", name))
    })
}

/// Fails when the bucket does not exist or the credentials cannot reach it.
pub async fn check_bucket(client: &S3Client, bucket: String) -> Result<(), ServiceError> {
    let request = HeadBucketRequest {
        bucket: bucket.clone(),
        ..Default::default()
    };
    client
        .head_bucket(request)
        .await
        .map_err(|err| ServiceError::internal_server_error(format!("bucket '{bucket}': {err}")))
}

pub async fn download_object_from_s3(
    client: &S3Client,
    bucket: String,
    key: String,
) -> Result<Vec<u8>, ServiceError> {
    match fetch_object_from_s3(client, bucket, key.clone()).await? {
        Some(bytes) => Ok(bytes),
        None => Err(ServiceError::bad_request(format!("Object '{key}' not found"))),
    }
}

/// Like `download_object_from_s3` but a missing key is `Ok(None)`.
pub async fn fetch_object_from_s3(
    client: &S3Client,
    bucket: String,
    key: String,
) -> Result<Option<Vec<u8>>, ServiceError> {
    let request = GetObjectRequest {
        bucket,
        key,
        ..Default::default()
    };
    let mut object = match client.get_object(request).await {
        Ok(object) => object,
        Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => return Ok(None),
        Err(err) => return Err(ServiceError::internal_server_error(err)),
    };
    let body = object
        .body
        .take()
        .ok_or(ServiceError::internal_server_error(
            "Unable to extract body",
        ))?;
    body.map_ok(|b| b.to_vec())
        .try_concat()
        .await
        .map(Some)
        .map_err(ServiceError::internal_server_error)
}

pub async fn upload_object_to_s3(
    client: &S3Client,
    object: Vec<u8>,
    bucket: String,
    key: String,
) -> Result<(), ServiceError> {
    let request = PutObjectRequest {
        bucket,
        key,
        body: Some(object.into()),
        content_type: Some("application/json".to_string()),
        ..Default::default()
    };
    client
        .put_object(request)
        .await
        .map(|_| ())
        .map_err(ServiceError::internal_server_error)
}

/// Every object key under `prefix`, following continuation tokens.
pub async fn list_keys_in_s3(
    client: &S3Client,
    bucket: String,
    prefix: String,
) -> Result<Vec<String>, ServiceError> {
    let mut keys = Vec::new();
    let mut continuation_token = None;
    loop {
        let request = ListObjectsV2Request {
            bucket: bucket.clone(),
            prefix: Some(prefix.clone()),
            continuation_token: continuation_token.take(),
            ..Default::default()
        };
        let page = client
            .list_objects_v2(request)
            .await
            .map_err(ServiceError::internal_server_error)?;
        keys.extend(
            page.contents
                .unwrap_or_default()
                .into_iter()
                .filter_map(|object| object.key),
        );
        match (page.is_truncated, page.next_continuation_token) {
            (Some(true), Some(token)) => continuation_token = Some(token),
            _ => break,
        }
    }
    Ok(keys)
}
