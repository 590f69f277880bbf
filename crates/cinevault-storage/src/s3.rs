use crate::traits::{CompletedPartRef, StorageClient, StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;

/// S3-compatible storage implementation.
///
/// The engine drives part-level retries itself, so the SDK's own retry
/// layer is disabled to avoid compounding backoff.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO, "https://nyc3.digitaloceanspaces.com" for DigitalOcean Spaces)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let region_provider = RegionProviderChain::first_try(aws_config::Region::new(region));

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(RetryConfig::disabled())
            .load()
            .await;

        // Configure S3 client with custom endpoint if provided (for S3-compatible providers)
        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .endpoint_url(endpoint)
                .region(config.region().cloned())
                .retry_config(RetryConfig::disabled());
            if let Some(provider) = config.credentials_provider().into_iter().next() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            // Path-style addressing is required by MinIO and most S3-compatible providers.
            s3_config_builder = s3_config_builder.force_path_style(true);

            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        Ok(S3Storage { client, bucket })
    }

    /// Wrap an existing SDK client, e.g. one built by test harnesses.
    pub fn from_client(client: Client, bucket: String) -> Self {
        S3Storage { client, bucket }
    }
}

/// Map an SDK failure to a classified [`StorageError`].
///
/// Transport-level failures (dispatch, timeout, malformed response) are
/// transient; service errors are bucketed by the provider's error code.
fn classify_sdk_error<E, R>(op: &'static str, err: &SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) => StorageError::Timeout { op },
        SdkError::DispatchFailure(_) => StorageError::Connection {
            op,
            message: "request dispatch failed".to_string(),
        },
        SdkError::ResponseError(_) => StorageError::Connection {
            op,
            message: "interrupted or malformed response".to_string(),
        },
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or("Unknown").to_string();
            let message = ctx
                .err()
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| code.clone());
            match code.as_str() {
                "SlowDown" | "ServiceUnavailable" | "Throttling" | "RequestLimitExceeded" => {
                    StorageError::Throttled { op, message }
                }
                "RequestTimeout" => StorageError::Timeout { op },
                "InternalError" => StorageError::Transient { op, message },
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                | "ExpiredToken" => StorageError::Unauthorized(message),
                "NoSuchBucket" | "NoSuchKey" | "NotFound" => StorageError::NotFound(message),
                "NoSuchUpload" => StorageError::NoSuchUpload(message),
                "InvalidPart" | "InvalidPartOrder" | "BadDigest" | "EntityTooSmall" => {
                    StorageError::InvalidPart(message)
                }
                _ => StorageError::Other { op, message },
            }
        }
        _ => StorageError::Other {
            op,
            message: "request could not be constructed".to_string(),
        },
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn initiate(&self, object_key: &str, content_type: &str) -> StorageResult<String> {
        let start = std::time::Instant::now();

        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %object_key,
                    "Failed to create multipart upload"
                );
                classify_sdk_error("initiate", &e)
            })?;

        let upload_id = result.upload_id().ok_or_else(|| StorageError::Other {
            op: "initiate",
            message: "no upload ID returned".to_string(),
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %object_key,
            upload_id = %upload_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Multipart upload initiated"
        );

        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %object_key,
                    part_number = part_number,
                    size_bytes = size,
                    "Failed to upload part"
                );
                classify_sdk_error("upload_part", &e)
            })?;

        let etag = result
            .e_tag()
            .ok_or_else(|| StorageError::Other {
                op: "upload_part",
                message: format!("no ETag returned for part {}", part_number),
            })?
            .to_string();

        tracing::debug!(
            bucket = %self.bucket,
            key = %object_key,
            part_number = part_number,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Part uploaded"
        );

        Ok(etag)
    }

    async fn complete(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPartRef],
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();

        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(p.etag.clone())
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %object_key,
                    parts = parts.len(),
                    "Failed to complete multipart upload"
                );
                classify_sdk_error("complete", &e)
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %object_key,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Multipart upload completed"
        );

        Ok(())
    }

    async fn abort(&self, object_key: &str, upload_id: &str) -> StorageResult<()> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %object_key,
                    upload_id = %upload_id,
                    "Multipart upload aborted"
                );
                Ok(())
            }
            Err(e) => match classify_sdk_error("abort", &e) {
                // Already aborted or completed; nothing left to clean up.
                StorageError::NoSuchUpload(_) | StorageError::NotFound(_) => Ok(()),
                other => {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %object_key,
                        "Failed to abort multipart upload"
                    );
                    Err(other)
                }
            },
        }
    }

    async fn put_object(
        &self,
        object_key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %object_key,
                    size_bytes = size,
                    "S3 put_object failed"
                );
                classify_sdk_error("put_object", &e)
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %object_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put_object successful"
        );

        Ok(result.e_tag().unwrap_or_default().to_string())
    }

    async fn head_object(&self, object_key: &str) -> StorageResult<u64> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(head) => Ok(head.content_length().unwrap_or(0) as u64),
            Err(e) => match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    HeadObjectError::NotFound(_) => {
                        Err(StorageError::NotFound(object_key.to_string()))
                    }
                    _ => Err(classify_sdk_error("head_object", &e)),
                },
                _ => Err(classify_sdk_error("head_object", &e)),
            },
        }
    }
}
