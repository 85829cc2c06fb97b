use crate::detector;
use crate::keys::{content_disposition, generate_storage_key};
use crate::traits::{Disposition, DownloadInfo, SavedObject, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;
use vault_core::constants::{DEFAULT_S3_REGION, PRESIGNED_URL_TTL};
use vault_core::models::S3Settings;
use vault_core::BackendType;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Error codes from bucket creation that mean the bucket is usable anyway.
const TOLERATED_CREATE_CODES: &[&str] = &[
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "SecondLevelDomainForbidden",
];

/// S3-compatible object storage implementation
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    /// Client signing against the public-facing endpoint, when one is configured.
    public_client: Option<Client>,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("public_endpoint", &self.public_client.is_some())
            .finish()
    }
}

/// Prefix a scheme-less public endpoint with `https://`.
pub fn normalize_public_endpoint(public_url: &str) -> String {
    let trimmed = public_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

impl S3Storage {
    /// Build clients for `settings` and make sure the bucket exists.
    ///
    /// Bucket problems other than "already exists" style answers are logged and left
    /// for `check_connectivity` to report.
    pub async fn connect(settings: &S3Settings) -> StorageResult<Self> {
        let storage = Self::from_settings(settings).await?;
        storage.ensure_bucket().await;
        Ok(storage)
    }

    /// Build clients without touching the network.
    pub async fn from_settings(settings: &S3Settings) -> StorageResult<Self> {
        if settings.bucket_name.trim().is_empty() {
            return Err(StorageError::ConfigError(
                "S3 bucket_name must not be empty".to_string(),
            ));
        }

        let region = if settings.region_name.trim().is_empty() {
            DEFAULT_S3_REGION.to_string()
        } else {
            settings.region_name.trim().to_string()
        };
        let endpoint_url = settings
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/').to_string());

        let client = Self::build_client(settings, &region, endpoint_url.as_deref()).await;

        let public_client = match settings
            .public_url
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            Some(public_url) => {
                let endpoint = normalize_public_endpoint(public_url);
                Some(Self::build_client(settings, &region, Some(&endpoint)).await)
            }
            None => None,
        };

        Ok(S3Storage {
            client,
            public_client,
            bucket: settings.bucket_name.trim().to_string(),
            region,
            endpoint_url,
        })
    }

    async fn build_client(settings: &S3Settings, region: &str, endpoint: Option<&str>) -> Client {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "vault-backend-config",
        );

        let retry_config = RetryConfig::standard().with_max_attempts(5);
        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .operation_timeout(OPERATION_TIMEOUT)
            .build();

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .credentials_provider(credentials)
            .retry_config(retry_config)
            .timeout_config(timeout_config)
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }

        Client::from_conf(s3_config.build())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check the bucket and try to create it when it is missing.
    async fn ensure_bucket(&self) {
        let err = match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, "S3 bucket exists");
                return;
            }
            Err(err) => err,
        };

        let missing = matches!(err.as_service_error(), Some(HeadBucketError::NotFound(_)))
            || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
        if !missing {
            tracing::warn!(
                error = %err,
                bucket = %self.bucket,
                "S3 bucket check failed; continuing without creating it"
            );
            return;
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.endpoint_url.is_none() && self.region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(
                    bucket = %self.bucket,
                    region = %self.region,
                    "S3 bucket created"
                );
            }
            Err(err) => {
                let tolerated = matches!(
                    err.as_service_error(),
                    Some(CreateBucketError::BucketAlreadyExists(_))
                        | Some(CreateBucketError::BucketAlreadyOwnedByYou(_))
                ) || err
                    .as_service_error()
                    .and_then(|e| e.code())
                    .map(|code| TOLERATED_CREATE_CODES.contains(&code))
                    .unwrap_or(false);

                if tolerated {
                    tracing::debug!(
                        bucket = %self.bucket,
                        error = %err,
                        "S3 bucket already usable"
                    );
                } else {
                    tracing::warn!(
                        error = %err,
                        bucket = %self.bucket,
                        "S3 bucket creation failed"
                    );
                }
            }
        }
    }

    async fn head(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(e)) if matches!(e.err(), HeadObjectError::NotFound(_)) => {
                Ok(false)
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn presign_get(
        &self,
        client: &Client,
        key: &str,
        filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<String> {
        let config = PresigningConfig::expires_in(PRESIGNED_URL_TTL)
            .map_err(|e| StorageError::BackendError(format!("Invalid presign config: {}", e)))?;

        let request = client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_response_content_disposition(
                filename.map(|name| content_disposition(disposition.as_str(), Some(name))),
            )
            .presigned(config)
            .await
            .map_err(|e| {
                StorageError::BackendError(format!("Failed to presign GET for {}: {}", key, e))
            })?;

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn save(
        &self,
        content: Bytes,
        filename: &str,
        content_type: Option<&str>,
        owner: Option<Uuid>,
    ) -> StorageResult<SavedObject> {
        let key = generate_storage_key(owner, filename, Utc::now().date_naive());
        let type_info = detector::detect(filename, Some(content.as_ref()), content_type);
        let size = content.len() as u64;
        let start = std::time::Instant::now();

        // Explicit length avoids chunked transfer encoding, which several
        // S3-compatible services reject.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&type_info.mime_type)
            .content_length(size as i64)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            category = %type_info.category,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(SavedObject {
            storage_path: key,
            size,
            type_info,
        })
    }

    async fn delete(&self, storage_path: &str) -> bool {
        match self.head(storage_path).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    bucket = %self.bucket,
                    key = %storage_path,
                    "S3 object already absent"
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_path,
                    "S3 existence check failed"
                );
                return false;
            }
        }

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, key = %storage_path, "S3 delete successful");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_path,
                    "S3 delete failed"
                );
                false
            }
        }
    }

    async fn exists(&self, storage_path: &str) -> bool {
        match self.head(storage_path).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(error = %e, key = %storage_path, "S3 exists check failed");
                false
            }
        }
    }

    async fn read(&self, storage_path: &str) -> StorageResult<Bytes> {
        let start = std::time::Instant::now();

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref se)
                    if matches!(se.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    StorageError::NotFound(storage_path.to_string())
                }
                other => StorageError::DownloadFailed(other.to_string()),
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("Failed to read S3 body: {}", e)))?
            .into_bytes();

        tracing::debug!(
            bucket = %self.bucket,
            key = %storage_path,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 read successful"
        );

        Ok(data)
    }

    async fn get_download_info(
        &self,
        storage_path: &str,
        filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<DownloadInfo> {
        let url = self
            .presign_get(&self.client, storage_path, filename, disposition)
            .await?;

        Ok(DownloadInfo::Presigned {
            url,
            bucket: self.bucket.clone(),
            key: storage_path.to_string(),
            expires_in: PRESIGNED_URL_TTL,
        })
    }

    async fn get_public_url(
        &self,
        storage_path: &str,
        filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<Option<String>> {
        if let Some(public_client) = &self.public_client {
            match self
                .presign_get(public_client, storage_path, filename, disposition)
                .await
            {
                Ok(url) => return Ok(Some(url)),
                Err(e) => tracing::warn!(
                    error = %e,
                    key = %storage_path,
                    "Public endpoint presign failed; using standard endpoint"
                ),
            }
        }

        self.presign_get(&self.client, storage_path, filename, disposition)
            .await
            .map(Some)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                StorageError::ConfigError(match status {
                    Some(404) => format!("S3 bucket '{}' does not exist", self.bucket),
                    Some(403) => format!(
                        "Access to S3 bucket '{}' denied; check credentials",
                        self.bucket
                    ),
                    _ => format!("S3 bucket '{}' unreachable: {}", self.bucket, e),
                })
            })?;
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::S3
    }
}

#[cfg(all(test, feature = "storage-s3"))]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            bucket_name: "vault-test".to_string(),
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "wJalrXUtnFEMI/K7MDENG".to_string(),
            endpoint_url: Some("http://127.0.0.1:9000/".to_string()),
            region_name: String::new(),
            public_url: Some("files.example.com".to_string()),
            force_path_style: true,
        }
    }

    #[test]
    fn public_endpoint_gets_https_scheme() {
        assert_eq!(
            normalize_public_endpoint("files.example.com/"),
            "https://files.example.com"
        );
        assert_eq!(
            normalize_public_endpoint("http://localhost:9000"),
            "http://localhost:9000"
        );
    }

    #[tokio::test]
    async fn from_settings_normalizes_without_network() {
        let storage = S3Storage::from_settings(&settings()).await.unwrap();
        assert_eq!(storage.bucket(), "vault-test");
        assert_eq!(storage.region, "us-east-1");
        assert_eq!(
            storage.endpoint_url.as_deref(),
            Some("http://127.0.0.1:9000")
        );
        assert!(storage.public_client.is_some());
        assert_eq!(storage.backend_type(), BackendType::S3);
    }

    #[tokio::test]
    async fn presigned_download_carries_disposition() {
        let storage = S3Storage::from_settings(&settings()).await.unwrap();
        let info = storage
            .get_download_info(
                "owner/20240101/abc.pdf",
                Some("café.pdf"),
                Disposition::Attachment,
            )
            .await
            .unwrap();

        match info {
            DownloadInfo::Presigned {
                url,
                bucket,
                key,
                expires_in,
            } => {
                assert_eq!(bucket, "vault-test");
                assert_eq!(key, "owner/20240101/abc.pdf");
                assert_eq!(expires_in, Duration::from_secs(3600));
                assert!(url.starts_with("http://127.0.0.1:9000/vault-test/owner/20240101/abc.pdf"));
                assert!(url.contains("response-content-disposition="));
                assert!(url.contains("X-Amz-Expires=3600"));
            }
            other => panic!("unexpected download info {:?}", other),
        }
    }

    #[tokio::test]
    async fn public_url_signs_against_public_host() {
        let storage = S3Storage::from_settings(&settings()).await.unwrap();
        let url = storage
            .get_public_url("k.txt", None, Disposition::Inline)
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with("https://files.example.com/vault-test/k.txt"));
    }

    #[tokio::test]
    async fn empty_bucket_is_config_error() {
        let mut bad = settings();
        bad.bucket_name = " ".to_string();
        assert!(matches!(
            S3Storage::from_settings(&bad).await,
            Err(StorageError::ConfigError(_))
        ));
    }

    /// Round trip against a live S3-compatible service (e.g. MinIO).
    /// Runs only when `VAULT_TEST_S3_ENDPOINT` is set.
    #[tokio::test]
    async fn save_then_read_round_trip_live() {
        let Ok(endpoint) = std::env::var("VAULT_TEST_S3_ENDPOINT") else {
            return;
        };
        let live = S3Settings {
            bucket_name: std::env::var("VAULT_TEST_S3_BUCKET")
                .unwrap_or_else(|_| "vault-it".to_string()),
            access_key: std::env::var("VAULT_TEST_S3_ACCESS_KEY")
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: std::env::var("VAULT_TEST_S3_SECRET_KEY")
                .unwrap_or_else(|_| "minioadmin".to_string()),
            endpoint_url: Some(endpoint),
            region_name: "us-east-1".to_string(),
            public_url: None,
            force_path_style: true,
        };

        let storage = S3Storage::connect(&live).await.unwrap();
        storage.check_connectivity().await.unwrap();

        let data = Bytes::from_static(b"%PDF-1.4 round trip \x00\xff");
        let saved = storage
            .save(data.clone(), "round.pdf", None, Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(saved.type_info.mime_type, "application/pdf");
        assert_eq!(storage.read(&saved.storage_path).await.unwrap(), data);

        assert!(storage.delete(&saved.storage_path).await);
        assert!(!storage.delete(&saved.storage_path).await);
    }
}
