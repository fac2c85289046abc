use async_trait::async_trait;
use base64::Engine;
use futures::future::try_join_all;
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{AppConfig, StorageBackend};

/// Turns provider output into durable, publicly reachable URLs.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Make the backend ready to accept uploads. Called once at startup.
    async fn prepare(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// One URL per input, in input order.
    async fn materialize_urls(&self, images: Vec<String>, job_id: Uuid) -> Result<Vec<String>, StorageError>;
}

/// Storage disabled: provider output is returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughStorage;

#[async_trait]
impl ImageStorage for PassthroughStorage {
    async fn materialize_urls(&self, images: Vec<String>, _job_id: Uuid) -> Result<Vec<String>, StorageError> {
        Ok(images)
    }
}

/// Client for S3-compatible object storage (MinIO, R2, S3).
///
/// `data:` URIs are uploaded; `http(s)` URLs are already public and pass
/// through unchanged.
pub struct S3ImageStorage {
    bucket: Box<Bucket>,
    bucket_name: String,
    public_url: String,
    region: Region,
    credentials: Credentials,
    http: reqwest::Client,
}

/// Presigned URLs for bucket administration only live this long.
const ADMIN_URL_EXPIRY_SECS: u32 = 300;

impl S3ImageStorage {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            region,
            credentials,
            http: reqwest::Client::new(),
        })
    }

    /// Create the bucket if it is missing and open it for anonymous reads.
    ///
    /// An existing bucket is left as is, policy included.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self.bucket.exists().await? {
            debug!(bucket = %self.bucket_name, "Bucket already exists");
            return Ok(());
        }

        let response = Bucket::create_with_path_style(
            &self.bucket_name,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await?;
        if !response.success() {
            return Err(StorageError::Provision {
                bucket: self.bucket_name.clone(),
                status: response.response_code,
            });
        }

        self.put_public_read_policy().await?;
        info!(bucket = %self.bucket_name, "Created bucket");
        Ok(())
    }

    /// rust-s3 has no bucket policy call, so the `PUT ?policy` request is
    /// presigned and sent with reqwest.
    async fn put_public_read_policy(&self) -> Result<(), StorageError> {
        let url = self.policy_url().await?;
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(public_read_policy(&self.bucket_name).to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Provision {
                bucket: self.bucket_name.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn policy_url(&self) -> Result<String, StorageError> {
        let queries = HashMap::from([("policy".to_string(), String::new())]);
        Ok(self
            .bucket
            .presign_put("", ADMIN_URL_EXPIRY_SECS, None, Some(queries))
            .await?)
    }

    /// Public URL for an object key.
    pub fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_url, self.bucket_name, key)
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Upload {
                key: key.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn materialize_one(&self, image: String, job_id: Uuid, index: usize) -> Result<String, StorageError> {
        if image.starts_with("http://") || image.starts_with("https://") {
            return Ok(image);
        }

        let decoded = decode_data_uri(&image)?;
        let key = format!("images/{}/{}.{}", job_id, index, decoded.extension);
        self.upload(&key, &decoded.bytes, decoded.content_type).await?;

        let url = self.public_url_for(&key);
        debug!(job_id = %job_id, %url, bytes = decoded.bytes.len(), "Uploaded image");
        Ok(url)
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn prepare(&self) -> Result<(), StorageError> {
        self.ensure_bucket().await
    }

    async fn materialize_urls(&self, images: Vec<String>, job_id: Uuid) -> Result<Vec<String>, StorageError> {
        try_join_all(
            images
                .into_iter()
                .enumerate()
                .map(|(index, image)| self.materialize_one(image, job_id, index)),
        )
        .await
    }
}

/// Bucket policy granting anonymous `s3:GetObject` on every key.
pub fn public_read_policy(bucket: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "AWS": "*" },
                "Action": ["s3:GetObject"],
                "Resource": [format!("arn:aws:s3:::{bucket}/*")]
            }
        ]
    })
}

/// Run the backend's startup preparation, logging instead of failing.
///
/// A storage outage at boot should not keep the API down; uploads report
/// their own errors per job.
pub async fn prepare_storage(storage: &dyn ImageStorage) -> bool {
    match storage.prepare().await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Error ensuring bucket exists");
            false
        }
    }
}

/// An image payload decoded from a `data:` URI.
#[derive(Debug)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Decode `data:<mime>;base64,<payload>`.
///
/// The declared mime type is ignored; the format is sniffed from the bytes
/// so a mislabelled payload still gets the right extension.
pub fn decode_data_uri(uri: &str) -> Result<DecodedImage, StorageError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| StorageError::UnsupportedPayload("expected a data: URI or http(s) URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| StorageError::UnsupportedPayload("data URI has no payload".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(StorageError::UnsupportedPayload(
            "only base64 data URIs are supported".to_string(),
        ));
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    let format = image::guess_format(&bytes)
        .map_err(|e| StorageError::UnsupportedPayload(format!("unrecognized image data: {e}")))?;

    Ok(DecodedImage {
        bytes,
        content_type: format.to_mime_type(),
        extension: format.extensions_str().first().copied().unwrap_or("bin"),
    })
}

pub fn storage_from_config(config: &AppConfig) -> Result<Arc<dyn ImageStorage>, StorageError> {
    let storage: Arc<dyn ImageStorage> = match config.storage_backend {
        StorageBackend::None => Arc::new(PassthroughStorage),
        StorageBackend::S3 => {
            info!(endpoint = %config.s3_endpoint, bucket = %config.s3_bucket, "Using S3 image storage");
            Arc::new(S3ImageStorage::new(
                &config.s3_bucket,
                &config.s3_region,
                &config.s3_endpoint,
                &config.s3_access_key,
                &config.s3_secret_key,
                &config.s3_public_url,
            )?)
        }
    };
    Ok(storage)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Upload of {key} returned HTTP {status}")]
    Upload { key: String, status: u16 },

    #[error("Invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Unsupported image payload: {0}")]
    UnsupportedPayload(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Provisioning bucket {bucket} returned HTTP {status}")]
    Provision { bucket: String, status: u16 },

    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),
}
