//! Staging object store
//!
//! Path-addressed blob storage for staged snapshots. The publisher
//! only needs overwrite `put` semantics: staging keys are fixed per
//! entity, so reruns replace the prior object.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use crate::config::S3Config;
use crate::{IngestError, Result};

/// Durable staging storage. Implementations surface failures as
/// `Stage` errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `key`, overwriting any prior object.
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;
}

/// S3-backed staging store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self> {
        debug!(bucket = %config.bucket, region = %config.region, "initializing staging store");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "uap-staging",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, data))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let checksum = sha256_hex(&data);
        let size = data.len();
        debug!(
            "Uploading {} bytes to s3://{}/{} (sha256 {})",
            size, self.bucket, key, checksum
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                IngestError::Stage(format!("put s3://{}/{}: {}", self.bucket, key, e))
            })?;

        info!("Staged s3://{}/{} ({} bytes)", self.bucket, key, size);

        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let checksum = sha256_hex(b"Hello, World!");
        assert_eq!(
            checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_store_creation() {
        let config = S3Config {
            bucket: "uap-staging".to_string(),
            region: "us-east-1".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            access_key: "test".to_string(),
            secret_key: "test".to_string(),
            path_style: true,
        };
        assert!(S3Store::new(&config).is_ok());
    }
}
