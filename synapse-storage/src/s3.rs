//! S3-family storage adapter (S3, GCS, R2 via S3-compatible endpoints).
//!
//! Auth is resolved per-request by the SDK credential chain. Custom
//! endpoints switch to path-style addressing, which is what GCS and R2
//! interoperability modes expect.

use crate::adapter::{join_prefix, sorted_keys, StorageAdapter};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::sync::Arc;
use synapse_core::config::StorageConfig;
use synapse_core::{Result, SynapseError};
use tracing::debug;

/// Object-storage adapter over the AWS SDK.
#[derive(Debug, Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Adapter {
    /// Connect using the default credential chain plus any configured
    /// region/endpoint overrides.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| SynapseError::config("S3 storage requires storage.bucket"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            prefix: config.prefix.clone(),
        })
    }

    /// Wrap an already-built client, for localstack-style tests.
    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        join_prefix(&self.prefix, key)
    }
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    async fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let full = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| SynapseError::unavailable(&full, e.to_string()))?;
        debug!(key = %full, "wrote object");
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await;

        match response {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| SynapseError::unavailable(&full, e.to_string()))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(e) => {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(SynapseError::unavailable(&full, service.to_string()))
                }
            }
        }
    }

    async fn delete_raw(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| SynapseError::unavailable(&full, e.to_string()))?;
        Ok(())
    }

    async fn list_raw(&self, prefix: &str) -> Result<Vec<String>> {
        let full = self.full_key(prefix);
        let strip = if self.prefix.is_empty() {
            0
        } else {
            self.prefix.trim_end_matches('/').len() + 1
        };

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| SynapseError::unavailable(&full, e.to_string()))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key[strip..].to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(sorted_keys(keys))
    }

    fn with_prefix(&self, prefix: &str) -> Arc<dyn StorageAdapter> {
        Arc::new(Self {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            prefix: join_prefix(&self.prefix, prefix),
        })
    }

    fn describe(&self) -> String {
        format!("s3 (bucket {})", self.bucket)
    }
}
