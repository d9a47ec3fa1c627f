//! Files Manager: a thin façade over the object store.
//!
//! The pipeline only ever needs two operations — put a blob, load a blob —
//! so the trait stays minimal; `S3Files` backs it with any S3-compatible
//! endpoint (MinIO in a typical deployment).

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    #[error("failed to put object {bucket}/{object}: {source}")]
    Put {
        bucket: String,
        object: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to load object {bucket}/{object}: {source}")]
    Load {
        bucket: String,
        object: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type FilesResult<T> = Result<T, FilesError>;

/// Façade over the object store: `Put(bucket, name, bytes)` and
/// `Load(bucket, name) -> bytes`.
#[async_trait]
pub trait FilesManager: Send + Sync {
    async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> FilesResult<()>;
    async fn load(&self, bucket: &str, name: &str) -> FilesResult<Vec<u8>>;
}

/// S3-compatible object store client, pointed at a MinIO endpoint via
/// path-style addressing.
pub struct S3Files {
    client: Client,
}

impl S3Files {
    pub async fn new(config: &Config) -> Self {
        let credentials = Credentials::new(
            &config.minio_access_key,
            &config.minio_secret_key,
            None,
            None,
            "coderunner-static",
        );
        let endpoint = if config.minio_endpoint.starts_with("http") {
            config.minio_endpoint.clone()
        } else {
            format!("http://{}", config.minio_endpoint)
        };
        let s3_config = aws_sdk_s3::config::Builder::new()
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl FilesManager for S3Files {
    async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> FilesResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(name)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| FilesError::Put {
                bucket: bucket.to_string(),
                object: name.to_string(),
                source: e.into(),
            })?;
        Ok(())
    }

    async fn load(&self, bucket: &str, name: &str) -> FilesResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| FilesError::Load {
                bucket: bucket.to_string(),
                object: name.to_string(),
                source: e.into(),
            })?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| FilesError::Load {
                bucket: bucket.to_string(),
                object: name.to_string(),
                source: e.into(),
            })?;
        Ok(data.into_bytes().to_vec())
    }
}

/// In-memory stand-in shared by this crate's unit tests (compile/test
/// handler tests included), feature-gated out of non-test builds.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryFiles {
        objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    }

    #[async_trait]
    impl FilesManager for MemoryFiles {
        async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> FilesResult<()> {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), name.to_string()), bytes);
            Ok(())
        }

        async fn load(&self, bucket: &str, name: &str) -> FilesResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| FilesError::Load {
                    bucket: bucket.to_string(),
                    object: name.to_string(),
                    source: anyhow::anyhow!("not found"),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemoryFiles;
    use super::*;

    #[tokio::test]
    async fn memory_files_round_trips_a_put_object() {
        let files = MemoryFiles::default();
        files.put("code", "h.cpp", b"int main(){}".to_vec()).await.unwrap();
        let loaded = files.load("code", "h.cpp").await.unwrap();
        assert_eq!(loaded, b"int main(){}".to_vec());
    }

    #[tokio::test]
    async fn loading_a_missing_object_fails() {
        let files = MemoryFiles::default();
        assert!(files.load("code", "missing.cpp").await.is_err());
    }
}
