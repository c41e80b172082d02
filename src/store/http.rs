//! HTTP object-store client.
//!
//! Uploads are a single POST of the raw bytes to
//! `<endpoint>/api/v1/storage/<bucket>/<key>`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::debug;

use super::{ObjectStore, StoreError};

pub struct HttpObjectStore {
    endpoint: Url,
    client: Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            client: Client::new(),
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        self.endpoint
            .join(&format!("/api/v1/storage/{bucket}/{key}"))
            .map_err(|source| StoreError::InvalidPath {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn store(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let url = self.object_url(bucket, key)?;
        debug!(url = %url, size = bytes.len(), "uploading object");
        self.client
            .post(url)
            .header(CONTENT_TYPE, "binary/octet-stream")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
