//! Object-store capability: durably store bytes under a logical path.

use async_trait::async_trait;
use thiserror::Error;

pub mod http;

pub use http::HttpObjectStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid object path {bucket}/{key}: {source}")]
    InvalidPath {
        bucket: String,
        key: String,
        source: url::ParseError,
    },
}

/// Accepts bytes under `bucket/key` and stores them durably.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn store(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}
