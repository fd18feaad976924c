//! Object store adapter.
//!
//! Backends expose put/get/list/delete over full storage keys inside one
//! bucket, plus the helpers the pipeline needs around them (head, presigned
//! downloads and runner-facing URIs).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid store request: {0}")]
    InvalidInput(String),

    /// Network, auth or service failure; the operation may succeed later.
    #[error("object store transport error: {0}")]
    Transport(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Body chunks flowing in or out of the store.
pub type ChunkStream<'a> = BoxStream<'a, StoreResult<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MediaObject {
    pub key: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_modified: OffsetDateTime,
    pub storage_class: Option<String>,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Streams `body` to `key`. The object only becomes visible once the whole
    /// body was written; a failed stream leaves nothing behind.
    async fn put<'a>(&self, key: &str, content_type: &str, body: ChunkStream<'a>) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<ChunkStream<'static>>;

    async fn head(&self, key: &str) -> StoreResult<Option<MediaObject>>;

    /// Lazily lists objects under `prefix` in lexicographic key order. Every
    /// call starts a fresh listing.
    fn list(&self, prefix: &str) -> BoxStream<'static, StoreResult<MediaObject>>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String>;

    /// Location of `key` as the job runner addresses it.
    fn uri(&self, key: &str) -> String;
}
