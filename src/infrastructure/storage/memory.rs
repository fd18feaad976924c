use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{ChunkStream, MediaObject, MediaStore, StoreError, StoreResult};

const LIST_PAGE_SIZE: usize = 100;
const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
struct StoredBlob {
    data: Bytes,
    last_modified: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredBlob>,
    failing_deletes: HashSet<String>,
}

/// In-process object store used for local development and tests.
#[derive(Clone)]
pub struct MemoryStore {
    bucket: String,
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Stores an object directly, bypassing the streaming path.
    pub async fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.inner.write().await.objects.insert(
            key.to_string(),
            StoredBlob {
                data: data.into(),
                last_modified: OffsetDateTime::now_utc(),
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.objects.contains_key(key)
    }

    /// Makes every delete of `key` fail with a transport error.
    pub async fn fail_deletes_of(&self, key: &str) {
        self.inner.write().await.failing_deletes.insert(key.to_string());
    }

    fn describe(key: &str, blob: &StoredBlob) -> MediaObject {
        MediaObject {
            key: key.to_string(),
            size: blob.data.len() as u64,
            last_modified: blob.last_modified,
            storage_class: Some("STANDARD".to_string()),
        }
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn put<'a>(&self, key: &str, _content_type: &str, mut body: ChunkStream<'a>) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidInput("empty object key".to_string()));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }

        self.insert(key, buffer.freeze()).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<ChunkStream<'static>> {
        let data = self
            .inner
            .read()
            .await
            .objects
            .get(key)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + READ_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn head(&self, key: &str) -> StoreResult<Option<MediaObject>> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .get(key)
            .map(|blob| Self::describe(key, blob)))
    }

    fn list(&self, prefix: &str) -> BoxStream<'static, StoreResult<MediaObject>> {
        let inner = self.inner.clone();
        let prefix = prefix.to_string();

        // Pages resume after the last key returned, like a continuation token.
        stream::try_unfold(Some(None::<String>), move |cursor| {
            let inner = inner.clone();
            let prefix = prefix.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, StoreError>(None);
                };
                let guard = inner.read().await;
                let lower = match &after {
                    Some(key) => Bound::Excluded(key.clone()),
                    None => Bound::Included(prefix.clone()),
                };
                let page: Vec<MediaObject> = guard
                    .objects
                    .range((lower, Bound::Unbounded))
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .take(LIST_PAGE_SIZE)
                    .map(|(key, blob)| Self::describe(key, blob))
                    .collect();

                let next = if page.len() == LIST_PAGE_SIZE {
                    page.last().map(|object| Some(object.key.clone()))
                } else {
                    None
                };
                Ok(Some((page, next)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        if guard.failing_deletes.contains(key) {
            return Err(StoreError::Transport(format!("delete of '{}' rejected", key)));
        }
        guard.objects.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String> {
        if !self.contains(key).await {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(format!("{}?expires_in={}", self.uri(key), expires_in.as_secs()))
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: Vec<StoreResult<Bytes>>) -> ChunkStream<'static> {
        stream::iter(chunks).boxed()
    }

    async fn keys(store: &MemoryStore, prefix: &str) -> Vec<String> {
        store
            .list(prefix)
            .map_ok(|object| object.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_streams_the_whole_body() {
        let store = MemoryStore::new("media");
        let data = vec![7u8; READ_CHUNK_SIZE + 10];
        store
            .put("uploads/a.mp4", "video/mp4", body(vec![Ok(Bytes::from(data.clone()))]))
            .await
            .unwrap();

        let chunks: Vec<Bytes> = store.get("uploads/a.mp4").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn failed_put_leaves_nothing_visible() {
        let store = MemoryStore::new("media");
        let result = store
            .put(
                "uploads/broken.mp4",
                "video/mp4",
                body(vec![
                    Ok(Bytes::from_static(b"partial")),
                    Err(StoreError::Transport("connection reset".into())),
                ]),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Transport(_))));
        assert!(keys(&store, "uploads/").await.is_empty());
        assert!(store.head("uploads/broken.mp4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_ordered_paginated_and_restartable() {
        let store = MemoryStore::new("media");
        for i in (0..250).rev() {
            store.insert(&format!("uploads/{:03}.mp4", i), "x").await;
        }
        store.insert("outputs/000_cli.mp4", "x").await;
        store.insert("uploadsx/other.mp4", "x").await;

        let first = keys(&store, "uploads/").await;
        assert_eq!(first.len(), 250);
        assert_eq!(first.first().unwrap(), "uploads/000.mp4");
        assert_eq!(first.last().unwrap(), "uploads/249.mp4");
        assert!(first.windows(2).all(|w| w[0] < w[1]));

        let second = keys(&store, "uploads/").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new("media");
        store.insert("uploads/a.mp4", "x").await;
        store.delete("uploads/a.mp4").await.unwrap();
        store.delete("uploads/a.mp4").await.unwrap();
        assert!(!store.contains("uploads/a.mp4").await);
    }

    #[tokio::test]
    async fn get_of_missing_key_is_not_found() {
        let store = MemoryStore::new("media");
        assert!(matches!(store.get("nope").await.err(), Some(StoreError::NotFound(_))));
    }
}
