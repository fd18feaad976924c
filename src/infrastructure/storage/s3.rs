use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use super::{ChunkStream, MediaObject, MediaStore, StoreError, StoreResult};

// S3 rejects non-final parts under 5 MiB.
const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

fn transport<E: std::error::Error>(context: &str, err: E) -> StoreError {
    StoreError::Transport(format!("{}: {}", context, DisplayErrorContext(&err)))
}

fn to_offset(dt: Option<&DateTime>) -> OffsetDateTime {
    dt.and_then(|dt| OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Builds a client from the shared AWS config. A custom `endpoint`
    /// switches to path-style addressing for S3-compatible servers (MinIO).
    pub async fn new(region: &str, bucket: &str, endpoint: Option<&str>) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket, region, "✅ S3 store configured");

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    async fn put_single(&self, key: &str, content_type: &str, body: Bytes) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| transport("put_object", e))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StoreResult<String> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| transport("create_multipart_upload", e))?;

        result
            .upload_id
            .ok_or_else(|| StoreError::Transport("multipart upload without an upload id".to_string()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<CompletedPart> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| transport("upload_part", e))?;

        let e_tag = result
            .e_tag
            .ok_or_else(|| StoreError::Transport(format!("part {} returned no ETag", part_number)))?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| transport("complete_multipart_upload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
        }
    }

    /// Sends buffered chunks as parts once the buffer reaches the S3 minimum.
    /// Incomplete multipart uploads are never visible to listings.
    async fn put_multipart<'a>(
        &self,
        key: &str,
        content_type: &str,
        first: BytesMut,
        body: &mut ChunkStream<'a>,
    ) -> StoreResult<()> {
        let upload_id = self.create_multipart_upload(key, content_type).await?;
        let mut parts = Vec::new();
        let mut buffer = first;

        let result = async {
            loop {
                if buffer.len() >= MIN_PART_SIZE {
                    let part_number = parts.len() as i32 + 1;
                    let part = buffer.split().freeze();
                    parts.push(self.upload_part(key, &upload_id, part_number, part).await?);
                }
                match body.try_next().await? {
                    Some(chunk) => buffer.extend_from_slice(&chunk),
                    None => break,
                }
            }
            if !buffer.is_empty() {
                let part_number = parts.len() as i32 + 1;
                let part = buffer.split().freeze();
                parts.push(self.upload_part(key, &upload_id, part_number, part).await?);
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => self.complete_multipart_upload(key, &upload_id, parts).await,
            Err(e) => {
                error!(key, error = %e, "Upload error, aborting multipart upload");
                self.abort_multipart_upload(key, &upload_id).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MediaStore for S3Store {
    async fn put<'a>(&self, key: &str, content_type: &str, mut body: ChunkStream<'a>) -> StoreResult<()> {
        let started = std::time::Instant::now();
        let mut buffer = BytesMut::with_capacity(MIN_PART_SIZE);

        // Bodies smaller than one part go up in a single request.
        while buffer.len() < MIN_PART_SIZE {
            match body.try_next().await? {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => {
                    let size = buffer.len();
                    self.put_single(key, content_type, buffer.freeze()).await?;
                    info!(key, size_bytes = size, duration_ms = started.elapsed().as_millis() as u64, "S3 upload successful");
                    return Ok(());
                }
            }
        }

        self.put_multipart(key, content_type, buffer, &mut body).await?;
        info!(key, duration_ms = started.elapsed().as_millis() as u64, "S3 multipart upload successful");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<ChunkStream<'static>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StoreError::NotFound(key.to_string())
                } else {
                    transport("get_object", e)
                }
            })?;

        let reader = resp.body.into_async_read();
        Ok(ReaderStream::new(reader)
            .map_err(|e| StoreError::Transport(format!("read body: {}", e)))
            .boxed())
    }

    async fn head(&self, key: &str) -> StoreResult<Option<MediaObject>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(MediaObject {
                key: key.to_string(),
                size: output.content_length().unwrap_or_default().max(0) as u64,
                last_modified: to_offset(output.last_modified()),
                storage_class: output.storage_class().map(|class| class.as_str().to_string()),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(transport("head_object", e)),
        }
    }

    fn list(&self, prefix: &str) -> BoxStream<'static, StoreResult<MediaObject>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let prefix = prefix.to_string();

        // State is the continuation token of the next page; `None` once the
        // listing is exhausted.
        stream::try_unfold(Some(None::<String>), move |token| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            async move {
                let Some(token) = token else {
                    return Ok::<_, StoreError>(None);
                };
                let page = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix)
                    .set_continuation_token(token)
                    .send()
                    .await
                    .map_err(|e| transport("list_objects_v2", e))?;

                let objects: Vec<MediaObject> = page
                    .contents()
                    .iter()
                    .filter_map(|object| {
                        let key = object.key()?.to_string();
                        Some(MediaObject {
                            key,
                            size: object.size().unwrap_or_default().max(0) as u64,
                            last_modified: to_offset(object.last_modified()),
                            storage_class: object.storage_class().map(|c| c.as_str().to_string()),
                        })
                    })
                    .collect();

                let next = match (page.is_truncated(), page.next_continuation_token()) {
                    (Some(true), Some(token)) => Some(Some(token.to_string())),
                    _ => None,
                };
                Ok(Some((objects, next)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport("delete_object", e))?;
        info!(key, "S3 object deleted");
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String> {
        if self.head(key).await?.is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::InvalidInput(format!("presigning config: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| transport("presign get_object", e))?;

        Ok(request.uri().to_string())
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
