//! Segmented-disk backend (scheme `"segmented"`). `spec.md` §4.2: storage is
//! a sequence of append-only 1 GiB segment files. Writes reserve a byte
//! range out of a single 64-bit global pointer with one atomic add, so
//! concurrent writers never take a lock to find out where their bytes go —
//! only the positional write itself touches the filesystem. Deletion and
//! compaction are out of scope; this backend only ever grows.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::StorageBackend;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

pub const SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

struct SegmentHandles {
    root: PathBuf,
    open: AsyncMutex<HashMap<u64, Arc<AsyncMutex<tokio::fs::File>>>>,
}

impl SegmentHandles {
    async fn handle_for(&self, segment_id: u64) -> Result<Arc<AsyncMutex<tokio::fs::File>>> {
        let mut open = self.open.lock().await;
        if let Some(existing) = open.get(&segment_id) {
            return Ok(Arc::clone(existing));
        }
        let path = self.root.join(format!("segment-{segment_id:020}.dat"));
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?;
        let handle = Arc::new(AsyncMutex::new(file));
        open.insert(segment_id, Arc::clone(&handle));
        Ok(handle)
    }
}

/// A `(containerId, blobName)` pair maps to one contiguous logical write;
/// its bytes may straddle one or more physical segment files.
pub struct SegmentedDiskBackend {
    container_id: String,
    write_pointer: AtomicU64,
    segments: Arc<SegmentHandles>,
    /// Remembers where the most recent `save` under a given blob name
    /// landed, so callers that only know the plain `segmented://c/name`
    /// URI (not the offset-bearing fragment form) can still `load`/`exists`
    /// it. A caller holding the fragment URI from `save`'s return can
    /// bypass this and address the span directly.
    locations: AsyncMutex<HashMap<String, (u64, u64)>>,
}

impl SegmentedDiskBackend {
    pub fn new(root: impl Into<PathBuf>, container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            write_pointer: AtomicU64::new(0),
            segments: Arc::new(SegmentHandles {
                root: root.into(),
                open: AsyncMutex::new(HashMap::new()),
            }),
            locations: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Splits `[start, start+len)` into per-segment `(segmentId, offset,
    /// length)` spans, one per segment the range crosses.
    fn spans(start: u64, len: u64) -> Vec<(u64, u64, u64)> {
        let mut spans = Vec::new();
        let mut remaining = len;
        let mut cursor = start;
        while remaining > 0 {
            let segment_id = cursor / SEGMENT_SIZE;
            let offset_in_segment = cursor % SEGMENT_SIZE;
            let space_left = SEGMENT_SIZE - offset_in_segment;
            let take = remaining.min(space_left);
            spans.push((segment_id, offset_in_segment, take));
            cursor += take;
            remaining -= take;
        }
        spans
    }

    fn format_uri(&self, blob_name: &str, start: u64, len: u64) -> String {
        format!(
            "segmented://{}/{}#{}:{}:{}",
            self.container_id, blob_name, start, start, len
        )
    }

    /// Parses `segmented://<container>/<blob>#<segmentId>:<offset>:<length>`.
    /// The first fragment field is unused (kept for forward compatibility
    /// with multi-segment fragments) — the span is recomputed from the
    /// logical `(offset, length)` pair so reads always re-derive the exact
    /// segment boundaries a write may have crossed.
    fn parse_uri(uri: &str) -> Result<(String, u64, u64)> {
        let rest = uri
            .strip_prefix("segmented://")
            .ok_or_else(|| KernelError::ValidationFailed(format!("not a segmented:// uri: {uri}")))?;
        let (path, fragment) = rest
            .split_once('#')
            .ok_or_else(|| KernelError::ValidationFailed(format!("missing fragment: {uri}")))?;
        let mut fields = fragment.split(':');
        let _segment_id = fields
            .next()
            .ok_or_else(|| KernelError::ValidationFailed(format!("malformed fragment: {uri}")))?;
        let offset: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| KernelError::ValidationFailed(format!("malformed offset: {uri}")))?;
        let length: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| KernelError::ValidationFailed(format!("malformed length: {uri}")))?;
        let _ = path;
        Ok((path.to_string(), offset, length))
    }
}

impl StorageBackend for SegmentedDiskBackend {
    fn scheme(&self) -> &str {
        "segmented"
    }

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // `uri` carries only the container/blob path component for a
            // fresh write; any fragment is ignored — a logical write always
            // reserves a brand new range.
            let blob_name = uri
                .strip_prefix("segmented://")
                .and_then(|rest| rest.split('#').next())
                .and_then(|rest| rest.strip_prefix(&format!("{}/", self.container_id)))
                .ok_or_else(|| {
                    KernelError::ValidationFailed(format!("uri not under this container: {uri}"))
                })?
                .to_string();

            let len = data.len() as u64;
            let start = self.write_pointer.fetch_add(len, Ordering::SeqCst);

            let mut cursor = 0usize;
            for (segment_id, offset, take) in Self::spans(start, len) {
                let chunk = &data[cursor..cursor + take as usize];
                let handle = self.segments.handle_for(segment_id).await?;
                let mut file = handle.lock().await;
                file.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                file.write_all(chunk)
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                file.flush()
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                cursor += take as usize;
            }

            self.locations
                .lock()
                .await
                .insert(blob_name, (start, len));
            Ok(())
        })
    }

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let (offset, length) = if uri.contains('#') {
                let (_path, offset, length) = Self::parse_uri(uri)?;
                (offset, length)
            } else {
                let blob_name = uri
                    .strip_prefix("segmented://")
                    .and_then(|rest| rest.strip_prefix(&format!("{}/", self.container_id)))
                    .ok_or_else(|| {
                        KernelError::ValidationFailed(format!("uri not under this container: {uri}"))
                    })?;
                *self
                    .locations
                    .lock()
                    .await
                    .get(blob_name)
                    .ok_or_else(|| KernelError::NotFound(uri.to_string()))?
            };
            let mut out = Vec::with_capacity(length as usize);
            for (segment_id, seg_offset, take) in Self::spans(offset, length) {
                let handle = self.segments.handle_for(segment_id).await?;
                let mut file = handle.lock().await;
                file.seek(SeekFrom::Start(seg_offset))
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                let mut buf = vec![0u8; take as usize];
                file.read_exact(&mut buf)
                    .await
                    .map_err(|_| KernelError::NotFound(uri.to_string()))?;
                out.extend_from_slice(&buf);
            }
            Ok(out)
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>> {
        let uri = uri.to_string();
        Box::pin(async move {
            Err(KernelError::ValidationFailed(format!(
                "segmented backend does not support deletion: {uri}"
            )))
        })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.load(uri).await.is_ok()) })
    }

    fn supports_listing(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root: &std::path::Path) -> SegmentedDiskBackend {
        SegmentedDiskBackend::new(root, "c1")
    }

    #[tokio::test]
    async fn save_then_load_round_trips_by_plain_uri() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.save("segmented://c1/blob-a", b"hello world").await.unwrap();
        assert_eq!(
            backend.load("segmented://c1/blob-a").await.unwrap(),
            b"hello world"
        );
        assert!(backend.exists("segmented://c1/blob-a").await.unwrap());
    }

    #[tokio::test]
    async fn load_by_fragment_uri_bypasses_the_location_cache() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.save("segmented://c1/blob-a", b"hello world").await.unwrap();
        let fragment_uri = backend.format_uri("blob-a", 0, 11);
        assert_eq!(backend.load(&fragment_uri).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn write_crossing_segment_boundary_splits_and_reassembles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        // Force the write pointer right up against the segment boundary.
        backend.write_pointer.store(SEGMENT_SIZE - 5, Ordering::SeqCst);
        let payload = b"0123456789";
        backend.save("segmented://c1/blob-b", payload).await.unwrap();
        let read_back = backend.load("segmented://c1/blob-b").await.unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn deletion_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.save("segmented://c1/blob-c", b"x").await.unwrap();
        assert!(backend.delete("segmented://c1/blob-c#0:0:1").await.is_err());
    }

    #[test]
    fn spans_splits_cleanly_at_boundary() {
        let spans = SegmentedDiskBackend::spans(SEGMENT_SIZE - 3, 7);
        assert_eq!(spans, vec![(0, SEGMENT_SIZE - 3, 3), (1, 0, 4)]);
    }
}
