//! In-memory storage backend (scheme `"mem"`). Used for testing and as the
//! scratch tier for `StorageIntent::Availability::Single` workloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::StorageBackend;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
}

/// Mirrors the teacher's `InMemoryBackend`: an `Arc<Mutex<HashMap>>` behind
/// the uniform backend trait, cheaply `Clone`-able for sharing across
/// pipeline invocations.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn scheme(&self) -> &str {
        "mem"
    }

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let inner = Arc::clone(&self.inner);
        let payload = data.to_vec();
        let uri = uri.to_string();
        Box::pin(async move {
            inner.lock().unwrap().objects.insert(uri, payload);
            Ok(())
        })
    }

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        let uri = uri.to_string();
        Box::pin(async move {
            inner
                .lock()
                .unwrap()
                .objects
                .get(&uri)
                .cloned()
                .ok_or_else(|| KernelError::NotFound(uri))
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>> {
        let inner = Arc::clone(&self.inner);
        let uri = uri.to_string();
        Box::pin(async move {
            inner.lock().unwrap().objects.remove(&uri);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>> {
        let inner = Arc::clone(&self.inner);
        let uri = uri.to_string();
        Box::pin(async move { Ok(inner.lock().unwrap().objects.contains_key(&uri)) })
    }

    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<(String, u64)>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            Ok(inner
                .lock()
                .unwrap()
                .objects
                .iter()
                .map(|(uri, data)| (uri.clone(), data.len() as u64))
                .collect())
        })
    }

    fn supports_listing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let backend = InMemoryBackend::new();
        backend.save("mem://a", b"hello").await.unwrap();
        assert_eq!(backend.load("mem://a").await.unwrap(), b"hello");
        assert!(backend.exists("mem://a").await.unwrap());

        backend.delete("mem://a").await.unwrap();
        assert!(!backend.exists("mem://a").await.unwrap());
        assert!(backend.load("mem://a").await.is_err());
    }

    #[tokio::test]
    async fn list_reflects_current_objects() {
        let backend = InMemoryBackend::new();
        backend.save("mem://a", b"1234").await.unwrap();
        backend.save("mem://b", b"56").await.unwrap();
        let mut entries = backend.list().await.unwrap();
        entries.sort();
        assert_eq!(entries, vec![("mem://a".to_string(), 4), ("mem://b".to_string(), 2)]);
    }
}
