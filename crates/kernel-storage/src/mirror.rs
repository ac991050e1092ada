//! Mirror backend (scheme `"mirror"`). `spec.md` §4.2: wraps a primary and a
//! secondary backend. Writes to primary are synchronous and must succeed;
//! writes to secondary are best-effort. Reads prefer primary and fall back
//! to secondary, repairing primary in the background on a miss.

use std::sync::Arc;

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::StorageBackend;
use tracing::warn;

pub struct MirrorBackend {
    primary: Arc<dyn StorageBackend>,
    secondary: Arc<dyn StorageBackend>,
}

impl MirrorBackend {
    pub fn new(primary: Arc<dyn StorageBackend>, secondary: Arc<dyn StorageBackend>) -> Self {
        Self { primary, secondary }
    }
}

impl StorageBackend for MirrorBackend {
    fn scheme(&self) -> &str {
        "mirror"
    }

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.primary.save(uri, data).await?;
            if let Err(e) = self.secondary.save(uri, data).await {
                warn!(uri, error = %e, "mirror: secondary write failed, primary still durable");
            }
            Ok(())
        })
    }

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            match self.primary.load(uri).await {
                Ok(data) => Ok(data),
                Err(primary_err) => {
                    let data = self.secondary.load(uri).await.map_err(|_| primary_err)?;
                    let primary = Arc::clone(&self.primary);
                    let uri = uri.to_string();
                    let repair_payload = data.clone();
                    tokio::spawn(async move {
                        if let Err(e) = primary.save(&uri, &repair_payload).await {
                            warn!(uri, error = %e, "mirror: async primary repair failed");
                        }
                    });
                    Ok(data)
                }
            }
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let primary_result = self.primary.delete(uri).await;
            let secondary_result = self.secondary.delete(uri).await;
            primary_result.or(secondary_result)
        })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if self.primary.exists(uri).await.unwrap_or(false) {
                return Ok(true);
            }
            self.secondary.exists(uri).await
        })
    }

    fn supports_listing(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn save_writes_both_load_prefers_primary() {
        let primary = Arc::new(InMemoryBackend::new());
        let secondary = Arc::new(InMemoryBackend::new());
        let mirror = MirrorBackend::new(primary.clone(), secondary.clone());

        mirror.save("mirror://c/a", b"hello").await.unwrap();
        assert_eq!(primary.load("mirror://c/a").await.unwrap(), b"hello");
        assert_eq!(secondary.load("mirror://c/a").await.unwrap(), b"hello");
        assert_eq!(mirror.load("mirror://c/a").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn load_falls_back_to_secondary_and_repairs_primary() {
        let primary = Arc::new(InMemoryBackend::new());
        let secondary = Arc::new(InMemoryBackend::new());
        secondary.save("mirror://c/a", b"from-secondary").await.unwrap();
        let mirror = MirrorBackend::new(primary.clone(), secondary.clone());

        let data = mirror.load("mirror://c/a").await.unwrap();
        assert_eq!(data, b"from-secondary");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(primary.load("mirror://c/a").await.unwrap(), b"from-secondary");
    }

    #[tokio::test]
    async fn load_fails_when_both_backends_miss() {
        let primary = Arc::new(InMemoryBackend::new());
        let secondary = Arc::new(InMemoryBackend::new());
        let mirror = MirrorBackend::new(primary, secondary);
        assert!(mirror.load("mirror://c/missing").await.is_err());
    }

    #[tokio::test]
    async fn delete_attempts_both_and_succeeds_if_either_does() {
        let primary = Arc::new(InMemoryBackend::new());
        let secondary = Arc::new(InMemoryBackend::new());
        secondary.save("mirror://c/a", b"x").await.unwrap();
        let mirror = MirrorBackend::new(primary, secondary.clone());
        mirror.delete("mirror://c/a").await.unwrap();
        assert!(!secondary.exists("mirror://c/a").await.unwrap());
    }
}
