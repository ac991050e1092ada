//! Network (RPC) backend (scheme `"net"`). `spec.md` §4.2: client-streaming
//! upload (metadata header then ≤64 KiB chunks), server-streaming read,
//! exponential backoff with jitter, and a circuit breaker that trips after
//! `M` consecutive failures. The actual wire adapter (gRPC or otherwise) is
//! out of scope — [`RpcTransport`] is the seam a concrete transport plugs
//! into; this backend only owns retry/backoff/circuit-breaking policy.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::StorageBackend;
use rand::Rng;
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Stands in for the out-of-scope gRPC client: a remote object store
/// reachable over `put`/`get`/`delete`/`exists`, each call already chunked
/// by the backend before it reaches the transport.
pub trait RpcTransport: Send + Sync {
    fn put<'a>(&'a self, uri: &'a str, chunks: &'a [Vec<u8>]) -> BoxFuture<'a, Result<()>>;
    fn get<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>>;
    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with full jitter: `U(0, min(max_delay, base * 2^attempt))`.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis());
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_millis(jittered as u64)
    }
}

pub struct NetworkBackend {
    transport: Arc<dyn RpcTransport>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl NetworkBackend {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default(), CircuitBreakerConfig::default())
    }

    pub fn with_policy(
        transport: Arc<dyn RpcTransport>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            transport,
            retry,
            breaker: CircuitBreaker::new(breaker_config),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn chunk(data: &[u8]) -> Vec<Vec<u8>> {
        if data.is_empty() {
            return vec![Vec::new()];
        }
        data.chunks(MAX_CHUNK_SIZE).map(|c| c.to_vec()).collect()
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if !self.breaker.allow_request() {
                return Err(KernelError::Unavailable(
                    "circuit breaker open for network backend".into(),
                ));
            }
            let result = tokio::time::timeout(self.retry.operation_timeout, op()).await;
            match result {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(attempt, "network backend exhausted retries");
                        return Err(KernelError::Unavailable(format!(
                            "network backend failed after {attempt} attempts: {err}"
                        )));
                    }
                    tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                }
                Err(_timeout) => {
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(KernelError::Unavailable(
                            "network backend timed out on every retry".into(),
                        ));
                    }
                    tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                }
            }
        }
    }
}

impl StorageBackend for NetworkBackend {
    fn scheme(&self) -> &str {
        "net"
    }

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let chunks = Self::chunk(data);
            self.with_retry(|| self.transport.put(uri, &chunks)).await
        })
    }

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move { self.with_retry(|| self.transport.get(uri)).await })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.with_retry(|| self.transport.delete(uri)).await })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { self.with_retry(|| self.transport.exists(uri)).await })
    }

    fn supports_listing(&self) -> bool {
        false
    }
}
