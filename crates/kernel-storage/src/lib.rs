//! Storage backend implementations. `spec.md` §4.2: all backends expose
//! `Save`/`Load`/`Delete`/`Exists` over a URI scheme
//! (`kernel_common::traits::StorageBackend`).

pub mod circuit_breaker;
pub mod local;
pub mod memory;
pub mod mirror;
pub mod network;
pub mod segmented;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use local::LocalDiskBackend;
pub use memory::InMemoryBackend;
pub use mirror::MirrorBackend;
pub use network::{NetworkBackend, RetryPolicy, RpcTransport};
pub use segmented::SegmentedDiskBackend;
