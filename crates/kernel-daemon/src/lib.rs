//! Background loops that keep the index and storage backends honest
//! without sitting on the request path: `SentinelDaemon` (`spec.md`
//! §4.10) re-runs governance on a schedule, and `DataVacuum` (§4.11)
//! reclaims orphaned blobs.

pub mod sentinel_daemon;
pub mod vacuum;

pub use sentinel_daemon::{ScanReport, SentinelDaemon};
pub use vacuum::{DataVacuum, VacuumReport};
