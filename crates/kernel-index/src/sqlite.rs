//! SQL-backed `MetadataIndex` (`spec.md` §4.4): schema
//! `(key TEXT PRIMARY KEY, metadata_json TEXT, indexed_at TEXT, updated_at
//! TEXT)` with secondary indexes on the timestamp columns. Field-level
//! queries fall back to a substring match over the JSON blob since the
//! schema carries no per-field columns. `rusqlite` is synchronous, so every
//! call runs on a blocking thread via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{CompositeQuery, MetadataIndex};
use kernel_common::{Manifest, ManifestId};
use rusqlite::{params, Connection};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::query;
use crate::search::score_text;

pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn map_sqlite(e: rusqlite::Error) -> KernelError {
    KernelError::internal(e.to_string())
}

impl SqliteIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(map_sqlite)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS manifests (
                key TEXT PRIMARY KEY,
                metadata_json TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_manifests_indexed_at ON manifests(indexed_at);
            CREATE INDEX IF NOT EXISTS idx_manifests_updated_at ON manifests(updated_at);",
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    fn all_manifests(conn: &Connection) -> Result<Vec<Manifest>> {
        let mut stmt = conn
            .prepare("SELECT metadata_json FROM manifests")
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_sqlite)?;
        let mut manifests = Vec::new();
        for row in rows {
            let json = row.map_err(map_sqlite)?;
            let manifest: Manifest = serde_json::from_str(&json)
                .map_err(|e| KernelError::internal(e.to_string()))?;
            manifests.push(manifest);
        }
        Ok(manifests)
    }
}

impl MetadataIndex for SqliteIndex {
    fn index_manifest<'a>(&'a self, manifest: Manifest) -> BoxFuture<'a, Result<()>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                let json = serde_json::to_string(&manifest)
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                let now = now_iso8601();
                conn.execute(
                    "INSERT INTO manifests (key, metadata_json, indexed_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(key) DO UPDATE SET metadata_json = excluded.metadata_json,
                                                     updated_at = excluded.updated_at",
                    params![manifest.id.to_hex(), json, now],
                )
                .map_err(map_sqlite)?;
                Ok(())
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn get_manifest<'a>(&'a self, blob_name: &'a str) -> BoxFuture<'a, Result<Option<Manifest>>> {
        let conn = Arc::clone(&self.conn);
        let blob_name = blob_name.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                let manifests = Self::all_manifests(&conn)?;
                Ok(manifests.into_iter().find(|m| {
                    m.blob_name() == blob_name || m.blob_uri == blob_name
                }))
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn get_manifest_by_id<'a>(
        &'a self,
        id: ManifestId,
    ) -> BoxFuture<'a, Result<Option<Manifest>>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                let json: Option<String> = conn
                    .query_row(
                        "SELECT metadata_json FROM manifests WHERE key = ?1",
                        params![id.to_hex()],
                        |row| row.get(0),
                    )
                    .ok();
                match json {
                    Some(j) => Ok(Some(
                        serde_json::from_str(&j).map_err(|e| KernelError::internal(e.to_string()))?,
                    )),
                    None => Ok(None),
                }
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn update_last_access<'a>(
        &'a self,
        id: ManifestId,
        timestamp: u64,
    ) -> BoxFuture<'a, Result<()>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                let json: Option<String> = conn
                    .query_row(
                        "SELECT metadata_json FROM manifests WHERE key = ?1",
                        params![id.to_hex()],
                        |row| row.get(0),
                    )
                    .ok();
                let Some(json) = json else { return Ok(()) };
                let mut manifest: Manifest =
                    serde_json::from_str(&json).map_err(|e| KernelError::internal(e.to_string()))?;
                manifest.last_accessed_at = timestamp;
                let updated_json = serde_json::to_string(&manifest)
                    .map_err(|e| KernelError::internal(e.to_string()))?;
                conn.execute(
                    "UPDATE manifests SET metadata_json = ?2, updated_at = ?3 WHERE key = ?1",
                    params![id.to_hex(), updated_json, now_iso8601()],
                )
                .map_err(map_sqlite)?;
                Ok(())
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn remove_manifest<'a>(&'a self, id: ManifestId) -> BoxFuture<'a, Result<()>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                conn.execute("DELETE FROM manifests WHERE key = ?1", params![id.to_hex()])
                    .map_err(map_sqlite)?;
                Ok(())
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn enumerate_all<'a>(&'a self) -> BoxFuture<'a, Result<Vec<Manifest>>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::all_manifests(&conn.lock().unwrap()))
                .await
                .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn execute_query<'a>(
        &'a self,
        composite_query: &'a CompositeQuery,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>> {
        let conn = Arc::clone(&self.conn);
        let composite_query = composite_query.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let manifests = Self::all_manifests(&conn.lock().unwrap())?;
                let mut matched: Vec<ManifestId> = manifests
                    .iter()
                    .filter(|m| query::matches(m, &composite_query))
                    .map(|m| m.id)
                    .collect();
                matched.sort_by_key(|id| id.to_hex());
                matched.truncate(limit);
                Ok(matched)
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }

    fn search<'a>(
        &'a self,
        text: &'a str,
        vector: Option<&'a [f32]>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>> {
        let conn = Arc::clone(&self.conn);
        let text = text.to_string();
        let vector = vector.map(|v| v.to_vec());
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                // Substring match over the JSON blob narrows the candidate
                // set before precise scoring, per `spec.md` §4.4's "queries
                // over JSON use substring match as a fallback".
                let conn = conn.lock().unwrap();
                let like_pattern = format!("%{}%", text.to_ascii_lowercase());
                let mut stmt = conn
                    .prepare("SELECT metadata_json FROM manifests WHERE lower(metadata_json) LIKE ?1")
                    .map_err(map_sqlite)?;
                let rows = stmt
                    .query_map(params![like_pattern], |row| row.get::<_, String>(0))
                    .map_err(map_sqlite)?;
                let mut scored = Vec::new();
                for row in rows {
                    let json = row.map_err(map_sqlite)?;
                    let manifest: Manifest = serde_json::from_str(&json)
                        .map_err(|e| KernelError::internal(e.to_string()))?;
                    let s = score_text(&manifest, &text, vector.as_deref());
                    if s.score > 0.0 {
                        scored.push(s);
                    }
                }
                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
                });
                scored.truncate(limit);
                Ok(scored.into_iter().map(|s| s.id).collect())
            })
            .await
            .map_err(|e| KernelError::internal(e.to_string()))?
        })
    }
}
