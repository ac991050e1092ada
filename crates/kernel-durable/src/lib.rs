//! Typed key→value map backed by a crash-safe write-ahead log.
//!
//! File layout per operation: `[opcode:1][key-length:varint][key:utf8]
//! [payload-length:u32][payload:bytes]`. `opcode=1` is Set (payload is
//! JSON), `opcode=2` is Remove (no payload). Replay stops at the first
//! truncated record, which is the expected shape of a crash mid-append.
//!
//! Concurrent writers are serialized by a single writer lock
//! ([`std::sync::Mutex`] around the file handle); readers hit the
//! in-memory cache and never take that lock, mirroring the teacher's
//! `NvramLog` split between a `RwLock<File>` writer path and a lock-free
//! cache read path.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use kernel_common::error::{KernelError, Result};
use kernel_common::DEFAULT_COMPACTION_THRESHOLD;
use serde_json::Value;
use tracing::{debug, info, warn};

const OPCODE_SET: u8 = 1;
const OPCODE_REMOVE: u8 = 2;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Reads a varint from `reader`, returning `None` on a clean EOF at the
/// first byte (the normal end of a well-formed log) and an error on a
/// partial varint (a truncated record).
fn read_varint<R: Read>(reader: &mut R) -> std::io::Result<Option<u64>> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut first = true;
    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte)? {
            0 if first => return Ok(None),
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated varint",
                ))
            }
            _ => {}
        }
        first = false;
        result |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
    }
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[derive(Debug, Clone)]
enum Record {
    Set { key: String, value: Value },
    Remove { key: String },
}

fn encode_record(record: &Record) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match record {
        Record::Set { key, value } => {
            out.push(OPCODE_SET);
            write_varint(&mut out, key.len() as u64);
            out.extend_from_slice(key.as_bytes());
            let payload = serde_json::to_vec(value)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            out.extend_from_slice(&payload);
        }
        Record::Remove { key } => {
            out.push(OPCODE_REMOVE);
            write_varint(&mut out, key.len() as u64);
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
        }
    }
    Ok(out)
}

/// Replays every well-formed record in `reader`. A truncated record at the
/// tail ends replay silently; a malformed record in the middle (bad UTF-8,
/// bad JSON) is a fatal, surfaced error — per `spec.md` §4.1's failure
/// model, "corrupt suffix is silently dropped; corrupt mid-log is fatal".
fn replay<R: Read>(mut reader: R) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    loop {
        let opcode = match read_varint_u8(&mut reader)? {
            Some(op) => op,
            None => break,
        };

        let key_len = match read_varint(&mut reader) {
            Ok(Some(len)) => len,
            Ok(None) => break,
            Err(_) => break,
        };
        let key_bytes = match read_exact_or_truncated(&mut reader, key_len as usize) {
            Ok(bytes) => bytes,
            Err(_) => break,
        };

        let mut payload_len_bytes = [0u8; 4];
        if reader.read_exact(&mut payload_len_bytes).is_err() {
            break;
        }
        let payload_len = u32::from_be_bytes(payload_len_bytes) as usize;
        let payload = match read_exact_or_truncated(&mut reader, payload_len) {
            Ok(bytes) => bytes,
            Err(_) => break,
        };

        let key = String::from_utf8(key_bytes)
            .map_err(|e| KernelError::Integrity(format!("durable log key is not utf8: {e}")))?;

        match opcode {
            OPCODE_SET => {
                let value: Value = serde_json::from_slice(&payload).map_err(|e| {
                    KernelError::Integrity(format!("durable log Set payload is not JSON: {e}"))
                })?;
                records.push(Record::Set { key, value });
            }
            OPCODE_REMOVE => {
                records.push(Record::Remove { key });
            }
            other => {
                return Err(KernelError::Integrity(format!(
                    "durable log has unknown opcode {other}"
                )))
            }
        }
    }
    Ok(records)
}

fn read_varint_u8<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).map_err(|e| KernelError::internal(e.to_string()))? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// A typed key→value store with a write-ahead log backing it. `spec.md`
/// §4.1. The in-memory cache is the source of truth for reads; the log
/// exists purely to reconstruct the cache after a restart.
pub struct DurableState {
    path: PathBuf,
    file: Mutex<File>,
    cache: RwLock<HashMap<String, Value>>,
    opcount: std::sync::atomic::AtomicU64,
    compaction_threshold: u64,
}

impl DurableState {
    /// Opens (creating if absent) the log at `path` and replays it to
    /// rebuild the in-memory cache.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_threshold(path, DEFAULT_COMPACTION_THRESHOLD)
    }

    pub fn open_with_threshold<P: AsRef<Path>>(path: P, compaction_threshold: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| KernelError::internal(format!("opening durable log: {e}")))?;

        let mut cache = HashMap::new();
        let mut opcount = 0u64;
        {
            let reader = BufReader::new(
                file.try_clone()
                    .map_err(|e| KernelError::internal(e.to_string()))?,
            );
            for record in replay(reader)? {
                opcount += 1;
                match record {
                    Record::Set { key, value } => {
                        cache.insert(key, value);
                    }
                    Record::Remove { key } => {
                        cache.remove(&key);
                    }
                }
            }
        }

        info!(path = %path.display(), entries = cache.len(), opcount, "durable log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            cache: RwLock::new(cache),
            opcount: std::sync::atomic::AtomicU64::new(opcount),
            compaction_threshold,
        })
    }

    fn append(&self, record: &Record, fsync: bool) -> Result<()> {
        let encoded = encode_record(record).map_err(|e| KernelError::internal(e.to_string()))?;
        let mut file = self.file.lock().unwrap();
        file.write_all(&encoded)
            .map_err(|e| KernelError::internal(format!("appending durable record: {e}")))?;
        if fsync {
            file.sync_data()
                .map_err(|e| KernelError::internal(format!("fsync durable log: {e}")))?;
        }
        drop(file);

        let opcount = self
            .opcount
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if opcount >= self.compaction_threshold {
            self.compact()?;
        }
        Ok(())
    }

    /// Sets `key` to `value`. Durability is "OS buffered" unless `fsync` is
    /// requested, matching `spec.md`'s default.
    pub fn set(&self, key: &str, value: Value, fsync: bool) -> Result<()> {
        self.append(
            &Record::Set {
                key: key.to_string(),
                value: value.clone(),
            },
            fsync,
        )?;
        self.cache.write().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str, fsync: bool) -> Result<()> {
        self.append(
            &Record::Remove {
                key: key.to_string(),
            },
            fsync,
        )?;
        self.cache.write().unwrap().remove(key);
        Ok(())
    }

    /// O(1) cache lookup; never touches the log.
    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.cache.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.read().unwrap().keys().cloned().collect()
    }

    /// Rewrites the log containing only current `Set` records for every
    /// cache entry, atomically replacing the old log, and resets opcount.
    pub fn compact(&self) -> Result<()> {
        let snapshot: Vec<(String, Value)> = self
            .cache
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let tmp_path = self.path.with_extension("compact.tmp");
        {
            let mut tmp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| KernelError::internal(format!("creating compaction tmp file: {e}")))?;
            for (key, value) in &snapshot {
                let encoded = encode_record(&Record::Set {
                    key: key.clone(),
                    value: value.clone(),
                })
                .map_err(|e| KernelError::internal(e.to_string()))?;
                tmp_file
                    .write_all(&encoded)
                    .map_err(|e| KernelError::internal(format!("writing compacted record: {e}")))?;
            }
            tmp_file
                .sync_data()
                .map_err(|e| KernelError::internal(format!("fsync compaction tmp file: {e}")))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| KernelError::internal(format!("atomic rename over durable log: {e}")))?;

        let new_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| KernelError::internal(format!("reopening compacted log: {e}")))?;
        *self.file.lock().unwrap() = new_file;
        self.opcount
            .store(snapshot.len() as u64, std::sync::atomic::Ordering::SeqCst);

        debug!(entries = snapshot.len(), "durable log compacted");
        Ok(())
    }

    pub fn opcount(&self) -> u64 {
        self.opcount.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Thread-shared handle, mirroring the teacher's `Arc`-wrapped log clone
/// pattern for components that need to pass a store around without
/// threading a lifetime through every call site.
pub type SharedDurableState = Arc<DurableState>;

pub fn open_shared<P: AsRef<Path>>(path: P) -> Result<SharedDurableState> {
    Ok(Arc::new(DurableState::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = DurableState::open(dir.path().join("log.db")).unwrap();
        state.set("a", json!({"x": 1}), false).unwrap();
        assert_eq!(state.try_get("a"), Some(json!({"x": 1})));
    }

    #[test]
    fn remove_evicts_cache() {
        let dir = tempfile::tempdir().unwrap();
        let state = DurableState::open(dir.path().join("log.db")).unwrap();
        state.set("a", json!(1), false).unwrap();
        state.remove("a", false).unwrap();
        assert_eq!(state.try_get("a"), None);
    }

    #[test]
    fn reopen_replays_log_to_same_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        {
            let state = DurableState::open(&path).unwrap();
            state.set("a", json!(1), true).unwrap();
            state.set("b", json!(2), true).unwrap();
            state.remove("a", true).unwrap();
        }
        let reopened = DurableState::open(&path).unwrap();
        assert_eq!(reopened.try_get("a"), None);
        assert_eq!(reopened.try_get("b"), Some(json!(2)));
    }

    #[test]
    fn compaction_preserves_current_values_and_resets_opcount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let state = DurableState::open_with_threshold(&path, 1000).unwrap();
        for i in 0..10 {
            state.set(&format!("k{i}"), json!(i), false).unwrap();
        }
        state.remove("k0", false).unwrap();
        state.compact().unwrap();
        assert_eq!(state.opcount(), 9);

        let reopened = DurableState::open_with_threshold(&path, 1000).unwrap();
        assert_eq!(reopened.try_get("k0"), None);
        assert_eq!(reopened.try_get("k5"), Some(json!(5)));
    }

    #[test]
    fn compaction_triggers_automatically_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let state = DurableState::open_with_threshold(&path, 3).unwrap();
        state.set("a", json!(1), false).unwrap();
        state.set("b", json!(2), false).unwrap();
        state.set("c", json!(3), false).unwrap();
        assert_eq!(state.opcount(), 3);
    }

    #[test]
    fn truncated_tail_record_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        {
            let state = DurableState::open(&path).unwrap();
            state.set("a", json!(1), true).unwrap();
        }
        // Simulate a crash mid-append: truncate the file partway through a
        // second record's bytes.
        {
            let mut bytes = std::fs::read(&path).unwrap();
            bytes.extend_from_slice(&[OPCODE_SET, 3, b'b', b'a', b'd']);
            std::fs::write(&path, bytes).unwrap();
        }
        let reopened = DurableState::open(&path).unwrap();
        assert_eq!(reopened.try_get("a"), Some(json!(1)));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn varint_round_trips_multi_byte_lengths() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_varint(&mut cursor).unwrap(), Some(300));
    }
}
