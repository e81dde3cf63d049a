use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::engine::{ETag, Properties, StoredRow, TableEngine};
use super::{StoreError, StoreResult};

pub const SNAPSHOT_FILE: &str = "tables.json";

#[derive(Clone)]
struct Entry {
    properties: Properties,
    etag: ETag,
}

/// (partition, row) -> entry; BTreeMap keeps partitions contiguous and rows sorted.
type Table = BTreeMap<(String, String), Entry>;

/// In-process table engine. Every mutation takes the single write lock, so the compare-and-set
/// in `merge_update` is exact.
#[derive(Clone)]
pub struct MemoryTables {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    version: Arc<AtomicU64>,
    /// Guard to ensure we only spawn one persistence thread
    persist_started: Arc<Mutex<bool>>,
}

impl Default for MemoryTables {
    fn default() -> Self { Self::new() }
}

#[derive(Serialize, Deserialize)]
struct SnapRow { partition: String, row: String, properties: Properties }
#[derive(Serialize, Deserialize)]
struct SnapTable { name: String, rows: Vec<SnapRow> }
#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_ms: i64, tables: Vec<SnapTable> }

/// Stable etag for a row payload: xxh3 over the serialized properties plus the write version.
fn etag_for(properties: &Properties, version: u64) -> ETag {
    let mut buf = serde_json::to_vec(properties).unwrap_or_default();
    buf.extend_from_slice(&version.to_le_bytes());
    ETag(format!("W/\"{:016x}-{}\"", xxh3_64(&buf), version))
}

/// Versions start from wall-clock nanos so etags from a previous process never match fresh ones.
fn version_seed() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(1)
}

impl MemoryTables {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            version: Arc::new(AtomicU64::new(version_seed())),
            persist_started: Arc::new(Mutex::new(false)),
        }
    }

    /// Engine backed by `<dir>/tables.json`: loads an existing snapshot and, when `interval_ms > 0`,
    /// keeps writing snapshots from a background thread.
    pub fn open(dir: impl AsRef<Path>, interval_ms: u64) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let s = Self::new();
        let path = dir.join(SNAPSHOT_FILE);
        let loaded = s.load_snapshot(&path)?;
        info!(target: "store", path = %path.display(), rows = loaded, "table snapshot loaded");
        if interval_ms > 0 { s.ensure_persistence_loop(path, interval_ms); }
        Ok(s)
    }

    fn next_etag(&self, properties: &Properties) -> ETag {
        let v = self.version.fetch_add(1, Ordering::SeqCst);
        etag_for(properties, v)
    }

    fn ensure_persistence_loop(&self, path: PathBuf, interval_ms: u64) {
        let mut started = self.persist_started.lock();
        if *started { return; }
        *started = true;
        drop(started);
        let this = self.clone();
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(std::time::Duration::from_millis(interval_ms));
                if let Err(e) = this.save_snapshot(&path) {
                    warn!(target: "store", "snapshot failed: {}", e);
                }
            }
        });
    }

    /// Write every table to `path` (tmp file then rename, so readers never see a torn file).
    pub fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let created_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
        let tables = {
            let r = self.tables.read();
            let mut names: Vec<&String> = r.keys().collect();
            names.sort();
            names.into_iter().map(|name| SnapTable {
                name: name.clone(),
                rows: r[name].iter().map(|((p, rk), e)| SnapRow { partition: p.clone(), row: rk.clone(), properties: e.properties.clone() }).collect(),
            }).collect::<Vec<_>>()
        };
        let snap = Snapshot { version: 1, created_ms, tables };
        let bytes = serde_json::to_vec(&snap)?;
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir)?; }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, path)?;
        debug!(target: "store", path = %path.display(), "snapshot written");
        Ok(())
    }

    /// Replace all tables with the snapshot at `path`. Missing file is not an error. Returns row count.
    /// Rows get fresh etags, so tags handed out before a reload are stale afterwards.
    pub fn load_snapshot(&self, path: &Path) -> StoreResult<usize> {
        if !path.exists() { return Ok(0); }
        let bytes = std::fs::read(path)?;
        let snap: Snapshot = serde_json::from_slice(&bytes)?;
        let mut count = 0usize;
        let mut fresh: HashMap<String, Table> = HashMap::new();
        for t in snap.tables.into_iter() {
            let table = fresh.entry(t.name).or_default();
            for r in t.rows.into_iter() {
                let etag = self.next_etag(&r.properties);
                table.insert((r.partition, r.row), Entry { properties: r.properties, etag });
                count += 1;
            }
        }
        *self.tables.write() = fresh;
        Ok(count)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.tables.read().keys().cloned().collect();
        v.sort();
        v
    }

    /// Number of rows in a table (0 when absent).
    pub fn len(&self, table: &str) -> usize { self.tables.read().get(table).map(|t| t.len()).unwrap_or(0) }
}

impl TableEngine for MemoryTables {
    fn create_table_if_absent(&self, table: &str) -> StoreResult<bool> {
        if self.tables.read().contains_key(table) { return Ok(false); }
        let mut w = self.tables.write();
        if w.contains_key(table) { return Ok(false); }
        w.insert(table.to_string(), Table::new());
        Ok(true)
    }

    fn get_if_exists(&self, table: &str, partition: &str, row: &str) -> StoreResult<Option<StoredRow>> {
        let r = self.tables.read();
        let t = r.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(t.get(&(partition.to_string(), row.to_string())).map(|e| StoredRow { properties: e.properties.clone(), etag: e.etag.clone() }))
    }

    fn insert(&self, table: &str, partition: &str, row: &str, properties: Properties) -> StoreResult<ETag> {
        let etag = self.next_etag(&properties);
        let mut w = self.tables.write();
        let t = w.get_mut(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let key = (partition.to_string(), row.to_string());
        if t.contains_key(&key) { return Err(StoreError::already_exists(table, partition, row)); }
        t.insert(key, Entry { properties, etag: etag.clone() });
        Ok(etag)
    }

    fn merge_update(&self, table: &str, partition: &str, row: &str, properties: Properties, etag: &ETag) -> StoreResult<ETag> {
        let mut w = self.tables.write();
        let t = w.get_mut(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let Some(entry) = t.get_mut(&(partition.to_string(), row.to_string())) else {
            return Err(StoreError::not_found(table, partition, row));
        };
        if &entry.etag != etag { return Err(StoreError::conflict(table, partition, row)); }
        for (k, v) in properties.into_iter() {
            if v.is_null() { entry.properties.remove(&k); } else { entry.properties.insert(k, v); }
        }
        let v = self.version.fetch_add(1, Ordering::SeqCst);
        entry.etag = etag_for(&entry.properties, v);
        Ok(entry.etag.clone())
    }

    fn list_partition(&self, table: &str, partition: &str) -> StoreResult<Vec<(String, StoredRow)>> {
        let r = self.tables.read();
        let t = r.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let lo = (partition.to_string(), String::new());
        Ok(t.range(lo..)
            .take_while(|((p, _), _)| p == partition)
            .map(|((_, rk), e)| (rk.clone(), StoredRow { properties: e.properties.clone(), etag: e.etag.clone() }))
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
