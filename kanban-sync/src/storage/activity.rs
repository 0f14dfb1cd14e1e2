//! Append-only activity log.
//!
//! Entries are written after a mutation commits and are only ever read
//! for display. Nothing in the ordering or sync paths reads them back.
//!
//! RocksDB column families:
//! - `activity`: `<board_id:16><seq:8 BE>` → LZ4(bincode(ActivityEntry))
//! - `by_task`:  `<task_id:16><seq:8 BE>`  → `<board_id:16><seq:8 BE>`
//! - `meta`:     `next_seq` → u64 BE

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::ActivityEntry;

const CF_ACTIVITY: &str = "activity";
const CF_BY_TASK: &str = "by_task";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_ACTIVITY, CF_BY_TASK, CF_META];

const NEXT_SEQ_KEY: &[u8] = b"next_seq";

/// Write side and audit-display read side of the activity log.
pub trait ActivityLog: Send + Sync {
    /// Append an entry. Returns its sequence number.
    fn record(&self, entry: &ActivityEntry) -> Result<u64, StoreError>;

    /// Most recent entries of a board, newest first.
    fn recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;

    /// Most recent entries touching one task, newest first.
    fn for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;
}

// ───────────────────────────────────────────────────────────────────
// RocksDB
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ActivityLogConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kanban_activity"),
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl ActivityLogConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// RocksDB-backed activity log with LZ4-compressed entries.
pub struct RocksActivityLog {
    db: DBWithThreadMode<SingleThreaded>,
    config: ActivityLogConfig,
    sequence: AtomicU64,
    /// Held from sequence reservation until the batch is written, so the
    /// persisted `next_seq` never moves backwards.
    write_lock: Mutex<()>,
}

impl RocksActivityLog {
    /// Open (or create) the log at the configured path.
    pub fn open(config: ActivityLogConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequence = Self::recover_sequence(&db)?;
        log::info!(
            "Activity log opened at {} (next seq {sequence})",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            sequence: AtomicU64::new(sequence),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &ActivityLogConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_ACTIVITY | CF_BY_TASK => {
                // Values are already LZ4 compressed by us.
                opts.set_compression_type(DBCompressionType::None);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            _ => {
                opts.set_compression_type(DBCompressionType::None);
            }
        }

        opts
    }

    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_META}' not found")))?;
        match db.get_cf(cf, NEXT_SEQ_KEY)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
            _ => Ok(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Next sequence number to be assigned.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    /// `<prefix:16><seq:8 BE>`
    fn key(prefix: Uuid, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(prefix.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn encode_entry(entry: &ActivityEntry) -> Result<Vec<u8>, StoreError> {
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    fn decode_entry(value: &[u8]) -> Result<ActivityEntry, StoreError> {
        let bytes = lz4_flex::decompress_size_prepended(value)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let (entry, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(entry)
    }

    /// Walk a prefix newest-first, collecting up to `limit` values.
    fn scan_newest(
        &self,
        cf: &rocksdb::ColumnFamily,
        prefix: Uuid,
        limit: usize,
    ) -> Result<Vec<Box<[u8]>>, StoreError> {
        let start = Self::key(prefix, u64::MAX);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse));

        let mut values = Vec::new();
        for item in iter {
            if values.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.len() < 24 || &key[..16] != prefix.as_bytes() {
                break;
            }
            values.push(value);
        }
        Ok(values)
    }
}

impl ActivityLog for RocksActivityLog {
    fn record(&self, entry: &ActivityEntry) -> Result<u64, StoreError> {
        let cf_activity = self.cf(CF_ACTIVITY)?;
        let cf_by_task = self.cf(CF_BY_TASK)?;
        let cf_meta = self.cf(CF_META)?;

        let value = Self::encode_entry(entry)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("activity log lock poisoned".into()))?;

        let seq = self.sequence.load(Ordering::SeqCst);
        let key = Self::key(entry.board_id, seq);

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_activity, &key, value);
        if let Some(task_id) = entry.task_id {
            batch.put_cf(cf_by_task, Self::key(task_id, seq), &key);
        }
        batch.put_cf(cf_meta, NEXT_SEQ_KEY, (seq + 1).to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        self.sequence.store(seq + 1, Ordering::SeqCst);

        Ok(seq)
    }

    fn recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let cf = self.cf(CF_ACTIVITY)?;
        self.scan_newest(cf, board_id, limit)?
            .iter()
            .map(|value| Self::decode_entry(value))
            .collect()
    }

    fn for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let cf_by_task = self.cf(CF_BY_TASK)?;
        let cf_activity = self.cf(CF_ACTIVITY)?;

        let mut entries = Vec::new();
        for primary in self.scan_newest(cf_by_task, task_id, limit)? {
            // Index rows whose entry is gone are skipped.
            if let Some(value) = self.db.get_cf(cf_activity, &primary)? {
                entries.push(Self::decode_entry(&value)?);
            }
        }
        Ok(entries)
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory
// ───────────────────────────────────────────────────────────────────

/// Process-local activity log, for tests and ephemeral servers.
#[derive(Default)]
pub struct MemoryActivityLog {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn newest<F>(&self, limit: usize, keep: F) -> Result<Vec<ActivityEntry>, StoreError>
    where
        F: Fn(&ActivityEntry) -> bool,
    {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("activity log lock poisoned".into()))?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| keep(e))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl ActivityLog for MemoryActivityLog {
    fn record(&self, entry: &ActivityEntry) -> Result<u64, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("activity log lock poisoned".into()))?;
        entries.push(entry.clone());
        Ok(entries.len() as u64 - 1)
    }

    fn recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        self.newest(limit, |e| e.board_id == board_id)
    }

    fn for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        self.newest(limit, |e| e.task_id == Some(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, EntityKind, FieldChange};

    fn entry(board_id: Uuid, task_id: Option<Uuid>, field: &str) -> ActivityEntry {
        let mut e = ActivityEntry::new(board_id, Uuid::new_v4(), ActionKind::Update, EntityKind::Task)
            .with_changes(vec![FieldChange::set(field, "x")]);
        e.task_id = task_id;
        e
    }

    #[test]
    fn test_rocks_recent_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
        let board = Uuid::new_v4();
        let other = Uuid::new_v4();

        log.record(&entry(board, None, "a")).unwrap();
        log.record(&entry(other, None, "noise")).unwrap();
        log.record(&entry(board, None, "b")).unwrap();
        log.record(&entry(board, None, "c")).unwrap();

        let recent = log.recent(board, 2).unwrap();
        let fields: Vec<&str> = recent.iter().map(|e| e.changes[0].field.as_str()).collect();
        assert_eq!(fields, vec!["c", "b"]);
        assert_eq!(log.recent(board, 10).unwrap().len(), 3);
        assert_eq!(log.recent(other, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_rocks_for_task() {
        let dir = tempfile::tempdir().unwrap();
        let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
        let board = Uuid::new_v4();
        let task = Uuid::new_v4();

        log.record(&entry(board, Some(task), "title")).unwrap();
        log.record(&entry(board, None, "name")).unwrap();
        log.record(&entry(board, Some(task), "priority")).unwrap();

        let history = log.for_task(task, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].changes[0].field, "priority");
    }

    #[test]
    fn test_rocks_sequence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let board = Uuid::new_v4();
        let written = entry(board, None, "first");
        {
            let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
            assert_eq!(log.record(&written).unwrap(), 0);
            assert_eq!(log.record(&entry(board, None, "second")).unwrap(), 1);
        }

        let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
        assert_eq!(log.sequence(), 2);
        assert_eq!(log.record(&entry(board, None, "third")).unwrap(), 2);

        let all = log.recent(board, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], written);
    }

    #[test]
    fn test_rocks_concurrent_records_keep_every_entry_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let board = Uuid::new_v4();
        {
            let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
            std::thread::scope(|scope| {
                for t in 0..8 {
                    let log = &log;
                    scope.spawn(move || {
                        for i in 0..25 {
                            log.record(&entry(board, None, &format!("t{t}-{i}"))).unwrap();
                        }
                    });
                }
            });
            assert_eq!(log.sequence(), 200);
        }

        let log = RocksActivityLog::open(ActivityLogConfig::for_testing(dir.path())).unwrap();
        assert_eq!(log.sequence(), 200);
        assert_eq!(log.record(&entry(board, None, "after")).unwrap(), 200);

        let all = log.recent(board, 1000).unwrap();
        assert_eq!(all.len(), 201);
        assert_eq!(all[0].changes[0].field, "after");
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryActivityLog::new();
        let board = Uuid::new_v4();
        let task = Uuid::new_v4();
        assert!(log.is_empty());

        log.record(&entry(board, Some(task), "a")).unwrap();
        log.record(&entry(board, None, "b")).unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.recent(board, 1).unwrap()[0].changes[0].field, "b");
        assert_eq!(log.for_task(task, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = ActivityLogConfig::default();
        assert_eq!(config.path, PathBuf::from("kanban_activity"));
        assert!(!config.sync_writes);
    }
}
