//! On-disk [`BackingStore`] implementation: one zstd-compressed file per key.
//!
//! Entries live directly under the root directory as `<key>` (keys already
//! carry the `.jdbc_cache` extension). A population writes `<key>.tmp` first
//! and renames it over the final name, so readers only ever see complete
//! files. Directory scans ignore `.tmp` files.

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use querycache_core::{encode, CacheKey, RowCursor, CACHE_FILE_EXTENSION};

use crate::error::CacheError;
use crate::locks::LockCoordinator;
use crate::storage::engine::{run_producer, BackingStore, EntryInfo, Producer, SweepableStore};

/// Suffix of in-progress population files.
pub const STAGING_SUFFIX: &str = ".tmp";

const ZSTD_LEVEL: i32 = 3;

/// Directory-backed store.
pub struct DiskStore {
    root: PathBuf,
    locks: LockCoordinator,
}

impl DiskStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if `root` is empty, cannot be created, or
    /// is not a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(CacheError::Configuration(
                "disk store root must not be empty".to_string(),
            ));
        }
        fs::create_dir_all(&root).map_err(|e| {
            CacheError::Configuration(format!("cannot create cache root {}: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(CacheError::Configuration(format!(
                "cache root {} is not a directory",
                root.display()
            )));
        }
        tracing::info!(root = %root.display(), "disk cache store opened");
        Ok(Self {
            root,
            locks: LockCoordinator::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn staging_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}{STAGING_SUFFIX}"))
    }

    /// Opens the published file for `key`, or `None` if there is none.
    fn open_entry(&self, key: &CacheKey) -> Result<Option<File>, CacheError> {
        match File::open(self.entry_path(key)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::storage(format!("opening cache entry {key}"), e)),
        }
    }

    /// Runs the producer and publishes its rows. Returns the published file,
    /// opened before the caller releases the population lock.
    fn populate(&self, key: &CacheKey, producer: Producer<'_>) -> Result<Option<File>, CacheError> {
        let Some(mut source) = run_producer(key, producer)? else {
            return Ok(None);
        };

        let serialization = |source: io::Error| CacheError::Serialization {
            key: key.clone(),
            source,
        };

        let staging = StagingFile::new(self.staging_path(key));
        let file = File::create(staging.path()).map_err(serialization)?;
        let mut encoder =
            zstd::Encoder::new(BufWriter::new(file), ZSTD_LEVEL).map_err(serialization)?;
        let summary =
            encode(&mut encoder, source.as_mut()).map_err(|e| CacheError::from_encode(key, e))?;
        let mut writer = encoder.finish().map_err(serialization)?;
        writer.flush().map_err(serialization)?;
        drop(writer);

        let path = self.entry_path(key);
        fs::rename(staging.path(), &path).map_err(serialization)?;
        staging.disarm();

        metrics::counter!("querycache_populations_total", "store" => "disk").increment(1);
        tracing::debug!(
            key = %key,
            rows = summary.rows,
            path = %path.display(),
            "published cache entry"
        );

        File::open(&path)
            .map(Some)
            .map_err(|e| CacheError::storage(format!("reopening cache entry {key}"), e))
    }

    fn scan(&self) -> Result<Vec<(CacheKey, PathBuf)>, CacheError> {
        let dir = fs::read_dir(&self.root).map_err(|e| {
            CacheError::storage(format!("listing cache root {}", self.root.display()), e)
        })?;

        let mut found = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                CacheError::storage(format!("listing cache root {}", self.root.display()), e)
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_entry_file_name(name) {
                continue;
            }
            if let Ok(key) = CacheKey::parse(name) {
                found.push((key, entry.path()));
            }
        }
        Ok(found)
    }
}

fn is_entry_file_name(name: &str) -> bool {
    !name.ends_with(STAGING_SUFFIX) && name.ends_with(CACHE_FILE_EXTENSION)
}

fn decode(key: &CacheKey, file: File) -> Result<RowCursor, CacheError> {
    let decoder = zstd::Decoder::new(file).map_err(|e| CacheError::CorruptEntry {
        key: key.clone(),
        source: e.into(),
    })?;
    RowCursor::open(decoder).map_err(|e| CacheError::from_decode(key, e))
}

impl BackingStore for DiskStore {
    fn get_or_populate(
        &self,
        key: &CacheKey,
        producer: Option<Producer<'_>>,
    ) -> Result<Option<RowCursor>, CacheError> {
        if let Some(file) = self.open_entry(key)? {
            metrics::counter!("querycache_hits_total", "store" => "disk").increment(1);
            tracing::debug!(key = %key, "cache hit");
            return decode(key, file).map(Some);
        }

        metrics::counter!("querycache_misses_total", "store" => "disk").increment(1);
        let Some(producer) = producer else {
            tracing::debug!(key = %key, "cache miss without producer");
            return Err(CacheError::NoCacheEntry { key: key.clone() });
        };

        let file = {
            let _guard = self.locks.lock(key.as_str());
            match self.open_entry(key)? {
                Some(file) => file,
                None => match self.populate(key, producer)? {
                    Some(file) => file,
                    None => return Ok(None),
                },
            }
        };
        decode(key, file).map(Some)
    }

    fn exists(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        let mut removed = 0_usize;
        for (key, path) in self.scan()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::storage(format!("flushing {key}"), e)),
            }
        }
        tracing::debug!(root = %self.root.display(), removed, "flushed disk cache");
        Ok(())
    }

    fn flush_one(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(format!("flushing {key}"), e)),
        }
    }

    fn size(&self) -> Result<usize, CacheError> {
        Ok(self.scan()?.len())
    }

    fn active_count(&self) -> usize {
        self.locks.active_count()
    }

    fn is_active(&self, key: &CacheKey) -> bool {
        self.locks.is_registered(key.as_str())
    }
}

impl SweepableStore for DiskStore {
    fn entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        let mut entries = Vec::new();
        for (key, path) in self.scan()? {
            // Entries removed between the listing and the stat are skipped.
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(last_modified) => entries.push(EntryInfo { key, last_modified }),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CacheError::storage(format!("reading metadata of {key}"), e));
                }
            }
        }
        Ok(entries)
    }

    fn last_modified(&self, key: &CacheKey) -> Option<SystemTime> {
        fs::metadata(self.entry_path(key))
            .and_then(|m| m.modified())
            .ok()
    }
}

/// Staging file that is deleted on drop unless disarmed.
struct StagingFile {
    path: PathBuf,
    armed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove staging file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::storage::test_support::{self, key};

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn empty_root_is_rejected() {
        assert!(matches!(DiskStore::new(""), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn root_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(DiskStore::new(&file), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn populate_then_hit() {
        let (_dir, store) = store();
        test_support::populate_then_hit(&store);
    }

    #[test]
    fn cache_only_miss_creates_no_file() {
        let (_dir, store) = store();
        test_support::cache_only_miss(&store);
        assert!(!store.root().join("abc.jdbc_cache").exists());
        assert!(file_names(store.root()).is_empty());
    }

    #[test]
    fn not_a_query_publishes_nothing() {
        let (_dir, store) = store();
        test_support::not_a_query_publishes_nothing(&store);
        assert!(file_names(store.root()).is_empty());
    }

    #[test]
    fn failed_population_leaves_no_files() {
        let (_dir, store) = store();
        test_support::failed_population_leaves_no_entry(&store);
        assert!(file_names(store.root()).is_empty());
    }

    #[test]
    fn flush_all_and_flush_one() {
        let (_dir, store) = store();
        test_support::flush_semantics(&store);
    }

    #[test]
    fn concurrent_callers_populate_once() {
        let (_dir, store) = store();
        test_support::at_most_one_populate(Arc::new(store));
    }

    #[test]
    fn published_file_is_named_after_the_key() {
        let (_dir, store) = store();
        let k = key("SELECT 1");
        test_support::publish(&store, &k);
        assert_eq!(file_names(store.root()), vec![k.to_string()]);
    }

    #[test]
    fn staging_files_are_invisible() {
        let (_dir, store) = store();
        let k = key("SELECT 1");
        test_support::publish(&store, &k);
        fs::write(store.root().join(format!("{k}.tmp")), b"partial").unwrap();
        fs::write(store.root().join("notes.txt"), b"unrelated").unwrap();

        assert_eq!(store.size().unwrap(), 1);
        assert_eq!(store.entries().unwrap().len(), 1);

        store.flush_all().unwrap();
        assert_eq!(store.size().unwrap(), 0);
        // In-progress and foreign files are left alone.
        assert!(store.root().join(format!("{k}.tmp")).exists());
        assert!(store.root().join("notes.txt").exists());
    }

    #[test]
    fn corrupt_entry_fails_only_that_read() {
        let (_dir, store) = store();
        let good = key("SELECT good");
        let bad = key("SELECT bad");
        test_support::publish(&store, &good);
        fs::write(store.root().join(bad.as_str()), b"not a cache entry").unwrap();

        let err = store.get_or_populate(&bad, None).unwrap_err();
        assert!(matches!(err, CacheError::CorruptEntry { key, .. } if key == bad));

        let rows = test_support::read_all(store.get_or_populate(&good, None).unwrap());
        assert_eq!(rows, test_support::rows());
    }

    #[test]
    fn entries_carry_file_modification_time() {
        let (_dir, store) = store();
        let k = key("SELECT 1");
        test_support::publish(&store, &k);

        let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(store.root().join(k.as_str()))
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(store.last_modified(&k), Some(past));
        let entries = store.entries().unwrap();
        assert_eq!(entries, vec![EntryInfo { key: k, last_modified: past }]);
    }

    #[test]
    fn entries_written_by_another_instance_are_hits() {
        let (_dir, store) = store();
        let k = key("SELECT shared");
        test_support::publish(&store, &k);

        let other = DiskStore::new(store.root()).unwrap();
        let rows = test_support::read_all(other.get_or_populate(&k, None).unwrap());
        assert_eq!(rows, test_support::rows());
    }
}
