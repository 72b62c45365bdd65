use std::{
    collections::{HashMap, HashSet},
    io::Write as _,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Context as _;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    cache::index::{CacheEntry, INDEX_VERSION, IndexFile, MEDIA_EXT, file_name_for},
    foundation::error::{ReelError, ReelResult},
};

/// Point-in-time cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub capacity_bytes: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    next_tick: u64,
    /// Access times changed since the index was last written.
    dirty: bool,
    /// Lease count per origin id; leased entries are never evicted.
    pins: HashMap<String, usize>,
}

impl CacheState {
    fn bump_tick(&mut self) -> u64 {
        let t = self.next_tick;
        self.next_tick += 1;
        t
    }

    fn pin(&mut self, origin_id: &str) {
        *self.pins.entry(origin_id.to_string()).or_insert(0) += 1;
    }

    fn unpin(&mut self, origin_id: &str) {
        if let Some(n) = self.pins.get_mut(origin_id) {
            *n -= 1;
            if *n == 0 {
                self.pins.remove(origin_id);
            }
        }
    }

    fn is_pinned(&self, origin_id: &str) -> bool {
        self.pins.contains_key(origin_id)
    }

    fn remove(&mut self, origin_id: &str) -> Option<CacheEntry> {
        let e = self.entries.remove(origin_id)?;
        self.total_bytes = self.total_bytes.saturating_sub(e.byte_size);
        Some(e)
    }
}

/// Keeps the entries it covers out of eviction until dropped.
///
/// A pipeline run takes one lease and passes it to every fetch, so a file handed out early in the
/// run is still on disk when the composer reads it.
#[derive(Debug)]
pub struct CacheLease {
    cache: Arc<CacheStore>,
    ids: Mutex<Vec<String>>,
}

impl CacheLease {
    /// Origin ids currently held, in acquisition order (repeats included).
    pub fn origin_ids(&self) -> Vec<String> {
        self.ids.lock().clone()
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        let ids = std::mem::take(self.ids.get_mut());
        if ids.is_empty() {
            return;
        }
        let mut st = self.cache.state.lock();
        for id in &ids {
            st.unpin(id);
        }
        tracing::debug!(released = ids.len(), "released cache lease");
    }
}

/// Size-bounded, persisted, LRU-evicting store of retrieved media keyed by origin id.
///
/// Every index mutation happens under one lock, so a `get` racing an eviction of the same key
/// observes either the intact file or a clean miss. New media is written to `tmp/` first and
/// renamed into place, so readers never see a partial file.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    tmp_dir: PathBuf,
    capacity_bytes: u64,
    state: Mutex<CacheState>,
    tmp_seq: AtomicU64,
}

impl CacheStore {
    /// Open (or create) the cache rooted at `root`.
    ///
    /// Recovers from a previous process: stale temp files are discarded, index entries whose file
    /// disappeared are dropped, unindexed media files are deleted, and the store is evicted down to
    /// `capacity_bytes` if it shrank.
    pub fn open(root: impl Into<PathBuf>, capacity_bytes: u64) -> ReelResult<Self> {
        if capacity_bytes == 0 {
            return Err(ReelError::validation("cache capacity must be > 0"));
        }
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create cache dir '{}'", root.display()))?;
        let tmp_dir = root.join("tmp");
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir)
                .with_context(|| format!("clear cache temp dir '{}'", tmp_dir.display()))?;
        }
        std::fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("create cache temp dir '{}'", tmp_dir.display()))?;

        let index = match IndexFile::load(&root) {
            Ok(index) => index.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "cache index unreadable, starting from an empty index");
                IndexFile::default()
            }
        };

        let mut state = CacheState {
            next_tick: index.next_tick,
            ..CacheState::default()
        };
        for mut entry in index.entries {
            let path = entry.file_path(&root);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    entry.byte_size = meta.len();
                    state.next_tick = state.next_tick.max(entry.last_access_tick + 1);
                    state.total_bytes += entry.byte_size;
                    if let Some(prev) = state.entries.insert(entry.origin_id.clone(), entry) {
                        state.total_bytes = state.total_bytes.saturating_sub(prev.byte_size);
                    }
                }
                _ => {
                    tracing::debug!(origin_id = %entry.origin_id, "dropping index entry without file");
                }
            }
        }

        let known: HashSet<&str> = state
            .entries
            .values()
            .map(|e| e.file_name.as_str())
            .collect();
        for dirent in std::fs::read_dir(&root)
            .with_context(|| format!("list cache dir '{}'", root.display()))?
            .flatten()
        {
            let path = dirent.path();
            let is_media = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(MEDIA_EXT);
            let indexed = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| known.contains(n));
            if is_media && !indexed {
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::info!(path = %path.display(), "removed orphan cache file"),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphan cache file")
                    }
                }
            }
        }

        let store = Self {
            root,
            tmp_dir,
            capacity_bytes,
            state: Mutex::new(state),
            tmp_seq: AtomicU64::new(0),
        };
        {
            let mut st = store.state.lock();
            store.evict_locked(&mut st, 0);
            store.persist_locked(&mut st)?;
        }
        tracing::debug!(
            root = %store.root.display(),
            entries = store.stats().entry_count,
            "opened cache store"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Start an empty lease on this store.
    pub fn lease(self: &Arc<Self>) -> CacheLease {
        CacheLease {
            cache: Arc::clone(self),
            ids: Mutex::new(Vec::new()),
        }
    }

    /// Path of the cached media for `origin_id`, refreshing its LRU position.
    pub fn get(&self, origin_id: &str) -> Option<PathBuf> {
        self.get_impl(origin_id, None)
    }

    /// [`CacheStore::get`], pinning the entry under `lease` when it is present.
    pub fn get_leased(&self, origin_id: &str, lease: &CacheLease) -> Option<PathBuf> {
        self.get_impl(origin_id, Some(lease))
    }

    fn get_impl(&self, origin_id: &str, lease: Option<&CacheLease>) -> Option<PathBuf> {
        let mut st = self.state.lock();
        let path = st.entries.get(origin_id)?.file_path(&self.root);
        if !path.is_file() {
            tracing::warn!(origin_id, "cached file vanished, dropping index entry");
            st.remove(origin_id);
            st.dirty = true;
            return None;
        }
        let tick = st.bump_tick();
        if let Some(e) = st.entries.get_mut(origin_id) {
            e.last_access_tick = tick;
            e.last_access_time = Utc::now();
        }
        st.dirty = true;
        if let Some(lease) = lease {
            self.pin_locked(&mut st, origin_id, lease);
        }
        Some(path)
    }

    /// Membership test that does not count as an access.
    pub fn contains(&self, origin_id: &str) -> bool {
        self.state.lock().entries.contains_key(origin_id)
    }

    /// Publish `bytes` as the cached media for `origin_id` and return its path.
    ///
    /// Least-recently-used entries are evicted first so that the stored total never exceeds the
    /// capacity. Re-putting an existing id replaces it (last writer wins).
    ///
    /// Leased entries are not evicted; when they leave too little room the put is rejected.
    pub fn put(&self, origin_id: &str, bytes: &[u8], declared_size: u64) -> ReelResult<PathBuf> {
        self.put_impl(origin_id, bytes, declared_size, None)
    }

    /// [`CacheStore::put`], pinning the new entry under `lease`.
    pub fn put_leased(
        &self,
        origin_id: &str,
        bytes: &[u8],
        declared_size: u64,
        lease: &CacheLease,
    ) -> ReelResult<PathBuf> {
        self.put_impl(origin_id, bytes, declared_size, Some(lease))
    }

    fn put_impl(
        &self,
        origin_id: &str,
        bytes: &[u8],
        declared_size: u64,
        lease: Option<&CacheLease>,
    ) -> ReelResult<PathBuf> {
        if origin_id.is_empty() {
            return Err(ReelError::validation("origin_id must be non-empty"));
        }
        let actual = bytes.len() as u64;
        if actual > self.capacity_bytes {
            return Err(ReelError::cache(format!(
                "media '{origin_id}' is {actual} bytes, larger than the cache capacity of {} bytes",
                self.capacity_bytes
            )));
        }
        if declared_size != actual {
            tracing::debug!(origin_id, declared_size, actual, "declared size differs from payload");
        }
        // Reserve the larger figure so the bound holds even when the declaration was wrong.
        let reserve = actual.max(declared_size).min(self.capacity_bytes);

        let file_name = file_name_for(origin_id);
        let tmp = self.write_temp(&file_name, bytes)?;
        let dest = self.root.join(&file_name);

        let mut st = self.state.lock();
        let replaced = st.remove(origin_id);
        self.evict_locked(&mut st, reserve);

        let publish = if st.total_bytes.saturating_add(reserve) > self.capacity_bytes {
            Err(ReelError::cache(format!(
                "no room for '{origin_id}' ({reserve} bytes): {} of {} bytes are leased",
                st.total_bytes, self.capacity_bytes
            )))
        } else {
            std::fs::rename(&tmp, &dest).map_err(|e| {
                ReelError::cache(format!("publish '{}' failed: {e}", dest.display()))
            })
        };
        if let Err(e) = publish {
            let _ = std::fs::remove_file(&tmp);
            if let Some(prev) = replaced {
                st.total_bytes += prev.byte_size;
                st.entries.insert(prev.origin_id.clone(), prev);
            }
            return Err(e);
        }

        let tick = st.bump_tick();
        st.entries.insert(
            origin_id.to_string(),
            CacheEntry {
                origin_id: origin_id.to_string(),
                file_name,
                byte_size: actual,
                last_access_time: Utc::now(),
                last_access_tick: tick,
            },
        );
        st.total_bytes += actual;
        if let Some(lease) = lease {
            self.pin_locked(&mut st, origin_id, lease);
        }
        if let Err(e) = self.persist_locked(&mut st) {
            // The media itself is published; the index is retried on the next mutation or flush.
            tracing::warn!(error = %e, "failed to persist cache index");
        }
        tracing::debug!(origin_id, bytes = actual, total = st.total_bytes, "cached media");
        Ok(dest)
    }

    /// Evict least-recently-used entries until `required_bytes` more would fit.
    ///
    /// Returns the number of evicted entries. Leased entries stay; asking for more than the capacity
    /// leaves only those.
    pub fn evict_to_fit(&self, required_bytes: u64) -> ReelResult<usize> {
        let mut st = self.state.lock();
        let evicted = self.evict_locked(&mut st, required_bytes);
        if evicted > 0 {
            self.persist_locked(&mut st)?;
        }
        Ok(evicted)
    }

    /// Remove one entry. Returns `false` when it was not cached.
    pub fn purge(&self, origin_id: &str) -> ReelResult<bool> {
        let mut st = self.state.lock();
        let Some(entry) = st.remove(origin_id) else {
            return Ok(false);
        };
        self.delete_file(&entry);
        self.persist_locked(&mut st)?;
        Ok(true)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> ReelResult<usize> {
        let mut st = self.state.lock();
        let entries: Vec<CacheEntry> = st.entries.drain().map(|(_, e)| e).collect();
        st.total_bytes = 0;
        for entry in &entries {
            self.delete_file(entry);
        }
        self.persist_locked(&mut st)?;
        tracing::info!(removed = entries.len(), "cleared media cache");
        Ok(entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        CacheStats {
            entry_count: st.entries.len(),
            total_bytes: st.total_bytes,
            capacity_bytes: self.capacity_bytes,
        }
    }

    /// Snapshot of all entries, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let st = self.state.lock();
        let mut out: Vec<CacheEntry> = st.entries.values().cloned().collect();
        out.sort_by_key(|e| e.last_access_tick);
        out
    }

    /// Persist pending access-time updates.
    pub fn flush(&self) -> ReelResult<()> {
        let mut st = self.state.lock();
        if st.dirty {
            self.persist_locked(&mut st)?;
        }
        Ok(())
    }

    fn evict_locked(&self, st: &mut CacheState, required_bytes: u64) -> usize {
        if st.total_bytes.saturating_add(required_bytes) <= self.capacity_bytes {
            return 0;
        }
        let mut order: Vec<(u64, String)> = st
            .entries
            .values()
            .filter(|e| !st.is_pinned(&e.origin_id))
            .map(|e| (e.last_access_tick, e.origin_id.clone()))
            .collect();
        order.sort();

        let mut evicted = 0;
        for (_, origin_id) in order {
            if st.total_bytes.saturating_add(required_bytes) <= self.capacity_bytes {
                break;
            }
            if let Some(entry) = st.remove(&origin_id) {
                self.delete_file(&entry);
                tracing::info!(origin_id = %entry.origin_id, bytes = entry.byte_size, "evicted cached media");
                evicted += 1;
            }
        }
        if evicted > 0 {
            st.dirty = true;
        }
        evicted
    }

    fn pin_locked(&self, st: &mut CacheState, origin_id: &str, lease: &CacheLease) {
        debug_assert!(std::ptr::eq(Arc::as_ptr(&lease.cache), self));
        st.pin(origin_id);
        lease.ids.lock().push(origin_id.to_string());
    }

    fn delete_file(&self, entry: &CacheEntry) {
        let path = entry.file_path(&self.root);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // Left behind as an orphan; the next `open` removes it.
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete cached file"),
        }
    }

    fn persist_locked(&self, st: &mut CacheState) -> ReelResult<()> {
        let mut entries: Vec<CacheEntry> = st.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.origin_id.cmp(&b.origin_id));
        IndexFile {
            version: INDEX_VERSION,
            next_tick: st.next_tick,
            entries,
        }
        .store(&self.root)?;
        st.dirty = false;
        Ok(())
    }

    fn write_temp(&self, file_name: &str, bytes: &[u8]) -> ReelResult<PathBuf> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .tmp_dir
            .join(format!("{file_name}.{}.{seq}.part", std::process::id()));
        let write = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(ReelError::cache(format!(
                "write temp file '{}' failed: {e}",
                tmp.display()
            )));
        }
        Ok(tmp)
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        let dirty = self.state.get_mut().dirty;
        if dirty && let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to flush cache index on drop");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/store.rs"]
mod tests;
