//! Memory-Mapped Read Handles
//!
//! Read-only views of disk-tier files that avoid copying the value into the
//! process heap. Every open handle is tracked per key so the owning manager
//! can revoke them on `delete`, `clear` and shutdown; a revoked handle stays
//! valid as an object but no longer exposes bytes.
//!
//! Revocation never waits on readers. It flags the handle as revoked so
//! `bytes()` stops handing out views; the mapping itself is unmapped at once
//! when no guard is outstanding, otherwise when the handle is dropped.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use memmap2::Mmap;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::debug;

use super::entry::CacheKey;
use crate::error::{Error, Result};

enum Mapping {
    Mapped(Mmap),
    /// Zero-length files cannot be mapped
    Empty,
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::Mapped(map) => &map[..],
            Mapping::Empty => &[],
        }
    }
}

struct SlotState {
    revoked: AtomicBool,
    mapping: RwLock<Option<Mapping>>,
}

impl SlotState {
    fn new(mapping: Mapping) -> Self {
        Self {
            revoked: AtomicBool::new(false),
            mapping: RwLock::new(Some(mapping)),
        }
    }

    fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Flag the slot and unmap it if no reader holds a guard
    fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
        if let Some(mut mapping) = self.mapping.try_write() {
            mapping.take();
        }
    }
}

type Slot = Arc<SlotState>;

#[derive(Default)]
struct RegistryInner {
    handles: DashMap<CacheKey, HashMap<u64, Slot>>,
    next_id: AtomicU64,
    opened: AtomicU64,
    revoked: AtomicU64,
}

impl RegistryInner {
    fn unregister(&self, key: &CacheKey, id: u64) {
        let now_empty = match self.handles.get_mut(key) {
            Some(mut slots) => {
                slots.remove(&id);
                slots.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.handles.remove_if(key, |_, slots| slots.is_empty());
        }
    }
}

/// Registry of open memory-mapped handles
#[derive(Default)]
pub struct MmapRegistry {
    inner: Arc<RegistryInner>,
}

impl MmapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `path` read-only and register the handle under `key`
    pub fn open(&self, key: CacheKey, path: &Path) -> Result<MmapHandle> {
        let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
        let len = file.metadata().map_err(|e| Error::io_at(path, e))?.len() as usize;

        let mapping = if len == 0 {
            Mapping::Empty
        } else {
            // SAFETY: cache data files are written once under a fresh name and
            // never modified in place; replacement goes through a new file.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io_at(path, e))?;
            Mapping::Mapped(map)
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot: Slot = Arc::new(SlotState::new(mapping));
        self.inner
            .handles
            .entry(key.clone())
            .or_default()
            .insert(id, Arc::clone(&slot));
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, len, "Opened memory-mapped handle");

        Ok(MmapHandle {
            key,
            id,
            len,
            slot,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Revoke every handle open on `key`; returns how many were revoked
    pub fn revoke_key(&self, key: &CacheKey) -> usize {
        let Some((_, slots)) = self.inner.handles.remove(key) else {
            return 0;
        };
        for slot in slots.values() {
            slot.revoke();
        }
        self.inner
            .revoked
            .fetch_add(slots.len() as u64, Ordering::Relaxed);
        slots.len()
    }

    /// Revoke every open handle
    pub fn revoke_all(&self) -> usize {
        let keys: Vec<CacheKey> = self
            .inner
            .handles
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().map(|key| self.revoke_key(key)).sum()
    }

    /// Number of handles currently open
    pub fn open_count(&self) -> usize {
        self.inner
            .handles
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Handles opened since creation
    pub fn total_opened(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Handles revoked by the registry (not released by their holder)
    pub fn total_revoked(&self) -> u64 {
        self.inner.revoked.load(Ordering::Relaxed)
    }
}

/// Read-only memory-mapped view of a cached value
///
/// Dropping the handle unmaps the file and unregisters it.
pub struct MmapHandle {
    key: CacheKey,
    id: u64,
    len: usize,
    slot: Slot,
    registry: Weak<RegistryInner>,
}

impl MmapHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Length of the mapped value
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// False once the handle has been revoked
    pub fn is_open(&self) -> bool {
        !self.slot.is_revoked() && self.slot.mapping.read().is_some()
    }

    /// Borrow the mapped bytes; `None` after revocation
    ///
    /// A guard taken before revocation keeps its view until dropped.
    pub fn bytes(&self) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        if self.slot.is_revoked() {
            return None;
        }
        RwLockReadGuard::try_map(self.slot.mapping.read(), |mapping| {
            mapping.as_ref().map(Mapping::as_slice)
        })
        .ok()
    }

    /// Copy the mapped bytes out; `None` after revocation
    pub fn to_bytes(&self) -> Option<Bytes> {
        self.bytes().map(|view| Bytes::copy_from_slice(&view))
    }

    /// Release the handle explicitly
    pub fn release(self) {}
}

impl Drop for MmapHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.key, self.id);
        }
        self.slot.mapping.write().take();
    }
}

impl std::fmt::Debug for MmapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapHandle")
            .field("key", &self.key)
            .field("len", &self.len)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name).unwrap()
    }

    fn file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_open_and_read() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "a.bin", b"mapped bytes");
        let registry = MmapRegistry::new();

        let handle = registry.open(key("a"), &path).unwrap();
        assert_eq!(handle.len(), 12);
        assert_eq!(&*handle.bytes().unwrap(), b"mapped bytes");
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "a.bin", b"x");
        let registry = MmapRegistry::new();

        let first = registry.open(key("a"), &path).unwrap();
        let second = registry.open(key("a"), &path).unwrap();
        assert_eq!(registry.open_count(), 2);

        drop(first);
        assert_eq!(registry.open_count(), 1);
        second.release();
        assert_eq!(registry.open_count(), 0);
        assert_eq!(registry.total_opened(), 2);
        assert_eq!(registry.total_revoked(), 0);
    }

    #[test]
    fn test_revoke_key() {
        let dir = TempDir::new().unwrap();
        let a = file(&dir, "a.bin", b"aaa");
        let b = file(&dir, "b.bin", b"bbb");
        let registry = MmapRegistry::new();

        let handle_a = registry.open(key("a"), &a).unwrap();
        let handle_b = registry.open(key("b"), &b).unwrap();

        assert_eq!(registry.revoke_key(&key("a")), 1);
        assert!(!handle_a.is_open());
        assert!(handle_a.bytes().is_none());
        assert!(handle_b.is_open());
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn test_revoke_with_guard_held() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "a.bin", b"still here");
        let registry = MmapRegistry::new();
        let handle = registry.open(key("a"), &path).unwrap();

        let view = handle.bytes().unwrap();
        assert_eq!(registry.revoke_key(&key("a")), 1);
        assert!(!handle.is_open());
        assert!(handle.bytes().is_none());
        assert_eq!(&*view, b"still here");

        drop(view);
        assert!(handle.to_bytes().is_none());
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_revoke_all() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "a.bin", b"data");
        let registry = MmapRegistry::new();

        let handles: Vec<_> = (0..3)
            .map(|i| registry.open(key(&format!("k{i}")), &path).unwrap())
            .collect();

        assert_eq!(registry.revoke_all(), 3);
        assert!(handles.iter().all(|h| h.to_bytes().is_none()));
        assert_eq!(registry.open_count(), 0);
        assert_eq!(registry.total_revoked(), 3);
    }

    #[test]
    fn test_handle_outlives_registry() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "a.bin", b"data");
        let registry = MmapRegistry::new();
        let handle = registry.open(key("a"), &path).unwrap();

        drop(registry);
        assert_eq!(handle.to_bytes(), Some(Bytes::from_static(b"data")));
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "empty.bin", b"");
        let registry = MmapRegistry::new();

        let handle = registry.open(key("empty"), &path).unwrap();
        assert!(handle.is_empty());
        assert_eq!(handle.to_bytes(), Some(Bytes::new()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let registry = MmapRegistry::new();
        let err = registry
            .open(key("a"), &dir.path().join("missing.bin"))
            .unwrap_err();
        assert!(err.is_io());
        assert_eq!(registry.open_count(), 0);
    }
}
