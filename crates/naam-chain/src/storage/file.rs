//! CAR file-backed block storage

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use bytes::Bytes;
use cid::Cid as IpldCid;
use tokio::sync::Mutex;

use crate::block::compute_cid;
use crate::error::{ChainError, Result};
use crate::fs::replace_file;
use crate::storage::BlockStore;

/// Modification time and length of the CAR file as last loaded or written
type Fingerprint = (Option<SystemTime>, u64);

/// CAR file-backed block storage
///
/// Loads the entire CAR file into memory on construction, writes back on flush.
/// The CAR root is the chain head at the time of the last [`set_roots`](Self::set_roots).
///
/// Flushes replace the file atomically. A lookup that misses reloads the file
/// if another writer has replaced it since, so a reader sharing the path with
/// a publisher in another process sees its blocks.
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    path: PathBuf,
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
    roots: Arc<RwLock<Vec<IpldCid>>>,
    changes: Arc<AtomicU64>,
    flushed: Arc<AtomicU64>,
    on_disk: Arc<RwLock<Option<Fingerprint>>>,
    flush_lock: Arc<Mutex<()>>,
}

impl FileBlockStore {
    /// Load from existing CAR file
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let fingerprint = fingerprint(&path).await?;
        let roots = crate::car::read_car_header(&path).await?;
        let blocks = crate::car::read_car(&path).await?;

        let store = Self::new(path);
        *store.blocks.write().unwrap_or_else(PoisonError::into_inner) = blocks;
        *store.roots.write().unwrap_or_else(PoisonError::into_inner) = roots;
        *store.on_disk.write().unwrap_or_else(PoisonError::into_inner) = fingerprint;
        Ok(store)
    }

    /// Load from a CAR file if it exists, otherwise start empty
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(ChainError::io)?;
        if exists {
            Self::load(path).await
        } else {
            Ok(Self::new(path))
        }
    }

    /// Create new CAR file storage (empty)
    ///
    /// The file is not created until the first flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
            roots: Arc::new(RwLock::new(Vec::new())),
            changes: Arc::new(AtomicU64::new(0)),
            flushed: Arc::new(AtomicU64::new(0)),
            on_disk: Arc::new(RwLock::new(None)),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the CAR file roots
    pub fn roots(&self) -> Vec<IpldCid> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the CAR file roots (for writing)
    ///
    /// This marks the storage as dirty. Call `flush()` to persist the change.
    pub fn set_roots(&self, new_roots: Vec<IpldCid>) {
        *self.roots.write().unwrap_or_else(PoisonError::into_inner) = new_roots;
        self.mark_dirty();
    }

    /// Write blocks back to CAR file if dirty
    ///
    /// Changes made while the write is in flight stay dirty. A flush dropped
    /// before it completes leaves the previous file in place and the store
    /// dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the CAR file cannot be written.
    pub async fn flush(&self) -> Result<()> {
        let guard = self.flush_lock.clone().lock_owned().await;
        if !self.is_dirty() {
            return Ok(());
        }

        let (version, blocks) = {
            let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
            (self.changes.load(Ordering::Acquire), blocks.clone())
        };
        let bytes = crate::car::encode_car(self.roots(), blocks).await?;

        // The lock travels with the write so a dropped flush still finishes
        // before the next one starts
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            replace_file(&path, &bytes)?;
            let meta = std::fs::metadata(&path)?;
            Ok::<_, std::io::Error>((meta.modified().ok(), meta.len()))
        })
        .await
        .map_err(ChainError::io)?
        .map_err(|e| ChainError::io(e).with_context(format!("writing {}", self.path.display())))?;

        self.flushed.fetch_max(version, Ordering::AcqRel);
        *self.on_disk.write().unwrap_or_else(PoisonError::into_inner) = Some(written);
        Ok(())
    }

    /// Reload blocks from the CAR file if another writer replaced it
    ///
    /// Blocks found on disk are added to the ones held in memory; nothing
    /// held in memory is dropped. The roots follow the file unless this store
    /// has unflushed changes. Returns whether the file was read.
    pub async fn refresh(&self) -> Result<bool> {
        let _guard = self.flush_lock.lock().await;
        let Some(current) = fingerprint(&self.path).await? else {
            return Ok(false);
        };
        if *self.on_disk.read().unwrap_or_else(PoisonError::into_inner) == Some(current) {
            return Ok(false);
        }

        let roots = crate::car::read_car_header(&self.path).await?;
        let loaded = crate::car::read_car(&self.path).await?;
        let added = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            let before = blocks.len();
            for (cid, data) in loaded {
                blocks.entry(cid).or_insert(data);
            }
            blocks.len() - before
        };
        if !self.is_dirty() {
            *self.roots.write().unwrap_or_else(PoisonError::into_inner) = roots;
        }
        *self.on_disk.write().unwrap_or_else(PoisonError::into_inner) = Some(current);
        tracing::debug!(path = %self.path.display(), added, "reloaded CAR file");
        Ok(true)
    }

    /// Check if store has unflushed changes
    pub fn is_dirty(&self) -> bool {
        self.changes.load(Ordering::Acquire) != self.flushed.load(Ordering::Acquire)
    }

    /// Get the path to the CAR file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn mark_dirty(&self) {
        self.changes.fetch_add(1, Ordering::AcqRel);
    }

    fn lookup(&self, cid: &IpldCid) -> Option<Bytes> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned()
    }
}

async fn fingerprint(path: &std::path::Path) -> Result<Option<Fingerprint>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some((meta.modified().ok(), meta.len()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ChainError::io(e).with_context(format!("reading {}", path.display()))),
    }
}

impl BlockStore for FileBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        if let Some(data) = self.lookup(cid) {
            return Ok(Some(data));
        }
        if self.refresh().await? {
            return Ok(self.lookup(cid));
        }
        Ok(None)
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = compute_cid(data)?;
        let inserted = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            if blocks.contains_key(&cid) {
                false
            } else {
                blocks.insert(cid, Bytes::copy_from_slice(data));
                true
            }
        };
        if inserted {
            self.mark_dirty();
        }
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.get(cid).await?.is_some())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        let mut results = Vec::with_capacity(cids.len());
        for cid in cids {
            results.push(store.get(cid).cloned());
        }
        Ok(results)
    }

    async fn apply_head(&self, head: IpldCid) -> Result<()> {
        self.set_roots(vec![head]);
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
    use tempfile::TempDir;

    fn test_cid(n: u8) -> IpldCid {
        let data = vec![n; 32];
        let mh = multihash::Multihash::wrap(SHA2_256, &data).unwrap();
        IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh)
    }

    #[tokio::test]
    async fn test_new_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.car");
        let storage = FileBlockStore::new(&path);

        assert!(storage.roots().is_empty());
        assert!(!storage.is_dirty());
        assert_eq!(storage.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::new(dir.path().join("chain.car"));

        let data = b"test data";
        let cid = storage.put(data).await.unwrap();

        assert!(storage.is_dirty());

        let retrieved = storage.get(&cid).await.unwrap().unwrap();
        assert_eq!(retrieved.as_ref(), data);
    }

    #[tokio::test]
    async fn test_repeat_put_does_not_dirty() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::new(dir.path().join("chain.car"));

        let cid = storage.put(b"block").await.unwrap();
        storage.set_roots(vec![cid]);
        storage.flush().await.unwrap();
        assert!(!storage.is_dirty());

        assert_eq!(storage.put(b"block").await.unwrap(), cid);
        assert!(!storage.is_dirty());
    }

    #[tokio::test]
    async fn test_has() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::new(dir.path().join("chain.car"));

        let cid = storage.put(b"test data").await.unwrap();

        assert!(storage.has(&cid).await.unwrap());
        assert!(!storage.has(&test_cid(99)).await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.car");

        let storage = FileBlockStore::new(&path);
        let data1 = b"test data 1";
        let data2 = b"test data 2";
        let cid1 = storage.put(data1).await.unwrap();
        let cid2 = storage.put(data2).await.unwrap();

        storage.set_roots(vec![cid1]);
        storage.flush().await.unwrap();
        assert!(!storage.is_dirty());

        let storage2 = FileBlockStore::open(&path).await.unwrap();

        assert_eq!(storage2.roots(), vec![cid1]);
        assert_eq!(storage2.get(&cid1).await.unwrap().unwrap().as_ref(), data1);
        assert_eq!(storage2.get(&cid2).await.unwrap().unwrap().as_ref(), data2);
        assert!(!storage2.is_dirty());
    }

    #[tokio::test]
    async fn test_apply_head_sets_root_and_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.car");
        let storage = FileBlockStore::new(&path);

        let head = storage.put(b"advertisement").await.unwrap();
        storage.apply_head(head).await.unwrap();
        assert!(!storage.is_dirty());

        let reloaded = FileBlockStore::load(&path).await.unwrap();
        assert_eq!(reloaded.roots(), vec![head]);
        assert!(reloaded.has(&head).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::open(dir.path().join("missing.car"))
            .await
            .unwrap();

        assert!(storage.roots().is_empty());
        assert!(!storage.has(&test_cid(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_many() {
        let dir = TempDir::new().unwrap();
        let storage = FileBlockStore::new(dir.path().join("chain.car"));

        let cid1 = storage.put(b"data 1").await.unwrap();
        let cid2 = storage.put(b"data 2").await.unwrap();
        let cid3 = test_cid(99);

        let results = storage.get_many(&[cid1, cid2, cid3]).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().as_ref(), b"data 1");
        assert_eq!(results[1].as_ref().unwrap().as_ref(), b"data 2");
        assert!(results[2].is_none());
    }
    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_flush_keeps_previous_file() {
        use std::future::Future;
        use std::pin::pin;
        use std::task::{Context, Waker};
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.car");
        let storage = FileBlockStore::new(&path);
        let mut last = None;
        for n in 0..2000u32 {
            last = Some(storage.put(&n.to_be_bytes().repeat(64)).await.unwrap());
        }
        storage.apply_head(last.unwrap()).await.unwrap();
        let good = std::fs::read(&path).unwrap();

        for polls in 0..16 {
            let head = storage.put(format!("head {polls}").as_bytes()).await.unwrap();
            {
                let mut apply = pin!(storage.apply_head(head));
                let mut cx = Context::from_waker(Waker::noop());
                for _ in 0..polls {
                    if apply.as_mut().poll(&mut cx).is_ready() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;

            let reloaded = FileBlockStore::load(&path).await.unwrap();
            assert!(reloaded.has(&last.unwrap()).await.unwrap(), "polls={polls}");
            assert!(std::fs::metadata(&path).unwrap().len() >= good.len() as u64);
        }

        // Whatever was dropped, the next flush writes everything
        storage.flush().await.unwrap();
        assert!(!storage.is_dirty());
        let reloaded = FileBlockStore::load(&path).await.unwrap();
        assert!(reloaded.has(&storage.put(b"head 15").await.unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reader_sees_blocks_flushed_by_another_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.car");
        let writer = FileBlockStore::new(&path);
        let first = writer.put(b"first").await.unwrap();
        writer.apply_head(first).await.unwrap();

        let reader = FileBlockStore::open(&path).await.unwrap();
        assert_eq!(reader.roots(), vec![first]);

        let second = writer.put(b"second").await.unwrap();
        assert!(!reader.has(&second).await.unwrap());
        writer.apply_head(second).await.unwrap();

        assert_eq!(reader.get(&second).await.unwrap().unwrap().as_ref(), b"second");
        assert_eq!(reader.roots(), vec![second]);
        assert!(!reader.is_dirty());
        assert!(!reader.refresh().await.unwrap());
    }
}
