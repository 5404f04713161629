//! File-backed chain state

use super::{
    ChainState, ChainStateStore, HEAD_KEY, HEIGHT_KEY, decode_head, decode_height, encode_height,
    ensure_unchanged,
};
use crate::error::{ChainError, Result};
use crate::fs::replace_file;
use cid::Cid as IpldCid;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Name of the state file inside the state directory
pub const STATE_FILE: &str = "chain-state";

/// Chain state stored as one file in a directory
///
/// The file is a DAG-CBOR map holding the `headAdCid` and `height` values, so
/// head and height are always read and replaced together. A commit writes a
/// temporary file and renames it over the old one. A commit dropped part way
/// leaves either the old pair or the new one, and holds the commit lock until
/// the file is settled.
///
/// Clones share a commit lock. Separate [`open`](Self::open) calls on the same
/// directory do not.
#[derive(Debug, Clone)]
pub struct FileChainState {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileChainState {
    /// Open state in `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(ChainError::io)?;
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Directory holding the state file
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_state(&self) -> Result<ChainState> {
        match tokio::fs::read(self.dir.join(STATE_FILE)).await {
            Ok(bytes) => decode_state(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ChainState::default()),
            Err(e) => Err(ChainError::storage(e).with_context(format!("reading {STATE_FILE}"))),
        }
    }

    /// Replace the state file, releasing `guard` once the new file is in place
    async fn write_state(&self, state: &ChainState, guard: OwnedMutexGuard<()>) -> Result<()> {
        let bytes = encode_state(state)?;
        let path = self.dir.join(STATE_FILE);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            replace_file(&path, &bytes)
        })
        .await
        .map_err(ChainError::storage)?
        .map_err(|e| ChainError::storage(e).with_context(format!("writing {STATE_FILE}")))
    }
}

fn encode_state(state: &ChainState) -> Result<Vec<u8>> {
    let mut values = BTreeMap::new();
    if let Some(head) = &state.head {
        values.insert(HEAD_KEY, ByteBuf::from(head.to_bytes()));
    }
    values.insert(HEIGHT_KEY, ByteBuf::from(encode_height(state.height)));
    serde_ipld_dagcbor::to_vec(&values).map_err(ChainError::serialization)
}

fn decode_state(bytes: &[u8]) -> Result<ChainState> {
    let values: BTreeMap<String, ByteBuf> = serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| ChainError::serialization(e).with_context(STATE_FILE))?;
    let head = values.get(HEAD_KEY).map(|b| decode_head(b)).transpose()?;
    let height = values
        .get(HEIGHT_KEY)
        .map(|b| decode_height(b))
        .transpose()?
        .unwrap_or(0);
    Ok(ChainState { head, height })
}

impl ChainStateStore for FileChainState {
    async fn head(&self) -> Result<Option<IpldCid>> {
        Ok(self.read_state().await?.head)
    }

    async fn height(&self) -> Result<u64> {
        Ok(self.read_state().await?.height)
    }

    async fn state(&self) -> Result<ChainState> {
        self.read_state().await
    }

    async fn set_head_and_advance_height(
        &self,
        expected: ChainState,
        head: IpldCid,
    ) -> Result<ChainState> {
        let guard = self.write_lock.clone().lock_owned().await;

        let current = self.read_state().await?;
        ensure_unchanged(&expected, &current)?;
        let next = current.advance(head);
        self.write_state(&next, guard).await?;
        Ok(next)
    }
}
