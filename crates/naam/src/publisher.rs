//! Publish orchestration
//!
//! A publish moves through fixed stages:
//!
//! ```text
//! ReadingState -> BuildingRecord -> BuildingAdvertisement -> CommittingState -> Announcing -> Done
//! ```
//!
//! Nothing before `CommittingState` changes the chain state. Blocks written
//! while building the advertisement are content addressed, so an abandoned
//! publish leaves at most unreferenced blocks behind. Once the state commit
//! succeeds the publish has taken effect; an announce failure after that is
//! reported but never undoes it.

use crate::announce::Announcer;
use crate::error::{ConfigError, PublishError};
use crate::options::{PublishOptions, PublisherConfig, PublisherOptions};
use chrono::{TimeDelta, Utc};
use cid::Cid as IpldCid;
use libp2p_identity::PeerId;
use naam_chain::storage::BlockStore;
use naam_chain::{
    AdChain, Appended, CONTEXT_ID, ChainErrorKind, ChainState, ChainStateStore, Name, NamingRecord,
    SigningKey,
};
use std::fmt;
use tokio::sync::Mutex;

/// Orchestrator stage, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    /// Reading the current head and height
    ReadingState,
    /// Building and signing the naming record
    BuildingRecord,
    /// Storing the entries block and signed advertisement
    BuildingAdvertisement,
    /// Advancing head and height
    CommittingState,
    /// Notifying the indexer
    Announcing,
    /// Finished, possibly with an announce failure
    Done,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadingState => "reading-state",
            Self::BuildingRecord => "building-record",
            Self::BuildingAdvertisement => "building-advertisement",
            Self::CommittingState => "committing-state",
            Self::Announcing => "announcing",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// New chain head
    pub head: IpldCid,
    /// Entries block of the new head
    pub entries: IpldCid,
    /// Chain height after the publish
    pub height: u64,
    /// Sequence number of the published record
    pub sequence: u64,
}

/// `/ipns/<peer id>` for a peer
pub fn name_of(peer: PeerId) -> String {
    Name::new(peer).to_string()
}

/// Publishes naming records onto one advertisement chain
///
/// - `S`: block storage for advertisements and entries blocks
/// - `C`: head and height storage
/// - `A`: indexer notification
/// - `K`: chain operator key, which signs both records and advertisements
///
/// Publishes on one publisher are serialized. Publishers sharing a chain
/// state commit with compare-and-set: one that loses to another's commit
/// rebuilds its record and advertisement on the new head, so no two publishes
/// ever commit the same sequence.
pub struct Publisher<S, C, A, K>
where
    S: BlockStore,
{
    chain: AdChain<S>,
    state: C,
    announcer: A,
    key: K,
    peer: PeerId,
    config: PublisherConfig,
    lock: Mutex<()>,
}

impl<S, C, A, K> fmt::Debug for Publisher<S, C, A, K>
where
    S: BlockStore,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, C, A, K> Publisher<S, C, A, K>
where
    S: BlockStore + Send + Sync + 'static,
    C: ChainStateStore + Sync,
    A: Announcer + Sync,
    K: SigningKey + Sync,
{
    /// Create a publisher from validated configuration
    pub fn new(
        config: PublisherConfig,
        key: K,
        storage: S,
        state: C,
        announcer: A,
    ) -> Result<Self, PublishError> {
        let peer = key.peer_id().map_err(ConfigError::Key)?;
        Ok(Self {
            chain: AdChain::new(storage),
            state,
            announcer,
            key,
            peer,
            config,
            lock: Mutex::new(()),
        })
    }

    /// Name owned by this publisher's key
    pub fn name(&self) -> Name {
        Name::new(self.peer)
    }

    /// Peer id of the chain operator
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Validated configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Underlying chain
    pub fn chain(&self) -> &AdChain<S> {
        &self.chain
    }

    /// Underlying block store
    pub fn storage(&self) -> &S {
        self.chain.storage()
    }

    /// Underlying chain state
    pub fn state(&self) -> &C {
        &self.state
    }

    /// Operator key
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Publish `target` under `name` with default lifetime and TTL
    pub async fn publish(&self, target: &str, name: &str) -> Result<Published, PublishError> {
        self.publish_with(target, name, PublishOptions::default()).await
    }

    /// Publish `target` under `name`
    ///
    /// `name` need not belong to this publisher's key: the record is signed
    /// by the operator key regardless.
    #[tracing::instrument(
        name = "publish",
        skip(self, options),
        fields(height = tracing::field::Empty)
    )]
    pub async fn publish_with(
        &self,
        target: &str,
        name: &str,
        options: PublishOptions,
    ) -> Result<Published, PublishError> {
        let claimed = Name::parse(name).map_err(PublishError::InvalidName)?;

        let guard = self.lock.lock().await;
        let (appended, committed, sequence) = loop {
            if let Some(done) = self.try_commit(target, &claimed, &options).await? {
                break done;
            }
        };
        drop(guard);

        tracing::Span::current().record("height", committed.height);
        tracing::info!(head = %appended.head, sequence, "publish committed");

        stage(PublishStage::Announcing);
        let announced = self
            .announcer
            .announce(appended.head, &self.config.publisher_addrs)
            .await;
        stage(PublishStage::Done);

        if let Err(source) = announced {
            tracing::warn!(head = %appended.head, error = %source, "unsuccessful announce");
            return Err(PublishError::Announce {
                head: appended.head,
                height: committed.height,
                source,
            });
        }

        Ok(Published {
            head: appended.head,
            entries: appended.entries,
            height: committed.height,
            sequence,
        })
    }

    /// Build on the current state and commit, or `None` if another publisher
    /// sharing the state committed first
    async fn try_commit(
        &self,
        target: &str,
        claimed: &Name,
        options: &PublishOptions,
    ) -> Result<Option<(Appended, ChainState, u64)>, PublishError> {
        stage(PublishStage::ReadingState);
        let current = self
            .state
            .state()
            .await
            .map_err(|e| PublishError::storage(e, false))?;
        let sequence = current.height + 1;

        stage(PublishStage::BuildingRecord);
        let eol = match options.eol {
            Some(eol) => eol,
            None => {
                let lifetime = TimeDelta::from_std(self.config.record_lifetime)
                    .unwrap_or(TimeDelta::MAX);
                Utc::now()
                    .checked_add_signed(lifetime)
                    .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
            }
        };
        let ttl = options.ttl.unwrap_or(self.config.record_ttl);
        let record = NamingRecord::build(&self.key, target, sequence, eol, ttl)
            .map_err(PublishError::Signing)?;
        let metadata = record.to_metadata().map_err(PublishError::Signing)?;

        stage(PublishStage::BuildingAdvertisement);
        let appended = self
            .chain
            .append(
                current.head,
                claimed,
                self.config.ad_addresses(),
                CONTEXT_ID.into(),
                metadata,
                &self.key,
            )
            .await
            .map_err(PublishError::from_chain)?;

        stage(PublishStage::CommittingState);
        self.chain
            .storage()
            .apply_head(appended.head)
            .await
            .map_err(|e| PublishError::storage(e, false))?;
        match self
            .state
            .set_head_and_advance_height(current, appended.head)
            .await
        {
            Ok(committed) => Ok(Some((appended, committed, sequence))),
            Err(e) if *e.kind() == ChainErrorKind::Conflict => {
                tracing::debug!(error = %e, "chain state moved, rebuilding");
                Ok(None)
            }
            Err(e) => Err(PublishError::storage(e, false)),
        }
    }

    /// Re-announce the current head
    ///
    /// Leaves the chain state untouched. Returns the announced head, or
    /// `None` when nothing has been published yet.
    pub async fn announce_head(&self) -> Result<Option<IpldCid>, PublishError> {
        let current = self
            .state
            .state()
            .await
            .map_err(|e| PublishError::storage(e, false))?;
        let Some(head) = current.head else {
            return Ok(None);
        };
        self.announcer
            .announce(head, &self.config.publisher_addrs)
            .await
            .map_err(|source| PublishError::Announce {
                head,
                height: current.height,
                source,
            })?;
        tracing::debug!(%head, height = current.height, "head re-announced");
        Ok(Some(head))
    }

    /// Resolve `name` from this publisher's own chain, without the indexer
    ///
    /// Walks back from the head to the newest advertisement indexing `name`.
    /// The record is returned as published, unvalidated.
    pub async fn resolve_local(&self, name: &str) -> Result<Option<NamingRecord>, PublishError> {
        let claimed = Name::parse(name).map_err(PublishError::InvalidName)?;
        let head = self
            .state
            .head()
            .await
            .map_err(|e| PublishError::storage(e, false))?;

        let mut next = head;
        while let Some(cid) = next {
            let ad = self
                .chain
                .load(&cid)
                .await
                .map_err(|e| PublishError::storage(e, false))?;
            let entries = self
                .chain
                .load_entries(ad.entries())
                .await
                .map_err(|e| PublishError::storage(e, false))?;
            if entries.indexes(&claimed).map_err(|e| PublishError::storage(e, false))? {
                return ad
                    .naming_record()
                    .map(Some)
                    .map_err(|e| PublishError::storage(e, false));
            }
            next = ad.previous_id().copied();
        }
        Ok(None)
    }
}

#[cfg(feature = "reqwest-client")]
impl<S, C, K> Publisher<S, C, crate::announce::HttpAnnouncer<reqwest::Client>, K>
where
    S: BlockStore + Send + Sync + 'static,
    C: ChainStateStore + Sync,
    K: SigningKey + Sync,
{
    /// Publisher announcing over HTTP with a default reqwest client
    pub fn http(
        options: &PublisherOptions,
        key: K,
        storage: S,
        state: C,
    ) -> Result<Self, PublishError> {
        let config = options.validate()?;
        let peer = key.peer_id().map_err(ConfigError::Key)?;
        let announcer =
            crate::announce::HttpAnnouncer::new(reqwest::Client::new(), &config.announce_url, peer);
        Self::new(config, key, storage, state, announcer)
    }
}

fn stage(stage: PublishStage) {
    tracing::debug!(%stage, "publish stage");
}
