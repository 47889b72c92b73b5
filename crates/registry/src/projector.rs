//! Event-sourced read models of the registries.
//!
//! A [`Projection`] names a pair of complementary events (added/removed,
//! revoked/un-revoked) and how to extract the key they act on. [`replay`] folds
//! a batch of logs into a [`ProjectedSet`] in ledger order, and a [`Projector`]
//! keeps the latest set of one projection, serializing refreshes so two replays
//! of the same set never race.

use std::{
    collections::BTreeMap,
    fmt,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use futures::{StreamExt as _, TryStreamExt as _, stream};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::{RegistryError, RegistryResult},
    events::{EventKind, LedgerEvent, LedgerLog},
    ledger::RegistryReader,
    log_reader::{Coverage, EventSource, HistoryWindow, LogQuery},
    types::Registry,
};

/// Default size of the activity feeds.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;

/// Point-queries issued concurrently while reconciling.
const RECONCILE_CONCURRENCY: usize = 8;

/// What a single event does to a projected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<K> {
    Insert(K),
    Remove(K),
}

/// A set materialized from one registry's event pair.
#[async_trait]
pub trait Projection: Send + Sync + 'static {
    type Key: Copy + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn registry(&self) -> Registry;

    /// The positive and negative event kinds, in that order.
    fn kinds(&self) -> [EventKind; 2];

    fn transition(&self, event: &LedgerEvent) -> Option<Transition<Self::Key>>;

    /// Asks the ledger directly whether `key` is a member.
    async fn point_query(&self, reader: &dyn RegistryReader, key: Self::Key) -> RegistryResult<bool>;
}

/// Issuers currently trusted by the issuer registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedIssuers;

#[async_trait]
impl Projection for TrustedIssuers {
    type Key = Address;

    fn registry(&self) -> Registry {
        Registry::Issuer
    }

    fn kinds(&self) -> [EventKind; 2] {
        [EventKind::IssuerAdded, EventKind::IssuerRemoved]
    }

    fn transition(&self, event: &LedgerEvent) -> Option<Transition<Address>> {
        match *event {
            LedgerEvent::IssuerAdded { issuer } => Some(Transition::Insert(issuer)),
            LedgerEvent::IssuerRemoved { issuer } => Some(Transition::Remove(issuer)),
            _ => None,
        }
    }

    async fn point_query(&self, reader: &dyn RegistryReader, key: Address) -> RegistryResult<bool> {
        reader.is_trusted_issuer(key).await
    }
}

/// Credential nonces currently revoked by the revocation registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevokedCredentials;

#[async_trait]
impl Projection for RevokedCredentials {
    type Key = U256;

    fn registry(&self) -> Registry {
        Registry::Revocation
    }

    fn kinds(&self) -> [EventKind; 2] {
        [EventKind::CredentialRevoked, EventKind::CredentialUnRevoked]
    }

    fn transition(&self, event: &LedgerEvent) -> Option<Transition<U256>> {
        match *event {
            LedgerEvent::CredentialRevoked {
                credential_nonce, ..
            } => Some(Transition::Insert(credential_nonce)),
            LedgerEvent::CredentialUnRevoked {
                credential_nonce, ..
            } => Some(Transition::Remove(credential_nonce)),
            _ => None,
        }
    }

    async fn point_query(&self, reader: &dyn RegistryReader, key: U256) -> RegistryResult<bool> {
        reader.is_revoked(key).await
    }
}

/// Where a member's current membership comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub since_block: u64,
    pub tx_hash: TxHash,
}

/// Keys that entered or left a set between two projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetDiff<K> {
    pub added: Vec<K>,
    pub removed: Vec<K>,
}

impl<K> SetDiff<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The materialized members of a projection over a known block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedSet<K: Ord> {
    members: BTreeMap<K, MemberInfo>,
    coverage: Coverage,
}

impl<K: Ord + Copy> ProjectedSet<K> {
    pub fn contains(&self, key: &K) -> bool {
        self.members.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&MemberInfo> {
        self.members.get(key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in key order.
    pub fn members(&self) -> impl Iterator<Item = (&K, &MemberInfo)> {
        self.members.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.members.keys()
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    /// What changed going from `self` to `newer`.
    pub fn diff(&self, newer: &Self) -> SetDiff<K> {
        SetDiff {
            added: newer
                .keys()
                .filter(|key| !self.contains(key))
                .copied()
                .collect(),
            removed: self
                .keys()
                .filter(|key| !newer.contains(key))
                .copied()
                .collect(),
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.members.retain(|key, _| keep(key));
    }
}

/// Folds logs into the set they imply.
///
/// Input order does not matter: logs are applied in ascending (block, log index)
/// order. Inserting a member twice and removing a non-member are no-ops. Logs of
/// other registries or unrelated kinds are ignored.
pub fn replay<P: Projection + ?Sized>(
    projection: &P,
    logs: &[LedgerLog],
    coverage: Coverage,
) -> ProjectedSet<P::Key> {
    let registry = projection.registry();
    let mut ordered: Vec<&LedgerLog> = logs.iter().filter(|lg| lg.registry == registry).collect();
    ordered.sort_by_key(|lg| lg.position);

    let mut members = BTreeMap::new();
    for lg in ordered {
        match projection.transition(&lg.event) {
            Some(Transition::Insert(key)) => {
                members.entry(key).or_insert(MemberInfo {
                    since_block: lg.block_number(),
                    tx_hash: lg.tx_hash,
                });
            }
            Some(Transition::Remove(key)) => {
                members.remove(&key);
            }
            None => {}
        }
    }

    ProjectedSet { members, coverage }
}

/// The newest `limit` logs, newest first.
pub fn recent_activity(logs: &[LedgerLog], limit: usize) -> Vec<LedgerLog> {
    let mut logs = logs.to_vec();
    logs.sort_by(|a, b| b.position.cmp(&a.position));
    logs.truncate(limit);
    logs
}

/// Fetches and returns the activity feed of one registry.
#[instrument(level = "debug", skip(source))]
pub async fn load_activity(
    source: &dyn EventSource,
    registry: Registry,
    window: HistoryWindow,
    limit: usize,
) -> RegistryResult<Vec<LedgerLog>> {
    let fetched = source.fetch(&LogQuery::all(registry, window)).await?;
    Ok(recent_activity(&fetched.logs, limit))
}

/// Lifecycle of a projected set.
#[derive(Debug, Clone)]
pub enum ProjectionState<K: Ord> {
    /// Never fetched successfully.
    Unknown,
    Ready(Arc<ProjectedSet<K>>),
    /// The last refresh failed; `last` is what was known before.
    Stale {
        last: Arc<ProjectedSet<K>>,
        error: String,
    },
}

impl<K: Ord> ProjectionState<K> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Outcome of the most recent refresh, handed to callers that queued behind it.
struct Completed<K: Ord> {
    /// Start number of the refresh that produced `outcome`.
    started: u64,
    outcome: Result<Arc<ProjectedSet<K>>, String>,
}

/// Result of [`Projector::reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled<K: Ord> {
    pub set: Arc<ProjectedSet<K>>,
    /// Members the ledger no longer confirms.
    pub dropped: Vec<K>,
}

/// Keeps the current [`ProjectedSet`] of one projection.
pub struct Projector<P: Projection> {
    projection: P,
    source: Arc<dyn EventSource>,
    window: HistoryWindow,
    state: RwLock<ProjectionState<P::Key>>,
    started: AtomicU64,
    refresh: tokio::sync::Mutex<Option<Completed<P::Key>>>,
}

impl<P: Projection> fmt::Debug for Projector<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("registry", &self.projection.registry())
            .field("window", &self.window)
            .field("refreshes", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<P: Projection> Projector<P> {
    pub fn new(projection: P, source: Arc<dyn EventSource>, window: HistoryWindow) -> Self {
        Self {
            projection,
            source,
            window,
            state: RwLock::new(ProjectionState::Unknown),
            started: AtomicU64::new(0),
            refresh: tokio::sync::Mutex::new(None),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn window(&self) -> HistoryWindow {
        self.window
    }

    pub fn state(&self) -> ProjectionState<P::Key> {
        self.state.read().clone()
    }

    /// The set, only if the last refresh succeeded.
    pub fn current(&self) -> Option<Arc<ProjectedSet<P::Key>>> {
        match &*self.state.read() {
            ProjectionState::Ready(set) => Some(set.clone()),
            _ => None,
        }
    }

    /// Refetches and replays the set.
    ///
    /// At most one refresh of this set runs at a time. A caller that had to wait
    /// for a refresh that *started* after it asked gets that refresh's result
    /// instead of fetching again. A refresh already running when the caller
    /// arrived may predate the caller's writes, so it is never reused.
    #[instrument(level = "debug", skip(self), fields(registry = %self.projection.registry()))]
    pub async fn refresh(&self) -> RegistryResult<Arc<ProjectedSet<P::Key>>> {
        let observed = self.started.load(Ordering::Acquire);
        let mut slot = self.refresh.lock().await;

        if let Some(done) = slot.as_ref() {
            if done.started > observed {
                tracing::debug!(started = done.started, "coalesced refresh");
                return done.outcome.clone().map_err(RegistryError::Network);
            }
        }

        let started = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        let outcome = self.fetch_and_replay().await;

        {
            let mut state = self.state.write();
            match &outcome {
                Ok(set) => *state = ProjectionState::Ready(set.clone()),
                Err(err) => {
                    tracing::warn!(%err, "projection refresh failed");
                    let last = match &*state {
                        ProjectionState::Ready(set) => Some(set.clone()),
                        ProjectionState::Stale { last, .. } => Some(last.clone()),
                        ProjectionState::Unknown => None,
                    };
                    if let Some(last) = last {
                        *state = ProjectionState::Stale {
                            last,
                            error: err.to_string(),
                        };
                    }
                }
            }
        }

        *slot = Some(Completed {
            started,
            outcome: outcome
                .as_ref()
                .map(Arc::clone)
                .map_err(ToString::to_string),
        });
        outcome
    }

    async fn fetch_and_replay(&self) -> RegistryResult<Arc<ProjectedSet<P::Key>>> {
        let query = LogQuery::new(
            self.projection.registry(),
            self.projection.kinds(),
            self.window,
        );
        let fetched = self.source.fetch(&query).await?;
        let set = replay(&self.projection, &fetched.logs, fetched.coverage);
        tracing::info!(
            registry = %self.projection.registry(),
            count = set.len(),
            from = fetched.coverage.from,
            to = fetched.coverage.to,
            "projection replayed"
        );
        Ok(Arc::new(set))
    }

    /// Re-checks every projected member with the point-query and drops the ones
    /// the ledger no longer confirms.
    #[instrument(level = "debug", skip_all, fields(registry = %self.projection.registry()))]
    pub async fn reconcile(
        &self,
        reader: &dyn RegistryReader,
    ) -> RegistryResult<Reconciled<P::Key>> {
        if self.current().is_none() {
            self.refresh().await?;
        }

        let mut slot = self.refresh.lock().await;
        let Some(set) = self.current() else {
            return Err(self.not_ready());
        };

        let checks: Vec<(P::Key, bool)> = stream::iter(set.keys().copied())
            .map(|key| async move {
                self.projection
                    .point_query(reader, key)
                    .await
                    .map(|member| (key, member))
            })
            .buffered(RECONCILE_CONCURRENCY)
            .try_collect()
            .await?;

        let dropped: Vec<P::Key> = checks
            .into_iter()
            .filter_map(|(key, member)| (!member).then_some(key))
            .collect();

        if dropped.is_empty() {
            return Ok(Reconciled { set, dropped });
        }

        for key in &dropped {
            tracing::warn!(%key, "projected member not confirmed by point-query, dropping");
        }
        let mut confirmed = (*set).clone();
        confirmed.retain(|key| !dropped.contains(key));
        let confirmed = Arc::new(confirmed);
        *self.state.write() = ProjectionState::Ready(confirmed.clone());
        // queued callers must not be handed the members just dropped
        if let Some(done) = slot.as_mut() {
            done.outcome = Ok(confirmed.clone());
        }

        Ok(Reconciled {
            set: confirmed,
            dropped,
        })
    }

    fn not_ready(&self) -> RegistryError {
        match &*self.state.read() {
            ProjectionState::Stale { error, .. } => RegistryError::Network(error.clone()),
            _ => RegistryError::Network(format!(
                "{} projection has not been loaded",
                self.projection.registry()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use alloy::primitives::{address, b256};

    use super::*;
    use crate::{events::LogPosition, log_reader::FetchedLogs};

    const A: Address = address!("0x00000000000000000000000000000000000000a1");
    const B: Address = address!("0x00000000000000000000000000000000000000b2");
    const TX: TxHash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");

    fn full() -> Coverage {
        Coverage {
            from: 0,
            to: 100,
            complete: true,
        }
    }

    fn log(registry: Registry, block: u64, idx: u64, event: LedgerEvent) -> LedgerLog {
        LedgerLog {
            registry,
            position: LogPosition::new(block, idx),
            tx_hash: TX,
            event,
        }
    }

    fn added(issuer: Address, block: u64, idx: u64) -> LedgerLog {
        log(Registry::Issuer, block, idx, LedgerEvent::IssuerAdded { issuer })
    }

    fn removed(issuer: Address, block: u64, idx: u64) -> LedgerLog {
        log(Registry::Issuer, block, idx, LedgerEvent::IssuerRemoved { issuer })
    }

    fn revoked(nonce: u64, block: u64) -> LedgerLog {
        log(
            Registry::Revocation,
            block,
            0,
            LedgerEvent::CredentialRevoked {
                issuer: A,
                credential_nonce: U256::from(nonce),
            },
        )
    }

    fn unrevoked(nonce: u64, block: u64) -> LedgerLog {
        log(
            Registry::Revocation,
            block,
            0,
            LedgerEvent::CredentialUnRevoked {
                issuer: A,
                credential_nonce: U256::from(nonce),
            },
        )
    }

    fn trusted(logs: &[LedgerLog]) -> Vec<Address> {
        replay(&TrustedIssuers, logs, full()).keys().copied().collect()
    }

    #[test]
    fn add_add_remove_leaves_only_the_second_issuer() {
        let logs = [added(A, 10, 0), added(B, 11, 0), removed(A, 12, 0)];
        assert_eq!(trusted(&logs), vec![B]);
    }

    #[test]
    fn replay_is_independent_of_delivery_order() {
        let logs = vec![
            added(A, 10, 0),
            removed(A, 10, 1),
            added(B, 11, 3),
            added(A, 12, 0),
            removed(B, 12, 2),
            added(B, 12, 5),
        ];
        let expected = replay(&TrustedIssuers, &logs, full());

        // every rotation and the full reversal
        for shift in 0..logs.len() {
            let mut permuted = logs.clone();
            permuted.rotate_left(shift);
            assert_eq!(replay(&TrustedIssuers, &permuted, full()), expected);
            permuted.reverse();
            assert_eq!(replay(&TrustedIssuers, &permuted, full()), expected);
        }
        assert_eq!(trusted(&logs), vec![A, B]);
    }

    #[test]
    fn log_index_breaks_ties_within_a_block() {
        // Remove sorts after Add in the same block despite arriving first.
        let logs = [removed(A, 7, 4), added(A, 7, 1)];
        assert!(trusted(&logs).is_empty());

        let logs = [added(A, 7, 4), removed(A, 7, 1)];
        assert_eq!(trusted(&logs), vec![A]);
    }

    #[test]
    fn duplicate_add_is_idempotent_and_keeps_first_annotation() {
        let once = replay(&TrustedIssuers, &[added(A, 3, 0)], full());
        let twice = replay(&TrustedIssuers, &[added(A, 3, 0), added(A, 8, 0)], full());
        assert_eq!(once.len(), twice.len());
        assert!(twice.contains(&A));
        assert_eq!(twice.get(&A).unwrap().since_block, 3);
    }

    #[test]
    fn readd_after_remove_is_trusted_again() {
        let logs = [added(A, 1, 0), removed(A, 2, 0), added(A, 3, 0)];
        let set = replay(&TrustedIssuers, &logs, full());
        assert!(set.contains(&A));
        assert_eq!(set.get(&A).unwrap().since_block, 3);

        assert!(trusted(&[added(A, 1, 0), removed(A, 2, 0)]).is_empty());
    }

    #[test]
    fn removing_unknown_member_is_a_noop() {
        assert!(trusted(&[removed(A, 1, 0), removed(A, 2, 0)]).is_empty());
        assert_eq!(trusted(&[removed(A, 1, 0), added(A, 2, 0)]), vec![A]);
    }

    #[test]
    fn nonce_42_ends_revoked() {
        let logs = [revoked(42, 5), unrevoked(42, 7), revoked(42, 9)];
        let set = replay(&RevokedCredentials, &logs, full());
        assert!(set.contains(&U256::from(42)));
        assert_eq!(set.get(&U256::from(42)).unwrap().since_block, 9);
    }

    #[test]
    fn logs_of_other_registries_are_ignored() {
        let logs = [added(A, 1, 0), revoked(42, 2)];
        assert_eq!(replay(&TrustedIssuers, &logs, full()).len(), 1);
        assert_eq!(replay(&RevokedCredentials, &logs, full()).len(), 1);
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let before = replay(&TrustedIssuers, &[added(A, 1, 0)], full());
        let after = replay(&TrustedIssuers, &[added(A, 1, 0), removed(A, 2, 0), added(B, 3, 0)], full());
        let diff = before.diff(&after);
        assert_eq!(diff.added, vec![B]);
        assert_eq!(diff.removed, vec![A]);
        assert!(after.diff(&after).is_empty());
    }

    #[test]
    fn recent_activity_is_newest_first_and_limited() {
        let logs: Vec<_> = (0..30).map(|block| added(A, block, 0)).collect();
        let feed = recent_activity(&logs, DEFAULT_ACTIVITY_LIMIT);
        assert_eq!(feed.len(), 20);
        assert_eq!(feed.first().unwrap().block_number(), 29);
        assert_eq!(feed.last().unwrap().block_number(), 10);
    }

    /// Serves a log list snapshotted when each fetch starts, counting fetches;
    /// fails while `failing` is set.
    struct ScriptedSource {
        logs: parking_lot::Mutex<Vec<LedgerLog>>,
        fetches: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
        delay: std::time::Duration,
    }

    impl ScriptedSource {
        fn new(logs: Vec<LedgerLog>) -> Self {
            Self {
                logs: parking_lot::Mutex::new(logs),
                fetches: AtomicUsize::new(0),
                failing: false.into(),
                delay: std::time::Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn head(&self) -> RegistryResult<u64> {
            Ok(100)
        }

        async fn fetch(&self, query: &LogQuery) -> RegistryResult<FetchedLogs> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // the ledger is read as of the moment the query is issued
            let logs = self.logs.lock().clone();
            tokio::time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(RegistryError::Network("query limit exceeded".into()));
            }
            Ok(FetchedLogs {
                logs,
                coverage: query.window.coverage(100),
            })
        }
    }

    #[tokio::test]
    async fn failed_first_fetch_stays_unknown() {
        let source = Arc::new(ScriptedSource::new(vec![added(A, 1, 0)]));
        source.failing.store(true, Ordering::SeqCst);
        let projector = Projector::new(TrustedIssuers, source, HistoryWindow::LookBack(1_000));

        assert!(projector.refresh().await.is_err());
        assert!(matches!(projector.state(), ProjectionState::Unknown));
        assert!(projector.current().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_marks_ready_set_stale() {
        let source = Arc::new(ScriptedSource::new(vec![added(A, 1, 0)]));
        let projector = Projector::new(
            TrustedIssuers,
            source.clone(),
            HistoryWindow::LookBack(1_000),
        );

        let set = projector.refresh().await.unwrap();
        assert!(set.contains(&A));
        assert!(projector.state().is_ready());

        source.failing.store(true, Ordering::SeqCst);
        let err = projector.refresh().await.unwrap_err();
        assert!(err.is_retryable());
        match projector.state() {
            ProjectionState::Stale { last, error } => {
                assert!(last.contains(&A));
                assert!(error.contains("query limit"));
            }
            other => panic!("expected stale, got {other:?}"),
        }
        assert!(projector.current().is_none());

        source.failing.store(false, Ordering::SeqCst);
        projector.refresh().await.unwrap();
        assert!(projector.state().is_ready());
    }

    #[tokio::test]
    async fn concurrent_refreshes_are_coalesced() {
        let mut source = ScriptedSource::new(vec![added(A, 1, 0)]);
        source.delay = std::time::Duration::from_millis(50);
        let source = Arc::new(source);
        let projector = Arc::new(Projector::new(
            TrustedIssuers,
            source.clone(),
            HistoryWindow::LookBack(1_000),
        ));

        let first = tokio::spawn({
            let projector = projector.clone();
            async move { projector.refresh().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let queued: Vec<_> = (0..4)
            .map(|_| {
                let projector = projector.clone();
                tokio::spawn(async move { projector.refresh().await })
            })
            .collect();

        first.await.unwrap().unwrap();
        for handle in queued {
            assert!(handle.await.unwrap().unwrap().contains(&A));
        }
        // one fetch for the first caller, one shared by everyone queued behind it
        assert!(source.fetches.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn refresh_never_reuses_a_fetch_that_predates_the_caller() {
        let mut source = ScriptedSource::new(vec![added(B, 1, 0)]);
        source.delay = std::time::Duration::from_millis(100);
        let source = Arc::new(source);
        let projector = Arc::new(Projector::new(
            TrustedIssuers,
            source.clone(),
            HistoryWindow::LookBack(1_000),
        ));

        let in_flight = tokio::spawn({
            let projector = projector.clone();
            async move { projector.refresh().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // a write confirms while the older fetch is still running
        source.logs.lock().push(added(A, 2, 0));
        let after_write = projector.refresh().await.unwrap();
        assert!(after_write.contains(&A));
        assert!(after_write.contains(&B));

        let older = in_flight.await.unwrap().unwrap();
        assert!(!older.contains(&A));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert!(projector.current().unwrap().contains(&A));
    }

    /// Point-queries answer from a fixed trusted list.
    struct FixedReader(Vec<Address>);

    #[async_trait]
    impl RegistryReader for FixedReader {
        async fn owner(&self, _registry: Registry) -> RegistryResult<Address> {
            Ok(Address::ZERO)
        }

        async fn paused(&self, _registry: Registry) -> RegistryResult<bool> {
            Ok(false)
        }

        async fn is_trusted_issuer(&self, issuer: Address) -> RegistryResult<bool> {
            Ok(self.0.contains(&issuer))
        }

        async fn is_revoked(&self, _credential_nonce: U256) -> RegistryResult<bool> {
            Ok(false)
        }

        async fn linked_issuer_registry(&self) -> RegistryResult<Address> {
            Ok(Address::ZERO)
        }
    }

    #[tokio::test]
    async fn reconcile_prefers_the_point_query() {
        let source = Arc::new(ScriptedSource::new(vec![added(A, 1, 0), added(B, 2, 0)]));
        let projector = Projector::new(TrustedIssuers, source, HistoryWindow::LookBack(1_000));

        let reconciled = projector.reconcile(&FixedReader(vec![B])).await.unwrap();
        assert_eq!(reconciled.dropped, vec![A]);
        assert!(!reconciled.set.contains(&A));
        assert!(projector.current().unwrap().contains(&B));
        assert_eq!(projector.current().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconcile_updates_the_result_shared_with_queued_callers() {
        let source = Arc::new(ScriptedSource::new(vec![added(A, 1, 0), added(B, 2, 0)]));
        let projector = Projector::new(TrustedIssuers, source, HistoryWindow::LookBack(1_000));
        projector.refresh().await.unwrap();

        projector.reconcile(&FixedReader(vec![B])).await.unwrap();

        let slot = projector.refresh.lock().await;
        let shared = slot.as_ref().unwrap().outcome.as_ref().unwrap();
        assert!(!shared.contains(&A));
        assert!(shared.contains(&B));
    }
}
