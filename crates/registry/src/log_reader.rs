//! Bounded, paged `eth_getLogs` reads against the registries.

use alloy::{
    providers::{DynProvider, Provider},
    rpc::types::Filter,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::{RegistryError, RegistryResult},
    events::{EventKind, LedgerLog},
    types::{Registry, RegistryAddresses},
};

/// Default look-back used by the dashboards.
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 10_000;
/// Largest block range requested in a single `eth_getLogs` call.
pub const DEFAULT_LOG_PAGE_SIZE: u64 = 5_000;

/// How far back a history read reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryWindow {
    /// The last `n` blocks before head. Anything older is invisible.
    LookBack(u64),
    /// Everything from a deployment block onwards.
    FromBlock(u64),
}

impl HistoryWindow {
    /// Resolves the window against the current head.
    pub fn coverage(self, head: u64) -> Coverage {
        match self {
            Self::LookBack(n) => {
                let from = head.saturating_sub(n);
                Coverage {
                    from,
                    to: head,
                    complete: from == 0,
                }
            }
            Self::FromBlock(from) => Coverage {
                from,
                to: head,
                complete: true,
            },
        }
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::LookBack(DEFAULT_LOOKBACK_BLOCKS)
    }
}

/// The block range a fetch actually covered.
///
/// `complete` is only true when `from` is the chain start or the deployment
/// floor. A projection over incomplete coverage is recent activity, not the
/// full ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub from: u64,
    pub to: u64,
    pub complete: bool,
}

impl Coverage {
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub registry: Registry,
    pub kinds: Vec<EventKind>,
    pub window: HistoryWindow,
}

impl LogQuery {
    pub fn new(registry: Registry, kinds: impl Into<Vec<EventKind>>, window: HistoryWindow) -> Self {
        Self {
            registry,
            kinds: kinds.into(),
            window,
        }
    }

    /// Every event the registry emits.
    pub fn all(registry: Registry, window: HistoryWindow) -> Self {
        Self::new(registry, EventKind::emitted_by(registry), window)
    }
}

/// Logs in ascending ledger order together with the range they cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLogs {
    pub logs: Vec<LedgerLog>,
    pub coverage: Coverage,
}

/// Append-only event streams of both registries.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Current head block number.
    async fn head(&self) -> RegistryResult<u64>;

    async fn fetch(&self, query: &LogQuery) -> RegistryResult<FetchedLogs>;
}

/// [`EventSource`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct LogReader {
    provider: DynProvider,
    addresses: RegistryAddresses,
    page_size: u64,
}

impl LogReader {
    pub fn new(provider: DynProvider, addresses: RegistryAddresses) -> Self {
        Self {
            provider,
            addresses,
            page_size: DEFAULT_LOG_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[instrument(level = "debug", skip(self, filter))]
    async fn fetch_page(&self, filter: &Filter, from: u64, to: u64) -> RegistryResult<Vec<LedgerLog>> {
        let page = filter.clone().from_block(from).to_block(to);
        let logs = self
            .provider
            .get_logs(&page)
            .await
            .map_err(|err| RegistryError::Network(format!("eth_getLogs {from}..={to}: {err}")))?;

        logs.iter()
            .map(|lg| LedgerLog::decode(lg, &self.addresses))
            .collect()
    }
}

#[async_trait]
impl EventSource for LogReader {
    async fn head(&self) -> RegistryResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|err| RegistryError::Network(format!("eth_blockNumber: {err}")))
    }

    #[instrument(level = "info", skip(self), fields(registry = %query.registry))]
    async fn fetch(&self, query: &LogQuery) -> RegistryResult<FetchedLogs> {
        let head = self.head().await?;
        let coverage = query.window.coverage(head);
        if coverage.is_empty() || query.kinds.is_empty() {
            return Ok(FetchedLogs {
                logs: Vec::new(),
                coverage,
            });
        }

        let filter = Filter::new()
            .address(self.addresses.get(query.registry))
            .event_signature(EventKind::signatures(&query.kinds));

        let mut logs = Vec::new();
        for (from, to) in pages(coverage.from, coverage.to, self.page_size) {
            logs.extend(self.fetch_page(&filter, from, to).await?);
        }
        logs.sort_by_key(|lg| lg.position);

        tracing::info!(
            count = logs.len(),
            from = coverage.from,
            to = coverage.to,
            complete = coverage.complete,
            "fetched registry logs"
        );

        Ok(FetchedLogs { logs, coverage })
    }
}

/// Splits `from..=to` into inclusive ranges of at most `size` blocks.
pub(crate) fn pages(from: u64, to: u64, size: u64) -> impl Iterator<Item = (u64, u64)> {
    let size = size.max(1);
    let mut next = Some(from).filter(|start| *start <= to);
    std::iter::from_fn(move || {
        let start = next?;
        let end = start.saturating_add(size - 1).min(to);
        next = end.checked_add(1).filter(|n| *n <= to);
        Some((start, end))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookback_is_truncated_history() {
        let coverage = HistoryWindow::LookBack(10_000).coverage(25_000);
        assert_eq!(coverage.from, 15_000);
        assert_eq!(coverage.to, 25_000);
        assert!(!coverage.complete);
    }

    #[test]
    fn lookback_reaching_genesis_is_complete() {
        let coverage = HistoryWindow::LookBack(10_000).coverage(1_234);
        assert_eq!(coverage.from, 0);
        assert!(coverage.complete);
    }

    #[test]
    fn from_block_is_authoritative() {
        let coverage = HistoryWindow::FromBlock(100).coverage(50_000);
        assert_eq!((coverage.from, coverage.to), (100, 50_000));
        assert!(coverage.complete);

        assert!(HistoryWindow::FromBlock(60_000).coverage(50_000).is_empty());
    }

    #[test]
    fn pages_cover_range_without_overlap() {
        let ranges: Vec<_> = pages(0, 12_000, 5_000).collect();
        assert_eq!(ranges, vec![(0, 4_999), (5_000, 9_999), (10_000, 12_000)]);

        let single: Vec<_> = pages(7, 7, 5_000).collect();
        assert_eq!(single, vec![(7, 7)]);

        assert_eq!(pages(10, 9, 5_000).count(), 0);
    }

    #[test]
    fn pages_near_u64_max_terminate() {
        let ranges: Vec<_> = pages(u64::MAX - 1, u64::MAX, 10).collect();
        assert_eq!(ranges, vec![(u64::MAX - 1, u64::MAX)]);
    }
}
