use std::{sync::Arc, time::Duration};

use mypersona_registry::{EventSource, ProjectedSet, Projection, Projections, Projector, SetDiff};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{App, args::WatchArgs};

pub async fn run(app: &App, args: WatchArgs) -> eyre::Result<()> {
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping watch");
        }
        shutdown.cancel();
    });

    watch_projections(app.source(), app.projections(), args.interval.into(), cancel).await;
    Ok(())
}

/// Polls the head every `interval` and re-projects both sets whenever it moves,
/// logging members that entered or left. Returns once `cancel` fires.
pub async fn watch_projections(
    source: Arc<dyn EventSource>,
    projections: Projections,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_head = None;
    let mut issuers = None;
    let mut revoked = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let head = match source.head().await {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(%err, "failed to read head block");
                continue;
            }
        };
        if last_head == Some(head) {
            continue;
        }
        last_head = Some(head);
        tracing::debug!(head, "new head");

        poll(&projections.issuers, &mut issuers).await;
        poll(&projections.revoked, &mut revoked).await;
    }
}

/// Refreshes one projector and reports what changed since `last`.
async fn poll<P: Projection>(
    projector: &Projector<P>,
    last: &mut Option<Arc<ProjectedSet<P::Key>>>,
) -> Option<SetDiff<P::Key>> {
    let registry = projector.projection().registry();
    let set = match projector.refresh().await {
        Ok(set) => set,
        Err(err) => {
            tracing::warn!(%registry, %err, "refresh failed, keeping last known set");
            return None;
        }
    };

    let diff = match last.as_deref() {
        None => {
            tracing::info!(
                %registry,
                count = set.len(),
                complete = set.coverage().complete,
                "initial projection"
            );
            None
        }
        Some(previous) => {
            let diff = previous.diff(&set);
            for key in &diff.added {
                tracing::info!(%registry, member = %key, "member added");
            }
            for key in &diff.removed {
                tracing::info!(%registry, member = %key, "member removed");
            }
            Some(diff)
        }
    };
    *last = Some(set);
    diff
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use mypersona_registry::{HistoryWindow, RegistryCall, RevokedCredentials, TrustedIssuers};
    use mypersona_test_utils::FakeLedger;

    use super::*;

    const OWNER: Address = Address::repeat_byte(0xaa);
    const ISSUER: Address = Address::repeat_byte(0x11);

    fn projections(ledger: &FakeLedger) -> Projections {
        let source: Arc<dyn EventSource> = Arc::new(ledger.clone());
        Projections {
            issuers: Arc::new(Projector::new(
                TrustedIssuers,
                source.clone(),
                HistoryWindow::FromBlock(0),
            )),
            revoked: Arc::new(Projector::new(
                RevokedCredentials,
                source,
                HistoryWindow::FromBlock(0),
            )),
        }
    }

    #[tokio::test]
    async fn poll_reports_membership_changes() {
        let ledger = FakeLedger::new(OWNER);
        let projections = projections(&ledger);
        let mut last = None;

        assert!(poll(&projections.issuers, &mut last).await.is_none());
        assert!(last.as_ref().unwrap().is_empty());

        ledger
            .execute(OWNER, RegistryCall::AddIssuer(ISSUER))
            .unwrap();
        let diff = poll(&projections.issuers, &mut last).await.unwrap();
        assert_eq!(diff.added, vec![ISSUER]);
        assert!(diff.removed.is_empty());

        ledger
            .execute(OWNER, RegistryCall::RemoveIssuer(ISSUER))
            .unwrap();
        let diff = poll(&projections.issuers, &mut last).await.unwrap();
        assert_eq!(diff.removed, vec![ISSUER]);
    }

    #[tokio::test]
    async fn failed_poll_keeps_last_set() {
        let ledger = FakeLedger::new(OWNER);
        ledger
            .execute(OWNER, RegistryCall::AddIssuer(ISSUER))
            .unwrap();
        ledger
            .execute(ISSUER, RegistryCall::RevokeCredential(U256::from(42)))
            .unwrap();
        let projections = projections(&ledger);
        let mut last = None;
        poll(&projections.revoked, &mut last).await;

        ledger.fail_log_queries(true);
        assert!(poll(&projections.revoked, &mut last).await.is_none());
        assert!(last.unwrap().contains(&U256::from(42)));
    }

    #[tokio::test]
    async fn watch_stops_when_cancelled() {
        let ledger = FakeLedger::new(OWNER);
        ledger
            .execute(OWNER, RegistryCall::AddIssuer(ISSUER))
            .unwrap();
        let projections = projections(&ledger);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_projections(
            Arc::new(ledger.clone()),
            projections.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watch did not stop")
            .unwrap();
        let issuers = projections.issuers.current().unwrap();
        assert!(issuers.contains(&ISSUER));
    }
}
