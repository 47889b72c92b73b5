//! Submits guarded write calls and follows them to a final outcome.

use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, TxHash, U256};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::instrument;

use crate::{
    error::{RegistryError, RegistryResult},
    guard::{self, Action},
    ledger::{RegistryReader, RegistryWriter, TxOutcome},
    projector::{Projector, RevokedCredentials, TrustedIssuers},
    types::Registry,
};

/// Default upper bound on waiting for a receipt.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of the most recent submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommandState {
    Idle,
    Submitted,
    Pending {
        tx_hash: TxHash,
    },
    Confirmed {
        tx_hash: TxHash,
        block_number: u64,
    },
    Reverted {
        tx_hash: Option<TxHash>,
        reason: Option<String>,
    },
}

/// A confirmed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// The projections a dispatcher keeps current.
#[derive(Debug, Clone)]
pub struct Projections {
    pub issuers: Arc<Projector<TrustedIssuers>>,
    pub revoked: Arc<Projector<RevokedCredentials>>,
}

impl Projections {
    /// Re-projects whatever set `action` can change.
    async fn refresh_after(&self, action: &Action) {
        let result = match action {
            Action::AddIssuer(_) | Action::RemoveIssuer(_) => {
                self.issuers.refresh().await.map(|set| set.len())
            }
            Action::RevokeCredential(_) | Action::UnRevokeCredential(_) => {
                self.revoked.refresh().await.map(|set| set.len())
            }
            _ => return,
        };
        match result {
            Ok(count) => tracing::debug!(%action, count, "re-projected after confirmation"),
            // The projector is now stale; the caller still gets the confirmation.
            Err(err) => tracing::warn!(%action, %err, "re-projection after confirmation failed"),
        }
    }
}

/// Single-actor write path: guard, send, wait, re-project.
///
/// Submissions are serialized until their outcome is recorded. The receipt wait
/// runs in its own task holding the submission slot, so a caller that stops
/// waiting neither stops the state update nor lets the next submission start
/// early.
pub struct CommandDispatcher {
    reader: Arc<dyn RegistryReader>,
    writer: Arc<dyn RegistryWriter>,
    projections: Projections,
    confirmation_timeout: Option<Duration>,
    state: Arc<watch::Sender<CommandState>>,
    submit_lock: Arc<Mutex<()>>,
}

impl CommandDispatcher {
    pub fn new(
        reader: Arc<dyn RegistryReader>,
        writer: Arc<dyn RegistryWriter>,
        projections: Projections,
    ) -> Self {
        let (state, _) = watch::channel(CommandState::Idle);
        Self {
            reader,
            writer,
            projections,
            confirmation_timeout: Some(DEFAULT_CONFIRMATION_TIMEOUT),
            state: Arc::new(state),
            submit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// `None` waits for the receipt indefinitely.
    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn account(&self) -> Option<Address> {
        self.writer.account()
    }

    pub fn projections(&self) -> &Projections {
        &self.projections
    }

    pub fn state(&self) -> CommandState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommandState> {
        self.state.subscribe()
    }

    pub async fn add_issuer(&self, issuer: Address) -> RegistryResult<Confirmation> {
        self.submit(Action::AddIssuer(issuer)).await
    }

    pub async fn remove_issuer(&self, issuer: Address) -> RegistryResult<Confirmation> {
        self.submit(Action::RemoveIssuer(issuer)).await
    }

    pub async fn revoke_credential(&self, nonce: U256) -> RegistryResult<Confirmation> {
        self.submit(Action::RevokeCredential(nonce)).await
    }

    pub async fn unrevoke_credential(&self, nonce: U256) -> RegistryResult<Confirmation> {
        self.submit(Action::UnRevokeCredential(nonce)).await
    }

    pub async fn pause(&self, registry: Registry) -> RegistryResult<Confirmation> {
        self.submit(Action::Pause(registry)).await
    }

    pub async fn unpause(&self, registry: Registry) -> RegistryResult<Confirmation> {
        self.submit(Action::Unpause(registry)).await
    }

    /// Authorizes `action` against fresh state, sends it and waits for the receipt.
    #[instrument(level = "info", skip(self), fields(%action))]
    pub async fn submit(&self, action: Action) -> RegistryResult<Confirmation> {
        let serialized = self.submit_lock.clone().lock_owned().await;

        guard::authorize(self.reader.as_ref(), self.writer.account(), &action).await?;

        self.state.send_replace(CommandState::Submitted);
        let tx_hash = match self.writer.send(&action.call()).await {
            Ok(tx_hash) => tx_hash,
            Err(RegistryError::Reverted { reason, .. }) => {
                // rejected by the node during gas estimation, never broadcast
                self.state.send_replace(CommandState::Reverted {
                    tx_hash: None,
                    reason: reason.clone(),
                });
                return Err(RegistryError::Reverted {
                    tx_hash: None,
                    reason,
                });
            }
            Err(err) => {
                self.state.send_replace(CommandState::Idle);
                return Err(err);
            }
        };
        self.state.send_replace(CommandState::Pending { tx_hash });

        let waiter = tokio::spawn(Self::await_outcome(
            self.writer.clone(),
            self.projections.clone(),
            self.state.clone(),
            self.confirmation_timeout,
            action,
            tx_hash,
            serialized,
        ));

        waiter
            .await
            .map_err(|err| RegistryError::Network(format!("confirmation task failed: {err}")))?
    }

    async fn await_outcome(
        writer: Arc<dyn RegistryWriter>,
        projections: Projections,
        state: Arc<watch::Sender<CommandState>>,
        timeout: Option<Duration>,
        action: Action,
        tx_hash: TxHash,
        _serialized: OwnedMutexGuard<()>,
    ) -> RegistryResult<Confirmation> {
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, writer.confirm(tx_hash))
                .await
                .map_err(|_| {
                    RegistryError::Network(format!(
                        "no receipt for {tx_hash} after {}s",
                        limit.as_secs()
                    ))
                })
                .and_then(|res| res),
            None => writer.confirm(tx_hash).await,
        };

        match outcome {
            Ok(TxOutcome::Confirmed { block_number }) => {
                state.send_replace(CommandState::Confirmed {
                    tx_hash,
                    block_number,
                });
                projections.refresh_after(&action).await;
                Ok(Confirmation {
                    tx_hash,
                    block_number,
                })
            }
            Ok(TxOutcome::Reverted { .. }) => {
                state.send_replace(CommandState::Reverted {
                    tx_hash: Some(tx_hash),
                    reason: None,
                });
                Err(RegistryError::Reverted {
                    tx_hash: Some(tx_hash),
                    reason: None,
                })
            }
            // The transaction may still land; only our wait ended.
            Err(err) => {
                tracing::warn!(%tx_hash, %err, "stopped waiting for receipt");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("account", &self.writer.account())
            .field("state", &*self.state.borrow())
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish_non_exhaustive()
    }
}
