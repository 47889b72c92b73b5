//! Local pre-flight checks mirroring the registries' `onlyOwner`,
//! `onlyTrustedIssuer` and `whenNotPaused` modifiers.
//!
//! These only gate the client. The contracts enforce the same rules on-chain.

use std::fmt;

use alloy::primitives::{Address, U256};
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::{RegistryError, RegistryResult},
    ledger::{RegistryCall, RegistryReader},
    types::{Registry, RegistryStatus},
};

/// A mutating operation a caller wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "target", rename_all = "camelCase")]
pub enum Action {
    AddIssuer(Address),
    RemoveIssuer(Address),
    Pause(Registry),
    Unpause(Registry),
    RevokeCredential(U256),
    UnRevokeCredential(U256),
    TransferOwnership(Registry, Address),
    SetIssuerRegistry(Address),
}

impl Action {
    pub fn registry(&self) -> Registry {
        self.call().registry()
    }

    /// The ledger call that carries the action out.
    pub fn call(&self) -> RegistryCall {
        match *self {
            Self::AddIssuer(addr) => RegistryCall::AddIssuer(addr),
            Self::RemoveIssuer(addr) => RegistryCall::RemoveIssuer(addr),
            Self::Pause(registry) => RegistryCall::Pause(registry),
            Self::Unpause(registry) => RegistryCall::Unpause(registry),
            Self::RevokeCredential(nonce) => RegistryCall::RevokeCredential(nonce),
            Self::UnRevokeCredential(nonce) => RegistryCall::UnRevokeCredential(nonce),
            Self::TransferOwnership(registry, owner) => {
                RegistryCall::TransferOwnership(registry, owner)
            }
            Self::SetIssuerRegistry(addr) => RegistryCall::SetIssuerRegistryAddress(addr),
        }
    }

    /// Revocation actions are gated on issuer trust instead of ownership.
    pub fn requires_trusted_issuer(&self) -> bool {
        matches!(self, Self::RevokeCredential(_) | Self::UnRevokeCredential(_))
    }

    fn address_argument(&self) -> Option<(&'static str, Address)> {
        match *self {
            Self::AddIssuer(addr) | Self::RemoveIssuer(addr) => Some(("issuer address", addr)),
            Self::TransferOwnership(_, owner) => Some(("new owner", owner)),
            Self::SetIssuerRegistry(addr) => Some(("issuer registry address", addr)),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddIssuer(addr) => write!(f, "add issuer {addr}"),
            Self::RemoveIssuer(addr) => write!(f, "remove issuer {addr}"),
            Self::Pause(registry) => write!(f, "pause {registry}"),
            Self::Unpause(registry) => write!(f, "unpause {registry}"),
            Self::RevokeCredential(nonce) => write!(f, "revoke credential {nonce}"),
            Self::UnRevokeCredential(nonce) => write!(f, "un-revoke credential {nonce}"),
            Self::TransferOwnership(registry, owner) => {
                write!(f, "transfer ownership of {registry} to {owner}")
            }
            Self::SetIssuerRegistry(addr) => write!(f, "point the revocation registry at {addr}"),
        }
    }
}

/// Decides an action against an already fetched snapshot.
///
/// Checks run in a fixed order: signer, input, pause gate, role. The pause gate
/// comes before the role, so a paused registry rejects everyone with
/// `SystemPaused` regardless of who asks.
///
/// Pause toggles skip the pause gate but cannot be repeated: pausing a paused
/// registry is `SystemPaused`, unpausing a running one is `NotPaused`.
/// Ownership transfers and the registry link are owner-only and not pausable.
pub fn check(
    caller: Option<Address>,
    action: &Action,
    status: &RegistryStatus,
    caller_is_trusted: bool,
) -> RegistryResult<()> {
    let caller = caller.ok_or(RegistryError::Unauthenticated)?;

    if let Some((field, addr)) = action.address_argument() {
        if addr.is_zero() {
            return Err(RegistryError::invalid_input(field, "zero address"));
        }
    }

    let registry = action.registry();
    let paused = status.paused(registry);
    match action {
        Action::Pause(_) if paused => return Err(RegistryError::SystemPaused(registry)),
        Action::Unpause(_) if !paused => return Err(RegistryError::NotPaused(registry)),
        Action::Pause(_)
        | Action::Unpause(_)
        | Action::TransferOwnership(..)
        | Action::SetIssuerRegistry(_) => {}
        _ if paused => return Err(RegistryError::SystemPaused(registry)),
        _ => {}
    }

    let allowed = if action.requires_trusted_issuer() {
        caller_is_trusted
    } else {
        caller == status.owner(registry)
    };
    if !allowed {
        return Err(RegistryError::Unauthorized {
            caller,
            action: *action,
        });
    }

    Ok(())
}

/// Reads fresh registry state and decides the action.
#[instrument(level = "debug", skip(reader), fields(%action))]
pub async fn authorize(
    reader: &dyn RegistryReader,
    caller: Option<Address>,
    action: &Action,
) -> RegistryResult<()> {
    let Some(account) = caller else {
        return Err(RegistryError::Unauthenticated);
    };

    let (status, caller_is_trusted) = if action.requires_trusted_issuer() {
        tokio::try_join!(reader.status(), reader.is_trusted_issuer(account))?
    } else {
        (reader.status().await?, false)
    };

    let decision = check(caller, action, &status, caller_is_trusted);
    if let Err(err) = &decision {
        tracing::info!(%account, %err, "action rejected before submission");
    }
    decision
}
