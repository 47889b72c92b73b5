//! Typed read/write gateway to the two registries.

use std::fmt;

use alloy::{
    primitives::{Address, TxHash, U256},
    providers::{PendingTransactionBuilder, Provider},
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use crate::{
    bindings::{IIssuerRegistry, IRevocationRegistry},
    connection::ConnectionContext,
    error::{RegistryError, RegistryResult},
    types::{Registry, RegistryAddresses, RegistryStatus},
};

/// Side-effect free queries. A `false` answer is a valid result, never an error.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    async fn owner(&self, registry: Registry) -> RegistryResult<Address>;

    async fn paused(&self, registry: Registry) -> RegistryResult<bool>;

    async fn is_trusted_issuer(&self, issuer: Address) -> RegistryResult<bool>;

    async fn is_revoked(&self, credential_nonce: U256) -> RegistryResult<bool>;

    /// The issuer registry the revocation registry is wired to.
    async fn linked_issuer_registry(&self) -> RegistryResult<Address>;

    /// Owner, pause state and linkage of both registries.
    async fn status(&self) -> RegistryResult<RegistryStatus> {
        let (issuer_owner, issuer_paused, revocation_owner, revocation_paused, linked) = tokio::try_join!(
            self.owner(Registry::Issuer),
            self.paused(Registry::Issuer),
            self.owner(Registry::Revocation),
            self.paused(Registry::Revocation),
            self.linked_issuer_registry(),
        )?;
        Ok(RegistryStatus {
            issuer_owner,
            issuer_paused,
            revocation_owner,
            revocation_paused,
            linked_issuer_registry: linked,
        })
    }
}

/// State-changing calls. Every call needs a connected signer.
#[async_trait]
pub trait RegistryWriter: Send + Sync {
    /// The account transactions are sent from, if any.
    fn account(&self) -> Option<Address>;

    /// Broadcasts the call and returns its hash once the node accepted it.
    async fn send(&self, call: &RegistryCall) -> RegistryResult<TxHash>;

    /// Waits until the transaction is mined.
    async fn confirm(&self, tx_hash: TxHash) -> RegistryResult<TxOutcome>;
}

/// Every mutating entry point of the two registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "call", content = "args", rename_all = "camelCase")]
pub enum RegistryCall {
    AddIssuer(Address),
    RemoveIssuer(Address),
    RevokeCredential(U256),
    UnRevokeCredential(U256),
    SetIssuerRegistryAddress(Address),
    Pause(Registry),
    Unpause(Registry),
    TransferOwnership(Registry, Address),
}

impl RegistryCall {
    pub fn registry(&self) -> Registry {
        match self {
            Self::AddIssuer(_) | Self::RemoveIssuer(_) => Registry::Issuer,
            Self::RevokeCredential(_)
            | Self::UnRevokeCredential(_)
            | Self::SetIssuerRegistryAddress(_) => Registry::Revocation,
            Self::Pause(registry)
            | Self::Unpause(registry)
            | Self::TransferOwnership(registry, _) => *registry,
        }
    }
}

impl fmt::Display for RegistryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddIssuer(addr) => write!(f, "addIssuer({addr})"),
            Self::RemoveIssuer(addr) => write!(f, "removeIssuer({addr})"),
            Self::RevokeCredential(nonce) => write!(f, "revokeCredential({nonce})"),
            Self::UnRevokeCredential(nonce) => write!(f, "unRevokeCredential({nonce})"),
            Self::SetIssuerRegistryAddress(addr) => write!(f, "setIssuerRegistryAddress({addr})"),
            Self::Pause(registry) => write!(f, "{registry}.pause()"),
            Self::Unpause(registry) => write!(f, "{registry}.unpause()"),
            Self::TransferOwnership(registry, addr) => {
                write!(f, "{registry}.transferOwnership({addr})")
            }
        }
    }
}

/// How a mined transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TxOutcome {
    Confirmed { block_number: u64 },
    Reverted { block_number: Option<u64> },
}

/// [`RegistryReader`] + [`RegistryWriter`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    context: ConnectionContext,
    addresses: RegistryAddresses,
}

impl LedgerClient {
    pub fn new(context: ConnectionContext, addresses: RegistryAddresses) -> Self {
        Self { context, addresses }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn addresses(&self) -> &RegistryAddresses {
        &self.addresses
    }

    /// Rebinds the client to another connection (account switch, disconnect).
    pub fn with_context(self, context: ConnectionContext) -> Self {
        Self { context, ..self }
    }

    fn issuer_registry(&self) -> IIssuerRegistry::IIssuerRegistryInstance<&alloy::providers::DynProvider> {
        IIssuerRegistry::new(self.addresses.issuer_registry, self.context.read_provider())
    }

    fn revocation_registry(
        &self,
    ) -> IRevocationRegistry::IRevocationRegistryInstance<&alloy::providers::DynProvider> {
        IRevocationRegistry::new(
            self.addresses.revocation_registry,
            self.context.read_provider(),
        )
    }
}

#[async_trait]
impl RegistryReader for LedgerClient {
    #[instrument(level = "debug", skip(self))]
    async fn owner(&self, registry: Registry) -> RegistryResult<Address> {
        match registry {
            Registry::Issuer => self.issuer_registry().owner().call().await,
            Registry::Revocation => self.revocation_registry().owner().call().await,
        }
        .map_err(RegistryError::from_contract)
    }

    #[instrument(level = "debug", skip(self))]
    async fn paused(&self, registry: Registry) -> RegistryResult<bool> {
        match registry {
            Registry::Issuer => self.issuer_registry().paused().call().await,
            Registry::Revocation => self.revocation_registry().paused().call().await,
        }
        .map_err(RegistryError::from_contract)
    }

    #[instrument(level = "debug", skip(self))]
    async fn is_trusted_issuer(&self, issuer: Address) -> RegistryResult<bool> {
        self.issuer_registry()
            .isTrustedIssuer(issuer)
            .call()
            .await
            .map_err(RegistryError::from_contract)
    }

    #[instrument(level = "debug", skip(self))]
    async fn is_revoked(&self, credential_nonce: U256) -> RegistryResult<bool> {
        self.revocation_registry()
            .isRevoked(credential_nonce)
            .call()
            .await
            .map_err(RegistryError::from_contract)
    }

    #[instrument(level = "debug", skip(self))]
    async fn linked_issuer_registry(&self) -> RegistryResult<Address> {
        self.revocation_registry()
            .issuerRegistry()
            .call()
            .await
            .map_err(RegistryError::from_contract)
    }
}

#[async_trait]
impl RegistryWriter for LedgerClient {
    fn account(&self) -> Option<Address> {
        self.context.account()
    }

    #[instrument(level = "info", skip(self), fields(%call))]
    async fn send(&self, call: &RegistryCall) -> RegistryResult<TxHash> {
        let provider = self.context.signing_provider()?;
        let issuer = IIssuerRegistry::new(self.addresses.issuer_registry, provider);
        let revocation = IRevocationRegistry::new(self.addresses.revocation_registry, provider);

        let pending = match *call {
            RegistryCall::AddIssuer(addr) => issuer.addIssuer(addr).send().await,
            RegistryCall::RemoveIssuer(addr) => issuer.removeIssuer(addr).send().await,
            RegistryCall::RevokeCredential(nonce) => revocation.revokeCredential(nonce).send().await,
            RegistryCall::UnRevokeCredential(nonce) => {
                revocation.unRevokeCredential(nonce).send().await
            }
            RegistryCall::SetIssuerRegistryAddress(addr) => {
                revocation.setIssuerRegistryAddress(addr).send().await
            }
            RegistryCall::Pause(Registry::Issuer) => issuer.pause().send().await,
            RegistryCall::Pause(Registry::Revocation) => revocation.pause().send().await,
            RegistryCall::Unpause(Registry::Issuer) => issuer.unpause().send().await,
            RegistryCall::Unpause(Registry::Revocation) => revocation.unpause().send().await,
            RegistryCall::TransferOwnership(Registry::Issuer, addr) => {
                issuer.transferOwnership(addr).send().await
            }
            RegistryCall::TransferOwnership(Registry::Revocation, addr) => {
                revocation.transferOwnership(addr).send().await
            }
        }
        .map_err(RegistryError::from_contract)?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(%tx_hash, "transaction sent");
        Ok(tx_hash)
    }

    #[instrument(level = "info", skip(self))]
    async fn confirm(&self, tx_hash: TxHash) -> RegistryResult<TxOutcome> {
        let provider = self.context.signing_provider()?;
        let receipt = PendingTransactionBuilder::new(provider.root().clone(), tx_hash)
            .get_receipt()
            .await
            .map_err(|err| RegistryError::Network(format!("transaction confirmation error: {err}")))?;

        if receipt.status() {
            let block_number = receipt.block_number.unwrap_or_default();
            tracing::info!(%tx_hash, block_number, "transaction confirmed");
            Ok(TxOutcome::Confirmed { block_number })
        } else {
            tracing::warn!(%tx_hash, "transaction reverted on-chain");
            Ok(TxOutcome::Reverted {
                block_number: receipt.block_number,
            })
        }
    }
}
