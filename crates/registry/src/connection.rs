//! Explicit wallet/session state, threaded through the ledger client instead of
//! living in a global.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Signature},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::{Signer as _, local::PrivateKeySigner},
};
use tracing::instrument;

use crate::error::{RegistryError, RegistryResult};

/// A read-only or signer-bound connection to the ledger.
#[derive(Clone)]
pub enum ConnectionContext {
    Disconnected {
        provider: DynProvider,
    },
    Connected {
        account: Address,
        signer: PrivateKeySigner,
        /// Read provider with a wallet filler for the signer.
        provider: DynProvider,
        read_provider: DynProvider,
    },
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected { .. } => f.write_str("Disconnected"),
            Self::Connected { account, .. } => {
                f.debug_struct("Connected").field("account", account).finish()
            }
        }
    }
}

impl ConnectionContext {
    pub fn read_only(provider: DynProvider) -> Self {
        Self::Disconnected { provider }
    }

    /// Binds a signer on top of the read provider.
    #[instrument(level = "debug", skip_all)]
    pub fn connect(self, signer: PrivateKeySigner) -> Self {
        let read_provider = self.read_provider().clone();
        let account = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_provider(read_provider.clone())
            .erased();
        tracing::info!(%account, "connected signer");
        Self::Connected {
            account,
            signer,
            provider,
            read_provider,
        }
    }

    /// Parses a hex private key and connects it.
    pub fn connect_private_key(self, private_key: &str) -> RegistryResult<Self> {
        let signer = private_key
            .parse::<PrivateKeySigner>()
            .map_err(|err| RegistryError::invalid_input("private key", err))?;
        Ok(self.connect(signer))
    }

    /// Drops the signer, keeping the read connection.
    pub fn disconnect(self) -> Self {
        Self::Disconnected {
            provider: self.read_provider().clone(),
        }
    }

    pub fn account(&self) -> Option<Address> {
        match self {
            Self::Disconnected { .. } => None,
            Self::Connected { account, .. } => Some(*account),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.account().is_some()
    }

    pub fn read_provider(&self) -> &DynProvider {
        match self {
            Self::Disconnected { provider } => provider,
            Self::Connected { read_provider, .. } => read_provider,
        }
    }

    /// The provider that can send transactions, if a signer is bound.
    pub fn signing_provider(&self) -> RegistryResult<&DynProvider> {
        match self {
            Self::Disconnected { .. } => Err(RegistryError::Unauthenticated),
            Self::Connected { provider, .. } => Ok(provider),
        }
    }

    /// Signs an EIP-191 personal message with the connected signer.
    pub async fn sign_message(&self, message: &[u8]) -> RegistryResult<Signature> {
        match self {
            Self::Disconnected { .. } => Err(RegistryError::Unauthenticated),
            Self::Connected { signer, .. } => signer
                .sign_message(message)
                .await
                .map_err(|err| RegistryError::Network(format!("signing failed: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_provider() -> DynProvider {
        ProviderBuilder::new()
            .connect_http("http://127.0.0.1:1".parse().unwrap())
            .erased()
    }

    #[test]
    fn read_only_context_has_no_account() {
        let ctx = ConnectionContext::read_only(offline_provider());
        assert!(!ctx.is_connected());
        assert!(matches!(
            ctx.signing_provider(),
            Err(RegistryError::Unauthenticated)
        ));
    }

    #[test]
    fn connect_then_disconnect() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();
        let ctx = ConnectionContext::read_only(offline_provider()).connect(signer);
        assert_eq!(ctx.account(), Some(expected));
        assert!(ctx.signing_provider().is_ok());

        let ctx = ctx.disconnect();
        assert_eq!(ctx.account(), None);
    }

    #[test]
    fn invalid_private_key_is_invalid_input() {
        let err = ConnectionContext::read_only(offline_provider())
            .connect_private_key("not-a-key")
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn signing_requires_a_signer() {
        let ctx = ConnectionContext::read_only(offline_provider());
        assert!(matches!(
            ctx.sign_message(b"hello").await,
            Err(RegistryError::Unauthenticated)
        ));

        let signer = PrivateKeySigner::random();
        let account = signer.address();
        let ctx = ctx.connect(signer);
        let sig = ctx.sign_message(b"hello").await.unwrap();
        assert_eq!(sig.recover_address_from_msg(b"hello").unwrap(), account);
    }
}
