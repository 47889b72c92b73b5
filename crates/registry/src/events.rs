use std::fmt;

use alloy::{
    primitives::{Address, B256, Log, TxHash, U256},
    sol_types::SolEvent,
};
use serde::Serialize;

use crate::{
    bindings::{IIssuerRegistry, IRevocationRegistry},
    error::{RegistryError, RegistryResult},
    types::{Registry, RegistryAddresses},
};

/// Canonical position of a log on the ledger: block number, then log index.
///
/// The derived ordering is the replay order. Block number alone is not enough
/// when several relevant events land in the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub const fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// The kinds of events either registry emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    IssuerAdded,
    IssuerRemoved,
    CredentialRevoked,
    CredentialUnRevoked,
    Paused,
    Unpaused,
    OwnershipTransferred,
    IssuerRegistryAddressUpdated,
}

impl EventKind {
    /// Every kind a registry can emit, for activity feeds.
    pub fn emitted_by(registry: Registry) -> &'static [EventKind] {
        match registry {
            Registry::Issuer => &[
                Self::IssuerAdded,
                Self::IssuerRemoved,
                Self::Paused,
                Self::Unpaused,
                Self::OwnershipTransferred,
            ],
            Registry::Revocation => &[
                Self::CredentialRevoked,
                Self::CredentialUnRevoked,
                Self::IssuerRegistryAddressUpdated,
                Self::Paused,
                Self::Unpaused,
                Self::OwnershipTransferred,
            ],
        }
    }

    /// topic0 of the event.
    pub fn signature(self) -> B256 {
        match self {
            Self::IssuerAdded => IIssuerRegistry::IssuerAdded::SIGNATURE_HASH,
            Self::IssuerRemoved => IIssuerRegistry::IssuerRemoved::SIGNATURE_HASH,
            Self::CredentialRevoked => IRevocationRegistry::CredentialRevoked::SIGNATURE_HASH,
            Self::CredentialUnRevoked => IRevocationRegistry::CredentialUnRevoked::SIGNATURE_HASH,
            Self::Paused => IIssuerRegistry::Paused::SIGNATURE_HASH,
            Self::Unpaused => IIssuerRegistry::Unpaused::SIGNATURE_HASH,
            Self::OwnershipTransferred => IIssuerRegistry::OwnershipTransferred::SIGNATURE_HASH,
            Self::IssuerRegistryAddressUpdated => {
                IRevocationRegistry::IssuerRegistryAddressUpdated::SIGNATURE_HASH
            }
        }
    }

    pub fn signatures(kinds: &[EventKind]) -> Vec<B256> {
        kinds.iter().map(|kind| kind.signature()).collect()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A registry event with its arguments decoded into a closed set of shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    IssuerAdded {
        issuer: Address,
    },
    IssuerRemoved {
        issuer: Address,
    },
    CredentialRevoked {
        issuer: Address,
        credential_nonce: U256,
    },
    CredentialUnRevoked {
        issuer: Address,
        credential_nonce: U256,
    },
    Paused {
        account: Address,
    },
    Unpaused {
        account: Address,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
    IssuerRegistryAddressUpdated {
        new_registry: Address,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::IssuerAdded { .. } => EventKind::IssuerAdded,
            Self::IssuerRemoved { .. } => EventKind::IssuerRemoved,
            Self::CredentialRevoked { .. } => EventKind::CredentialRevoked,
            Self::CredentialUnRevoked { .. } => EventKind::CredentialUnRevoked,
            Self::Paused { .. } => EventKind::Paused,
            Self::Unpaused { .. } => EventKind::Unpaused,
            Self::OwnershipTransferred { .. } => EventKind::OwnershipTransferred,
            Self::IssuerRegistryAddressUpdated { .. } => EventKind::IssuerRegistryAddressUpdated,
        }
    }

    /// Decodes the data part of a log by its topic0.
    pub fn decode(log: &Log) -> RegistryResult<Self> {
        let Some(&event_sig) = log.topics().first() else {
            return Err(RegistryError::MissingLogField("topics"));
        };

        let event = match event_sig {
            IIssuerRegistry::IssuerAdded::SIGNATURE_HASH => {
                let ev = IIssuerRegistry::IssuerAdded::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::IssuerAdded {
                    issuer: ev.data.issuerAddress,
                }
            }
            IIssuerRegistry::IssuerRemoved::SIGNATURE_HASH => {
                let ev = IIssuerRegistry::IssuerRemoved::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::IssuerRemoved {
                    issuer: ev.data.issuerAddress,
                }
            }
            IRevocationRegistry::CredentialRevoked::SIGNATURE_HASH => {
                let ev = IRevocationRegistry::CredentialRevoked::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::CredentialRevoked {
                    issuer: ev.data.issuerAddress,
                    credential_nonce: ev.data.credentialNonce,
                }
            }
            IRevocationRegistry::CredentialUnRevoked::SIGNATURE_HASH => {
                let ev = IRevocationRegistry::CredentialUnRevoked::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::CredentialUnRevoked {
                    issuer: ev.data.issuerAddress,
                    credential_nonce: ev.data.credentialNonce,
                }
            }
            // Identical signatures on both registries.
            IIssuerRegistry::Paused::SIGNATURE_HASH => {
                let ev =
                    IIssuerRegistry::Paused::decode_log(log).map_err(RegistryError::LogDecode)?;
                Self::Paused {
                    account: ev.data.account,
                }
            }
            IIssuerRegistry::Unpaused::SIGNATURE_HASH => {
                let ev =
                    IIssuerRegistry::Unpaused::decode_log(log).map_err(RegistryError::LogDecode)?;
                Self::Unpaused {
                    account: ev.data.account,
                }
            }
            IIssuerRegistry::OwnershipTransferred::SIGNATURE_HASH => {
                let ev = IIssuerRegistry::OwnershipTransferred::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::OwnershipTransferred {
                    previous_owner: ev.data.previousOwner,
                    new_owner: ev.data.newOwner,
                }
            }
            IRevocationRegistry::IssuerRegistryAddressUpdated::SIGNATURE_HASH => {
                let ev = IRevocationRegistry::IssuerRegistryAddressUpdated::decode_log(log)
                    .map_err(RegistryError::LogDecode)?;
                Self::IssuerRegistryAddressUpdated {
                    new_registry: ev.data.newRegistryAddress,
                }
            }
            _ => return Err(RegistryError::UnknownEventSignature(event_sig)),
        };

        Ok(event)
    }
}

/// A decoded registry event together with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerLog {
    pub registry: Registry,
    pub position: LogPosition,
    pub tx_hash: TxHash,
    pub event: LedgerEvent,
}

impl LedgerLog {
    /// Decodes an RPC log, attributing it to a registry by its emitter address.
    pub fn decode(
        lg: &alloy::rpc::types::Log,
        addresses: &RegistryAddresses,
    ) -> RegistryResult<Self> {
        let block_number = lg
            .block_number
            .ok_or(RegistryError::MissingLogField("block_number"))?;
        let log_index = lg
            .log_index
            .ok_or(RegistryError::MissingLogField("log_index"))?;
        let tx_hash = lg
            .transaction_hash
            .ok_or(RegistryError::MissingLogField("transaction_hash"))?;
        let registry = addresses
            .registry_of(lg.address())
            .ok_or(RegistryError::UnknownEmitter(lg.address()))?;

        Ok(Self {
            registry,
            position: LogPosition::new(block_number, log_index),
            tx_hash,
            event: LedgerEvent::decode(&lg.inner)?,
        })
    }

    pub fn block_number(&self) -> u64 {
        self.position.block_number
    }
}
