//! Raw RPC logs and decoded ledger logs for decoding and replay tests.

use alloy::{
    primitives::{Address, B256, LogData, TxHash, U256, keccak256},
    rpc::types::Log as RpcLog,
    sol_types::SolEvent,
};
use mypersona_registry::{
    LedgerEvent, LedgerLog, LogPosition, Registry, RegistryAddresses,
    bindings::{IIssuerRegistry, IRevocationRegistry},
};

/// Deterministic transaction hash for a log position.
pub fn tx_hash_at(block_number: u64, log_index: u64) -> TxHash {
    let mut seed = [0u8; 16];
    seed[..8].copy_from_slice(&block_number.to_be_bytes());
    seed[8..].copy_from_slice(&log_index.to_be_bytes());
    keccak256(seed)
}

/// An RPC log carrying the given topics and data, as a node returns it.
pub fn rpc_log(
    emitter: Address,
    data: LogData,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    RpcLog {
        inner: alloy::primitives::Log {
            address: emitter,
            data,
        },
        block_hash: Some(B256::from(U256::from(block_number))),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(tx_hash_at(block_number, log_index)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// ABI-encodes a Solidity event into an RPC log.
pub fn event_log<E: SolEvent>(
    emitter: Address,
    event: &E,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    rpc_log(emitter, event.encode_log_data(), block_number, log_index)
}

pub fn issuer_added(
    addresses: &RegistryAddresses,
    issuer: Address,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    event_log(
        addresses.issuer_registry,
        &IIssuerRegistry::IssuerAdded {
            issuerAddress: issuer,
        },
        block_number,
        log_index,
    )
}

pub fn issuer_removed(
    addresses: &RegistryAddresses,
    issuer: Address,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    event_log(
        addresses.issuer_registry,
        &IIssuerRegistry::IssuerRemoved {
            issuerAddress: issuer,
        },
        block_number,
        log_index,
    )
}

pub fn credential_revoked(
    addresses: &RegistryAddresses,
    issuer: Address,
    credential_nonce: U256,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    event_log(
        addresses.revocation_registry,
        &IRevocationRegistry::CredentialRevoked {
            issuerAddress: issuer,
            credentialNonce: credential_nonce,
        },
        block_number,
        log_index,
    )
}

pub fn credential_unrevoked(
    addresses: &RegistryAddresses,
    issuer: Address,
    credential_nonce: U256,
    block_number: u64,
    log_index: u64,
) -> RpcLog {
    event_log(
        addresses.revocation_registry,
        &IRevocationRegistry::CredentialUnRevoked {
            issuerAddress: issuer,
            credentialNonce: credential_nonce,
        },
        block_number,
        log_index,
    )
}

/// An already-decoded log, for replay tests that skip the wire format.
pub fn ledger_log(
    registry: Registry,
    block_number: u64,
    log_index: u64,
    event: LedgerEvent,
) -> LedgerLog {
    LedgerLog {
        registry,
        position: LogPosition::new(block_number, log_index),
        tx_hash: tx_hash_at(block_number, log_index),
        event,
    }
}
