use alloy::{
    primitives::{Address, B256, Bytes, LogData, U256, address},
    sol_types::SolEvent,
};
use mypersona_registry::{
    EventKind, LedgerEvent, LedgerLog, LogPosition, Registry, RegistryAddresses, RegistryError,
    bindings::{IIssuerRegistry, IRevocationRegistry},
};
use mypersona_test_utils::fixtures;

const ISSUER: Address = address!("0x1111111111111111111111111111111111111111");
const OWNER: Address = address!("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");

#[test]
fn issuer_added_decodes_with_position() {
    let addresses = RegistryAddresses::default();
    let lg = fixtures::issuer_added(&addresses, ISSUER, 120, 3);

    let decoded = LedgerLog::decode(&lg, &addresses).unwrap();
    assert_eq!(decoded.registry, Registry::Issuer);
    assert_eq!(decoded.position, LogPosition::new(120, 3));
    assert_eq!(decoded.tx_hash, fixtures::tx_hash_at(120, 3));
    assert_eq!(decoded.event, LedgerEvent::IssuerAdded { issuer: ISSUER });
}

#[test]
fn revocation_events_carry_issuer_and_nonce() {
    let addresses = RegistryAddresses::default();
    let nonce = U256::from(42);

    let revoked =
        LedgerLog::decode(&fixtures::credential_revoked(&addresses, ISSUER, nonce, 5, 0), &addresses)
            .unwrap();
    assert_eq!(revoked.registry, Registry::Revocation);
    assert_eq!(
        revoked.event,
        LedgerEvent::CredentialRevoked {
            issuer: ISSUER,
            credential_nonce: nonce
        }
    );

    let reinstated = LedgerLog::decode(
        &fixtures::credential_unrevoked(&addresses, ISSUER, nonce, 7, 1),
        &addresses,
    )
    .unwrap();
    assert_eq!(reinstated.event.kind(), EventKind::CredentialUnRevoked);
}

#[test]
fn shared_lifecycle_events_are_attributed_by_emitter() {
    let addresses = RegistryAddresses::default();
    let paused = fixtures::event_log(
        addresses.revocation_registry,
        &IRevocationRegistry::Paused { account: OWNER },
        9,
        0,
    );
    let decoded = LedgerLog::decode(&paused, &addresses).unwrap();
    assert_eq!(decoded.registry, Registry::Revocation);
    assert_eq!(decoded.event, LedgerEvent::Paused { account: OWNER });

    let transferred = fixtures::event_log(
        addresses.issuer_registry,
        &IIssuerRegistry::OwnershipTransferred {
            previousOwner: Address::ZERO,
            newOwner: OWNER,
        },
        1,
        0,
    );
    let decoded = LedgerLog::decode(&transferred, &addresses).unwrap();
    assert_eq!(decoded.registry, Registry::Issuer);
    assert_eq!(
        decoded.event,
        LedgerEvent::OwnershipTransferred {
            previous_owner: Address::ZERO,
            new_owner: OWNER
        }
    );
}

#[test]
fn missing_fields_are_reported() {
    let addresses = RegistryAddresses::default();

    let mut lg = fixtures::issuer_added(&addresses, ISSUER, 10, 0);
    lg.block_number = None;
    assert!(matches!(
        LedgerLog::decode(&lg, &addresses),
        Err(RegistryError::MissingLogField("block_number"))
    ));

    let mut lg = fixtures::issuer_added(&addresses, ISSUER, 10, 0);
    lg.log_index = None;
    assert!(matches!(
        LedgerLog::decode(&lg, &addresses),
        Err(RegistryError::MissingLogField("log_index"))
    ));
}

#[test]
fn logs_from_other_contracts_are_rejected() {
    let addresses = RegistryAddresses::default();
    let foreign = fixtures::event_log(
        Address::repeat_byte(0x99),
        &IIssuerRegistry::IssuerAdded {
            issuerAddress: ISSUER,
        },
        10,
        0,
    );
    assert!(matches!(
        LedgerLog::decode(&foreign, &addresses),
        Err(RegistryError::UnknownEmitter(emitter)) if emitter == Address::repeat_byte(0x99)
    ));
}

#[test]
fn unknown_and_empty_topics_are_rejected() {
    let addresses = RegistryAddresses::default();
    let unknown_sig = B256::repeat_byte(0xee);

    let unknown = fixtures::rpc_log(
        addresses.issuer_registry,
        LogData::new_unchecked(vec![unknown_sig], Bytes::new()),
        10,
        0,
    );
    assert!(matches!(
        LedgerLog::decode(&unknown, &addresses),
        Err(RegistryError::UnknownEventSignature(sig)) if sig == unknown_sig
    ));

    let anonymous = fixtures::rpc_log(
        addresses.issuer_registry,
        LogData::new_unchecked(Vec::new(), Bytes::new()),
        10,
        0,
    );
    assert!(matches!(
        LedgerLog::decode(&anonymous, &addresses),
        Err(RegistryError::MissingLogField("topics"))
    ));
}

#[test]
fn kind_signatures_match_bindings() {
    assert_eq!(
        EventKind::IssuerAdded.signature(),
        IIssuerRegistry::IssuerAdded::SIGNATURE_HASH
    );
    assert_eq!(
        EventKind::CredentialRevoked.signature(),
        IRevocationRegistry::CredentialRevoked::SIGNATURE_HASH
    );
    assert_eq!(
        EventKind::Paused.signature(),
        IRevocationRegistry::Paused::SIGNATURE_HASH
    );
}
