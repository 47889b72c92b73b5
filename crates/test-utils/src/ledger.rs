//! An in-memory stand-in for both registries.
//!
//! Follows the deployed contracts' rules (OpenZeppelin v5 `Ownable` and
//! `Pausable`, trusted-issuer gating of revocations), mines one block per
//! successful transaction and records every emitted event with its position.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::{Address, TxHash, U256, keccak256};
use async_trait::async_trait;
use mypersona_registry::{
    Coverage, EventSource, FetchedLogs, LedgerEvent, LedgerLog, LogPosition, LogQuery, Registry,
    RegistryAddresses, RegistryCall, RegistryError, RegistryReader, RegistryResult,
    RegistryWriter, TxOutcome,
};
use parking_lot::Mutex;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A failure injected into the next `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFault {
    /// The wallet declines to sign.
    UserRejected,
    /// The node cannot be reached.
    Network,
    /// The transaction is mined but reverts.
    RevertOnChain,
}

#[derive(Debug, Clone, Copy)]
struct Ownable {
    owner: Address,
    paused: bool,
}

#[derive(Debug)]
struct State {
    head: u64,
    nonce: u64,
    issuer: Ownable,
    revocation: Ownable,
    linked_issuer_registry: Address,
    trusted: BTreeSet<Address>,
    revoked: BTreeSet<U256>,
    logs: Vec<LedgerLog>,
    receipts: HashMap<TxHash, TxOutcome>,
    attempts: Vec<RegistryCall>,
    next_fault: Option<SendFault>,
    withhold_receipts: bool,
    fail_log_queries: bool,
    fail_reads: bool,
}

impl State {
    fn ownable(&mut self, registry: Registry) -> &mut Ownable {
        match registry {
            Registry::Issuer => &mut self.issuer,
            Registry::Revocation => &mut self.revocation,
        }
    }

    fn next_tx_hash(&mut self) -> TxHash {
        self.nonce += 1;
        keccak256(self.nonce.to_be_bytes())
    }

    fn mine(&mut self, events: Vec<(Registry, LedgerEvent)>) -> TxHash {
        self.head += 1;
        let tx_hash = self.next_tx_hash();
        for (log_index, (registry, event)) in events.into_iter().enumerate() {
            self.logs.push(LedgerLog {
                registry,
                position: LogPosition::new(self.head, log_index as u64),
                tx_hash,
                event,
            });
        }
        self.receipts.insert(
            tx_hash,
            TxOutcome::Confirmed {
                block_number: self.head,
            },
        );
        tx_hash
    }

    fn only_owner(&mut self, registry: Registry, caller: Address) -> Result<(), String> {
        if self.ownable(registry).owner != caller {
            return Err(format!("account {caller} is not the owner"));
        }
        Ok(())
    }

    fn when_not_paused(&mut self, registry: Registry) -> Result<(), String> {
        if self.ownable(registry).paused {
            return Err("contract is paused".to_string());
        }
        Ok(())
    }

    fn only_trusted_issuer(&self, caller: Address) -> Result<(), String> {
        if !self.trusted.contains(&caller) {
            return Err("caller is not a trusted issuer".to_string());
        }
        Ok(())
    }

    /// Runs the call's checks and effects, returning the events it emits.
    fn apply(
        &mut self,
        caller: Address,
        call: RegistryCall,
    ) -> Result<Vec<(Registry, LedgerEvent)>, String> {
        let registry = call.registry();
        let event = match call {
            RegistryCall::AddIssuer(issuer) => {
                self.only_owner(registry, caller)?;
                self.when_not_paused(registry)?;
                if issuer.is_zero() {
                    return Err("invalid issuer address".to_string());
                }
                if !self.trusted.insert(issuer) {
                    return Err("issuer already trusted".to_string());
                }
                LedgerEvent::IssuerAdded { issuer }
            }
            RegistryCall::RemoveIssuer(issuer) => {
                self.only_owner(registry, caller)?;
                self.when_not_paused(registry)?;
                if !self.trusted.remove(&issuer) {
                    return Err("issuer not trusted".to_string());
                }
                LedgerEvent::IssuerRemoved { issuer }
            }
            RegistryCall::RevokeCredential(credential_nonce) => {
                self.when_not_paused(registry)?;
                self.only_trusted_issuer(caller)?;
                if !self.revoked.insert(credential_nonce) {
                    return Err("credential already revoked".to_string());
                }
                LedgerEvent::CredentialRevoked {
                    issuer: caller,
                    credential_nonce,
                }
            }
            RegistryCall::UnRevokeCredential(credential_nonce) => {
                self.when_not_paused(registry)?;
                self.only_trusted_issuer(caller)?;
                if !self.revoked.remove(&credential_nonce) {
                    return Err("credential not revoked".to_string());
                }
                LedgerEvent::CredentialUnRevoked {
                    issuer: caller,
                    credential_nonce,
                }
            }
            RegistryCall::SetIssuerRegistryAddress(new_registry) => {
                self.only_owner(registry, caller)?;
                if new_registry.is_zero() {
                    return Err("invalid registry address".to_string());
                }
                self.linked_issuer_registry = new_registry;
                LedgerEvent::IssuerRegistryAddressUpdated { new_registry }
            }
            RegistryCall::Pause(_) => {
                self.only_owner(registry, caller)?;
                self.when_not_paused(registry)?;
                self.ownable(registry).paused = true;
                LedgerEvent::Paused { account: caller }
            }
            RegistryCall::Unpause(_) => {
                self.only_owner(registry, caller)?;
                if !self.ownable(registry).paused {
                    return Err("contract is not paused".to_string());
                }
                self.ownable(registry).paused = false;
                LedgerEvent::Unpaused { account: caller }
            }
            RegistryCall::TransferOwnership(_, new_owner) => {
                self.only_owner(registry, caller)?;
                if new_owner.is_zero() {
                    return Err(format!("invalid owner {new_owner}"));
                }
                let previous_owner = std::mem::replace(&mut self.ownable(registry).owner, new_owner);
                LedgerEvent::OwnershipTransferred {
                    previous_owner,
                    new_owner,
                }
            }
        };
        Ok(vec![(registry, event)])
    }
}

/// Both registries in memory. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct FakeLedger {
    addresses: RegistryAddresses,
    state: Arc<Mutex<State>>,
}

impl FakeLedger {
    /// Deploys both registries owned by `owner` in block 1, wired together.
    pub fn new(owner: Address) -> Self {
        let addresses = RegistryAddresses::default();
        let mut state = State {
            head: 0,
            nonce: 0,
            issuer: Ownable {
                owner,
                paused: false,
            },
            revocation: Ownable {
                owner,
                paused: false,
            },
            linked_issuer_registry: addresses.issuer_registry,
            trusted: BTreeSet::new(),
            revoked: BTreeSet::new(),
            logs: Vec::new(),
            receipts: HashMap::new(),
            attempts: Vec::new(),
            next_fault: None,
            withhold_receipts: false,
            fail_log_queries: false,
            fail_reads: false,
        };
        let constructed = LedgerEvent::OwnershipTransferred {
            previous_owner: Address::ZERO,
            new_owner: owner,
        };
        state.mine(vec![
            (Registry::Issuer, constructed.clone()),
            (Registry::Revocation, constructed),
        ]);

        Self {
            addresses,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn addresses(&self) -> RegistryAddresses {
        self.addresses
    }

    pub fn head_block(&self) -> u64 {
        self.state.lock().head
    }

    /// Mines empty blocks.
    pub fn advance_blocks(&self, blocks: u64) {
        self.state.lock().head += blocks;
    }

    /// A transaction sender bound to `account`.
    pub fn wallet(&self, account: Address) -> FakeWallet {
        FakeWallet {
            ledger: self.clone(),
            account: Some(account),
        }
    }

    /// A sender with no account, as when no wallet is connected.
    pub fn disconnected(&self) -> FakeWallet {
        FakeWallet {
            ledger: self.clone(),
            account: None,
        }
    }

    pub fn fail_next_send(&self, fault: SendFault) {
        self.state.lock().next_fault = Some(fault);
    }

    /// While set, `confirm` keeps waiting; clearing it lets pending waits resolve.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().withhold_receipts = withhold;
    }

    pub fn fail_log_queries(&self, fail: bool) {
        self.state.lock().fail_log_queries = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Every call that reached the ledger, successful or not.
    pub fn attempts(&self) -> Vec<RegistryCall> {
        self.state.lock().attempts.clone()
    }

    pub fn logs(&self) -> Vec<LedgerLog> {
        self.state.lock().logs.clone()
    }

    /// Executes a call as `caller`, mining it on success.
    pub fn execute(&self, caller: Address, call: RegistryCall) -> RegistryResult<TxHash> {
        let mut state = self.state.lock();
        state.attempts.push(call);

        match state.next_fault.take() {
            Some(SendFault::UserRejected) => return Err(RegistryError::UserRejected),
            Some(SendFault::Network) => {
                return Err(RegistryError::Network("connection reset".to_string()));
            }
            Some(SendFault::RevertOnChain) => {
                state.head += 1;
                let tx_hash = state.next_tx_hash();
                let block_number = Some(state.head);
                state
                    .receipts
                    .insert(tx_hash, TxOutcome::Reverted { block_number });
                return Ok(tx_hash);
            }
            None => {}
        }

        match state.apply(caller, call) {
            Ok(events) => {
                let tx_hash = state.mine(events);
                tracing::debug!(%call, %tx_hash, block = state.head, "fake ledger mined");
                Ok(tx_hash)
            }
            Err(reason) => Err(RegistryError::Reverted {
                tx_hash: None,
                reason: Some(reason),
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> RegistryResult<T> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(RegistryError::Network("eth_call failed".to_string()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl RegistryReader for FakeLedger {
    async fn owner(&self, registry: Registry) -> RegistryResult<Address> {
        self.read(|state| match registry {
            Registry::Issuer => state.issuer.owner,
            Registry::Revocation => state.revocation.owner,
        })
    }

    async fn paused(&self, registry: Registry) -> RegistryResult<bool> {
        self.read(|state| match registry {
            Registry::Issuer => state.issuer.paused,
            Registry::Revocation => state.revocation.paused,
        })
    }

    async fn is_trusted_issuer(&self, issuer: Address) -> RegistryResult<bool> {
        self.read(|state| state.trusted.contains(&issuer))
    }

    async fn is_revoked(&self, credential_nonce: U256) -> RegistryResult<bool> {
        self.read(|state| state.revoked.contains(&credential_nonce))
    }

    async fn linked_issuer_registry(&self) -> RegistryResult<Address> {
        self.read(|state| state.linked_issuer_registry)
    }
}

#[async_trait]
impl EventSource for FakeLedger {
    async fn head(&self) -> RegistryResult<u64> {
        let state = self.state.lock();
        if state.fail_log_queries {
            return Err(RegistryError::Network("eth_blockNumber failed".to_string()));
        }
        Ok(state.head)
    }

    async fn fetch(&self, query: &LogQuery) -> RegistryResult<FetchedLogs> {
        let state = self.state.lock();
        if state.fail_log_queries {
            return Err(RegistryError::Network(
                "eth_getLogs: block range too large".to_string(),
            ));
        }
        let coverage: Coverage = query.window.coverage(state.head);
        let logs = state
            .logs
            .iter()
            .filter(|lg| lg.registry == query.registry)
            .filter(|lg| query.kinds.contains(&lg.event.kind()))
            .filter(|lg| (coverage.from..=coverage.to).contains(&lg.block_number()))
            .cloned()
            .collect();
        Ok(FetchedLogs { logs, coverage })
    }
}

/// [`RegistryWriter`] for one account of a [`FakeLedger`].
#[derive(Debug, Clone)]
pub struct FakeWallet {
    ledger: FakeLedger,
    account: Option<Address>,
}

impl FakeWallet {
    pub fn ledger(&self) -> &FakeLedger {
        &self.ledger
    }
}

#[async_trait]
impl RegistryWriter for FakeWallet {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn send(&self, call: &RegistryCall) -> RegistryResult<TxHash> {
        let account = self.account.ok_or(RegistryError::Unauthenticated)?;
        self.ledger.execute(account, *call)
    }

    async fn confirm(&self, tx_hash: TxHash) -> RegistryResult<TxOutcome> {
        loop {
            let (withheld, receipt) = {
                let state = self.ledger.state.lock();
                (state.withhold_receipts, state.receipts.get(&tx_hash).copied())
            };
            if !withheld {
                return receipt
                    .ok_or_else(|| RegistryError::Network(format!("unknown transaction {tx_hash}")));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
