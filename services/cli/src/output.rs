use std::fmt::{self, Display, Write as _};

use mypersona_registry::{LedgerEvent, LedgerLog, ProjectedSet, RegistryStatus};
use serde::Serialize;

/// Writes command results to stdout, as text or JSON.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn emit<T: Serialize + ?Sized>(
        &self,
        value: &T,
        text: impl FnOnce() -> String,
    ) -> eyre::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

pub fn status(status: &RegistryStatus) -> String {
    format!(
        "IssuerRegistry      owner {}  {}\n\
         RevocationRegistry  owner {}  {}\n\
         linked issuer registry {}",
        status.issuer_owner,
        paused_label(status.issuer_paused),
        status.revocation_owner,
        paused_label(status.revocation_paused),
        status.linked_issuer_registry,
    )
}

fn paused_label(paused: bool) -> &'static str {
    if paused { "PAUSED" } else { "active" }
}

/// One line per member with the block and transaction that made it one.
pub fn members<K: Ord + Copy + Display>(set: &ProjectedSet<K>, noun: &str) -> String {
    let coverage = set.coverage();
    let mut out = format!(
        "{} {noun}(s), blocks {}..={}{}",
        set.len(),
        coverage.from,
        coverage.to,
        if coverage.complete { "" } else { " (truncated)" },
    );
    for (key, info) in set.members() {
        let _ = write!(out, "\n  {key}  since block {}  tx {}", info.since_block, info.tx_hash);
    }
    out
}

pub fn activity(logs: &[LedgerLog]) -> String {
    if logs.is_empty() {
        return "no events in the history window".to_string();
    }
    logs.iter()
        .map(|lg| format!("{}  {}  tx {}", lg.position, EventLine(&lg.event), lg.tx_hash))
        .collect::<Vec<_>>()
        .join("\n")
}

struct EventLine<'a>(&'a LedgerEvent);

impl Display for EventLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            LedgerEvent::IssuerAdded { issuer } => write!(f, "issuer added {issuer}"),
            LedgerEvent::IssuerRemoved { issuer } => write!(f, "issuer removed {issuer}"),
            LedgerEvent::CredentialRevoked {
                issuer,
                credential_nonce,
            } => write!(f, "credential {credential_nonce} revoked by {issuer}"),
            LedgerEvent::CredentialUnRevoked {
                issuer,
                credential_nonce,
            } => write!(f, "credential {credential_nonce} reinstated by {issuer}"),
            LedgerEvent::Paused { account } => write!(f, "paused by {account}"),
            LedgerEvent::Unpaused { account } => write!(f, "unpaused by {account}"),
            LedgerEvent::OwnershipTransferred {
                previous_owner,
                new_owner,
            } => write!(f, "ownership {previous_owner} -> {new_owner}"),
            LedgerEvent::IssuerRegistryAddressUpdated { new_registry } => {
                write!(f, "issuer registry set to {new_registry}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use mypersona_registry::{Registry, RevokedCredentials, replay};
    use mypersona_test_utils::fixtures::ledger_log;

    use super::*;

    #[test]
    fn activity_lines_describe_events() {
        let issuer = Address::repeat_byte(0x11);
        let logs = vec![ledger_log(
            Registry::Revocation,
            9,
            0,
            LedgerEvent::CredentialRevoked {
                issuer,
                credential_nonce: U256::from(42),
            },
        )];
        let text = activity(&logs);
        assert!(text.contains(&format!("credential 42 revoked by {issuer}")));
        assert_eq!(activity(&[]), "no events in the history window");
    }

    #[test]
    fn member_listing_flags_truncated_history() {
        let logs = vec![ledger_log(
            Registry::Revocation,
            9,
            0,
            LedgerEvent::CredentialRevoked {
                issuer: Address::repeat_byte(0x11),
                credential_nonce: U256::from(7),
            },
        )];
        let coverage = mypersona_registry::HistoryWindow::LookBack(5).coverage(12);
        let set = replay(&RevokedCredentials, &logs, coverage);

        let text = members(&set, "revoked credential");
        assert!(text.starts_with("1 revoked credential(s), blocks 7..=12 (truncated)"));
        assert!(text.contains("7  since block 9"));
    }
}
