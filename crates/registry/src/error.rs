use alloy::{
    primitives::{B256, TxHash},
    sol_types::SolInterface,
    transports::TransportError,
};
use thiserror::Error;

use crate::{
    bindings::IRevocationRegistry::IRevocationRegistryErrors, guard::Action, types::Registry,
};

pub type RegistryResult<T> = Result<T, RegistryError>;

const GENERIC_REVERT: &str = "transaction failed on-chain, no reason given";

/// JSON-RPC error code wallets use for a declined signature or transaction (EIP-1193).
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no signer connected")]
    Unauthenticated,
    #[error("{caller} is not allowed to {action}")]
    Unauthorized {
        caller: alloy::primitives::Address,
        action: Action,
    },
    #[error("{0} is paused")]
    SystemPaused(Registry),
    #[error("{0} is not paused")]
    NotPaused(Registry),
    #[error("transaction rejected by user")]
    UserRejected,
    #[error("transaction reverted: {}", reason.as_deref().unwrap_or(GENERIC_REVERT))]
    Reverted {
        tx_hash: Option<TxHash>,
        reason: Option<String>,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("log decode error: {0}")]
    LogDecode(#[source] alloy::sol_types::Error),
    #[error("missing log field: {0}")]
    MissingLogField(&'static str),
    #[error("unknown event signature: {0:?}")]
    UnknownEventSignature(B256),
    #[error("log emitted by {0}, which is neither registry")]
    UnknownEmitter(alloy::primitives::Address),
}

impl RegistryError {
    pub fn invalid_input(field: &'static str, reason: impl ToString) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.to_string(),
        }
    }

    /// Only transient transport failures are worth resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Classifies an error returned by a contract call or transaction send.
    pub fn from_contract(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(err) => Self::from_transport(&err),
            alloy::contract::Error::PendingTransactionError(err) => Self::Network(err.to_string()),
            other => {
                if let Some(data) = other.as_revert_data() {
                    return Self::Reverted {
                        tx_hash: None,
                        reason: decode_revert_reason(&data),
                    };
                }
                Self::Network(other.to_string())
            }
        }
    }

    /// Classifies a raw transport error.
    pub fn from_transport(err: &TransportError) -> Self {
        let Some(payload) = err.as_error_resp() else {
            return Self::Network(err.to_string());
        };

        if payload.code == USER_REJECTED_CODE || is_rejection_message(&payload.message) {
            return Self::UserRejected;
        }

        if let Some(data) = payload.as_revert_data() {
            return Self::Reverted {
                tx_hash: None,
                reason: decode_revert_reason(&data).or_else(|| strip_revert_prefix(&payload.message)),
            };
        }

        if payload.message.contains("execution reverted") {
            return Self::Reverted {
                tx_hash: None,
                reason: strip_revert_prefix(&payload.message),
            };
        }

        Self::Network(err.to_string())
    }
}

fn is_rejection_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("user rejected") || message.contains("user denied")
}

fn strip_revert_prefix(message: &str) -> Option<String> {
    let reason = message
        .strip_prefix("execution reverted")
        .map(|rest| rest.trim_start_matches(':').trim())
        .unwrap_or(message);
    (!reason.is_empty()).then(|| reason.to_string())
}

/// Decodes revert data against the registries' custom errors, then against the
/// standard `Error(string)` / `Panic(uint256)` encodings.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    // Both registries share the OpenZeppelin selectors; the revocation registry
    // additionally declares `CallerNotTrustedIssuer`.
    if let Ok(err) = IRevocationRegistryErrors::abi_decode(data) {
        let reason = match err {
            IRevocationRegistryErrors::CallerNotTrustedIssuer(_) => {
                "caller is not a trusted issuer".to_string()
            }
            IRevocationRegistryErrors::EnforcedPause(_) => "contract is paused".to_string(),
            IRevocationRegistryErrors::ExpectedPause(_) => "contract is not paused".to_string(),
            IRevocationRegistryErrors::OwnableUnauthorizedAccount(e) => {
                format!("account {} is not the owner", e.account)
            }
            IRevocationRegistryErrors::OwnableInvalidOwner(e) => {
                format!("invalid owner {}", e.owner)
            }
        };
        return Some(reason);
    }
    alloy::sol_types::decode_revert_reason(data)
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{Address, Bytes},
        rpc::json_rpc::ErrorPayload,
        sol_types::{SolError, SolInterface},
        transports::RpcError,
    };

    use super::*;
    use crate::bindings::IRevocationRegistry;

    fn error_resp(code: i64, message: &str, data: Option<&str>) -> TransportError {
        let data = data.map(|d| {
            serde_json::value::to_raw_value(&serde_json::Value::String(d.to_string())).unwrap()
        });
        RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.to_string().into(),
            data,
        })
    }

    #[test]
    fn wallet_rejection_is_user_rejected() {
        let err = error_resp(4001, "User rejected the request.", None);
        assert!(matches!(
            RegistryError::from_transport(&err),
            RegistryError::UserRejected
        ));
    }

    #[test]
    fn custom_error_revert_is_decoded() {
        let data = IRevocationRegistryErrors::CallerNotTrustedIssuer(
            IRevocationRegistry::CallerNotTrustedIssuer {},
        )
        .abi_encode();
        let hex = alloy::hex::encode_prefixed(&data);
        let err = error_resp(3, "execution reverted", Some(&hex));

        match RegistryError::from_transport(&err) {
            RegistryError::Reverted { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("caller is not a trusted issuer"));
            }
            other => panic!("expected Reverted, got {other:?}"),
        }
    }

    #[test]
    fn ownable_revert_names_the_account() {
        let account = Address::repeat_byte(0xbb);
        let data: Bytes = IRevocationRegistry::OwnableUnauthorizedAccount { account }
            .abi_encode()
            .into();
        let reason = decode_revert_reason(&data).unwrap();
        assert!(reason.contains(&account.to_string()));
    }

    #[test]
    fn plain_revert_message_keeps_reason_verbatim() {
        let err = error_resp(-32000, "execution reverted: Issuer already exists", None);
        match RegistryError::from_transport(&err) {
            RegistryError::Reverted { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("Issuer already exists"));
            }
            other => panic!("expected Reverted, got {other:?}"),
        }
    }

    #[test]
    fn other_rpc_errors_are_network_errors() {
        let err = error_resp(-32005, "query returned more than 10000 results", None);
        let classified = RegistryError::from_transport(&err);
        assert!(matches!(classified, RegistryError::Network(_)));
        assert!(classified.is_retryable());
    }

    #[test]
    fn revert_without_reason_uses_fallback_message() {
        let err = RegistryError::Reverted {
            tx_hash: None,
            reason: None,
        };
        assert_eq!(err.to_string(), format!("transaction reverted: {GENERIC_REVERT}"));
        assert!(!err.is_retryable());
    }
}
