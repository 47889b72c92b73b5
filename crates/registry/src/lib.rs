//! Client library for the MyPersona issuer and revocation registries.
//!
//! Reads and writes both registries, rebuilds the trusted-issuer and
//! revoked-credential sets from their event logs, gates writes locally the way
//! the contracts do, and verifies wallet proof submissions.

pub mod bindings;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod log_reader;
pub mod projector;
pub mod provider;
pub mod types;
pub mod verification;

pub use config::{ConfigError, RegistryConfig};
pub use connection::ConnectionContext;
pub use dispatcher::{CommandDispatcher, CommandState, Confirmation, Projections};
pub use error::{RegistryError, RegistryResult};
pub use events::{EventKind, LedgerEvent, LedgerLog, LogPosition};
pub use guard::{Action, authorize};
pub use ledger::{LedgerClient, RegistryCall, RegistryReader, RegistryWriter, TxOutcome};
pub use log_reader::{Coverage, EventSource, FetchedLogs, HistoryWindow, LogQuery, LogReader};
pub use projector::{
    MemberInfo, ProjectedSet, Projection, ProjectionState, Projector, Reconciled,
    RevokedCredentials, SetDiff, TrustedIssuers, load_activity, recent_activity, replay,
};
pub use provider::{ProviderArgs, ProviderError, RetryConfig, ThrottleConfig};
pub use types::{Registry, RegistryAddresses, RegistryStatus};
pub use verification::{
    Credential, CredentialStatus, ProofSubmission, Requirements, VerificationError, VerificationOutcome,
    VerificationRequest, VerificationRequests, VerificationStatus, Verifier,
};
