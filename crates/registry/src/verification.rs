//! Verification requests, wallet-side proof submissions and the verifier that
//! checks them against live registry state.
//!
//! The "proof" is a personal-message signature over the disclosed fields, not a
//! zero-knowledge proof.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use alloy::primitives::{Address, Bytes, Signature, U256};
use futures::future::try_join_all;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    connection::ConnectionContext,
    error::{RegistryError, RegistryResult},
    ledger::RegistryReader,
};

/// `type` tag of a verification request payload.
pub const REQUEST_TYPE: &str = "MYPERSONA_VERIFY";
/// `proof.type` of a submission.
pub const PROOF_TYPE: &str = "zkSNARK";

const REQUEST_ID_SUFFIX_LEN: usize = 6;
const REQUEST_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("unknown verification request: {0}")]
    UnknownRequest(String),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported payload type: {0}")]
    UnsupportedType(String),
    #[error("credential {id} expired at {expires_at}")]
    CredentialExpired { id: String, expires_at: u64 },
    #[error("credential {id} belongs to {subject}, not {account}")]
    SubjectMismatch {
        id: String,
        subject: Address,
        account: Address,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

/// What a verifier asks the holder to prove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    #[serde(default)]
    pub kyc_verified: bool,
    #[serde(default)]
    pub age_above_18: bool,
    #[serde(default)]
    pub not_revoked: bool,
    #[serde(default)]
    pub trusted_issuer: bool,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            kyc_verified: true,
            age_above_18: false,
            not_revoked: true,
            trusted_issuer: true,
        }
    }
}

/// The QR payload a verifier hands to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub requirements: Requirements,
    pub verifier: String,
}

impl VerificationRequest {
    pub fn new(verifier: impl Into<String>, requirements: Requirements) -> Self {
        let created_at = now_ms();
        Self {
            kind: REQUEST_TYPE.to_string(),
            request_id: new_request_id(created_at),
            created_at,
            requirements,
            verifier: verifier.into(),
        }
    }

    /// Parses a scanned payload, rejecting anything that is not a verification request.
    pub fn parse(payload: &str) -> VerificationResult<Self> {
        let request: Self = serde_json::from_str(payload)?;
        if request.kind != REQUEST_TYPE {
            return Err(VerificationError::UnsupportedType(request.kind));
        }
        Ok(request)
    }

    pub fn to_payload(&self) -> String {
        // A struct of strings, integers and bools always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `VR-<epoch ms>-<6 uppercase alphanumerics>`.
fn new_request_id(created_at: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..REQUEST_ID_SUFFIX_LEN)
        .map(|_| REQUEST_ID_ALPHABET[rng.gen_range(0..REQUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("VR-{created_at}-{suffix}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

/// A request in the verifier's book, with its latest outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    #[serde(flatten)]
    pub request: VerificationRequest,
    pub status: VerificationStatus,
    #[serde(default)]
    pub response: Option<VerificationOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
    pub pending: usize,
}

/// The verifier's requests, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationRequests {
    records: Vec<RequestRecord>,
}

impl VerificationRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, verifier: &str, requirements: Requirements) -> VerificationRequest {
        let request = VerificationRequest::new(verifier, requirements);
        self.records.insert(
            0,
            RequestRecord {
                request: request.clone(),
                status: VerificationStatus::Pending,
                response: None,
            },
        );
        request
    }

    pub fn get(&self, request_id: &str) -> Option<&RequestRecord> {
        self.records
            .iter()
            .find(|record| record.request.request_id == request_id)
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn update_status(
        &mut self,
        request_id: &str,
        status: VerificationStatus,
    ) -> VerificationResult<()> {
        self.record_mut(request_id)?.status = status;
        Ok(())
    }

    /// Stores a verifier outcome and moves the request to its status.
    pub fn record_outcome(&mut self, outcome: VerificationOutcome) -> VerificationResult<()> {
        let record = self.record_mut(&outcome.request_id)?;
        record.status = outcome.status;
        record.response = Some(outcome);
        Ok(())
    }

    pub fn delete(&mut self, request_id: &str) -> bool {
        let before = self.records.len();
        self.records
            .retain(|record| record.request.request_id != request_id);
        self.records.len() != before
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn stats(&self) -> RequestStats {
        self.records
            .iter()
            .fold(RequestStats::default(), |mut stats, record| {
                stats.total += 1;
                match record.status {
                    VerificationStatus::Pending => stats.pending += 1,
                    VerificationStatus::Verified => stats.verified += 1,
                    VerificationStatus::Failed => stats.failed += 1,
                }
                stats
            })
    }

    fn record_mut(&mut self, request_id: &str) -> VerificationResult<&mut RequestRecord> {
        self.records
            .iter_mut()
            .find(|record| record.request.request_id == request_id)
            .ok_or_else(|| VerificationError::UnknownRequest(request_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub kyc_verified: bool,
    pub age_above_18: bool,
    pub nationality: String,
    pub risk_level: String,
}

/// A KYC credential held by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub nonce: U256,
    #[serde(rename = "type", default = "default_credential_type")]
    pub kind: String,
    pub issuer: Address,
    pub subject: Address,
    /// Epoch milliseconds.
    pub issued_at: u64,
    /// Epoch milliseconds.
    pub expires_at: u64,
    pub claims: Claims,
}

fn default_credential_type() -> String {
    "KYCCredential".to_string()
}

impl Credential {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at < now_ms
    }
}

/// A held credential with its live ledger status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    pub nonce: U256,
    pub issuer: Address,
    pub expired: bool,
    pub revoked: bool,
    pub issuer_trusted: bool,
}

impl CredentialStatus {
    /// Neither expired nor revoked.
    pub fn is_valid(&self) -> bool {
        !self.expired && !self.revoked
    }
}

/// The credentials whose subject is `account`.
pub fn held_by(credentials: Vec<Credential>, account: Address) -> Vec<Credential> {
    credentials
        .into_iter()
        .filter(|credential| credential.subject == account)
        .collect()
}

/// Re-checks a wallet's credentials: revocation in one concurrent batch, issuer
/// trust once per distinct issuer. Statuses come back in input order.
#[instrument(level = "debug", skip_all, fields(count = credentials.len()))]
pub async fn check_credentials(
    reader: &dyn RegistryReader,
    credentials: &[Credential],
    now_ms: u64,
) -> RegistryResult<Vec<CredentialStatus>> {
    let nonces: Vec<U256> = credentials.iter().map(|credential| credential.nonce).collect();
    let issuers: BTreeSet<Address> = credentials.iter().map(|credential| credential.issuer).collect();

    let (revocations, trust) = tokio::try_join!(
        batch_check_revocations(reader, &nonces),
        try_join_all(issuers.into_iter().map(|issuer| async move {
            reader
                .is_trusted_issuer(issuer)
                .await
                .map(|trusted| (issuer, trusted))
        })),
    )?;
    let trust: BTreeMap<Address, bool> = trust.into_iter().collect();

    Ok(credentials
        .iter()
        .zip(revocations)
        .map(|(credential, (_, revoked))| CredentialStatus {
            id: credential.id.clone(),
            nonce: credential.nonce,
            issuer: credential.issuer,
            expired: credential.is_expired_at(now_ms),
            revoked,
            issuer_trusted: trust.get(&credential.issuer).copied().unwrap_or(false),
        })
        .collect())
}

/// The fields a holder signs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    credential_id: &'a str,
    credential_nonce: U256,
    requirements: &'a Requirements,
    timestamp: u64,
    issuer: Address,
    subject: Address,
    claims: &'a Claims,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockProof {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub proof_value: String,
}

/// A wallet's answer to a verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofSubmission {
    pub credential_id: String,
    pub credential_nonce: U256,
    pub requirements: Requirements,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub issuer: Address,
    pub subject: Address,
    pub claims: Claims,
    pub signature: Bytes,
    pub proof: MockProof,
}

impl ProofSubmission {
    /// Signs the credential's disclosure for `requirements` with the connected signer.
    #[instrument(level = "debug", skip_all, fields(credential = %credential.id))]
    pub async fn create(
        context: &ConnectionContext,
        credential: &Credential,
        requirements: Requirements,
    ) -> VerificationResult<Self> {
        let account = context.account().ok_or(RegistryError::Unauthenticated)?;
        if credential.subject != account {
            return Err(VerificationError::SubjectMismatch {
                id: credential.id.clone(),
                subject: credential.subject,
                account,
            });
        }
        let timestamp = now_ms();
        if credential.is_expired_at(timestamp) {
            return Err(VerificationError::CredentialExpired {
                id: credential.id.clone(),
                expires_at: credential.expires_at,
            });
        }

        let mut submission = Self {
            credential_id: credential.id.clone(),
            credential_nonce: credential.nonce,
            requirements,
            timestamp,
            issuer: credential.issuer,
            subject: credential.subject,
            claims: credential.claims.clone(),
            signature: Bytes::new(),
            proof: MockProof {
                kind: PROOF_TYPE.to_string(),
                created: OffsetDateTime::now_utc(),
                proof_value: String::new(),
            },
        };

        let signature = context.sign_message(&submission.signed_message()?).await?;
        submission.signature = Bytes::from(signature.as_bytes().to_vec());
        submission.proof.proof_value = alloy::hex::encode_prefixed(&submission.signature)
            .chars()
            .take(66)
            .collect();
        Ok(submission)
    }

    /// The exact bytes the holder signed.
    pub fn signed_message(&self) -> VerificationResult<Vec<u8>> {
        Ok(serde_json::to_vec(&SignedFields {
            credential_id: &self.credential_id,
            credential_nonce: self.credential_nonce,
            requirements: &self.requirements,
            timestamp: self.timestamp,
            issuer: self.issuer,
            subject: self.subject,
            claims: &self.claims,
        })?)
    }

    /// The address that produced the signature, if it is well formed.
    pub fn signer(&self) -> Option<Address> {
        let signature = Signature::try_from(self.signature.as_ref()).ok()?;
        let message = self.signed_message().ok()?;
        signature.recover_address_from_msg(&message).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Check {
    Signature,
    /// The submission answers this request: same requirements, signed after
    /// the request was created.
    Binding,
    KycVerified,
    AgeAbove18,
    NotRevoked,
    TrustedIssuer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub check: Check,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn pass(check: Check) -> Self {
        Self {
            check,
            passed: true,
            detail: None,
        }
    }

    fn fail(check: Check, detail: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            detail: Some(detail.into()),
        }
    }

    fn from_bool(check: Check, passed: bool, detail: impl FnOnce() -> String) -> Self {
        if passed {
            Self::pass(check)
        } else {
            Self::fail(check, detail())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub request_id: String,
    pub status: VerificationStatus,
    pub checks: Vec<CheckResult>,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

fn binding(request: &VerificationRequest, submission: &ProofSubmission) -> CheckResult {
    if submission.requirements != request.requirements {
        return CheckResult::fail(
            Check::Binding,
            "submission was made for different requirements",
        );
    }
    if submission.timestamp < request.created_at {
        return CheckResult::fail(
            Check::Binding,
            format!(
                "submission signed at {} predates the request ({})",
                submission.timestamp, request.created_at
            ),
        );
    }
    CheckResult::pass(Check::Binding)
}

/// Checks submissions against the registries' point-queries.
#[derive(Clone)]
pub struct Verifier {
    reader: Arc<dyn RegistryReader>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier").finish_non_exhaustive()
    }
}

impl Verifier {
    pub fn new(reader: Arc<dyn RegistryReader>) -> Self {
        Self { reader }
    }

    /// Evaluates every requirement of `request`. Registry read failures are
    /// returned as errors, never counted as a pass.
    #[instrument(level = "info", skip_all, fields(request = %request.request_id, credential = %submission.credential_id))]
    pub async fn verify(
        &self,
        request: &VerificationRequest,
        submission: &ProofSubmission,
    ) -> VerificationResult<VerificationOutcome> {
        let wanted = request.requirements;
        let mut checks = Vec::with_capacity(6);

        checks.push(match submission.signer() {
            Some(signer) if signer == submission.subject => CheckResult::pass(Check::Signature),
            Some(signer) => CheckResult::fail(
                Check::Signature,
                format!("signed by {signer}, expected {}", submission.subject),
            ),
            None => CheckResult::fail(Check::Signature, "signature does not recover"),
        });
        checks.push(binding(request, submission));

        if wanted.kyc_verified {
            checks.push(CheckResult::from_bool(
                Check::KycVerified,
                submission.claims.kyc_verified,
                || "credential does not attest KYC".to_string(),
            ));
        }
        if wanted.age_above_18 {
            checks.push(CheckResult::from_bool(
                Check::AgeAbove18,
                submission.claims.age_above_18,
                || "credential does not attest age above 18".to_string(),
            ));
        }
        if wanted.not_revoked {
            let revoked = self.reader.is_revoked(submission.credential_nonce).await?;
            checks.push(CheckResult::from_bool(Check::NotRevoked, !revoked, || {
                format!("credential nonce {} is revoked", submission.credential_nonce)
            }));
        }
        if wanted.trusted_issuer {
            let trusted = self.reader.is_trusted_issuer(submission.issuer).await?;
            checks.push(CheckResult::from_bool(Check::TrustedIssuer, trusted, || {
                format!("issuer {} is not trusted", submission.issuer)
            }));
        }

        let status = if checks.iter().all(|check| check.passed) {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };
        tracing::info!(?status, "verification evaluated");

        Ok(VerificationOutcome {
            request_id: request.request_id.clone(),
            status,
            checks,
        })
    }

    /// Revocation status of many credentials, queried concurrently.
    pub async fn batch_check_revocations(&self, nonces: &[U256]) -> RegistryResult<Vec<(U256, bool)>> {
        batch_check_revocations(self.reader.as_ref(), nonces).await
    }
}

/// Revocation status of many credentials, queried concurrently, in input order.
pub async fn batch_check_revocations(
    reader: &dyn RegistryReader,
    nonces: &[U256],
) -> RegistryResult<Vec<(U256, bool)>> {
    try_join_all(nonces.iter().map(|&nonce| async move {
        reader.is_revoked(nonce).await.map(|revoked| (nonce, revoked))
    }))
    .await
}
