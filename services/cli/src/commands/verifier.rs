use std::{io::ErrorKind, path::Path, sync::Arc};

use eyre::WrapErr as _;
use mypersona_registry::{
    ProofSubmission, RegistryReader as _, VerificationOutcome, VerificationRequest,
    VerificationRequests, Verifier, verification::batch_check_revocations,
};
use serde::Serialize;

use crate::{
    App,
    args::{VerifierArgs, VerifierCommand},
};

pub async fn run(app: &App, args: VerifierArgs) -> eyre::Result<()> {
    let book_path = args.book.as_path();

    match args.command {
        VerifierCommand::Request(request) => {
            let mut book = load_book(book_path)?;
            let created = book.create(&request.verifier, request.requirements());
            save_book(book_path, &book)?;
            tracing::info!(request = %created.request_id, "verification request created");
            // The payload is what the holder scans, so it is printed as-is.
            println!("{}", created.to_payload());
            Ok(())
        }
        VerifierCommand::Verify {
            request,
            submission,
        } => {
            let request = VerificationRequest::parse(&read(&request)?)?;
            let submission: ProofSubmission = serde_json::from_str(&read(&submission)?)
                .wrap_err("malformed proof submission")?;

            let verifier = Verifier::new(Arc::new(app.client().clone()));
            let outcome = verifier.verify(&request, &submission).await?;

            let mut book = load_book(book_path)?;
            match book.record_outcome(outcome.clone()) {
                Ok(()) => save_book(book_path, &book)?,
                Err(err) => tracing::debug!(%err, "request not in this book, outcome not stored"),
            }
            app.output().emit(&outcome, || describe_outcome(&outcome))
        }
        VerifierCommand::CheckIssuer { address } => {
            let trusted = app.client().is_trusted_issuer(address).await?;
            app.output()
                .emit(&serde_json::json!({ "issuer": address, "trusted": trusted }), || {
                    let state = if trusted { "trusted" } else { "NOT trusted" };
                    format!("{address}: {state}")
                })
        }
        VerifierCommand::CheckRevoked { nonces } => {
            let statuses = batch_check_revocations(app.client(), &nonces).await?;
            let rows: Vec<_> = statuses
                .iter()
                .map(|(nonce, revoked)| RevocationRow {
                    nonce: *nonce,
                    revoked: *revoked,
                })
                .collect();
            app.output().emit(&rows, || {
                rows.iter()
                    .map(|row| {
                        let state = if row.revoked { "REVOKED" } else { "valid" };
                        format!("{}: {state}", row.nonce)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        VerifierCommand::List => {
            let book = load_book(book_path)?;
            app.output().emit(&book, || {
                if book.records().is_empty() {
                    return "no requests".to_string();
                }
                book.records()
                    .iter()
                    .map(|record| {
                        format!(
                            "{}  {:?}  {}",
                            record.request.request_id, record.status, record.request.verifier
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        VerifierCommand::Stats => {
            let stats = load_book(book_path)?.stats();
            app.output().emit(&stats, || {
                format!(
                    "total {}  verified {}  failed {}  pending {}",
                    stats.total, stats.verified, stats.failed, stats.pending
                )
            })
        }
        VerifierCommand::Delete { request_id } => {
            let mut book = load_book(book_path)?;
            if !book.delete(&request_id) {
                eyre::bail!("no request {request_id} in {}", book_path.display());
            }
            save_book(book_path, &book)
        }
        VerifierCommand::Clear => {
            let mut book = load_book(book_path)?;
            book.clear();
            save_book(book_path, &book)
        }
    }
}

#[derive(Debug, Serialize)]
struct RevocationRow {
    nonce: alloy::primitives::U256,
    revoked: bool,
}

fn describe_outcome(outcome: &VerificationOutcome) -> String {
    let mut lines = vec![format!("{}: {:?}", outcome.request_id, outcome.status)];
    for check in &outcome.checks {
        let mark = if check.passed { "pass" } else { "FAIL" };
        match &check.detail {
            Some(detail) => lines.push(format!("  {mark}  {:?}  {detail}", check.check)),
            None => lines.push(format!("  {mark}  {:?}", check.check)),
        }
    }
    lines.join("\n")
}

pub(crate) fn read(path: &Path) -> eyre::Result<String> {
    std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))
}

/// A missing book is an empty one.
fn load_book(path: &Path) -> eyre::Result<VerificationRequests> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .wrap_err_with(|| format!("malformed request book {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(VerificationRequests::new()),
        Err(err) => Err(err).wrap_err_with(|| format!("failed to read {}", path.display())),
    }
}

fn save_book(path: &Path, book: &VerificationRequests) -> eyre::Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(book)?)
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}
