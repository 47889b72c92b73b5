use std::path::{Path, PathBuf};

use eyre::WrapErr as _;
use mypersona_registry::{
    Credential, CredentialStatus, ProofSubmission, VerificationRequest,
    verification::{check_credentials, held_by, now_ms},
};
use serde::Deserialize;

use super::verifier::read;
use crate::{App, args::WalletCommand};

pub async fn run(app: &App, command: WalletCommand) -> eyre::Result<()> {
    match command {
        WalletCommand::Prove {
            request,
            credential,
            out,
        } => {
            let request = VerificationRequest::parse(&read(&request)?)?;
            let credential: Credential = serde_json::from_str(&read(&credential)?)
                .wrap_err("malformed credential")?;
            tracing::info!(
                request = %request.request_id,
                verifier = %request.verifier,
                credential = %credential.id,
                "answering verification request"
            );

            let submission =
                ProofSubmission::create(app.client().context(), &credential, request.requirements)
                    .await?;
            let encoded = serde_json::to_string_pretty(&submission)?;
            match out {
                Some(path) => std::fs::write(&path, encoded)
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?,
                None => println!("{encoded}"),
            }
            Ok(())
        }
        WalletCommand::Check { credentials, all } => {
            let mut held = load_credentials(&credentials)?;
            if !all {
                let Some(account) = app.client().context().account() else {
                    eyre::bail!("no wallet connected; set WALLET_PRIVATE_KEY or pass --all");
                };
                held = held_by(held, account);
                tracing::debug!(%account, count = held.len(), "credentials held by account");
            }

            let statuses = check_credentials(app.client(), &held, now_ms())
                .await
                .wrap_err("failed to check credentials against the registries")?;
            app.output().emit(&statuses, || describe(&statuses))
        }
    }
}

fn describe(statuses: &[CredentialStatus]) -> String {
    if statuses.is_empty() {
        return "no credentials".to_string();
    }
    let valid = statuses.iter().filter(|status| status.is_valid()).count();
    let mut lines = vec![format!("{valid} of {} credential(s) valid", statuses.len())];
    for status in statuses {
        let verdict = if status.is_valid() { "valid" } else { "NOT valid" };
        lines.push(format!(
            "  {}  nonce {}  {verdict} (expired: {}, revoked: {}, issuer trusted: {})",
            status.id, status.nonce, status.expired, status.revoked, status.issuer_trusted
        ));
    }
    lines.join("\n")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialFile {
    Many(Vec<Credential>),
    One(Box<Credential>),
}

/// Reads one credential file, or every `.json` file of a directory in name order.
fn load_credentials(path: &Path) -> eyre::Result<Vec<Credential>> {
    let files = if path.is_dir() {
        let mut files = std::fs::read_dir(path)
            .wrap_err_with(|| format!("failed to list {}", path.display()))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<PathBuf>, _>>()
            .wrap_err_with(|| format!("failed to list {}", path.display()))?;
        files.retain(|file| file.extension().is_some_and(|ext| ext == "json"));
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut credentials = Vec::new();
    for file in files {
        let parsed: CredentialFile = serde_json::from_str(&read(&file)?)
            .wrap_err_with(|| format!("malformed credential file {}", file.display()))?;
        match parsed {
            CredentialFile::Many(many) => credentials.extend(many),
            CredentialFile::One(one) => credentials.push(*one),
        }
    }
    Ok(credentials)
}
