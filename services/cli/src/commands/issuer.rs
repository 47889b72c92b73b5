use alloy::primitives::Address;
use mypersona_registry::{Action, Registry, RegistryReader as _};
use serde::Serialize;

use crate::{App, args::IssuerCommand, output};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuerStatus {
    account: Option<Address>,
    trusted: Option<bool>,
    revocation_paused: bool,
    linked_issuer_registry: Address,
}

pub async fn run(app: &App, command: IssuerCommand) -> eyre::Result<()> {
    match command {
        IssuerCommand::Status => {
            let status = app.status().await?;
            let account = app.client().context().account();
            let trusted = match account {
                Some(account) => Some(app.client().is_trusted_issuer(account).await?),
                None => None,
            };
            let summary = IssuerStatus {
                account,
                trusted,
                revocation_paused: status.revocation_paused,
                linked_issuer_registry: status.linked_issuer_registry,
            };
            app.output().emit(&summary, || {
                let who = match (account, trusted) {
                    (Some(account), Some(true)) => format!("{account} is a trusted issuer"),
                    (Some(account), _) => format!("{account} is NOT a trusted issuer"),
                    (None, _) => "no wallet connected".to_string(),
                };
                format!("{who}\n{}", output::status(&status))
            })
        }
        IssuerCommand::Revoked { reconcile } => {
            let projections = app.projections();
            let set = app.projected(&projections.revoked, reconcile).await?;
            app.output()
                .emit(&*set, || output::members(&set, "revoked credential"))
        }
        IssuerCommand::Activity { limit } => {
            let logs = app.activity(Registry::Revocation, limit).await?;
            app.output().emit(&logs, || output::activity(&logs))
        }
        IssuerCommand::Check { nonce } => {
            let revoked = app.client().is_revoked(nonce).await?;
            app.output()
                .emit(&serde_json::json!({ "nonce": nonce, "revoked": revoked }), || {
                    let state = if revoked { "REVOKED" } else { "valid" };
                    format!("credential {nonce}: {state}")
                })
        }
        IssuerCommand::Revoke { nonce } => app.submit(Action::RevokeCredential(nonce)).await,
        IssuerCommand::Unrevoke { nonce } => app.submit(Action::UnRevokeCredential(nonce)).await,
        IssuerCommand::Pause => app.submit(Action::Pause(Registry::Revocation)).await,
        IssuerCommand::Unpause => app.submit(Action::Unpause(Registry::Revocation)).await,
        IssuerCommand::SetIssuerRegistry { address } => {
            app.submit(Action::SetIssuerRegistry(address)).await
        }
        IssuerCommand::TransferOwnership { new_owner } => {
            app.submit(Action::TransferOwnership(Registry::Revocation, new_owner))
                .await
        }
    }
}
