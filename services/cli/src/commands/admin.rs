use mypersona_registry::{Action, Registry};

use crate::{App, args::AdminCommand, output};

pub async fn run(app: &App, command: AdminCommand) -> eyre::Result<()> {
    match command {
        AdminCommand::Status => {
            let status = app.status().await?;
            app.output().emit(&status, || output::status(&status))
        }
        AdminCommand::Issuers { reconcile } => {
            let projections = app.projections();
            let set = app.projected(&projections.issuers, reconcile).await?;
            app.output()
                .emit(&*set, || output::members(&set, "trusted issuer"))
        }
        AdminCommand::Activity { limit } => {
            let logs = app.activity(Registry::Issuer, limit).await?;
            app.output().emit(&logs, || output::activity(&logs))
        }
        AdminCommand::AddIssuer { address } => app.submit(Action::AddIssuer(address)).await,
        AdminCommand::RemoveIssuer { address } => app.submit(Action::RemoveIssuer(address)).await,
        AdminCommand::Pause => app.submit(Action::Pause(Registry::Issuer)).await,
        AdminCommand::Unpause => app.submit(Action::Unpause(Registry::Issuer)).await,
        AdminCommand::TransferOwnership { new_owner } => {
            app.submit(Action::TransferOwnership(Registry::Issuer, new_owner))
                .await
        }
    }
}
