//! Command-line front-ends over `mypersona-registry`: one command group per
//! role (admin, issuer, verifier, wallet) plus a `watch` loop.

pub mod app;
pub mod args;
mod commands;
pub mod output;
pub mod telemetry;

pub use app::App;
pub use args::{Cli, Command};
pub use commands::watch::watch_projections;

pub async fn run(cli: Cli) -> eyre::Result<()> {
    let app = App::from_cli(&cli)?;

    match cli.command {
        Command::Admin(command) => commands::admin::run(&app, command).await,
        Command::Issuer(command) => commands::issuer::run(&app, command).await,
        Command::Verifier(args) => commands::verifier::run(&app, args).await,
        Command::Wallet(command) => commands::wallet::run(&app, command).await,
        Command::Watch(args) => commands::watch::run(&app, args).await,
    }
}
