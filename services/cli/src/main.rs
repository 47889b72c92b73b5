use clap::Parser;
use mypersona_cli::{Cli, telemetry};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    if let Err(error) = mypersona_cli::run(cli).await {
        tracing::error!(error = ?error, "command failed");
        return Err(error);
    }

    Ok(())
}
