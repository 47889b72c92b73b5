use std::path::PathBuf;

use alloy::primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use mypersona_registry::{ProviderArgs, RegistryConfig, Requirements};

/// Admin, issuer, verifier and wallet tooling for the MyPersona registries.
#[derive(Debug, Parser)]
#[command(name = "mypersona", version, about)]
pub struct Cli {
    /// TOML file with `[registry]` and `[provider]` tables. Replaces the
    /// matching flags; the wallet key may still come from the environment.
    #[arg(long, global = true, env = "MYPERSONA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print JSON on stdout instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "JSON_LOGS")]
    pub json_logs: bool,

    #[command(flatten)]
    pub registry: RegistryConfig,

    #[command(flatten)]
    pub provider: ProviderArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// IssuerRegistry owner tools.
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Trusted-issuer tools over the RevocationRegistry.
    #[command(subcommand)]
    Issuer(IssuerCommand),
    /// Create verification requests and check proof submissions.
    Verifier(VerifierArgs),
    /// Holder side: answer verification requests.
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Follow both projected sets as new blocks arrive.
    Watch(WatchArgs),
}

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Owner, pause state and linkage of both registries.
    Status,
    /// The trusted-issuer set, replayed from events.
    Issuers {
        /// Re-check every projected issuer with `isTrustedIssuer`.
        #[arg(long)]
        reconcile: bool,
    },
    /// Recent IssuerRegistry events, newest first.
    Activity {
        #[arg(long)]
        limit: Option<usize>,
    },
    AddIssuer {
        address: Address,
    },
    RemoveIssuer {
        address: Address,
    },
    /// Pause the IssuerRegistry.
    Pause,
    /// Unpause the IssuerRegistry.
    Unpause,
    /// Hand the IssuerRegistry to a new owner.
    TransferOwnership {
        new_owner: Address,
    },
}

#[derive(Debug, Subcommand)]
pub enum IssuerCommand {
    /// Whether the connected account is trusted, plus registry status.
    Status,
    /// The revoked-credential set, replayed from events.
    Revoked {
        /// Re-check every projected nonce with `isRevoked`.
        #[arg(long)]
        reconcile: bool,
    },
    /// Recent RevocationRegistry events, newest first.
    Activity {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Revocation status of one credential.
    Check {
        nonce: U256,
    },
    Revoke {
        nonce: U256,
    },
    Unrevoke {
        nonce: U256,
    },
    /// Pause the RevocationRegistry.
    Pause,
    /// Unpause the RevocationRegistry.
    Unpause,
    /// Point the RevocationRegistry at another IssuerRegistry.
    SetIssuerRegistry {
        address: Address,
    },
    /// Hand the RevocationRegistry to a new owner.
    TransferOwnership {
        new_owner: Address,
    },
}

#[derive(Debug, Args)]
pub struct VerifierArgs {
    /// JSON file holding the verifier's request book.
    #[arg(long, env = "VERIFIER_BOOK", default_value = "verifier-requests.json")]
    pub book: PathBuf,

    #[command(subcommand)]
    pub command: VerifierCommand,
}

#[derive(Debug, Subcommand)]
pub enum VerifierCommand {
    /// Create a request and print its QR payload.
    Request(RequestArgs),
    /// Verify a wallet's proof submission against a request.
    Verify {
        /// The request payload.
        #[arg(long)]
        request: PathBuf,
        /// The wallet's proof submission.
        #[arg(long)]
        submission: PathBuf,
    },
    CheckIssuer {
        address: Address,
    },
    /// Revocation status of several credentials at once.
    CheckRevoked {
        #[arg(required = true, num_args = 1..)]
        nonces: Vec<U256>,
    },
    /// Requests in the book, newest first.
    List,
    /// Totals by status.
    Stats,
    Delete {
        request_id: String,
    },
    /// Empty the book.
    Clear,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// Name shown to the holder.
    #[arg(long, default_value = "MyPersona Verifier")]
    pub verifier: String,

    /// Also require the holder to be over 18.
    #[arg(long)]
    pub age_above_18: bool,

    #[arg(long)]
    pub skip_kyc: bool,

    /// Accept revoked credentials.
    #[arg(long)]
    pub skip_revocation: bool,

    /// Accept credentials from untrusted issuers.
    #[arg(long)]
    pub skip_issuer: bool,
}

impl RequestArgs {
    pub fn requirements(&self) -> Requirements {
        Requirements {
            kyc_verified: !self.skip_kyc,
            age_above_18: self.age_above_18,
            not_revoked: !self.skip_revocation,
            trusted_issuer: !self.skip_issuer,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum WalletCommand {
    /// Sign a proof submission for a verification request.
    Prove {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        credential: PathBuf,
        /// Write the submission here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Re-check held credentials: expiry, revocation and issuer trust.
    Check {
        /// A credential file (one credential or an array) or a directory of them.
        credentials: PathBuf,
        /// Keep credentials of other subjects instead of only the connected account's.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// How often to poll the head block (e.g. "15s", "1m").
    #[arg(long, env = "WATCH_INTERVAL", default_value = "15s")]
    pub interval: humantime::Duration,
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use clap::CommandFactory;
    use mypersona_registry::HistoryWindow;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn admin_add_issuer_parses_address() {
        let cli = Cli::try_parse_from([
            "mypersona",
            "admin",
            "add-issuer",
            "0x1111111111111111111111111111111111111111",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Admin(AdminCommand::AddIssuer { address: a })
                if a == address!("0x1111111111111111111111111111111111111111")
        ));
    }

    #[test]
    fn nonces_accept_decimal_and_hex() {
        let cli =
            Cli::try_parse_from(["mypersona", "verifier", "check-revoked", "42", "0x2a"]).unwrap();
        let Command::Verifier(VerifierArgs {
            command: VerifierCommand::CheckRevoked { nonces },
            ..
        }) = cli.command
        else {
            panic!("expected check-revoked");
        };
        assert_eq!(nonces, vec![U256::from(42), U256::from(42)]);
    }

    #[test]
    fn request_flags_map_to_requirements() {
        let cli = Cli::try_parse_from([
            "mypersona",
            "verifier",
            "request",
            "--age-above-18",
            "--skip-issuer",
        ])
        .unwrap();
        let Command::Verifier(VerifierArgs {
            command: VerifierCommand::Request(args),
            ..
        }) = cli.command
        else {
            panic!("expected request");
        };
        assert_eq!(
            args.requirements(),
            Requirements {
                kyc_verified: true,
                age_above_18: true,
                not_revoked: true,
                trusted_issuer: false,
            }
        );
    }

    #[test]
    fn from_block_flag_selects_authoritative_window() {
        let cli = Cli::try_parse_from([
            "mypersona",
            "--from-block",
            "1200",
            "--log-page-size",
            "2000",
            "issuer",
            "revoked",
        ])
        .unwrap();
        assert_eq!(cli.registry.history_window(), HistoryWindow::FromBlock(1200));
        assert_eq!(cli.registry.log_page_size, 2000);
    }

    #[test]
    fn wallet_check_takes_a_credential_path() {
        let cli = Cli::try_parse_from(["mypersona", "wallet", "check", "creds/", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Wallet(WalletCommand::Check { credentials, all: true })
                if credentials == PathBuf::from("creds/")
        ));
    }

    #[test]
    fn missing_nonce_is_an_error() {
        assert!(Cli::try_parse_from(["mypersona", "issuer", "revoke"]).is_err());
        assert!(Cli::try_parse_from(["mypersona", "issuer", "revoke", "not-a-number"]).is_err());
    }
}
