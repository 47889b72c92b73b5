use std::sync::Arc;

use eyre::WrapErr as _;
use mypersona_registry::{
    Action, CommandDispatcher, EventSource, LedgerClient, LedgerLog, LogReader, ProjectedSet,
    Projection, Projections, Projector, ProviderArgs, Registry, RegistryConfig, RegistryReader,
    RegistryStatus, RevokedCredentials, TrustedIssuers, load_activity,
};

use crate::{args::Cli, output::Output};

/// Everything a command needs: resolved config, the ledger client and the log source.
#[derive(Debug)]
pub struct App {
    config: RegistryConfig,
    client: LedgerClient,
    source: Arc<LogReader>,
    output: Output,
}

impl App {
    pub fn from_cli(cli: &Cli) -> eyre::Result<Self> {
        let (config, provider) = match &cli.config {
            Some(path) => {
                let config = RegistryConfig::from_file(path)
                    .wrap_err_with(|| format!("loading [registry] from {}", path.display()))?;
                let mut provider = ProviderArgs::from_file(path)
                    .wrap_err_with(|| format!("loading [provider] from {}", path.display()))?;
                if provider.wallet_private_key.is_none() {
                    provider.wallet_private_key = cli.provider.wallet_private_key.clone();
                }
                (config, provider)
            }
            None => {
                cli.registry.validate()?;
                (cli.registry.clone(), cli.provider.clone())
            }
        };

        let context = provider.connect().wrap_err("failed to set up RPC provider")?;
        let addresses = config.addresses();
        let source = LogReader::new(context.read_provider().clone(), addresses)
            .with_page_size(config.log_page_size);

        tracing::debug!(
            issuer_registry = %addresses.issuer_registry,
            revocation_registry = %addresses.revocation_registry,
            account = ?context.account(),
            window = ?config.history_window(),
            "cli configured"
        );

        Ok(Self {
            client: LedgerClient::new(context, addresses),
            source: Arc::new(source),
            config,
            output: Output::new(cli.json),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn client(&self) -> &LedgerClient {
        &self.client
    }

    pub fn output(&self) -> Output {
        self.output
    }

    pub fn source(&self) -> Arc<dyn EventSource> {
        self.source.clone()
    }

    pub fn projections(&self) -> Projections {
        let window = self.config.history_window();
        Projections {
            issuers: Arc::new(Projector::new(TrustedIssuers, self.source(), window)),
            revoked: Arc::new(Projector::new(RevokedCredentials, self.source(), window)),
        }
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        let client = Arc::new(self.client.clone());
        CommandDispatcher::new(client.clone(), client, self.projections())
            .with_confirmation_timeout(self.config.confirmation_timeout())
    }

    /// Fresh registry status, warning when the registries are not wired together.
    pub async fn status(&self) -> eyre::Result<RegistryStatus> {
        let status = self
            .client
            .status()
            .await
            .wrap_err("failed to read registry status")?;
        if !status.is_linked(&self.config.addresses()) {
            tracing::warn!(
                linked = %status.linked_issuer_registry,
                configured = %self.config.issuer_registry,
                "revocation registry trusts a different issuer registry"
            );
        }
        Ok(status)
    }

    /// Replays one projected set, optionally re-checking members with point-queries.
    pub async fn projected<P: Projection>(
        &self,
        projector: &Projector<P>,
        reconcile: bool,
    ) -> eyre::Result<Arc<ProjectedSet<P::Key>>> {
        let registry = projector.projection().registry();
        let set = if reconcile {
            let reconciled = projector
                .reconcile(&self.client)
                .await
                .wrap_err_with(|| format!("failed to reconcile {registry} projection"))?;
            for key in &reconciled.dropped {
                tracing::warn!(%registry, member = %key, "dropped member the ledger no longer confirms");
            }
            reconciled.set
        } else {
            projector
                .refresh()
                .await
                .wrap_err_with(|| format!("failed to replay {registry} events"))?
        };

        let coverage = set.coverage();
        if !coverage.complete {
            tracing::warn!(
                from = coverage.from,
                to = coverage.to,
                "history window is truncated, older members are missing; pass --from-block"
            );
        }
        Ok(set)
    }

    pub async fn activity(
        &self,
        registry: Registry,
        limit: Option<usize>,
    ) -> eyre::Result<Vec<LedgerLog>> {
        load_activity(
            self.source.as_ref(),
            registry,
            self.config.history_window(),
            limit.unwrap_or(self.config.activity_limit),
        )
        .await
        .wrap_err_with(|| format!("failed to load {registry} activity"))
    }

    /// Guards, sends and confirms one action, then prints the confirmation.
    pub async fn submit(&self, action: Action) -> eyre::Result<()> {
        let dispatcher = self.dispatcher();
        tracing::info!(%action, account = ?dispatcher.account(), "submitting");

        let confirmation = dispatcher
            .submit(action)
            .await
            .wrap_err_with(|| format!("{action} failed"))?;

        self.output.emit(&confirmation, || {
            format!(
                "{action} confirmed in block {} (tx {})",
                confirmation.block_number, confirmation.tx_hash
            )
        })
    }
}
