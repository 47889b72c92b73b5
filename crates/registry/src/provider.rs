//! RPC connection setup: fallback across endpoints, bounded retries and an
//! optional client-side rate limit.

use std::{
    future::Future,
    num::{NonZeroU32, NonZeroUsize},
    path::Path,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use alloy::{
    providers::{DynProvider, Provider as _, ProviderBuilder},
    rpc::{
        client::RpcClient,
        json_rpc::{RequestPacket, ResponsePacket, RpcError},
    },
    transports::{
        TransportError, TransportErrorKind,
        http::{Http, reqwest},
        layers::{FallbackLayer, RateLimitRetryPolicy, RetryPolicy},
    },
};
use backon::{ExponentialBuilder, Retryable as _};
use clap::Args;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;
use thiserror::Error;
use tower::{Layer, Service, ServiceBuilder};
use url::Url;

use crate::{
    connection::ConnectionContext,
    error::RegistryError,
};

/// Public Polygon Amoy endpoint.
pub const AMOY_RPC_URL: &str = "https://rpc-amoy.polygon.technology";

mod defaults {
    pub const MAX_RETRIES: u32 = 5;
    pub const INITIAL_BACKOFF_MS: u64 = 500;
    pub const MAX_BACKOFF_MS: u64 = 30_000;
    pub const TIMEOUT_SECS: u64 = 15;
    pub const REQUESTS_PER_SECOND: u32 = 25;
    pub const BURST_SIZE: u32 = 5;

    pub const fn max_retries() -> u32 {
        MAX_RETRIES
    }
    pub const fn initial_backoff_ms() -> u64 {
        INITIAL_BACKOFF_MS
    }
    pub const fn max_backoff_ms() -> u64 {
        MAX_BACKOFF_MS
    }
    pub const fn timeout_secs() -> u64 {
        TIMEOUT_SECS
    }
    pub const fn requests_per_second() -> u32 {
        REQUESTS_PER_SECOND
    }
    pub const fn burst_size() -> u32 {
        BURST_SIZE
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no RPC URLs configured")]
    NoHttpUrls,
    #[error("invalid RPC URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("requests_per_second must be at least 1")]
    ZeroRate,
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Signer(#[from] RegistryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Args, Deserialize)]
pub struct RetryConfig {
    /// Retries per failed RPC request. 0 disables retrying.
    #[arg(long = "rpc-max-retries", default_value_t = defaults::MAX_RETRIES, env = "RPC_MAX_RETRIES")]
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long = "rpc-initial-backoff-ms", default_value_t = defaults::INITIAL_BACKOFF_MS, env = "RPC_INITIAL_BACKOFF_MS")]
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the exponential backoff, in milliseconds.
    #[arg(long = "rpc-max-backoff-ms", default_value_t = defaults::MAX_BACKOFF_MS, env = "RPC_MAX_BACKOFF_MS")]
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-request HTTP timeout, in seconds.
    #[arg(long = "rpc-timeout-secs", default_value_t = defaults::TIMEOUT_SECS, env = "RPC_TIMEOUT_SECS")]
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            timeout_secs: defaults::TIMEOUT_SECS,
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_max_times(self.max_retries as usize)
            .with_jitter()
    }
}

/// Client-side rate limit, for public endpoints that throttle aggressively.
#[derive(Debug, Clone, PartialEq, Eq, Args, Deserialize)]
pub struct ThrottleConfig {
    #[arg(long = "rpc-rps", default_value_t = defaults::REQUESTS_PER_SECOND, env = "RPC_REQUESTS_PER_SECOND")]
    #[serde(default = "defaults::requests_per_second")]
    pub requests_per_second: u32,

    #[arg(long = "rpc-burst", default_value_t = defaults::BURST_SIZE, env = "RPC_BURST_SIZE")]
    #[serde(default = "defaults::burst_size")]
    pub burst_size: u32,
}

/// RPC endpoints and the optional wallet key.
#[derive(Debug, Clone, Default, Args, Deserialize)]
#[command(next_help_heading = "RPC Configuration")]
pub struct ProviderArgs {
    /// HTTP RPC endpoints, queried with fallback.
    #[arg(long = "rpc-url", value_delimiter = ',', env = "RPC_URL", default_value = AMOY_RPC_URL)]
    #[serde(default)]
    pub http: Option<Vec<Url>>,

    /// Hex private key of the account that signs transactions.
    #[arg(long, env = "WALLET_PRIVATE_KEY", hide_env_values = true)]
    #[serde(default)]
    pub wallet_private_key: Option<String>,

    #[command(flatten)]
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[command(flatten)]
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,
}

impl ProviderArgs {
    /// Loads the `[provider]` table of a TOML file, or the whole file if there is none.
    pub fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        Ok(settings
            .get::<Self>("provider")
            .or_else(|_| settings.try_deserialize::<Self>())?)
    }

    pub fn with_http_urls<S: AsRef<str>>(
        mut self,
        urls: impl IntoIterator<Item = S>,
    ) -> ProviderResult<Self> {
        let parsed = urls
            .into_iter()
            .map(|url| Url::parse(url.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.http.get_or_insert_with(Vec::new).extend(parsed);
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_wallet_private_key(mut self, key: impl Into<String>) -> Self {
        self.wallet_private_key = Some(key.into());
        self
    }

    fn urls(&self) -> ProviderResult<Vec<Url>> {
        let urls = match &self.http {
            Some(urls) => urls.clone(),
            None => vec![Url::parse(AMOY_RPC_URL)?],
        };
        if urls.is_empty() {
            return Err(ProviderError::NoHttpUrls);
        }
        Ok(urls)
    }

    /// Builds a read-only provider: retry, then throttle, then fallback across endpoints.
    pub fn http(&self) -> ProviderResult<DynProvider> {
        let urls = self.urls()?;
        let retry = self.retry.clone().unwrap_or_default();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()?;
        let endpoint_count = NonZeroUsize::new(urls.len()).ok_or(ProviderError::NoHttpUrls)?;
        let transports: Vec<_> = urls
            .into_iter()
            .map(|url| Http::with_client(http_client.clone(), url))
            .collect();

        let fallback = FallbackLayer::default().with_active_transport_count(endpoint_count);
        let retry_layer = RetryLayer::new(retry_policy(), &retry);

        let client = match &self.throttle {
            Some(throttle) => RpcClient::builder().transport(
                ServiceBuilder::new()
                    .layer(retry_layer)
                    .layer(ThrottleLayer::new(throttle)?)
                    .layer(fallback)
                    .service(transports),
                false,
            ),
            None => RpcClient::builder().transport(
                ServiceBuilder::new()
                    .layer(retry_layer)
                    .layer(fallback)
                    .service(transports),
                false,
            ),
        };

        Ok(ProviderBuilder::new().connect_client(client).erased())
    }

    /// Builds the provider and binds the configured wallet, if any.
    pub fn connect(&self) -> ProviderResult<ConnectionContext> {
        let context = ConnectionContext::read_only(self.http()?);
        match &self.wallet_private_key {
            Some(key) => Ok(context.connect_private_key(key)?),
            None => Ok(context),
        }
    }
}

/// alloy's rate-limit policy, extended to dropped connections and gateway errors.
fn retry_policy() -> impl RetryPolicy + Clone + 'static {
    RateLimitRetryPolicy::default().or(|error: &TransportError| match error {
        RpcError::Transport(TransportErrorKind::Custom(_)) => true,
        RpcError::Transport(TransportErrorKind::HttpError(err)) => {
            matches!(err.status, 408 | 502 | 504)
        }
        _ => false,
    })
}

/// Retries a request with exponential backoff while the policy allows it.
#[derive(Debug, Clone)]
pub struct RetryLayer<P> {
    policy: P,
    backoff: ExponentialBuilder,
}

impl<P> RetryLayer<P> {
    pub fn new(policy: P, config: &RetryConfig) -> Self {
        Self {
            policy,
            backoff: config.backoff(),
        }
    }
}

impl<S, P: Clone> Layer<S> for RetryLayer<P> {
    type Service = Retrying<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        Retrying {
            inner,
            policy: self.policy.clone(),
            backoff: self.backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrying<S, P> {
    inner: S,
    policy: P,
    backoff: ExponentialBuilder,
}

impl<S, P> Service<RequestPacket> for Retrying<S, P>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
    P: RetryPolicy + Clone + 'static,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<ResponsePacket, TransportError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        let backoff = self.backoff;

        Box::pin(async move {
            let attempt = || {
                let mut inner = inner.clone();
                let request = request.clone();
                async move {
                    let response = inner.call(request).await?;
                    // JSON-RPC errors arrive as successful HTTP responses.
                    match response.as_error() {
                        Some(payload) => Err(TransportError::ErrorResp(payload.clone())),
                        None => Ok(response),
                    }
                }
            };

            attempt
                .retry(backoff)
                .when(|err| policy.should_retry(err))
                .notify(|err, delay| {
                    tracing::debug!(%err, delay_ms = delay.as_millis() as u64, "retrying RPC request");
                })
                .await
        })
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Delays requests that exceed the configured rate instead of failing them.
#[derive(Clone)]
pub struct ThrottleLayer {
    limiter: Arc<DirectLimiter>,
}

impl ThrottleLayer {
    pub fn new(config: &ThrottleConfig) -> ProviderResult<Self> {
        let rate = NonZeroU32::new(config.requests_per_second).ok_or(ProviderError::ZeroRate)?;
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))),
        })
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttled<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Throttled {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[derive(Clone)]
pub struct Throttled<S> {
    inner: S,
    limiter: Arc<DirectLimiter>,
}

impl<S> Service<RequestPacket> for Throttled<S>
where
    S: Service<RequestPacket> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        let mut inner = self.inner.clone();
        Box::pin(async move {
            limiter.until_ready().await;
            inner.call(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn from_file_reads_endpoints_and_retry() {
        let config = r#"
            [provider]
            http = ["https://rpc-amoy.polygon.technology", "https://polygon-amoy.drpc.org"]
            wallet_private_key = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"

            [provider.retry]
            max_retries = 2
            initial_backoff_ms = 50
        "#;
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(config.as_bytes()).unwrap();

        let args = ProviderArgs::from_file(file.path()).unwrap();
        assert_eq!(args.http.as_ref().unwrap().len(), 2);
        assert!(args.wallet_private_key.is_some());
        let retry = args.retry.unwrap();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_backoff_ms, 50);
        assert_eq!(retry.timeout_secs, defaults::TIMEOUT_SECS);
        assert!(args.throttle.is_none());
    }

    #[test]
    fn missing_urls_fall_back_to_amoy() {
        let urls = ProviderArgs::default().urls().unwrap();
        assert_eq!(urls, vec![Url::parse(AMOY_RPC_URL).unwrap()]);

        let empty = ProviderArgs {
            http: Some(Vec::new()),
            ..ProviderArgs::default()
        };
        assert!(matches!(empty.http(), Err(ProviderError::NoHttpUrls)));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let throttle = ThrottleConfig {
            requests_per_second: 0,
            burst_size: 1,
        };
        assert!(matches!(
            ThrottleLayer::new(&throttle),
            Err(ProviderError::ZeroRate)
        ));
    }

    #[tokio::test]
    async fn bad_wallet_key_is_reported() {
        let args = ProviderArgs::default()
            .with_http_urls(["http://127.0.0.1:1"])
            .unwrap()
            .with_wallet_private_key("0x1234");
        assert!(matches!(
            args.connect(),
            Err(ProviderError::Signer(RegistryError::InvalidInput { .. }))
        ));
    }
}
