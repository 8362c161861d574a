//! Per-chain RPC clients with keepalive and automatic reconnection.
//!
//! The pool maintains exactly one live client per configured chain,
//! classified as HTTP or websocket by the endpoint scheme. Transport failures
//! are recovered internally by replacing the client; they are never surfaced
//! to callers. RPC call errors are surfaced as [`ProviderError`] and left to
//! caller policy.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use clap::Parser;
use holograph_types::Chain;
use holograph_utils::parse_duration;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::{sync::Mutex, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// Configuration for the provider pool.
#[derive(Clone, Debug, Parser)]
pub struct ProviderOptions {
    /// Interval between websocket liveness probes.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_CHECK_INTERVAL",
        default_value = "7500ms",
        value_parser = parse_duration,
    )]
    pub check_interval: Duration,

    /// How long a liveness probe may take before the socket is considered
    /// dead and the client is replaced.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_EXPECTED_PONG_BACK",
        default_value = "15s",
        value_parser = parse_duration,
    )]
    pub expected_pong_back: Duration,

    /// Minimum spacing between reconnect attempts for one chain.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_RECONNECT_INTERVAL",
        default_value = "5s",
        value_parser = parse_duration,
    )]
    pub min_reconnect_interval: Duration,

    /// How many consecutive reconnect attempts to make before reporting the
    /// transport unavailable.
    #[clap(long, env = "HOLOGRAPH_PROVIDER_RECONNECT_ATTEMPTS", default_value = "10")]
    pub reconnect_attempts: usize,

    /// Head-polling interval for chains configured with an HTTP endpoint.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_POLLING_INTERVAL",
        default_value = "7s",
        value_parser = parse_duration,
    )]
    pub polling_interval: Duration,

    /// Delay between retries of failed RPC queries.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_RETRY_DELAY",
        default_value = "1s",
        value_parser = parse_duration,
    )]
    pub retry_delay: Duration,

    /// Maximum time to wait for a new head on an armed subscription before
    /// the stream is considered dead and re-established.
    #[clap(
        long,
        env = "HOLOGRAPH_PROVIDER_SUBSCRIPTION_TIMEOUT",
        default_value = "1m",
        value_parser = parse_duration,
    )]
    pub subscription_timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self::parse_from(std::iter::empty::<String>())
    }
}

/// Point-in-time health of one chain's client, as reported by `status()` and
/// the healthcheck endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub connected: bool,
    pub latest_seen_block: u64,
    /// Unix timestamp of the last observed chain event.
    pub last_event_at: Option<u64>,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct StatusInner {
    connected: bool,
    latest_seen_block: u64,
    last_event_at: Option<u64>,
    reconnects: u64,
}

#[derive(Debug, Default)]
struct ReconnectState {
    last_attempt: Option<Instant>,
}

/// One chain's connection, owned by the pool.
#[derive(Debug)]
pub struct ChainProvider {
    chain: Chain,
    opt: ProviderOptions,
    client: RwLock<Option<RootProvider>>,
    status: RwLock<StatusInner>,
    // Serializes reconnect attempts; `get` calls racing a reconnect simply
    // wait on this lock.
    reconnect: Mutex<ReconnectState>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ChainProvider {
    fn new(chain: Chain, opt: ProviderOptions) -> Self {
        Self {
            chain,
            opt,
            client: RwLock::new(None),
            status: RwLock::new(StatusInner::default()),
            reconnect: Mutex::new(ReconnectState::default()),
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.opt
    }

    /// A usable client, reconnecting if necessary.
    pub async fn client(&self) -> Result<RootProvider, ProviderError> {
        if let Some(client) = self.client.read().clone() {
            return Ok(client);
        }
        self.reconnect().await
    }

    /// Drop the current client so the next `client()` call builds a new one.
    /// Used when a subscription stream dies or a liveness probe misses its
    /// deadline.
    pub fn mark_dead(&self) {
        *self.client.write() = None;
        self.status.write().connected = false;
    }

    /// Destroy the current client and construct a new one against the same
    /// endpoint. Attempts are spaced at least `min_reconnect_interval` apart.
    pub async fn reconnect(&self) -> Result<RootProvider, ProviderError> {
        let mut state = self.reconnect.lock().await;

        // Someone else may have reconnected while we waited for the lock.
        if let Some(client) = self.client.read().clone() {
            return Ok(client);
        }

        for attempt in 1..=self.opt.reconnect_attempts {
            if let Some(last) = state.last_attempt {
                let elapsed = last.elapsed();
                if elapsed < self.opt.min_reconnect_interval {
                    sleep(self.opt.min_reconnect_interval - elapsed).await;
                }
            }
            state.last_attempt = Some(Instant::now());

            match self.connect().await {
                Ok(client) => {
                    tracing::info!(chain = %self.chain.name, attempt, "provider connected");
                    *self.client.write() = Some(client.clone());
                    let mut status = self.status.write();
                    status.connected = true;
                    status.reconnects += 1;
                    return Ok(client);
                },
                Err(err) => {
                    tracing::warn!(
                        chain = %self.chain.name,
                        attempt,
                        "failed to connect provider: {err:#}"
                    );
                },
            }
        }

        self.status.write().connected = false;
        Err(ProviderError::TransportUnavailable {
            chain: self.chain.name.clone(),
            attempts: self.opt.reconnect_attempts,
        })
    }

    async fn connect(&self) -> anyhow::Result<RootProvider> {
        let provider = if self.chain.is_ws() {
            ProviderBuilder::new()
                .on_ws(WsConnect::new(self.chain.endpoint.to_string()))
                .await?
                .root()
                .clone()
        } else {
            ProviderBuilder::new()
                .on_http(self.chain.endpoint.clone())
                .root()
                .clone()
        };
        Ok(provider)
    }

    /// Record a new head observed on this chain.
    pub fn note_head(&self, number: u64) {
        let mut status = self.status.write();
        status.latest_seen_block = status.latest_seen_block.max(number);
        status.last_event_at = Some(unix_now());
    }

    pub fn status(&self) -> ProviderStatus {
        let status = self.status.read();
        ProviderStatus {
            connected: status.connected,
            latest_seen_block: status.latest_seen_block,
            last_event_at: status.last_event_at,
            reconnects: status.reconnects,
        }
    }

    /// Websocket keepalive: probe the socket every `check_interval`; a probe
    /// that misses the `expected_pong_back` deadline terminates the client
    /// and triggers a reconnect.
    pub async fn keepalive(self: Arc<Self>, cancel: CancellationToken) {
        if !self.chain.is_ws() {
            return;
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.opt.check_interval) => {},
            }
            let Some(client) = self.client.read().clone() else {
                continue;
            };
            match tokio::time::timeout(self.opt.expected_pong_back, client.get_block_number()).await
            {
                Ok(Ok(_)) => {
                    self.status.write().connected = true;
                },
                Ok(Err(err)) => {
                    tracing::warn!(chain = %self.chain.name, "keepalive probe failed: {err:#}");
                    self.mark_dead();
                    if let Err(err) = self.reconnect().await {
                        tracing::error!(chain = %self.chain.name, "reconnect failed: {err:#}");
                    }
                },
                Err(_) => {
                    tracing::warn!(
                        chain = %self.chain.name,
                        timeout = ?self.opt.expected_pong_back,
                        "keepalive deadline missed, replacing client"
                    );
                    self.mark_dead();
                    if let Err(err) = self.reconnect().await {
                        tracing::error!(chain = %self.chain.name, "reconnect failed: {err:#}");
                    }
                },
            }
        }
    }
}

/// The pool of per-chain providers. Chains are fixed at construction; clients
/// come and go as connections drop and recover.
#[derive(Debug)]
pub struct ProviderPool {
    opt: ProviderOptions,
    chains: HashMap<String, Arc<ChainProvider>>,
}

impl ProviderPool {
    pub fn new(chains: Vec<Chain>, opt: ProviderOptions) -> Self {
        let chains = chains
            .into_iter()
            .map(|chain| {
                (
                    chain.name.clone(),
                    Arc::new(ChainProvider::new(chain, opt.clone())),
                )
            })
            .collect();
        Self { opt, chains }
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.opt
    }

    pub fn chain(&self, name: &str) -> Option<Arc<ChainProvider>> {
        self.chains.get(name).cloned()
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<ChainProvider>> {
        self.chains.values()
    }

    /// A usable client for the chain, or `TransportUnavailable` once
    /// reconnection is exhausted.
    pub async fn get(&self, chain: &str) -> Result<RootProvider, ProviderError> {
        let provider = self
            .chain(chain)
            .ok_or_else(|| ProviderError::TransportUnavailable {
                chain: chain.into(),
                attempts: 0,
            })?;
        provider.client().await
    }

    pub fn status(&self) -> BTreeMap<String, ProviderStatus> {
        self.chains
            .iter()
            .map(|(name, provider)| (name.clone(), provider.status()))
            .collect()
    }

    /// Spawn the keepalive task for every websocket chain.
    pub fn spawn_keepalive(&self, cancel: &CancellationToken) {
        for provider in self.chains.values() {
            tokio::spawn(provider.clone().keepalive(cancel.clone()));
        }
    }
}

#[cfg(test)]
mod test {
    use holograph_types::PeerAddresses;
    use holograph_utils::test_utils::setup_test;

    use super::*;

    fn unreachable_chain(name: &str, ws: bool) -> Chain {
        let scheme = if ws { "ws" } else { "http" };
        Chain {
            name: name.into(),
            chain_id: 5,
            holograph_id: 4_000_000_001,
            // Port 9 (discard) is never listening in test environments.
            endpoint: format!("{scheme}://127.0.0.1:9").parse().unwrap(),
            peers: PeerAddresses {
                bridge: Default::default(),
                factory: Default::default(),
                operator: Default::default(),
                layer_zero_receiver: Default::default(),
                messaging_module: Default::default(),
            },
        }
    }

    fn fast_options() -> ProviderOptions {
        ProviderOptions {
            min_reconnect_interval: Duration::from_millis(10),
            reconnect_attempts: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_ws_reports_transport_unavailable() {
        setup_test();
        let pool = ProviderPool::new(vec![unreachable_chain("goerli", true)], fast_options());
        let err = pool.get("goerli").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::TransportUnavailable { attempts: 2, .. }
        ));
        assert!(!err.transient());
        assert!(!pool.status()["goerli"].connected);
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        setup_test();
        let pool = ProviderPool::new(vec![], fast_options());
        assert!(pool.get("fuji").await.is_err());
    }

    #[test]
    fn test_note_head_is_monotonic() {
        let provider = ChainProvider::new(unreachable_chain("goerli", true), fast_options());
        provider.note_head(100);
        provider.note_head(90);
        let status = provider.status();
        assert_eq!(status.latest_seen_block, 100);
        assert!(status.last_event_at.is_some());
    }
}
