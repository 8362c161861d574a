use std::{collections::BTreeMap, path::Path};

use alloy::primitives::Address;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use url::Url;

/// Protocol contract addresses deployed on a single chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAddresses {
    pub bridge: Address,
    pub factory: Address,
    pub operator: Address,
    pub layer_zero_receiver: Address,
    /// The LayerZero messaging module whose `Packet` logs carry bridge
    /// payloads.
    pub messaging_module: Address,
}

/// One monitored EVM network.
///
/// Constructed from the networks config at startup; read-only for the rest of
/// the process lifetime and shared by every component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    /// Short name used in config, progress files and log lines, e.g.
    /// `goerli` or `mumbai`.
    pub name: String,
    /// The EVM chain id.
    pub chain_id: u64,
    /// The internal Holograph chain id, a distinct identifier space used in
    /// cross-chain payloads.
    pub holograph_id: u32,
    /// RPC endpoint; scheme decides the transport class.
    pub endpoint: Url,
    #[serde(flatten)]
    pub peers: PeerAddresses,
}

impl Chain {
    /// Whether the configured endpoint is a websocket endpoint.
    pub fn is_ws(&self) -> bool {
        matches!(self.endpoint.scheme(), "ws" | "wss")
    }

    /// Multiplier applied to the provider gas price before submitting a
    /// transaction. Polygon testnet underquotes, so it gets a bump.
    pub fn gas_price_bump(&self) -> f64 {
        if self.name == "mumbai" {
            1.25
        } else {
            1.0
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.endpoint.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(()),
            other => bail!(
                "chain {}: unsupported endpoint scheme {other:?}",
                self.name
            ),
        }
    }
}

/// The full set of configured networks, keyed by chain name.
///
/// Serialized as a flat JSON object `{ "<name>": { chainId, holographId,
/// endpoint, bridge, factory, operator, ... } }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworksConfig {
    chains: BTreeMap<String, ChainEntry>,
}

/// A [`Chain`] as it appears in the config file, without the redundant name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainEntry {
    chain_id: u64,
    holograph_id: u32,
    endpoint: Url,
    #[serde(flatten)]
    peers: PeerAddresses,
}

impl NetworksConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading networks config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing networks config {}", path.display()))?;
        for chain in config.chains() {
            chain.validate()?;
        }
        Ok(config)
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.chains.iter().map(|(name, entry)| Chain {
            name: name.clone(),
            chain_id: entry.chain_id,
            holograph_id: entry.holograph_id,
            endpoint: entry.endpoint.clone(),
            peers: entry.peers,
        })
    }

    /// Select the named subset, failing on any unknown name.
    pub fn select(&self, names: &[String]) -> anyhow::Result<Vec<Chain>> {
        names
            .iter()
            .map(|name| {
                self.chains()
                    .find(|c| &c.name == name)
                    .with_context(|| format!("network {name:?} not present in config"))
            })
            .collect()
    }

    pub fn insert(&mut self, chain: Chain) {
        self.chains.insert(
            chain.name,
            ChainEntry {
                chain_id: chain.chain_id,
                holograph_id: chain.holograph_id,
                endpoint: chain.endpoint,
                peers: chain.peers,
            },
        );
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use alloy::primitives::address;
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn test_chain(name: &str, chain_id: u64) -> Chain {
        Chain {
            name: name.into(),
            chain_id,
            holograph_id: 4_000_000_000 + chain_id as u32,
            endpoint: "wss://rpc.example.test".parse().unwrap(),
            peers: PeerAddresses {
                bridge: address!("5e2cfb6b31b7e4d4a3b6e7a2b1ddc88f1a0e6f30"),
                factory: address!("90425798cc0e33932f11edc3eb9fcfac4bb8ae6a"),
                operator: address!("98ad6d9ff18c5f3adf7aa225a374c56e246094ef"),
                layer_zero_receiver: address!("0c8af56f7aea2e32cba79c7da2a1f308d3d94602"),
                messaging_module: address!("bf44e9ec8b8cbda8d5d5b3b0d2f6e9e0deffffb5"),
            },
        }
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = NetworksConfig::default();
        config.insert(test_chain("goerli", 5));
        config.insert(test_chain("mumbai", 80001));

        let json = serde_json::to_string_pretty(&config).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = NetworksConfig::load(file.path()).unwrap();
        assert_eq!(
            loaded.chains().collect::<Vec<_>>(),
            config.chains().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_select_unknown_network() {
        let mut config = NetworksConfig::default();
        config.insert(test_chain("goerli", 5));
        assert!(config.select(&["goerli".into()]).is_ok());
        assert!(config.select(&["goerli".into(), "fuji".into()]).is_err());
    }

    #[test]
    fn test_bad_scheme_rejected() {
        let mut chain = test_chain("goerli", 5);
        chain.endpoint = "ipc:///var/run/geth.ipc".parse().unwrap();
        assert!(chain.validate().is_err());
    }

    #[test]
    fn test_gas_price_bump() {
        assert_eq!(test_chain("mumbai", 80001).gas_price_bump(), 1.25);
        assert_eq!(test_chain("goerli", 5).gas_price_bump(), 1.0);
    }
}
