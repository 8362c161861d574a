use std::{fmt, str::FromStr};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// The Holograph deployment environment a process runs against.
///
/// Controls which downstream side effects are real: in [`Localhost`] and
/// [`Experimental`] the dispatcher logs instead of calling the network.
///
/// [`Localhost`]: Environment::Localhost
/// [`Experimental`]: Environment::Experimental
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Localhost,
    Experimental,
    #[default]
    Develop,
    Testnet,
    Mainnet,
}

impl Environment {
    /// Resolve from the `HOLOGRAPH_ENVIRONMENT` variable, falling back to the
    /// default when unset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("HOLOGRAPH_ENVIRONMENT") {
            Ok(s) => s.parse(),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Whether downstream dispatch should actually touch the network.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Develop | Self::Testnet | Self::Mainnet)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Localhost => "localhost",
            Self::Experimental => "experimental",
            Self::Develop => "develop",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "localhost" => Ok(Self::Localhost),
            "experimental" => Ok(Self::Experimental),
            "develop" => Ok(Self::Develop),
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(anyhow::anyhow!("unknown environment {other:?}")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        for env in [
            Environment::Localhost,
            Environment::Experimental,
            Environment::Develop,
            Environment::Testnet,
            Environment::Mainnet,
        ] {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), env);
        }
        assert!("goerli".parse::<Environment>().is_err());
    }

    #[test]
    fn test_live_policy() {
        assert!(!Environment::Localhost.is_live());
        assert!(!Environment::Experimental.is_live());
        assert!(Environment::Testnet.is_live());
    }
}
