//! Bridge calldata: known function selectors, job-type resolution and
//! deployment configs.

use std::fmt;

use alloy::{
    primitives::{keccak256, Address, B256},
    sol,
    sol_types::{SolCall, SolValue},
};
use serde::{Deserialize, Serialize};

sol! {
    /// The deterministic description of a holographable contract deployment,
    /// carried in `deployOut` payloads and replayed verbatim on peer chains.
    struct DeploymentConfig {
        bytes32 contractType;
        uint32 chainType;
        bytes32 salt;
        bytes byteCode;
        bytes initCode;
    }

    function deployOut(uint32 toChain, DeploymentConfig config);
    function erc20out(uint32 toChain, address token, address from, address to, uint256 amount);
    function erc721out(uint32 toChain, address collection, address from, address to, uint256 tokenId);
    function deployIn(bytes payload);
    function erc20in(bytes payload);
    function erc721in(bytes payload);
    function bridgeOutRequest(uint32 toChain, address holographableContract, uint256 gasLimit, uint256 gasPrice, bytes bridgeOutPayload);
    function executeJob(bytes payload);

    /// The factory entry point a deployment replay submits to.
    #[sol(rpc)]
    contract HolographFactory {
        function deployHolographableContract(DeploymentConfig memory config) external;
    }

    /// The bridge entry point used by the collection-bridging command.
    #[sol(rpc)]
    contract HolographBridge {
        function bridgeOutRequest(uint32 toChain, address holographableContract, uint256 gasLimit, uint256 gasPrice, bytes bridgeOutPayload) external payable;
    }
}

/// What a cross-chain job moves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Deploy,
    Erc20,
    Erc721,
    #[default]
    Unknown,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deploy => "deploy",
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeDirection {
    Out,
    In,
}

/// A known bridge entry point, resolved from a 4-byte selector.
///
/// Selectors outside this table are logged by callers and skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeCall {
    DeployOut,
    Erc20Out,
    Erc721Out,
    DeployIn,
    Erc20In,
    Erc721In,
    BridgeOutRequest,
    ExecuteJob,
}

impl BridgeCall {
    pub fn from_selector(selector: [u8; 4]) -> Option<Self> {
        if selector == deployOutCall::SELECTOR {
            Some(Self::DeployOut)
        } else if selector == erc20outCall::SELECTOR {
            Some(Self::Erc20Out)
        } else if selector == erc721outCall::SELECTOR {
            Some(Self::Erc721Out)
        } else if selector == deployInCall::SELECTOR {
            Some(Self::DeployIn)
        } else if selector == erc20inCall::SELECTOR {
            Some(Self::Erc20In)
        } else if selector == erc721inCall::SELECTOR {
            Some(Self::Erc721In)
        } else if selector == bridgeOutRequestCall::SELECTOR {
            Some(Self::BridgeOutRequest)
        } else if selector == executeJobCall::SELECTOR {
            Some(Self::ExecuteJob)
        } else {
            None
        }
    }

    /// Resolve from the leading 4 bytes of calldata or an embedded payload.
    pub fn from_calldata(data: &[u8]) -> Option<Self> {
        let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Self::from_selector(selector)
    }

    pub fn selector(&self) -> [u8; 4] {
        match self {
            Self::DeployOut => deployOutCall::SELECTOR,
            Self::Erc20Out => erc20outCall::SELECTOR,
            Self::Erc721Out => erc721outCall::SELECTOR,
            Self::DeployIn => deployInCall::SELECTOR,
            Self::Erc20In => erc20inCall::SELECTOR,
            Self::Erc721In => erc721inCall::SELECTOR,
            Self::BridgeOutRequest => bridgeOutRequestCall::SELECTOR,
            Self::ExecuteJob => executeJobCall::SELECTOR,
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::DeployOut | Self::DeployIn => JobType::Deploy,
            Self::Erc20Out | Self::Erc20In => JobType::Erc20,
            Self::Erc721Out | Self::Erc721In => JobType::Erc721,
            Self::BridgeOutRequest | Self::ExecuteJob => JobType::Unknown,
        }
    }

    pub fn direction(&self) -> BridgeDirection {
        match self {
            Self::DeployOut | Self::Erc20Out | Self::Erc721Out | Self::BridgeOutRequest => {
                BridgeDirection::Out
            },
            Self::DeployIn | Self::Erc20In | Self::Erc721In | Self::ExecuteJob => {
                BridgeDirection::In
            },
        }
    }
}

/// The job type of an outbound bridge transaction, resolved from its
/// calldata. `bridgeOutRequest` wraps the real call in its payload, so the
/// resolution recurses one level.
pub fn outbound_job_type(calldata: &[u8]) -> JobType {
    match BridgeCall::from_calldata(calldata) {
        Some(BridgeCall::BridgeOutRequest) => {
            match bridgeOutRequestCall::abi_decode(calldata, true) {
                Ok(call) => BridgeCall::from_calldata(&call.bridgeOutPayload)
                    .map(|inner| inner.job_type())
                    .unwrap_or_default(),
                Err(_) => JobType::Unknown,
            }
        },
        Some(call) => call.job_type(),
        None => JobType::Unknown,
    }
}

/// The job type of an executed operator job: the first 4 bytes of the bridge
/// payload name the inbound bridge function.
pub fn inbound_job_type(payload: &[u8]) -> JobType {
    BridgeCall::from_calldata(payload)
        .map(|call| call.job_type())
        .unwrap_or_default()
}

/// The stable cross-chain identifier of a bridge payload.
pub fn job_hash(payload: &[u8]) -> B256 {
    keccak256(payload)
}

impl DeploymentConfig {
    /// The content hash identifying this deployment, used as the CREATE2
    /// salt when deriving the contract address.
    pub fn config_hash(&self) -> B256 {
        keccak256(self.abi_encode())
    }

    /// Deterministic address of the deployed contract on any chain.
    pub fn deployment_address(&self, factory: Address) -> Address {
        let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
        buf.push(0xff);
        buf.extend_from_slice(factory.as_slice());
        buf.extend_from_slice(self.config_hash().as_slice());
        buf.extend_from_slice(keccak256(&self.byteCode).as_slice());
        Address::from_word(keccak256(&buf))
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, b256, Bytes, U256};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_selector_round_trip() {
        for call in [
            BridgeCall::DeployOut,
            BridgeCall::Erc20Out,
            BridgeCall::Erc721Out,
            BridgeCall::DeployIn,
            BridgeCall::Erc20In,
            BridgeCall::Erc721In,
            BridgeCall::BridgeOutRequest,
            BridgeCall::ExecuteJob,
        ] {
            assert_eq!(BridgeCall::from_selector(call.selector()), Some(call));
        }
        assert_eq!(BridgeCall::from_selector([0, 0, 0, 0]), None);
    }

    #[test]
    fn test_outbound_job_type() {
        let call = erc721outCall {
            toChain: 4_000_000_002,
            collection: address!("00000000000000000000000000000000000000aa"),
            from: address!("00000000000000000000000000000000000000a1"),
            to: address!("00000000000000000000000000000000000000b2"),
            tokenId: U256::from(7),
        };
        assert_eq!(outbound_job_type(&call.abi_encode()), JobType::Erc721);
        assert_eq!(outbound_job_type(&[1, 2, 3, 4, 5]), JobType::Unknown);
        assert_eq!(outbound_job_type(&[1]), JobType::Unknown);
    }

    #[test]
    fn test_wrapped_bridge_out_request() {
        let inner = erc20outCall {
            toChain: 4_000_000_002,
            token: address!("00000000000000000000000000000000000000aa"),
            from: address!("00000000000000000000000000000000000000a1"),
            to: address!("00000000000000000000000000000000000000b2"),
            amount: U256::from(1000),
        };
        let outer = bridgeOutRequestCall {
            toChain: 4_000_000_002,
            holographableContract: address!("00000000000000000000000000000000000000aa"),
            gasLimit: U256::from(500_000),
            gasPrice: U256::from(30_000_000_000u64),
            bridgeOutPayload: inner.abi_encode().into(),
        };
        assert_eq!(outbound_job_type(&outer.abi_encode()), JobType::Erc20);
    }

    #[test]
    fn test_inbound_job_type() {
        let call = deployInCall {
            payload: Bytes::from_static(b"payload"),
        };
        assert_eq!(inbound_job_type(&call.abi_encode()), JobType::Deploy);
    }

    #[test]
    fn test_deployment_address_is_deterministic() {
        let config = DeploymentConfig {
            contractType: b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
            chainType: 4_000_000_001,
            salt: B256::ZERO,
            byteCode: Bytes::from_static(b"\x60\x80\x60\x40"),
            initCode: Bytes::from_static(b""),
        };
        let factory = address!("90425798cc0e33932f11edc3eb9fcfac4bb8ae6a");
        let addr = config.deployment_address(factory);
        // Same config, same factory, same address on every chain.
        assert_eq!(addr, config.deployment_address(factory));
        // A different factory moves the address.
        assert_ne!(
            addr,
            config.deployment_address(address!("0000000000000000000000000000000000000001"))
        );
    }
}
