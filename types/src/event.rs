//! Typed decoding of protocol receipt logs.
//!
//! The decoder is keyed by `topic[0]` and, for holographable events, by an
//! inner 32-byte discriminator in the payload. It is pure: the monitor hands
//! it the logs of a receipt and gets typed events back, and decoding the same
//! logs twice yields identical results.

use alloy::{
    primitives::{keccak256, Address, Bytes, B256, U256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};

sol! {
    event BridgeableContractDeployed(address indexed contractAddress, bytes32 indexed hash);
    event CrossChainMessageSent(bytes32 messageHash);
    event AvailableJob(bytes payload);
    event AvailableOperatorJob(bytes32 jobHash, bytes payload);
    event FinishedOperatorJob(bytes32 jobHash, address operator);
    event FailedOperatorJob(bytes32 jobHash);
    event HolographableContractEvent(address indexed contractAddress, bytes payload);
    event Transfer(address indexed from, address indexed to, uint256 value);
    event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
    event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
}

// LayerZero emits `Packet` in two shapes depending on endpoint version. Both
// are canonically named `Packet`, so they live in separate modules to get the
// right topics.
mod layerzero {
    alloy::sol! {
        event Packet(bytes payload);
    }
}
mod layerzero_legacy {
    alloy::sol! {
        event Packet(uint16 chainId, bytes payload);
    }
}

pub use layerzero::Packet as LayerZeroPacket;
pub use layerzero_legacy::Packet as PacketLegacy;

/// Length of the routing prefix of a legacy LayerZero packet payload:
/// 20-byte destination address, 2-byte version, 20-byte source address. The
/// bridge payload is the tail after this prefix.
pub const LZ_PACKET_PREFIX_LEN: usize = 42;

/// A protocol condition that invalidates a single receipt or deployment.
///
/// These are fatal for the offending receipt only; the pipeline logs and
/// skips.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("job hash mismatch: payload hashes to {actual}, receipt claims {expected}")]
    JobHashMismatch { expected: B256, actual: B256 },
    #[error("deployment config hash mismatch: derived {actual}, event claims {expected}")]
    DeploymentConfigMismatch { expected: B256, actual: B256 },
    #[error("deployment address mismatch: derived {actual}, event claims {expected}")]
    DeploymentAddressMismatch { expected: Address, actual: Address },
}

/// A typed event decoded from a receipt log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedEvent {
    /// A holographable contract deployed by the factory.
    ContractDeployed {
        contract: Address,
        config_hash: B256,
    },
    Erc20Transfer {
        contract: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Erc721Transfer {
        contract: Address,
        from: Address,
        to: Address,
        token_id: U256,
    },
    Erc1155Transfer {
        contract: Address,
        operator: Address,
        from: Address,
        to: Address,
        id: U256,
        value: U256,
    },
    Erc1155TransferBatch {
        contract: Address,
        operator: Address,
        from: Address,
        to: Address,
        ids: Vec<U256>,
        values: Vec<U256>,
    },
    CrossChainMessageSent {
        message_hash: B256,
    },
    AvailableJob {
        payload: Bytes,
    },
    AvailableOperatorJob {
        job_hash: B256,
        payload: Bytes,
    },
    FinishedOperatorJob {
        job_hash: B256,
        operator: Address,
    },
    FailedOperatorJob {
        job_hash: B256,
    },
    LayerZeroPacket {
        payload: Bytes,
    },
}

impl DecodedEvent {
    /// The event name used in downstream queue messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContractDeployed { .. } => "ContractDeployed",
            Self::Erc20Transfer { .. } | Self::Erc721Transfer { .. } => "Transfer",
            Self::Erc1155Transfer { .. } => "TransferSingle",
            Self::Erc1155TransferBatch { .. } => "TransferBatch",
            Self::CrossChainMessageSent { .. } => "CrossChainMessageSent",
            Self::AvailableJob { .. } => "AvailableJob",
            Self::AvailableOperatorJob { .. } => "AvailableOperatorJob",
            Self::FinishedOperatorJob { .. } => "FinishedOperatorJob",
            Self::FailedOperatorJob { .. } => "FailedOperatorJob",
            Self::LayerZeroPacket { .. } => "LayerZeroPacket",
        }
    }

    /// The canonical solidity signature, when the event has one.
    pub fn signature(&self) -> Option<&'static str> {
        match self {
            Self::ContractDeployed { .. } => Some(BridgeableContractDeployed::SIGNATURE),
            Self::Erc20Transfer { .. } | Self::Erc721Transfer { .. } => Some(Transfer::SIGNATURE),
            Self::Erc1155Transfer { .. } => Some(TransferSingle::SIGNATURE),
            Self::Erc1155TransferBatch { .. } => Some(TransferBatch::SIGNATURE),
            Self::CrossChainMessageSent { .. } => Some(CrossChainMessageSent::SIGNATURE),
            Self::AvailableJob { .. } => Some(AvailableJob::SIGNATURE),
            Self::AvailableOperatorJob { .. } => Some(AvailableOperatorJob::SIGNATURE),
            Self::FinishedOperatorJob { .. } => Some(FinishedOperatorJob::SIGNATURE),
            Self::FailedOperatorJob { .. } => Some(FailedOperatorJob::SIGNATURE),
            Self::LayerZeroPacket { .. } => Some(LayerZeroPacket::SIGNATURE),
        }
    }
}

fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

fn word(data: &[u8], index: usize) -> Option<B256> {
    let start = index * 32;
    data.get(start..start + 32).map(B256::from_slice)
}

fn uint_word(data: &[u8], index: usize) -> Option<U256> {
    word(data, index).map(|w| U256::from_be_slice(w.as_slice()))
}

/// Decode a plain ERC-20/721/1155 transfer log.
///
/// The ERC-20 and ERC-721 `Transfer` events share a topic; they are told
/// apart by the indexed-topic count (ERC-721 indexes the token id, ERC-20
/// carries the value in the data section).
fn decode_transfer(log: &Log) -> Option<DecodedEvent> {
    let contract = log.address();
    let topics = log.inner.data.topics();
    match topics.len() {
        4 => Some(DecodedEvent::Erc721Transfer {
            contract,
            from: topic_address(&topics[1]),
            to: topic_address(&topics[2]),
            token_id: U256::from_be_slice(topics[3].as_slice()),
        }),
        3 => Some(DecodedEvent::Erc20Transfer {
            contract,
            from: topic_address(&topics[1]),
            to: topic_address(&topics[2]),
            value: uint_word(log.inner.data.data.as_ref(), 0)?,
        }),
        _ => None,
    }
}

/// Second-pass decoding of a `HolographableContractEvent`: the first 32 bytes
/// of the inner payload are the topic of the embedded event, the rest is its
/// ABI-encoded body. `prefer_erc721` resolves the ERC-20/721 ambiguity of the
/// shared `Transfer` topic; it is set when the surrounding receipt belongs to
/// a bridge transaction.
fn decode_holographable(contract: Address, payload: &[u8], prefer_erc721: bool) -> Option<DecodedEvent> {
    let discriminator = word(payload, 0)?;
    let body = &payload[32..];
    if discriminator == Transfer::SIGNATURE_HASH {
        let from = topic_address(&word(body, 0)?);
        let to = topic_address(&word(body, 1)?);
        let amount = uint_word(body, 2)?;
        if prefer_erc721 {
            Some(DecodedEvent::Erc721Transfer {
                contract,
                from,
                to,
                token_id: amount,
            })
        } else {
            Some(DecodedEvent::Erc20Transfer {
                contract,
                from,
                to,
                value: amount,
            })
        }
    } else if discriminator == TransferSingle::SIGNATURE_HASH {
        Some(DecodedEvent::Erc1155Transfer {
            contract,
            operator: topic_address(&word(body, 0)?),
            from: topic_address(&word(body, 1)?),
            to: topic_address(&word(body, 2)?),
            id: uint_word(body, 3)?,
            value: uint_word(body, 4)?,
        })
    } else {
        tracing::debug!(%contract, %discriminator, "unknown holographable event discriminator");
        None
    }
}

/// Whether any log marks this receipt as part of a bridge transaction.
fn is_bridge_receipt(logs: &[Log]) -> bool {
    logs.iter().any(|log| {
        let topic0 = log.topic0();
        topic0 == Some(&CrossChainMessageSent::SIGNATURE_HASH)
            || topic0 == Some(&AvailableOperatorJob::SIGNATURE_HASH)
            || topic0 == Some(&FinishedOperatorJob::SIGNATURE_HASH)
    })
}

/// Decode every known log of a receipt, in log order.
///
/// Unknown topics are skipped silently; malformed payloads under a known
/// topic are logged at debug and skipped.
pub fn decode_logs(logs: &[Log]) -> Vec<DecodedEvent> {
    let prefer_erc721 = is_bridge_receipt(logs);
    logs.iter()
        .filter_map(|log| decode_log(log, prefer_erc721))
        .collect()
}

fn decode_log(log: &Log, prefer_erc721: bool) -> Option<DecodedEvent> {
    let topic0 = log.topic0()?;
    if *topic0 == BridgeableContractDeployed::SIGNATURE_HASH {
        let ev = BridgeableContractDeployed::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::ContractDeployed {
            contract: ev.contractAddress,
            config_hash: ev.hash,
        })
    } else if *topic0 == Transfer::SIGNATURE_HASH {
        decode_transfer(log)
    } else if *topic0 == TransferSingle::SIGNATURE_HASH {
        let ev = TransferSingle::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::Erc1155Transfer {
            contract: log.address(),
            operator: ev.operator,
            from: ev.from,
            to: ev.to,
            id: ev.id,
            value: ev.value,
        })
    } else if *topic0 == TransferBatch::SIGNATURE_HASH {
        let ev = TransferBatch::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::Erc1155TransferBatch {
            contract: log.address(),
            operator: ev.operator,
            from: ev.from,
            to: ev.to,
            ids: ev.ids.clone(),
            values: ev.values.clone(),
        })
    } else if *topic0 == CrossChainMessageSent::SIGNATURE_HASH {
        let ev = CrossChainMessageSent::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::CrossChainMessageSent {
            message_hash: ev.messageHash,
        })
    } else if *topic0 == AvailableJob::SIGNATURE_HASH {
        let ev = AvailableJob::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::AvailableJob {
            payload: ev.payload.clone(),
        })
    } else if *topic0 == AvailableOperatorJob::SIGNATURE_HASH {
        let ev = AvailableOperatorJob::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::AvailableOperatorJob {
            job_hash: ev.jobHash,
            payload: ev.payload.clone(),
        })
    } else if *topic0 == FinishedOperatorJob::SIGNATURE_HASH {
        let ev = FinishedOperatorJob::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::FinishedOperatorJob {
            job_hash: ev.jobHash,
            operator: ev.operator,
        })
    } else if *topic0 == FailedOperatorJob::SIGNATURE_HASH {
        let ev = FailedOperatorJob::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::FailedOperatorJob {
            job_hash: ev.jobHash,
        })
    } else if *topic0 == LayerZeroPacket::SIGNATURE_HASH {
        let ev = LayerZeroPacket::decode_log(&log.inner, true).ok()?;
        Some(DecodedEvent::LayerZeroPacket {
            payload: ev.payload.clone(),
        })
    } else if *topic0 == HolographableContractEvent::SIGNATURE_HASH {
        let ev = HolographableContractEvent::decode_log(&log.inner, true).ok()?;
        decode_holographable(ev.contractAddress, ev.payload.as_ref(), prefer_erc721)
    } else {
        None
    }
}

/// Extract the operator job hash a receipt refers to, if any.
pub fn operator_job_hash(logs: &[Log]) -> Option<B256> {
    logs.iter().find_map(|log| {
        let topic0 = log.topic0()?;
        if *topic0 == CrossChainMessageSent::SIGNATURE_HASH {
            CrossChainMessageSent::decode_log(&log.inner, true)
                .ok()
                .map(|ev| ev.messageHash)
        } else if *topic0 == AvailableOperatorJob::SIGNATURE_HASH {
            AvailableOperatorJob::decode_log(&log.inner, true)
                .ok()
                .map(|ev| ev.jobHash)
        } else {
            None
        }
    })
}

/// Locate the LayerZero packet emitted by `messaging_module` and return the
/// bridge payload with the routing prefix stripped.
pub fn layerzero_packet_payload(logs: &[Log], messaging_module: Address) -> Option<Bytes> {
    logs.iter().find_map(|log| {
        if log.address() != messaging_module {
            return None;
        }
        let topic0 = log.topic0()?;
        let raw = if *topic0 == PacketLegacy::SIGNATURE_HASH {
            PacketLegacy::decode_log(&log.inner, true)
                .ok()
                .map(|ev| ev.payload.clone())
        } else if *topic0 == LayerZeroPacket::SIGNATURE_HASH {
            LayerZeroPacket::decode_log(&log.inner, true)
                .ok()
                .map(|ev| ev.payload.clone())
        } else {
            None
        }?;
        (raw.len() > LZ_PACKET_PREFIX_LEN)
            .then(|| Bytes::copy_from_slice(&raw[LZ_PACKET_PREFIX_LEN..]))
    })
}

/// Check the integrity of an operator-pipeline receipt: when both a
/// `CrossChainMessageSent` and a packet log are present, the payload must
/// hash to the advertised job hash.
///
/// Returns the verified `(job_hash, payload)` pair, `None` when the receipt
/// has no complete pair, or [`ProtocolError::JobHashMismatch`].
pub fn verified_bridge_payload(
    logs: &[Log],
    messaging_module: Address,
) -> Result<Option<(B256, Bytes)>, ProtocolError> {
    let (Some(job_hash), Some(payload)) = (
        operator_job_hash(logs),
        layerzero_packet_payload(logs, messaging_module),
    ) else {
        return Ok(None);
    };
    let actual = keccak256(&payload);
    if actual != job_hash {
        return Err(ProtocolError::JobHashMismatch {
            expected: job_hash,
            actual,
        });
    }
    Ok(Some((job_hash, payload)))
}
