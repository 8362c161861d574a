//! Downstream queue message shapes.
//!
//! The wire format is consumed by off-chain services and is bit-exact JSON:
//! field names and the tag vocabulary here are the contract.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::environment::Environment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    HolographProtocol,
    #[serde(rename = "ERC20")]
    Erc20,
    #[serde(rename = "ERC721")]
    Erc721,
}

/// A queue tag: either an opaque string or a numeric id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Str(String),
    Int(i64),
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<i64> for Tag {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// Event payload: the transaction hash and block it was observed in, plus
/// event-specific fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub tx: String,
    #[serde(rename = "blockNum")]
    pub block_num: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagePayload {
    pub fn new(tx: B256, block_num: u64) -> Self {
        Self {
            tx: format!("{tx}"),
            block_num,
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One downstream queue message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "eventSignature", skip_serializing_if = "Option::is_none")]
    pub event_signature: Option<String>,
    #[serde(rename = "tagId")]
    pub tag_id: Vec<Tag>,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    #[serde(rename = "holographAddress")]
    pub holograph_address: String,
    pub environment: Environment,
    pub payload: MessagePayload,
}

/// Lowercase hex rendering used for every address that leaves the process.
pub fn lower_hex(addr: Address) -> String {
    format!("{addr:#x}")
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, b256};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_shape() {
        let message = QueueMessage {
            message_type: MessageType::HolographProtocol,
            event_name: "ContractDeployed".into(),
            event_signature: None,
            tag_id: vec!["job".into(), Tag::Int(7)],
            chain_id: 5,
            holograph_address: lower_hex(address!("90425798CC0E33932F11EDC3EB9fCfAC4Bb8AE6a")),
            environment: Environment::Develop,
            payload: MessagePayload::new(
                b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
                1001,
            )
            .with("contractAddress", json!("0xdead")),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "HolographProtocol",
                "eventName": "ContractDeployed",
                "tagId": ["job", 7],
                "chainId": 5,
                "holographAddress": "0x90425798cc0e33932f11edc3eb9fcfac4bb8ae6a",
                "environment": "develop",
                "payload": {
                    "tx": "0x00000000000000000000000000000000000000000000000000000000000000aa",
                    "blockNum": 1001,
                    "contractAddress": "0xdead",
                },
            })
        );
    }

    #[test]
    fn test_message_type_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::Erc721).unwrap(),
            "\"ERC721\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::HolographProtocol).unwrap(),
            "\"HolographProtocol\""
        );
    }
}
