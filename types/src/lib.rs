//! Domain types for the Holograph network monitor.
//!
//! Everything in this crate is pure data and pure functions: chain
//! descriptions, transaction filters, receipt decoding, bridge payload
//! parsing and the cross-chain job model. All I/O lives in
//! `holograph-monitor`.

pub mod bridge;
pub mod chain;
pub mod environment;
pub mod event;
pub mod filter;
pub mod job;
pub mod message;

pub use bridge::{BridgeCall, BridgeDirection, JobType};
pub use chain::{Chain, NetworksConfig, PeerAddresses};
pub use environment::Environment;
pub use event::{DecodedEvent, ProtocolError};
pub use filter::{filter_interesting, FilterAddress, TransactionFilter};
pub use job::{ArchivedDeployment, ArchivedJob, ArchivedLog, CrossChainJob, JobPhase, PhaseRecord};
pub use message::{lower_hex, MessagePayload, MessageType, QueueMessage, Tag};
