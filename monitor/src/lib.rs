//! The Holograph network monitor.
//!
//! Ingests blocks from several EVM networks in parallel, filters interesting
//! transactions, decodes their receipts into typed protocol events,
//! correlates cross-chain jobs and dispatches structured messages downstream.
//! Also hosts the write-side orchestrators: the propagator (replays contract
//! deployments to peer chains) and the analyzer (correlates job phases into
//! an exportable archive).

pub mod analyzer;
pub mod api;
pub mod commands;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod healthcheck;
pub mod indexer;
pub mod ingestor;
pub mod lifecycle;
pub mod options;
pub mod processor;
pub mod progress;
pub mod propagator;
pub mod provider;
pub mod queue;

pub use error::{DispatchError, ExecutorError, ProviderError};
