//! The typed error taxonomy of the monitor.
//!
//! Transient transport conditions are recovered inside the provider pool and
//! never reach callers; everything else is surfaced as a typed result and
//! handled by policy at the call site.

use alloy::transports::{RpcError, TransportErrorKind};

/// An error surfaced by the provider pool to callers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Reconnection was exhausted; there is no usable client for the chain.
    #[error("transport for chain {chain} unavailable after {attempts} reconnect attempts")]
    TransportUnavailable { chain: String, attempts: usize },
    /// An RPC call failed. `transient` tells the caller whether retrying is
    /// reasonable.
    #[error("rpc error on chain {chain}: {message}")]
    Rpc {
        chain: String,
        message: String,
        transient: bool,
    },
}

impl ProviderError {
    pub fn transient(&self) -> bool {
        match self {
            Self::TransportUnavailable { .. } => false,
            Self::Rpc { transient, .. } => *transient,
        }
    }

    pub fn from_rpc(chain: &str, err: RpcError<TransportErrorKind>) -> Self {
        let transient = match &err {
            RpcError::Transport(_) => true,
            // 429 Too Many Requests comes back as an error response.
            RpcError::ErrorResp(resp) => resp.code == 429,
            _ => false,
        };
        Self::Rpc {
            chain: chain.into(),
            message: err.to_string(),
            transient,
        }
    }
}

/// A downstream dispatch failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("message queue unreachable: {0}")]
    QueueUnreachable(String),
    #[error("queue send failed after {attempts} attempts: {message}")]
    QueueExhausted { attempts: u32, message: String },
    #[error("api request failed: {0}")]
    Api(String),
    #[error("api authentication failed: {0}")]
    Auth(String),
}

/// A write-path failure from the transaction executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("gas estimation failed: {0}")]
    Estimation(String),
    #[error("transaction submission failed: {0}")]
    Submission(String),
    #[error("no receipt after {attempts} attempts")]
    ReceiptTimeout { attempts: usize },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
