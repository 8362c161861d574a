//! The write path: gas policy, nonce-safe submission and bounded receipt
//! waiting for contract calls.

use std::time::Duration;

use alloy::{
    contract::SolCallBuilder,
    primitives::{Address, Bytes, B256},
    providers::Provider,
    rpc::types::TransactionReceipt,
    sol,
    sol_types::SolCall,
};
use holograph_types::Chain;
use tokio::time::sleep;

use crate::error::{ExecutorError, ProviderError};

sol! {
    #[sol(rpc)]
    contract HolographOperator {
        function executeJob(bytes calldata payload) external payable;
    }
}

/// Revert strings the operator contract produces when a job was already
/// executed. Gas estimation hitting one of these is a completion signal, not
/// a failure.
const ALREADY_EXECUTED_MARKERS: &[&str] = &["HOLOGRAPH: invalid job", "HOLOGRAPH: job completed"];

/// Submission errors worth retrying: nonce races and dropped sockets.
const TRANSIENT_SUBMIT_MARKERS: &[&str] = &[
    "nonce too low",
    "replacement transaction underpriced",
    "already known",
    "connection closed",
    "connection reset",
    "backend gone",
    "tcp connect error",
];

#[derive(Clone, Debug)]
pub struct ExecutorOptions {
    /// Submission attempts for transient errors.
    pub submit_attempts: usize,
    pub submit_retry_delay: Duration,
    /// Receipt polling attempts; the interval doubles from min to max.
    pub receipt_attempts: usize,
    pub receipt_interval_min: Duration,
    pub receipt_interval_max: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_retry_delay: Duration::from_secs(1),
            receipt_attempts: 10,
            receipt_interval_min: Duration::from_millis(500),
            receipt_interval_max: Duration::from_secs(10),
        }
    }
}

fn matches_any(message: &str, markers: &[&str]) -> bool {
    let message = message.to_lowercase();
    markers.iter().any(|m| message.contains(&m.to_lowercase()))
}

pub(crate) fn is_already_executed(message: &str) -> bool {
    matches_any(message, ALREADY_EXECUTED_MARKERS)
}

pub(crate) fn is_transient_submission(message: &str) -> bool {
    matches_any(message, TRANSIENT_SUBMIT_MARKERS)
}

/// The gas price to submit with: the provider quote with the per-chain bump
/// applied (mumbai underquotes, see [`Chain::gas_price_bump`]).
pub async fn gas_price(provider: &impl Provider, chain: &Chain) -> Result<u128, ExecutorError> {
    let quoted = provider
        .get_gas_price()
        .await
        .map_err(|err| ExecutorError::Provider(ProviderError::from_rpc(&chain.name, err)))?;
    Ok((quoted as f64 * chain.gas_price_bump()).ceil() as u128)
}

/// Estimate the gas limit of a call. `None` means the call reverted with the
/// already-executed signal: the work is done, there is nothing to submit.
pub async fn get_gas_limit<T, P, C>(
    call: &SolCallBuilder<T, P, C>,
) -> Result<Option<u64>, ExecutorError>
where
    P: Provider,
    C: SolCall + Send + Sync,
{
    match call.estimate_gas().await {
        Ok(gas) => Ok(Some(gas)),
        Err(err) => {
            let message = err.to_string();
            if is_already_executed(&message) {
                Ok(None)
            } else {
                Err(ExecutorError::Estimation(message))
            }
        },
    }
}

/// Whether an operator job has already been executed on the destination
/// chain. Drives the `completed` flag of the available phase.
pub async fn validate_operator_job(
    provider: impl Provider,
    operator: Address,
    payload: Bytes,
) -> Result<bool, ExecutorError> {
    let contract = HolographOperator::new(operator, provider);
    let call = contract.executeJob(payload);
    Ok(get_gas_limit(&call).await?.is_none())
}

/// Submit a contract call with the gas policy applied.
///
/// Returns `Ok(None)` when gas estimation reports the work already done, or
/// when `wait_for_receipt` is false; otherwise waits for the receipt within
/// the bounded budget.
pub async fn execute_transaction<T, P, C>(
    chain: &Chain,
    provider: &impl Provider,
    call: SolCallBuilder<T, P, C>,
    wait_for_receipt: bool,
    opt: &ExecutorOptions,
) -> Result<Option<TransactionReceipt>, ExecutorError>
where
    P: Provider,
    C: SolCall + Send + Sync,
{
    let price = gas_price(provider, chain).await?;
    let Some(gas_limit) = get_gas_limit(&call).await? else {
        tracing::info!(chain = %chain.name, "call already executed, skipping submission");
        return Ok(None);
    };
    let call = call.gas(gas_limit).gas_price(price);

    let mut attempt = 0;
    let pending = loop {
        attempt += 1;
        match call.send().await {
            Ok(pending) => break pending,
            Err(err) => {
                let message = err.to_string();
                if attempt < opt.submit_attempts && is_transient_submission(&message) {
                    tracing::warn!(
                        chain = %chain.name,
                        attempt,
                        "transient submission failure, retrying: {message}"
                    );
                    sleep(opt.submit_retry_delay).await;
                } else {
                    return Err(ExecutorError::Submission(message));
                }
            },
        }
    };

    let tx_hash = *pending.tx_hash();
    tracing::info!(chain = %chain.name, %tx_hash, gas_limit, price, "submitted transaction");
    if !wait_for_receipt {
        return Ok(None);
    }
    wait_for_receipt_bounded(provider, chain, tx_hash, opt)
        .await
        .map(Some)
}

/// Poll for the receipt of a submitted transaction, doubling the interval
/// from the configured minimum up to the maximum.
pub async fn wait_for_receipt_bounded(
    provider: &impl Provider,
    chain: &Chain,
    tx_hash: B256,
    opt: &ExecutorOptions,
) -> Result<TransactionReceipt, ExecutorError> {
    let mut interval = opt.receipt_interval_min;
    for attempt in 1..=opt.receipt_attempts {
        match provider.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {
                tracing::debug!(chain = %chain.name, %tx_hash, attempt, "receipt not yet available");
            },
            Err(err) => {
                tracing::warn!(chain = %chain.name, %tx_hash, attempt, "receipt fetch failed: {err:#}");
            },
        }
        if attempt < opt.receipt_attempts {
            sleep(interval).await;
            interval = (interval * 2).min(opt.receipt_interval_max);
        }
    }
    Err(ExecutorError::ReceiptTimeout {
        attempts: opt.receipt_attempts,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_already_executed_classification() {
        assert!(is_already_executed(
            "server returned an error response: execution reverted: HOLOGRAPH: invalid job"
        ));
        assert!(!is_already_executed("execution reverted: HOLOGRAPH: not enough gas"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient_submission("code -32000: nonce too low"));
        assert!(is_transient_submission("Connection reset by peer"));
        assert!(!is_transient_submission("execution reverted"));
        assert!(!is_transient_submission("insufficient funds for gas * price + value"));
    }

    #[test]
    fn test_interval_doubles_to_cap() {
        let opt = ExecutorOptions::default();
        let mut interval = opt.receipt_interval_min;
        let mut total = Duration::ZERO;
        for _ in 1..opt.receipt_attempts {
            total += interval;
            interval = (interval * 2).min(opt.receipt_interval_max);
        }
        assert_eq!(interval, opt.receipt_interval_max);
        // The full budget stays within attempts * max.
        assert!(total < opt.receipt_interval_max * opt.receipt_attempts as u32);
    }
}
