//! The analyzer: scans bounded block ranges, correlates cross-chain job
//! phases, and exports the result as a JSON archive.

use std::{path::Path, sync::Arc};

use alloy::{
    consensus::Transaction as _,
    providers::Provider,
    rpc::types::{Log, Transaction},
};
use anyhow::Context;
use holograph_types::{
    bridge::{executeJobCall, inbound_job_type, outbound_job_type},
    event::{decode_logs, verified_bridge_payload},
    filter_interesting, ArchivedDeployment, ArchivedJob, ArchivedLog, Chain, DecodedEvent,
    NetworksConfig, PhaseRecord, ProtocolError,
};
use alloy::sol_types::SolCall;
use serde::Deserialize;

use crate::{
    correlator::{JobCorrelator, PhaseReport},
    indexer::protocol_filters,
    options::{AnalyzeArgs, Cli},
    provider::ProviderPool,
};

/// One entry of the `--scope` argument. An `endBlock` of 0 means the chain
/// head at run time.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScopeEntry {
    pub network: String,
    pub start_block: u64,
    pub end_block: u64,
}

/// Everything the analyzer accumulates before export.
#[derive(Debug, Default)]
pub struct AnalyzerOutput {
    pub completed: Vec<ArchivedJob>,
    pub deployments: Vec<ArchivedDeployment>,
}

/// Feed one receipt into the phase index. Pure apart from the index
/// mutation; protocol mismatches reject the receipt.
pub fn observe_receipt(
    correlator: &mut JobCorrelator,
    chain: &Chain,
    block: u64,
    tx: &Transaction,
    logs: &[Log],
    out: &mut AnalyzerOutput,
) -> Result<(), ProtocolError> {
    let record = PhaseRecord {
        tx: *tx.inner.tx_hash(),
        network: chain.name.clone(),
        block,
    };

    if let Some((job_hash, _)) = verified_bridge_payload(logs, chain.peers.messaging_module)? {
        let report = PhaseReport::Origin {
            job_hash,
            job_type: outbound_job_type(tx.input()),
            record: record.clone(),
        };
        if let Some(job) = correlator.report(report) {
            out.completed.push(ArchivedJob::from(&job));
        }
    }

    for event in decode_logs(logs) {
        let report = match event {
            DecodedEvent::ContractDeployed {
                contract,
                config_hash,
            } => {
                out.deployments.push(ArchivedDeployment {
                    tx: record.tx,
                    network: chain.name.clone(),
                    block,
                    contract_address: contract,
                    config_hash,
                });
                continue;
            },
            DecodedEvent::AvailableJob { payload } => PhaseReport::Available {
                job_hash: alloy::primitives::keccak256(&payload),
                record: record.clone(),
                completed: false,
            },
            DecodedEvent::AvailableOperatorJob { job_hash, .. } => PhaseReport::Available {
                job_hash,
                record: record.clone(),
                completed: false,
            },
            DecodedEvent::FinishedOperatorJob { job_hash, .. } => {
                let job_type = executeJobCall::abi_decode(tx.input(), true)
                    .map(|call| inbound_job_type(&call.payload))
                    .unwrap_or_default();
                PhaseReport::Executed {
                    job_hash,
                    job_type,
                    record: record.clone(),
                }
            },
            _ => continue,
        };
        if let Some(job) = correlator.report(report) {
            out.completed.push(ArchivedJob::from(&job));
        }
    }
    Ok(())
}

/// Reconstruct the working state from a previously exported archive.
///
/// Jobs with all three phases stay archived; the rest re-enter the index
/// with their phase counts re-derived from the non-empty phase fields.
pub fn reload_archive(
    archive: &[ArchivedLog],
) -> (JobCorrelator, AnalyzerOutput) {
    let mut jobs = vec![];
    let mut out = AnalyzerOutput::default();
    for log in archive {
        match log {
            ArchivedLog::AvailableJob(job) => {
                if job.origin_tx.is_some() && job.available_tx.is_some() && job.operator_tx.is_some()
                {
                    out.completed.push(job.clone());
                } else {
                    jobs.push(job.clone());
                }
            },
            ArchivedLog::ContractDeployment(deployment) => {
                out.deployments.push(deployment.clone());
            },
        }
    }
    (JobCorrelator::from_archive(&jobs), out)
}

/// Serialize the analyzer state into the archive representation: completed
/// jobs, still-active jobs, then deployments.
pub fn export_archive(correlator: &JobCorrelator, out: &AnalyzerOutput) -> Vec<ArchivedLog> {
    let mut archive: Vec<ArchivedLog> = out
        .completed
        .iter()
        .cloned()
        .map(ArchivedLog::AvailableJob)
        .collect();
    let mut active: Vec<ArchivedJob> = correlator.active().map(ArchivedJob::from).collect();
    active.sort_by_key(|job| job.job_hash);
    archive.extend(active.into_iter().map(ArchivedLog::AvailableJob));
    archive.extend(
        out.deployments
            .iter()
            .cloned()
            .map(ArchivedLog::ContractDeployment),
    );
    archive
}

fn write_archive(path: &Path, archive: &[ArchivedLog]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(archive)?;
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

fn read_archive(path: &Path) -> anyhow::Result<Vec<ArchivedLog>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("parsing job archive {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
        Err(err) => Err(err).with_context(|| format!("reading job archive {}", path.display())),
    }
}

/// Run the `analyze` subcommand to completion.
pub async fn run(cli: &Cli, args: &AnalyzeArgs) -> anyhow::Result<()> {
    let scope: Vec<ScopeEntry> =
        serde_json::from_str(&args.scope).context("parsing --scope JSON")?;
    anyhow::ensure!(!scope.is_empty(), "empty analyze scope");

    let networks = NetworksConfig::load(&cli.networks_path())?;
    let names: Vec<String> = scope.iter().map(|s| s.network.clone()).collect();
    let chains = networks.select(&names)?;
    let pool = Arc::new(ProviderPool::new(chains.clone(), args.provider.clone()));
    let filters = protocol_filters(&chains);

    let (mut correlator, mut out) = reload_archive(&read_archive(&args.output)?);

    for entry in &scope {
        let chain = chains
            .iter()
            .find(|c| c.name == entry.network)
            .expect("scope networks were selected above")
            .clone();
        let provider = pool.chain(&chain.name).expect("chain configured");
        let client = provider.client().await?;

        let end_block = if entry.end_block == 0 {
            client.get_block_number().await.with_context(|| {
                format!("fetching head of {} for open-ended scope", chain.name)
            })?
        } else {
            entry.end_block
        };
        tracing::info!(
            chain = %chain.name,
            start = entry.start_block,
            end = end_block,
            "analyzing block range"
        );

        for number in entry.start_block..=end_block {
            let Some(block) = client
                .get_block(number.into())
                .full()
                .await
                .with_context(|| format!("fetching block {number} on {}", chain.name))?
            else {
                tracing::warn!(chain = %chain.name, number, "block missing, skipping");
                continue;
            };
            let txs = block.transactions.as_transactions().unwrap_or_default();
            for tx in filter_interesting(&chain.name, &filters, txs) {
                let tx_hash = *tx.inner.tx_hash();
                let Some(receipt) = client.get_transaction_receipt(tx_hash).await? else {
                    tracing::info!(%tx_hash, "no receipt, skipping");
                    continue;
                };
                let logs = receipt.inner.logs().to_vec();
                if let Err(err) =
                    observe_receipt(&mut correlator, &chain, number, tx, &logs, &mut out)
                {
                    tracing::warn!(%tx_hash, "rejected receipt: {err}");
                }
            }
        }
    }

    let archive = export_archive(&correlator, &out);
    write_archive(&args.output, &archive)?;
    tracing::info!(
        path = %args.output.display(),
        completed = out.completed.len(),
        active = correlator.len(),
        deployments = out.deployments.len(),
        "wrote job archive"
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, b256, keccak256, Address, Bytes, LogData, B256, U256};
    use alloy::sol_types::SolEvent;
    use holograph_types::{
        bridge::{erc721outCall, executeJobCall},
        event::{
            AvailableOperatorJob, CrossChainMessageSent, FinishedOperatorJob, PacketLegacy,
            LZ_PACKET_PREFIX_LEN,
        },
        JobType, PeerAddresses,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::processor::test_support::{tx, ALICE};

    const MODULE: Address = address!("00000000000000000000000000000000000000e1");

    fn chain(name: &str) -> Chain {
        Chain {
            name: name.into(),
            chain_id: 5,
            holograph_id: 4_000_000_001,
            endpoint: "wss://rpc.example.test".parse().unwrap(),
            peers: PeerAddresses {
                bridge: address!("00000000000000000000000000000000000000b1"),
                factory: address!("00000000000000000000000000000000000000f1"),
                operator: address!("00000000000000000000000000000000000000c1"),
                layer_zero_receiver: address!("00000000000000000000000000000000000000d1"),
                messaging_module: MODULE,
            },
        }
    }

    fn rpc_log(addr: Address, data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: addr,
                data,
            },
            block_hash: None,
            block_number: None,
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: None,
            removed: false,
        }
    }

    fn bridge_payload() -> Bytes {
        let call = erc721outCall {
            toChain: 4_000_000_002,
            collection: address!("00000000000000000000000000000000000000aa"),
            from: ALICE,
            to: ALICE,
            tokenId: U256::from(7),
        };
        call.abi_encode().into()
    }

    /// Scenario: bridge-out on chain A, job available and executed on
    /// chain B.
    #[test]
    fn test_full_cross_chain_correlation() {
        let payload = bridge_payload();
        let job_hash = keccak256(&payload);

        let chain_a = chain("goerli");
        let chain_b = chain("mumbai");
        let mut correlator = JobCorrelator::new();
        let mut out = AnalyzerOutput::default();

        // Chain A: bridge-out transaction with the verified packet pair.
        let mut packet = vec![0u8; LZ_PACKET_PREFIX_LEN];
        packet.extend_from_slice(&payload);
        let origin_logs = vec![
            rpc_log(
                chain_a.peers.bridge,
                CrossChainMessageSent {
                    messageHash: job_hash,
                }
                .encode_log_data(),
            ),
            rpc_log(
                MODULE,
                PacketLegacy {
                    chainId: 10002,
                    payload: packet.into(),
                }
                .encode_log_data(),
            ),
        ];
        let origin_tx = tx(ALICE, chain_a.peers.bridge, 0, &bridge_payload());
        observe_receipt(&mut correlator, &chain_a, 100, &origin_tx, &origin_logs, &mut out)
            .unwrap();
        assert_eq!(correlator.len(), 1);

        // Chain B: the operator pool advertises the job.
        let available_logs = vec![rpc_log(
            chain_b.peers.operator,
            AvailableOperatorJob {
                jobHash: job_hash,
                payload: payload.clone(),
            }
            .encode_log_data(),
        )];
        let available_tx = tx(ALICE, chain_b.peers.layer_zero_receiver, 1, &[]);
        observe_receipt(
            &mut correlator,
            &chain_b,
            50,
            &available_tx,
            &available_logs,
            &mut out,
        )
        .unwrap();

        // Chain B: an operator executes the job.
        let finished_logs = vec![rpc_log(
            chain_b.peers.operator,
            FinishedOperatorJob {
                jobHash: job_hash,
                operator: ALICE,
            }
            .encode_log_data(),
        )];
        let execute_input = executeJobCall {
            payload: payload.clone(),
        }
        .abi_encode();
        let executed_tx = tx(ALICE, chain_b.peers.operator, 2, &execute_input);
        observe_receipt(
            &mut correlator,
            &chain_b,
            51,
            &executed_tx,
            &finished_logs,
            &mut out,
        )
        .unwrap();

        assert!(correlator.is_empty(), "job evicted on third phase");
        assert_eq!(out.completed.len(), 1);
        let job = &out.completed[0];
        assert_eq!(job.job_type, JobType::Erc721);
        assert_eq!(job.origin_network.as_deref(), Some("goerli"));
        assert_eq!(job.operator_network.as_deref(), Some("mumbai"));
        assert!(job.completed);
    }

    #[test]
    fn test_corrupted_packet_rejected() {
        let payload = bridge_payload();
        let chain_a = chain("goerli");
        let mut correlator = JobCorrelator::new();
        let mut out = AnalyzerOutput::default();

        let mut packet = vec![0u8; LZ_PACKET_PREFIX_LEN];
        packet.extend_from_slice(&payload);
        let logs = vec![
            rpc_log(
                chain_a.peers.bridge,
                CrossChainMessageSent {
                    messageHash: b256!(
                        "00000000000000000000000000000000000000000000000000000000000000ff"
                    ),
                }
                .encode_log_data(),
            ),
            rpc_log(
                MODULE,
                PacketLegacy {
                    chainId: 10002,
                    payload: packet.into(),
                }
                .encode_log_data(),
            ),
        ];
        let origin_tx = tx(ALICE, chain_a.peers.bridge, 0, &bridge_payload());
        let err = observe_receipt(&mut correlator, &chain_a, 100, &origin_tx, &logs, &mut out)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::JobHashMismatch { .. }));
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_archive_reload_is_idempotent() {
        let payload = bridge_payload();
        let job_hash = keccak256(&payload);
        let chain_b = chain("mumbai");
        let mut correlator = JobCorrelator::new();
        let mut out = AnalyzerOutput::default();

        // Only one phase observed: the job stays active.
        let available_logs = vec![rpc_log(
            chain_b.peers.operator,
            AvailableOperatorJob {
                jobHash: job_hash,
                payload,
            }
            .encode_log_data(),
        )];
        let available_tx = tx(ALICE, chain_b.peers.layer_zero_receiver, 1, &[]);
        observe_receipt(
            &mut correlator,
            &chain_b,
            50,
            &available_tx,
            &available_logs,
            &mut out,
        )
        .unwrap();

        let archive = export_archive(&correlator, &out);
        let (reloaded, reloaded_out) = reload_archive(&archive);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded_out.completed.len(), 0);
        assert_eq!(
            reloaded.active().next().unwrap().phase_count(),
            1,
        );

        // A second reload round-trips to the identical archive.
        let archive2 = export_archive(&reloaded, &reloaded_out);
        assert_eq!(archive, archive2);
    }

    #[test]
    fn test_archive_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");

        let deployment = ArchivedDeployment {
            tx: B256::repeat_byte(0xaa),
            network: "goerli".into(),
            block: 1001,
            contract_address: address!("00000000000000000000000000000000000000aa"),
            config_hash: B256::repeat_byte(0xbb),
        };
        let archive = vec![ArchivedLog::ContractDeployment(deployment)];
        write_archive(&path, &archive).unwrap();
        assert_eq!(read_archive(&path).unwrap(), archive);

        // Missing file reads as empty.
        assert_eq!(read_archive(&dir.path().join("nope.json")).unwrap(), vec![]);
    }
}
