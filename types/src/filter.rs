use std::collections::{BTreeMap, HashSet};

use alloy::{
    consensus::Transaction as _,
    primitives::{Address, TxKind},
    rpc::types::Transaction,
};

/// An address a filter matches against: fixed, or looked up per chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterAddress {
    Static(Address),
    /// Per-chain substitution, keyed by chain name. A chain with no entry
    /// never matches.
    PerChain(BTreeMap<String, Address>),
}

impl FilterAddress {
    fn resolve(&self, chain: &str) -> Option<Address> {
        match self {
            Self::Static(addr) => Some(*addr),
            Self::PerChain(map) => map.get(chain).copied(),
        }
    }
}

impl From<Address> for FilterAddress {
    fn from(addr: Address) -> Self {
        Self::Static(addr)
    }
}

/// One declarative rule deciding whether a transaction is interesting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionFilter {
    /// Match when the transaction is sent to the address.
    To(FilterAddress),
    /// Match when the transaction is sent from the address.
    From(FilterAddress),
    /// Match when the first four bytes of calldata equal the selector.
    FunctionSelector([u8; 4]),
}

impl TransactionFilter {
    pub fn matches(&self, chain: &str, tx: &Transaction) -> bool {
        match self {
            Self::To(addr) => match (addr.resolve(chain), tx.kind()) {
                (Some(addr), TxKind::Call(to)) => to == addr,
                _ => false,
            },
            Self::From(addr) => addr.resolve(chain) == Some(tx.inner.signer()),
            Self::FunctionSelector(selector) => {
                tx.input().len() >= 4 && tx.input()[..4] == selector[..]
            },
        }
    }
}

/// Apply a rule set to a block's transactions.
///
/// A transaction admitted by more than one rule is returned exactly once, in
/// block order.
pub fn filter_interesting<'a>(
    chain: &str,
    filters: &[TransactionFilter],
    txs: impl IntoIterator<Item = &'a Transaction>,
) -> Vec<&'a Transaction> {
    let mut seen = HashSet::new();
    txs.into_iter()
        .filter(|tx| filters.iter().any(|f| f.matches(chain, tx)))
        .filter(|tx| seen.insert(*tx.inner.tx_hash()))
        .collect()
}
