//! Per-chain last-processed block heights, persisted across restarts.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use parking_lot::RwLock;

/// The progress snapshot: `chain name → last fully-handled block height`.
///
/// Heights only move forward. The snapshot is written atomically (temp file
/// plus rename) so a crash mid-write never corrupts it; on clean shutdown it
/// is a lower bound on what was dispatched downstream.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    heights: RwLock<BTreeMap<String, u64>>,
}

impl ProgressStore {
    /// Load the snapshot from `path`. A missing file is an empty snapshot:
    /// every chain starts from the current head.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let heights = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing progress file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading progress file {}", path.display()))
            },
        };
        Ok(Self {
            path,
            heights: RwLock::new(heights),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved height for a chain. Zero or absent means "start from head".
    pub fn get(&self, chain: &str) -> u64 {
        self.heights.read().get(chain).copied().unwrap_or(0)
    }

    /// Record a fully-handled block. Stale updates are ignored.
    pub fn update(&self, chain: &str, height: u64) {
        let mut heights = self.heights.write();
        let entry = heights.entry(chain.to_string()).or_insert(0);
        if height > *entry {
            *entry = height;
        }
    }

    /// Persist the snapshot atomically.
    pub fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.heights.read().clone();
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        tracing::info!(path = %self.path.display(), "saved progress snapshot");
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.heights.read().clone()
    }
}
