//! Versioned checkpoint format
//!
//! A checkpoint captures an interrupted engine run: cursors, the partially
//! assigned pools of the pass in progress and the best result so far.
//! Payloads carry an explicit format version and are rejected when the
//! version is not understood.

use crate::engine::EngineProgress;
use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub instance_id: String,
    pub unit_ids: Vec<String>,
    /// Incremented every time the same units are checkpointed again
    pub generation: u32,
    pub progress: EngineProgress,
    pub created_at: i64,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Checkpoint {
    pub fn new(
        instance_id: impl Into<String>,
        unit_ids: Vec<String>,
        generation: u32,
        progress: EngineProgress,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            instance_id: instance_id.into(),
            unit_ids,
            generation,
            progress,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn key(&self) -> String {
        checkpoint_key(&self.instance_id, &self.unit_ids)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| OptimizerError::Checkpoint(format!("unreadable checkpoint: {}", e)))?;
        if probe.version != CHECKPOINT_VERSION {
            return Err(OptimizerError::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {})",
                probe.version, CHECKPOINT_VERSION
            )));
        }
        serde_json::from_slice(bytes)
            .map_err(|e| OptimizerError::Checkpoint(format!("corrupt checkpoint: {}", e)))
    }
}

/// Cache key for a set of units; independent of the order the ids are given in
pub fn checkpoint_key(instance_id: &str, unit_ids: &[String]) -> String {
    let mut ids: Vec<&str> = unit_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    format!("checkpoint:{}:{}", instance_id, &digest[..16])
}
