//! Ledger serialization: the on-disk document and round-trip construction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Decision, DecisionLedger};
use crate::util::write_atomic;

/// Format version written into new ledger files.
pub const LEDGER_FORMAT_VERSION: &str = "1.0.0";

/// Header of a serialized ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub version: String,
    pub created: DateTime<Utc>,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// The serialized ledger: header plus every row in append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFile {
    pub meta: LedgerMeta,
    pub decisions: Vec<Decision>,
}

impl LedgerFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger file: {}", path.display()))?;
        let file: LedgerFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger JSON: {}", path.display()))?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize ledger to JSON")?;
        write_atomic(path, &content)
            .with_context(|| format!("Failed to write ledger file: {}", path.display()))?;
        Ok(())
    }
}

impl DecisionLedger {
    /// Rebuild a ledger from a serialized document. Every row goes through
    /// the full load-path validation; after the rebuild, any dependency that
    /// still points at a missing id is rejected. Counters end at least as
    /// high as the highest id observed per category.
    pub fn from_data(file: &LedgerFile) -> Result<Self, crate::errors::LedgerError> {
        let mut ledger = DecisionLedger::new();
        for decision in &file.decisions {
            ledger.append_with_id(decision.clone())?;
        }
        for decision in ledger.rows() {
            for dep in &decision.dependencies {
                if ledger.get(dep).is_none() {
                    return Err(crate::errors::LedgerError::DependencyNotFound {
                        id: decision.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(ledger)
    }

    /// Snapshot this ledger into a serializable document.
    pub fn to_data(&self, project: &str) -> LedgerFile {
        let now = Utc::now();
        LedgerFile {
            meta: LedgerMeta {
                version: LEDGER_FORMAT_VERSION.to_string(),
                created: now,
                project: project.to_string(),
                last_modified: Some(now),
            },
            decisions: self.rows().to_vec(),
        }
    }
}
