//! Blocking query lifecycle.
//!
//! A blocking query records the moment the protocol halted for human input.
//! Records are append-only: opening one allocates a fresh id, resolving one
//! attaches a resolution and freezes the record. Timeout evaluation is pure
//! arithmetic over `now - blocked_at`, so the orchestrator decides when to
//! sample the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::phase::ProtocolPhase;

/// A single halted-for-human-input episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingRecord {
    pub id: String,
    pub phase: ProtocolPhase,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(rename = "blockedAt")]
    pub blocked_at: DateTime<Utc>,
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<BlockingResolution>,
}

impl BlockingRecord {
    /// Whether the timeout has elapsed at `now`. Records without a timeout
    /// never expire; resolved records are no longer eligible.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        match self.timeout_ms {
            Some(timeout_ms) => {
                let elapsed = now.signed_duration_since(self.blocked_at);
                elapsed.num_milliseconds() >= 0 && elapsed.num_milliseconds() as u64 > timeout_ms
            }
            None => false,
        }
    }
}

/// The human response attached to a resolved record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingResolution {
    #[serde(rename = "queryId")]
    pub query_id: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(rename = "resolvedAt")]
    pub resolved_at: DateTime<Utc>,
}

/// Errors from the blocking registry.
#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("Blocking query {id} not found")]
    NotFound { id: String },

    #[error("Blocking query {id} is already resolved and immutable")]
    AlreadyResolved { id: String },
}

/// Owns the ordered blocking records for one protocol instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockingRegistry {
    records: Vec<BlockingRecord>,
}

impl BlockingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted records (checkpoint resume path).
    pub fn from_records(records: Vec<BlockingRecord>) -> Self {
        Self { records }
    }

    /// Open a new blocking query, returning the allocated record.
    pub fn open(
        &mut self,
        phase: ProtocolPhase,
        query: impl Into<String>,
        options: Option<Vec<String>>,
        timeout_ms: Option<u64>,
    ) -> &BlockingRecord {
        let record = BlockingRecord {
            id: Uuid::new_v4().to_string(),
            phase,
            query: query.into(),
            options,
            blocked_at: Utc::now(),
            timeout_ms,
            resolved: false,
            resolution: None,
        };
        self.records.push(record);
        self.records.last().expect("record just pushed")
    }

    /// Resolve an open query. Resolved records are immutable, so resolving
    /// twice fails.
    pub fn resolve(
        &mut self,
        query_id: &str,
        response: impl Into<String>,
        rationale: Option<String>,
    ) -> Result<&BlockingRecord, BlockingError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == query_id)
            .ok_or_else(|| BlockingError::NotFound {
                id: query_id.to_string(),
            })?;

        if record.resolved {
            return Err(BlockingError::AlreadyResolved {
                id: query_id.to_string(),
            });
        }

        record.resolution = Some(BlockingResolution {
            query_id: query_id.to_string(),
            response: response.into(),
            rationale,
            resolved_at: Utc::now(),
        });
        record.resolved = true;
        Ok(record)
    }

    pub fn get(&self, query_id: &str) -> Option<&BlockingRecord> {
        self.records.iter().find(|r| r.id == query_id)
    }

    /// Unresolved records, in open order.
    pub fn pending(&self) -> Vec<&BlockingRecord> {
        self.records.iter().filter(|r| !r.resolved).collect()
    }

    pub fn records(&self) -> &[BlockingRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BlockingRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
