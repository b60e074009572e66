//! Deterministic control kernel for the criticality synthesis protocol.
//!
//! The kernel advances an artifact-producing pipeline through a fixed phase
//! sequence, records every decision to an append-only ledger with
//! cascade-aware revision, regresses to earlier interview phases when the
//! auditor reports contradictions, and survives crashes through atomic
//! checkpoints. Expensive work (model calls, compilation, testing) lives
//! behind the [`external`] traits and runs between ticks; the kernel
//! classifies, it never infers.

pub mod artifact;
pub mod blocking;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod external;
pub mod ledger;
pub mod orchestrator;
pub mod phase;
pub mod regression;
pub mod state;
pub mod transition;
pub mod util;

pub use artifact::{ArtifactSet, ArtifactType};
pub use errors::{CheckpointError, LedgerError, RegressionError, TransitionError};
pub use phase::{DecisionPhase, InterviewPhase, ProtocolPhase};
pub use state::{ProtocolState, StateSnapshot, Substate};
