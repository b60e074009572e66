//! Collaborator contracts the kernel consumes.
//!
//! Expensive work (model calls, compilation, testing, archival) happens
//! outside the kernel, between ticks. The kernel only sees these traits and
//! the `ActionResult` shape they report. Notification delivery is strictly
//! best-effort: the orchestrator absorbs every notification failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactType;
use crate::phase::ProtocolPhase;

/// What an external operation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<ArtifactType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
}

impl ActionResult {
    pub fn ok(artifacts: Vec<ArtifactType>) -> Self {
        Self {
            success: true,
            artifacts: Some(artifacts),
            error: None,
            recoverable: None,
        }
    }

    pub fn failed(error: impl Into<String>, recoverable: bool) -> Self {
        Self {
            success: false,
            artifacts: None,
            error: Some(error.into()),
            recoverable: Some(recoverable),
        }
    }
}

/// The expensive operations a collaborator runs between ticks.
#[async_trait]
pub trait ExternalOperations: Send + Sync {
    /// Invoke the model for the given phase.
    async fn execute_model_call(&self, phase: ProtocolPhase) -> ActionResult;

    /// Compile the current artifact tree.
    async fn run_compilation(&self) -> ActionResult;

    /// Run the test suite.
    async fn run_tests(&self) -> ActionResult;

    /// Move a phase's working artifacts into cold storage.
    async fn archive_phase_artifacts(&self, phase: ProtocolPhase) -> ActionResult;

    /// Tell a human the protocol is blocked on them.
    async fn send_blocking_notification(&self, query: &str);
}

/// Protocol lifecycle events surfaced to the notification transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    Block,
    Complete,
    Error,
    PhaseChange,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::Block => "block",
            NotifyEvent::Complete => "complete",
            NotifyEvent::Error => "error",
            NotifyEvent::PhaseChange => "phase_change",
        }
    }
}

impl std::fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound notification transport. Failures never affect protocol state.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, event: NotifyEvent, payload: serde_json::Value) -> anyhow::Result<()>;
}
