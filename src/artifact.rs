//! Artifact types and the ordered artifact set.
//!
//! Artifacts are the named deliverables each phase produces; forward and
//! failure transitions gate on their presence. The set preserves insertion
//! order so snapshots serialize deterministically.

use serde::{Deserialize, Serialize};

/// Closed set of artifact kinds observable at the kernel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactType {
    /// The authored specification document
    Spec,
    /// Generated structural (lattice) code
    LatticeCode,
    /// Type/invariant witnesses
    Witnesses,
    /// Behavioral contracts
    Contracts,
    /// Structure validated by the composition audit
    ValidatedStructure,
    /// Implemented code from the injection phase
    ImplementedCode,
    /// Code verified by mesoscopic testing
    VerifiedCode,
    /// The final deliverable
    FinalArtifact,
    /// Auditor contradiction report (drives CompositionAudit rollback)
    ContradictionReport,
    /// Structural defect report (drives Injection rollback)
    StructuralDefectReport,
    /// Cluster failure report (drives Mesoscopic rollback)
    ClusterFailureReport,
}

impl ArtifactType {
    /// All artifact kinds in declaration order.
    pub const ALL: [ArtifactType; 11] = [
        ArtifactType::Spec,
        ArtifactType::LatticeCode,
        ArtifactType::Witnesses,
        ArtifactType::Contracts,
        ArtifactType::ValidatedStructure,
        ArtifactType::ImplementedCode,
        ArtifactType::VerifiedCode,
        ArtifactType::FinalArtifact,
        ArtifactType::ContradictionReport,
        ArtifactType::StructuralDefectReport,
        ArtifactType::ClusterFailureReport,
    ];

    /// The wire name used in snapshots and checkpoint files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Spec => "spec",
            ArtifactType::LatticeCode => "latticeCode",
            ArtifactType::Witnesses => "witnesses",
            ArtifactType::Contracts => "contracts",
            ArtifactType::ValidatedStructure => "validatedStructure",
            ArtifactType::ImplementedCode => "implementedCode",
            ArtifactType::VerifiedCode => "verifiedCode",
            ArtifactType::FinalArtifact => "finalArtifact",
            ArtifactType::ContradictionReport => "contradictionReport",
            ArtifactType::StructuralDefectReport => "structuralDefectReport",
            ArtifactType::ClusterFailureReport => "clusterFailureReport",
        }
    }

    /// Parse a wire name. Returns `None` for anything outside the closed set,
    /// so callers can surface unknown artifacts as warnings instead of errors.
    pub fn parse(s: &str) -> Option<ArtifactType> {
        ArtifactType::ALL.iter().copied().find(|a| a.as_str() == s)
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-free collection of artifacts.
///
/// Serializes as a plain JSON array. Insertion order is preserved; inserting
/// an artifact that is already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet(Vec<ArtifactType>);

impl ArtifactSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_slice(artifacts: &[ArtifactType]) -> Self {
        let mut set = Self::new();
        for a in artifacts {
            set.insert(*a);
        }
        set
    }

    /// Insert an artifact, preserving first-insertion order.
    /// Returns `true` if the artifact was not already present.
    pub fn insert(&mut self, artifact: ArtifactType) -> bool {
        if self.0.contains(&artifact) {
            false
        } else {
            self.0.push(artifact);
            true
        }
    }

    pub fn contains(&self, artifact: ArtifactType) -> bool {
        self.0.contains(&artifact)
    }

    pub fn contains_all(&self, required: &[ArtifactType]) -> bool {
        required.iter().all(|a| self.contains(*a))
    }

    /// Which of `required` are absent from this set, in `required` order.
    pub fn missing_from(&self, required: &[ArtifactType]) -> Vec<ArtifactType> {
        required
            .iter()
            .copied()
            .filter(|a| !self.contains(*a))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactType> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ArtifactType] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ArtifactType> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = ArtifactType>>(iter: I) -> Self {
        let mut set = Self::new();
        for a in iter {
            set.insert(a);
        }
        set
    }
}
