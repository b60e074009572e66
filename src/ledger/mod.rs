//! Append-only decision ledger with cascade-aware revision.
//!
//! Rows are stored in a dense ordered vector with an id→index map for O(1)
//! lookup and a reverse adjacency map (`id → dependents`) maintained on every
//! append, so cascade invalidation and graph queries never rescan the table.
//!
//! Rows are never removed. The only in-place mutations are the ones the
//! named operations perform: `supersede` flips status and links
//! `superseded_by`, `invalidate` flips status (optionally cascading over the
//! dependent closure), `downgrade_delegated` moves confidence from delegated
//! to inferred and appends to `failure_context`.

pub mod decision;
pub mod file;
pub mod prompt;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::LedgerError;
use crate::phase::DecisionPhase;

pub use decision::{
    Confidence, Decision, DecisionCategory, DecisionInput, DecisionSource, DecisionStatus,
};
pub use file::{LedgerFile, LedgerMeta};
pub use prompt::format_for_prompt;

// Ids are <category>_<NNN>; the pad widens naturally past 999
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z_]+_\d{3,}$").unwrap());

/// Options for [`DecisionLedger::append`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Skip the dependency-existence check (load/migration paths only).
    pub skip_dependency_validation: bool,
}

/// Options for [`DecisionLedger::supersede`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SupersedeOptions {
    /// Allow superseding a canonical-confidence row.
    pub force_override_canonical: bool,
}

/// Options for [`DecisionLedger::invalidate`].
#[derive(Debug, Clone, Copy)]
pub struct InvalidateOptions {
    /// Invalidate the dependent closure, not just the target.
    pub cascade: bool,
    /// Allow invalidating canonical-confidence rows.
    pub force_invalidate_canonical: bool,
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            cascade: true,
            force_invalidate_canonical: false,
        }
    }
}

/// Options for [`DecisionLedger::get_history`].
#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub include_superseded: bool,
    pub include_invalidated: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            include_superseded: true,
            include_invalidated: true,
        }
    }
}

/// Options for [`DecisionLedger::decisions_by_dependency_graph`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphQueryOptions {
    pub include_transitive_dependencies: bool,
    pub include_transitive_dependents: bool,
}

/// One row touched by a cascade invalidation.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeEntry {
    pub id: String,
    /// BFS distance from the invalidation source.
    pub depth: usize,
    /// Id chain from the source (inclusive) to this row.
    pub dependency_path: Vec<String>,
}

/// Result of an invalidation, cascading or not.
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub source_id: String,
    pub total_invalidated: usize,
    /// Each invalidated row exactly once, BFS order.
    pub affected: Vec<CascadeEntry>,
}

/// Result of a supersession: the retired row and its replacement.
#[derive(Debug, Clone)]
pub struct SupersedeOutcome {
    pub old_decision: Decision,
    pub new_decision: Decision,
}

/// The dependency neighborhood of one row.
#[derive(Debug, Clone)]
pub struct GraphNeighborhood<'a> {
    pub decision: &'a Decision,
    pub dependencies: Vec<&'a Decision>,
    pub dependents: Vec<&'a Decision>,
}

/// AND-semantics filter over exactly four axes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecisionFilter {
    pub category: Option<DecisionCategory>,
    pub phase: Option<DecisionPhase>,
    pub status: Option<DecisionStatus>,
    pub confidence: Option<Confidence>,
}

impl DecisionFilter {
    /// Build a filter from untyped key/value pairs (the boundary shape).
    /// Unknown keys are rejected with the valid set; unknown values are
    /// validation errors naming the field.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = DecisionFilter::default();
        for (key, value) in pairs {
            match key {
                "category" => {
                    filter.category = Some(DecisionCategory::parse(value).ok_or_else(|| {
                        LedgerError::Validation {
                            message: format!("unknown category '{value}'"),
                        }
                    })?);
                }
                "phase" => {
                    filter.phase = Some(DecisionPhase::parse(value).ok_or_else(|| {
                        LedgerError::Validation {
                            message: format!("unknown phase '{value}'"),
                        }
                    })?);
                }
                "status" => {
                    filter.status = Some(DecisionStatus::parse(value).ok_or_else(|| {
                        LedgerError::Validation {
                            message: format!("unknown status '{value}'"),
                        }
                    })?);
                }
                "confidence" => {
                    filter.confidence = Some(Confidence::parse(value).ok_or_else(|| {
                        LedgerError::Validation {
                            message: format!("unknown confidence '{value}'"),
                        }
                    })?);
                }
                other => {
                    return Err(LedgerError::InvalidFilterKey {
                        key: other.to_string(),
                    });
                }
            }
        }
        Ok(filter)
    }

    fn matches(&self, decision: &Decision) -> bool {
        self.category.is_none_or(|c| decision.category == c)
            && self.phase.is_none_or(|p| decision.phase == p)
            && self.status.is_none_or(|s| decision.status == s)
            && self.confidence.is_none_or(|c| decision.confidence == c)
    }
}

/// The append-only decision ledger for one protocol instance.
#[derive(Debug, Default)]
pub struct DecisionLedger {
    rows: Vec<Decision>,
    index: HashMap<String, usize>,
    counters: HashMap<DecisionCategory, u64>,
    dependents: HashMap<String, Vec<String>>,
}

impl DecisionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Decision> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    /// All rows in append order, every status.
    pub fn rows(&self) -> &[Decision] {
        &self.rows
    }

    /// Append a new decision, generating its id from the per-category counter.
    pub fn append(
        &mut self,
        input: DecisionInput,
        options: &AppendOptions,
    ) -> Result<Decision, LedgerError> {
        if input.constraint.trim().is_empty() {
            return Err(LedgerError::Validation {
                message: "constraint must be non-empty".to_string(),
            });
        }

        let next = self.counters.get(&input.category).copied().unwrap_or(0) + 1;
        let id = format_id(input.category, next);

        if !options.skip_dependency_validation {
            for dep in &input.dependencies {
                // The only cycle a live append can introduce is self-reference:
                // existing rows cannot point at an id that does not exist yet.
                if *dep == id {
                    return Err(LedgerError::CircularDependency {
                        path: vec![id.clone(), id],
                    });
                }
                if !self.index.contains_key(dep) {
                    return Err(LedgerError::DependencyNotFound {
                        id,
                        dependency: dep.clone(),
                    });
                }
            }
        } else if input.dependencies.contains(&id) {
            return Err(LedgerError::CircularDependency {
                path: vec![id.clone(), id],
            });
        }

        let decision = Decision {
            id: id.clone(),
            timestamp: Utc::now(),
            category: input.category,
            constraint: input.constraint,
            source: input.source,
            confidence: input.confidence,
            status: DecisionStatus::Active,
            phase: input.phase,
            rationale: input.rationale,
            dependencies: input.dependencies,
            supersedes: input.supersedes,
            superseded_by: None,
            failure_context: input.failure_context,
            contradiction_resolved: input.contradiction_resolved,
            human_query_id: input.human_query_id,
        };

        self.counters.insert(decision.category, next);
        self.insert_row(decision.clone());
        debug!(id = %id, category = %decision.category, "decision appended");
        Ok(decision)
    }

    /// Insert a fully-formed row (load path). Validates the complete shape,
    /// rejects duplicates, detects arbitrary dependency cycles, and advances
    /// the per-category counter to at least the row's number.
    pub fn append_with_id(&mut self, decision: Decision) -> Result<(), LedgerError> {
        if !ID_PATTERN.is_match(&decision.id) {
            return Err(LedgerError::Validation {
                message: format!(
                    "id '{}' does not match the required pattern '<category>_<NNN>'",
                    decision.id
                ),
            });
        }

        let prefix = format!("{}_", decision.category.as_str());
        let number = decision
            .id
            .strip_prefix(&prefix)
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| LedgerError::Validation {
                message: format!(
                    "id '{}' does not belong to category '{}'",
                    decision.id, decision.category
                ),
            })?;

        if self.index.contains_key(&decision.id) {
            return Err(LedgerError::DuplicateId {
                id: decision.id.clone(),
            });
        }

        if decision.constraint.trim().is_empty() {
            return Err(LedgerError::Validation {
                message: format!("decision {} has an empty constraint", decision.id),
            });
        }

        let superseded = decision.status == DecisionStatus::Superseded;
        if superseded != decision.superseded_by.is_some() {
            return Err(LedgerError::Validation {
                message: format!(
                    "decision {}: superseded_by must be set exactly when status is superseded",
                    decision.id
                ),
            });
        }

        if let Some(path) = self.find_cycle(&decision.id, &decision.dependencies) {
            return Err(LedgerError::CircularDependency { path });
        }

        let counter = self.counters.entry(decision.category).or_insert(0);
        if number > *counter {
            *counter = number;
        }
        self.insert_row(decision);
        Ok(())
    }

    /// Replace `old_id` with a new row. The old row survives with
    /// `status = superseded` and a link to its replacement.
    pub fn supersede(
        &mut self,
        old_id: &str,
        mut new_input: DecisionInput,
        options: &SupersedeOptions,
    ) -> Result<SupersedeOutcome, LedgerError> {
        let old = self.get(old_id).ok_or_else(|| LedgerError::NotFound {
            id: old_id.to_string(),
        })?;

        if old.status != DecisionStatus::Active {
            return Err(LedgerError::InvalidSupersede {
                id: old_id.to_string(),
                reason: format!("cannot be superseded: status is {}", old.status),
            });
        }
        if old.confidence == Confidence::Canonical && !options.force_override_canonical {
            return Err(LedgerError::CanonicalOverride {
                id: old_id.to_string(),
                operation: "supersede".to_string(),
            });
        }

        if !new_input.supersedes.iter().any(|s| s == old_id) {
            new_input.supersedes.push(old_id.to_string());
        }

        let new_decision = self.append(new_input, &AppendOptions::default())?;

        let idx = self.index[old_id];
        let old_row = &mut self.rows[idx];
        old_row.status = DecisionStatus::Superseded;
        old_row.superseded_by = Some(new_decision.id.clone());
        let old_decision = old_row.clone();

        debug!(old = %old_id, new = %new_decision.id, "decision superseded");
        Ok(SupersedeOutcome {
            old_decision,
            new_decision,
        })
    }

    /// Invalidate a row and, when cascading, every still-active row in its
    /// dependent closure. Diamond topologies are visited exactly once.
    pub fn invalidate(
        &mut self,
        id: &str,
        options: &InvalidateOptions,
    ) -> Result<CascadeReport, LedgerError> {
        let target = self.get(id).ok_or_else(|| LedgerError::NotFound {
            id: id.to_string(),
        })?;

        if target.status != DecisionStatus::Active {
            return Err(LedgerError::InvalidSupersede {
                id: id.to_string(),
                reason: format!("cannot be invalidated: status is {}", target.status),
            });
        }
        if target.confidence == Confidence::Canonical && !options.force_invalidate_canonical {
            return Err(LedgerError::CanonicalOverride {
                id: id.to_string(),
                operation: "invalidate".to_string(),
            });
        }

        let mut affected = Vec::new();

        let idx = self.index[id];
        self.rows[idx].status = DecisionStatus::Invalidated;
        affected.push(CascadeEntry {
            id: id.to_string(),
            depth: 0,
            dependency_path: vec![id.to_string()],
        });

        if options.cascade {
            // BFS over the dependent edges. Every node is enqueued at most
            // once; traversal continues through inactive rows but only
            // still-active rows are invalidated and reported.
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(id.to_string());
            let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
            queue.push_back((id.to_string(), 0, vec![id.to_string()]));

            while let Some((current, depth, path)) = queue.pop_front() {
                let dependents = self.dependents.get(&current).cloned().unwrap_or_default();
                for dependent in dependents {
                    if !visited.insert(dependent.clone()) {
                        continue;
                    }
                    let mut dep_path = path.clone();
                    dep_path.push(dependent.clone());

                    let dep_idx = self.index[&dependent];
                    let row = &mut self.rows[dep_idx];
                    if row.status == DecisionStatus::Active {
                        if row.confidence == Confidence::Canonical
                            && !options.force_invalidate_canonical
                        {
                            warn!(
                                id = %dependent,
                                source = %id,
                                "canonical decision skipped during cascade invalidation"
                            );
                        } else {
                            row.status = DecisionStatus::Invalidated;
                            affected.push(CascadeEntry {
                                id: dependent.clone(),
                                depth: depth + 1,
                                dependency_path: dep_path.clone(),
                            });
                        }
                    }
                    queue.push_back((dependent, depth + 1, dep_path));
                }
            }
        }

        debug!(source = %id, total = affected.len(), "invalidation cascade");
        Ok(CascadeReport {
            source_id: id.to_string(),
            total_invalidated: affected.len(),
            affected,
        })
    }

    /// Downgrade a delegated decision to inferred after a composition-audit
    /// contradiction implicated it. Appends to `failure_context`.
    pub fn downgrade_delegated(
        &mut self,
        id: &str,
        contradiction_reason: &str,
    ) -> Result<Decision, LedgerError> {
        let decision = self.get(id).ok_or_else(|| LedgerError::NotFound {
            id: id.to_string(),
        })?;

        if decision.status != DecisionStatus::Active {
            return Err(LedgerError::InvalidSupersede {
                id: id.to_string(),
                reason: format!("cannot be downgraded: status is {}", decision.status),
            });
        }
        if decision.confidence != Confidence::Delegated {
            return Err(LedgerError::InvalidSupersede {
                id: id.to_string(),
                reason: format!(
                    "cannot be downgraded: confidence is {}, only delegated decisions downgrade",
                    decision.confidence
                ),
            });
        }

        let note = format!("Composition Audit contradiction: {contradiction_reason}");
        let idx = self.index[id];
        let row = &mut self.rows[idx];
        row.confidence = Confidence::Inferred;
        row.failure_context = Some(match row.failure_context.take() {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
        Ok(row.clone())
    }

    /// Rows matching every supplied axis, append order.
    pub fn query(&self, filter: &DecisionFilter) -> Vec<&Decision> {
        self.rows.iter().filter(|d| filter.matches(d)).collect()
    }

    pub fn get_active_decisions(&self) -> Vec<&Decision> {
        self.rows.iter().filter(|d| d.is_active()).collect()
    }

    pub fn get_history(&self, options: &HistoryOptions) -> Vec<&Decision> {
        self.rows
            .iter()
            .filter(|d| match d.status {
                DecisionStatus::Active => true,
                DecisionStatus::Superseded => options.include_superseded,
                DecisionStatus::Invalidated => options.include_invalidated,
            })
            .collect()
    }

    /// Rows that directly depend on `id`.
    pub fn get_dependents(&self, id: &str) -> Result<Vec<&Decision>, LedgerError> {
        if !self.index.contains_key(id) {
            return Err(LedgerError::NotFound { id: id.to_string() });
        }
        Ok(self
            .dependents
            .get(id)
            .map(|ids| ids.iter().map(|d| &self.rows[self.index[d]]).collect())
            .unwrap_or_default())
    }

    /// Rows that `id` directly depends on.
    pub fn get_dependencies(&self, id: &str) -> Result<Vec<&Decision>, LedgerError> {
        let decision = self.get(id).ok_or_else(|| LedgerError::NotFound {
            id: id.to_string(),
        })?;
        Ok(decision
            .dependencies
            .iter()
            .filter_map(|d| self.get(d))
            .collect())
    }

    /// The dependency neighborhood of `id`: direct edges by default,
    /// de-duplicated BFS closures when the transitive flags are set.
    pub fn decisions_by_dependency_graph(
        &self,
        id: &str,
        options: &GraphQueryOptions,
    ) -> Result<GraphNeighborhood<'_>, LedgerError> {
        let decision = self.get(id).ok_or_else(|| LedgerError::NotFound {
            id: id.to_string(),
        })?;

        let dependencies = if options.include_transitive_dependencies {
            self.bfs_closure(id, |ledger, node| {
                ledger
                    .get(node)
                    .map(|d| d.dependencies.clone())
                    .unwrap_or_default()
            })
        } else {
            self.get_dependencies(id)?
        };

        let dependents = if options.include_transitive_dependents {
            self.bfs_closure(id, |ledger, node| {
                ledger.dependents.get(node).cloned().unwrap_or_default()
            })
        } else {
            self.get_dependents(id)?
        };

        Ok(GraphNeighborhood {
            decision,
            dependencies,
            dependents,
        })
    }

    fn bfs_closure<F>(&self, start: &str, neighbors: F) -> Vec<&Decision>
    where
        F: Fn(&Self, &str) -> Vec<String>,
    {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_string());
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for next in neighbors(self, &current) {
                if visited.insert(next.clone()) {
                    if let Some(decision) = self.get(&next) {
                        result.push(decision);
                    }
                    queue.push_back(next);
                }
            }
        }
        result
    }

    fn insert_row(&mut self, decision: Decision) {
        for dep in &decision.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(decision.id.clone());
        }
        self.index.insert(decision.id.clone(), self.rows.len());
        self.rows.push(decision);
    }

    /// DFS with a recursion stack over the dependency edges of the graph as
    /// it would exist with the new row inserted. Any cycle a valid insertion
    /// can close passes through the new id, so the search starts there and
    /// reports the path `[newId, …, newId]` on a back-edge.
    fn find_cycle(&self, new_id: &str, new_deps: &[String]) -> Option<Vec<String>> {
        let mut path = vec![new_id.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        self.dfs_cycle(new_id, new_id, new_deps, &mut path, &mut visited)
    }

    fn dfs_cycle(
        &self,
        node: &str,
        new_id: &str,
        new_deps: &[String],
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let deps: Vec<String> = if node == new_id {
            new_deps.to_vec()
        } else {
            self.get(node)
                .map(|d| d.dependencies.clone())
                .unwrap_or_default()
        };

        for dep in deps {
            if dep == new_id {
                path.push(new_id.to_string());
                return Some(path.clone());
            }
            if visited.insert(dep.clone()) {
                path.push(dep.clone());
                if let Some(cycle) = self.dfs_cycle(&dep, new_id, new_deps, path, visited) {
                    return Some(cycle);
                }
                path.pop();
            }
        }
        None
    }
}

fn format_id(category: DecisionCategory, number: u64) -> String {
    format!("{}_{:03}", category.as_str(), number)
}
