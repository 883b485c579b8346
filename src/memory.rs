//! Memory consolidation workflow
//!
//! Lets the user pick a subset of turns, request a summary, review it, and
//! commit it into the knowledge base. The commit classifies the new summary
//! against existing knowledge three ways: high similarity, extension, or
//! difference.
//!
//! One candidate at a time. Cancelling or a failed summarize discards the
//! candidate entirely; a failed commit returns to review instead of closing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{ChatError, Result};
use crate::session::log::TurnLog;
use crate::session::types::Turn;

/// How a committed summary relates to existing stored knowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    HighSimilarity,
    Extension,
    Difference,
    #[serde(other)]
    Unknown,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::HighSimilarity => "high_similarity",
            Relationship::Extension => "extension",
            Relationship::Difference => "difference",
            Relationship::Unknown => "unknown",
        }
    }
}

/// Summarizer response: the summary text and the id needed to commit it
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySummary {
    pub memory_id: String,
    pub summary: String,
}

/// Commit response: the classification and a human-readable outcome
#[derive(Debug, Clone, Deserialize)]
pub struct CommitOutcome {
    pub relationship: Relationship,
    pub message: String,
}

/// An in-progress request to consolidate selected turns into the knowledge base
#[derive(Debug, Clone)]
pub struct MemoryCandidate {
    /// The selected turns, in log order
    pub selected_turns: Vec<Turn>,
    pub summary: String,
    pub memory_id: String,
    /// Populated only after a successful commit
    pub relationship: Option<Relationship>,
}

/// Workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsolidationState {
    #[default]
    Inactive,
    Selecting,
    Submitting,
    Reviewing,
    Committing,
    Done,
    Cancelled,
}

/// Finite state machine driving memory consolidation
pub struct ConsolidationWorkflow {
    backend: Arc<dyn Backend>,
    state: ConsolidationState,
    selected: BTreeSet<usize>,
    candidate: Option<MemoryCandidate>,
}

impl ConsolidationWorkflow {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: ConsolidationState::Inactive,
            selected: BTreeSet::new(),
            candidate: None,
        }
    }

    pub fn state(&self) -> ConsolidationState {
        self.state
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn candidate(&self) -> Option<&MemoryCandidate> {
        self.candidate.as_ref()
    }

    /// Enter selection mode over a non-empty turn log
    ///
    /// Re-entry after `Done` or `Cancelled` supersedes the old candidate;
    /// entry while one is in flight is rejected.
    pub fn begin(&mut self, log: &TurnLog) -> Result<()> {
        match self.state {
            ConsolidationState::Selecting
            | ConsolidationState::Submitting
            | ConsolidationState::Reviewing
            | ConsolidationState::Committing => {
                return Err(ChatError::state("a memory candidate is already in flight"));
            }
            _ => {}
        }
        if log.is_empty() {
            return Err(ChatError::state("turn log is empty"));
        }
        self.state = ConsolidationState::Selecting;
        self.selected.clear();
        self.candidate = None;
        Ok(())
    }

    /// Toggle a turn in or out of the selection, returning the selected count
    pub fn toggle(&mut self, index: usize, log: &TurnLog) -> Result<usize> {
        if self.state != ConsolidationState::Selecting {
            return Err(ChatError::state("not selecting turns"));
        }
        if index >= log.len() {
            return Err(ChatError::state(format!("turn index {index} out of range")));
        }
        if !self.selected.remove(&index) {
            self.selected.insert(index);
        }
        Ok(self.selected.len())
    }

    /// Send the selected turns to the summarizer
    ///
    /// On success the workflow holds a reviewable candidate. On failure the
    /// selection is discarded and the workflow returns to `Inactive` — no
    /// partial retry state is retained.
    pub async fn submit(&mut self, log: &TurnLog) -> Result<&MemoryCandidate> {
        if self.state != ConsolidationState::Selecting {
            return Err(ChatError::state("no selection in progress"));
        }
        if self.selected.is_empty() {
            // stays in Selecting; the user can keep picking
            return Err(ChatError::state("empty selection"));
        }

        let indices: Vec<usize> = self.selected.iter().copied().collect();
        let turns = log.select_subset(&indices)?;

        self.state = ConsolidationState::Submitting;
        match self.backend.summarize(&turns).await {
            Ok(summary) => {
                info!("memory summary ready: {}", summary.memory_id);
                self.state = ConsolidationState::Reviewing;
                self.selected.clear();
                Ok(self.candidate.insert(MemoryCandidate {
                    selected_turns: turns,
                    summary: summary.summary,
                    memory_id: summary.memory_id,
                    relationship: None,
                }))
            }
            Err(e) => {
                warn!("summarize failed: {e}");
                self.state = ConsolidationState::Inactive;
                self.selected.clear();
                self.candidate = None;
                Err(e)
            }
        }
    }

    /// Commit the reviewed candidate into the knowledge base
    ///
    /// On failure the workflow stays reviewable rather than closing.
    pub async fn commit(&mut self) -> Result<(Relationship, String)> {
        if self.state != ConsolidationState::Reviewing {
            return Err(ChatError::state("no candidate under review"));
        }
        let memory_id = match &self.candidate {
            Some(c) if !c.memory_id.is_empty() => c.memory_id.clone(),
            _ => return Err(ChatError::state("missing memory id")),
        };

        self.state = ConsolidationState::Committing;
        match self.backend.commit_memory(&memory_id).await {
            Ok(outcome) => {
                info!(
                    "memory {memory_id} committed as {}",
                    outcome.relationship.as_str()
                );
                if let Some(c) = &mut self.candidate {
                    c.relationship = Some(outcome.relationship);
                }
                self.state = ConsolidationState::Done;
                Ok((outcome.relationship, outcome.message))
            }
            Err(e) => {
                warn!("memory commit failed: {e}");
                self.state = ConsolidationState::Reviewing;
                Err(e)
            }
        }
    }

    /// Discard the candidate from selection or review
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            ConsolidationState::Selecting | ConsolidationState::Reviewing => {
                self.state = ConsolidationState::Cancelled;
                self.selected.clear();
                self.candidate = None;
                Ok(())
            }
            _ => Err(ChatError::state("no consolidation to cancel")),
        }
    }
}
