//! Ordered, addressable log of conversational turns
//!
//! Append-only, except that the last turn may be open for streaming: its
//! content grows chunk by chunk until it is finalized or discarded. Indices
//! are positions, assigned at append time and stable for the life of the
//! session.

use crate::error::{ChatError, Result};
use crate::session::types::{Role, Turn, TurnState};
use std::collections::BTreeSet;

/// Turn log for the active session
///
/// Invariants: indices are contiguous from 0, and at most one turn is in
/// streaming state at any time (always the last one).
#[derive(Debug, Default)]
pub struct TurnLog {
    turns: Vec<Turn>,
    /// Index of the open streaming turn, if any
    streaming: Option<usize>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the log from persisted turns (all final, nothing streaming)
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        let turns = turns
            .into_iter()
            .map(|mut t| {
                t.state = TurnState::Final;
                t
            })
            .collect();
        Self {
            turns,
            streaming: None,
        }
    }

    /// Append a finalized turn, returning its index
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Result<usize> {
        if self.streaming.is_some() {
            return Err(ChatError::state("a streaming turn is already open"));
        }
        self.turns.push(Turn::new(role, content));
        Ok(self.turns.len() - 1)
    }

    /// Append an empty turn in streaming state, returning its index
    pub fn open_streaming(&mut self, role: Role) -> Result<usize> {
        if self.streaming.is_some() {
            return Err(ChatError::state("a streaming turn is already open"));
        }
        let mut turn = Turn::new(role, "");
        turn.state = TurnState::Streaming;
        self.turns.push(turn);
        let index = self.turns.len() - 1;
        self.streaming = Some(index);
        Ok(index)
    }

    /// Concatenate text onto the open streaming turn at `index`
    pub fn append_chunk(&mut self, index: usize, text: &str) -> Result<()> {
        if self.streaming != Some(index) {
            return Err(ChatError::state(format!(
                "turn {index} is not the open streaming turn"
            )));
        }
        self.turns[index].content.push_str(text);
        Ok(())
    }

    /// Transition the streaming turn at `index` to immutable
    ///
    /// No-op if the turn is already finalized.
    pub fn finalize(&mut self, index: usize) -> Result<()> {
        let turn = self
            .turns
            .get_mut(index)
            .ok_or_else(|| ChatError::state(format!("turn index {index} out of range")))?;
        if turn.state == TurnState::Final {
            return Ok(());
        }
        turn.state = TurnState::Final;
        self.streaming = None;
        Ok(())
    }

    /// Remove the open streaming turn at `index` entirely
    ///
    /// Only the last turn can be streaming, so removal never creates a gap.
    pub fn discard_streaming(&mut self, index: usize) -> Result<()> {
        if self.streaming != Some(index) {
            return Err(ChatError::state(format!(
                "turn {index} is not the open streaming turn"
            )));
        }
        self.turns.pop();
        self.streaming = None;
        Ok(())
    }

    /// Return the selected turns in ascending index order
    pub fn select_subset(&self, indices: &[usize]) -> Result<Vec<Turn>> {
        if indices.is_empty() {
            return Err(ChatError::state("empty selection"));
        }
        let ordered: BTreeSet<usize> = indices.iter().copied().collect();
        if let Some(&bad) = ordered.iter().find(|&&i| i >= self.turns.len()) {
            return Err(ChatError::state(format!("turn index {bad} out of range")));
        }
        Ok(ordered.iter().map(|&i| self.turns[i].clone()).collect())
    }

    pub fn get(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Clone the current turns for persistence
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn streaming_index(&self) -> Option<usize> {
        self.streaming
    }
}
