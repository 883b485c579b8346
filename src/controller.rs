//! Top-level session context
//!
//! One explicit object owns the wiring the original page kept in globals:
//! the registry with its active-session pointer, the stream consumer, the
//! retrieval sidecar's result slot, and the consolidation workflow. The
//! hosting UI drives it through plain method calls.

use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::backend::Backend;
use crate::error::{ChatError, Result};
use crate::memory::{ConsolidationState, ConsolidationWorkflow};
use crate::retrieval::{DEFAULT_TOP_K, RetrievalHit, RetrievalSidecar};
use crate::session::{Role, SessionMeta, SessionRegistry};
use crate::stream::{StreamConsumer, StreamPhase};
use crate::surface::ChatSurface;

/// Longest accepted question, matching the input cap of the chat page
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Conversational session manager: one user, one active session at a time
pub struct ChatController {
    backend: Arc<dyn Backend>,
    surface: Arc<dyn ChatSurface>,
    registry: SessionRegistry,
    consumer: StreamConsumer,
    consolidation: ConsolidationWorkflow,
    /// Evidence for the current question; rebuilt per question, never persisted
    evidence: Arc<Mutex<Vec<RetrievalHit>>>,
    top_k: usize,
}

impl ChatController {
    pub fn new(backend: Arc<dyn Backend>, surface: Arc<dyn ChatSurface>) -> Self {
        Self {
            registry: SessionRegistry::new(Arc::clone(&backend)),
            consolidation: ConsolidationWorkflow::new(Arc::clone(&backend)),
            backend,
            surface,
            consumer: StreamConsumer::new(),
            evidence: Arc::new(Mutex::new(Vec::new())),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override the stream consumer (tests use short timeout windows)
    pub fn with_consumer(mut self, consumer: StreamConsumer) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Bind a session at startup (most recent, or a fresh one)
    pub async fn ensure_active(&mut self) -> Result<()> {
        self.registry.ensure_active().await
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Main answer flow
    // ------------------------------------------------------------------

    /// Submit a question: append the user turn, persist, run the retrieval
    /// sidecar concurrently, and consume the streamed answer
    pub async fn ask(&mut self, question: &str) -> Result<()> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::state("question is empty"));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(ChatError::state(format!(
                "question exceeds {MAX_QUESTION_CHARS} characters"
            )));
        }

        self.registry.log_mut()?.append(Role::User, question)?;
        self.registry.mark_dirty();
        self.persist_best_effort().await;

        // evidence for the previous question is stale now
        self.clear_evidence();
        self.spawn_sidecar(question);

        let outcome = self
            .consumer
            .run(
                self.backend.as_ref(),
                question,
                self.registry.log_mut()?,
                self.surface.as_ref(),
            )
            .await?;

        match outcome.phase {
            StreamPhase::Finalized | StreamPhase::TimedOut => {
                if let Some(error) = &outcome.error {
                    self.surface.muted(error);
                }
                if outcome.turn_index.is_some() {
                    self.registry.mark_dirty();
                    self.persist_best_effort().await;
                    if let Err(e) = self.registry.refresh_title().await {
                        warn!("title refresh failed: {e}");
                    }
                }
            }
            StreamPhase::Failed => {
                // never fail silently: the error becomes a visible turn
                let message = outcome
                    .error
                    .unwrap_or_else(|| "the answer service is unavailable".to_string());
                let index = self.registry.log_mut()?.append(Role::Assistant, &message)?;
                self.registry.mark_dirty();
                if let Some(turn) = self.registry.log()?.get(index) {
                    self.surface.render_turn(turn);
                }
                self.persist_best_effort().await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Persist the active log; failures are reported, local state stands
    async fn persist_best_effort(&mut self) {
        if let Err(e) = self.registry.persist_active().await {
            warn!("failed to persist session turns: {e}");
            self.surface
                .muted("sync pending: the session store is unreachable");
        }
    }

    fn spawn_sidecar(&self, question: &str) {
        let sidecar = RetrievalSidecar::new(Arc::clone(&self.backend)).with_top_k(self.top_k);
        let surface = Arc::clone(&self.surface);
        let evidence = Arc::clone(&self.evidence);
        let question = question.to_string();
        tokio::spawn(async move {
            let hits = sidecar.run(&question, surface.as_ref()).await;
            if let Ok(mut slot) = evidence.lock() {
                *slot = hits;
            }
        });
    }

    /// Snapshot of the current question's evidence
    pub fn evidence(&self) -> Vec<RetrievalHit> {
        self.evidence
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or_default()
    }

    /// Show the full evidence set on demand
    pub fn show_evidence(&self) {
        let hits = self.evidence();
        if hits.is_empty() {
            self.surface.muted("no evidence for the current question");
            return;
        }
        let total = hits.len();
        self.surface.render_evidence(&hits, total);
    }

    fn clear_evidence(&self) {
        if let Ok(mut slot) = self.evidence.lock() {
            slot.clear();
        }
        self.surface.clear_evidence();
    }

    // ------------------------------------------------------------------
    // Session commands
    // ------------------------------------------------------------------

    pub async fn list_sessions(&mut self) -> Result<Vec<SessionMeta>> {
        Ok(self.registry.list().await?.to_vec())
    }

    pub async fn new_session(&mut self, title: Option<&str>) -> Result<()> {
        let meta = self.registry.create(title).await?;
        let notice = format!("started session \"{}\"", meta.title);
        self.clear_evidence();
        self.surface.notice(&notice);
        Ok(())
    }

    /// Switch the active session and replay its turns
    pub async fn switch_session(&mut self, id: &str) -> Result<()> {
        if self.registry.active_id() == Some(id) {
            return Ok(());
        }
        self.registry.switch_active(id).await?;
        self.clear_evidence();
        if let Some(meta) = self.registry.active_meta() {
            self.surface.notice(&format!("session \"{}\"", meta.title));
        }
        for turn in self.registry.log()?.turns() {
            self.surface.render_turn(turn);
        }
        Ok(())
    }

    pub async fn rename_session(&mut self, title: &str) -> Result<()> {
        let id = self
            .registry
            .active_id()
            .ok_or_else(|| ChatError::state("no active session"))?
            .to_string();
        self.registry.rename(&id, title).await?;
        self.surface.notice(&format!("session renamed to \"{title}\""));
        Ok(())
    }

    /// Delete the active session; the registry picks or creates a successor
    pub async fn delete_session(&mut self) -> Result<()> {
        let id = self
            .registry
            .active_id()
            .ok_or_else(|| ChatError::state("no active session"))?
            .to_string();
        self.registry.delete(&id).await?;
        self.clear_evidence();
        if let Some(meta) = self.registry.active_meta() {
            self.surface
                .notice(&format!("now in session \"{}\"", meta.title));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory consolidation
    // ------------------------------------------------------------------

    pub fn consolidation_state(&self) -> ConsolidationState {
        self.consolidation.state()
    }

    pub fn begin_consolidation(&mut self) -> Result<()> {
        self.consolidation.begin(self.registry.log()?)?;
        self.surface
            .notice("consolidation: pick turns with /pick, then /summarize");
        Ok(())
    }

    pub fn toggle_selection(&mut self, index: usize) -> Result<usize> {
        let count = self.consolidation.toggle(index, self.registry.log()?)?;
        self.surface.muted(&format!("{count} turn(s) selected"));
        Ok(count)
    }

    /// Send the selection to the summarizer and present the result
    pub async fn submit_consolidation(&mut self) -> Result<()> {
        match self.consolidation.submit(self.registry.log()?).await {
            Ok(candidate) => {
                self.surface.show_summary(&candidate.summary);
                self.surface
                    .notice("review the summary, then /commit or /cancel");
                Ok(())
            }
            Err(e @ ChatError::State(_)) => Err(e),
            Err(e) => {
                // selection is discarded; the workflow is back to Inactive
                self.surface.error(&format!("summarize failed: {e}"));
                Ok(())
            }
        }
    }

    /// Commit the reviewed summary into the knowledge base
    pub async fn commit_consolidation(&mut self) -> Result<()> {
        match self.consolidation.commit().await {
            Ok((relationship, message)) => {
                self.surface.show_outcome(relationship, &message);
                Ok(())
            }
            Err(e @ ChatError::State(_)) => Err(e),
            Err(e) => {
                // stay reviewable: re-display the summary with the error
                self.surface.error(&format!("commit failed: {e}"));
                if let Some(candidate) = self.consolidation.candidate() {
                    self.surface.show_summary(&candidate.summary);
                }
                Ok(())
            }
        }
    }

    pub fn cancel_consolidation(&mut self) -> Result<()> {
        self.consolidation.cancel()?;
        self.surface.notice("consolidation cancelled");
        Ok(())
    }
}
