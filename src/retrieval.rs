//! Best-effort retrieval sidecar
//!
//! Runs alongside the answer stream and surfaces supporting evidence for the
//! current question. Nothing here can fail the main turn: errors degrade to
//! an empty result set and a muted notice.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::surface::ChatSurface;

/// Number of hits requested per question unless configured otherwise
pub const DEFAULT_TOP_K: usize = 5;

/// How many hits render inline; the rest are available on demand
pub const INLINE_HITS: usize = 2;

/// One retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: String,
    pub score: f32,
    pub snippet: String,
}

/// Fire-and-forget evidence lookup for the current question
pub struct RetrievalSidecar {
    backend: Arc<dyn Backend>,
    top_k: usize,
}

impl RetrievalSidecar {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Fetch evidence for `question` and render the top hits
    ///
    /// Never returns an error: failures yield an empty set plus a muted
    /// notice. On success a secondary suggested-query call runs; its failure
    /// is swallowed.
    pub async fn run(&self, question: &str, surface: &dyn ChatSurface) -> Vec<RetrievalHit> {
        let hits = match self.backend.retrieve(question, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("retrieval sidecar failed: {e}");
                surface.muted("evidence lookup unavailable for this question");
                return Vec::new();
            }
        };

        let shown = hits.len().min(INLINE_HITS);
        surface.render_evidence(&hits[..shown], hits.len());

        match self.backend.suggest_query(question).await {
            Ok(Some(query)) => surface.show_suggestion(&query),
            Ok(None) => {}
            Err(e) => debug!("suggested query unavailable: {e}"),
        }

        hits
    }
}
