//! Rendering seam between the core and whatever UI hosts it
//!
//! The core never talks to a terminal or a DOM directly; it emits render and
//! update calls through this trait. The binary installs an ANSI terminal
//! implementation, tests install a recording one.

use crate::memory::Relationship;
use crate::retrieval::RetrievalHit;
use crate::session::types::Turn;

/// Render/update calls the core pushes at its hosting UI
pub trait ChatSurface: Send + Sync {
    /// A finalized turn entered the log
    fn render_turn(&self, turn: &Turn);

    /// Incremental text for the open assistant turn
    fn stream_chunk(&self, text: &str);

    /// The open assistant turn finished (content is now immutable)
    fn stream_end(&self);

    /// Normal informational notice
    fn notice(&self, message: &str);

    /// Low-priority notice (degraded side paths, pending syncs)
    fn muted(&self, message: &str);

    /// User-visible error outside the turn log
    fn error(&self, message: &str);

    /// The server produced a graph query for the current question
    fn update_graph(&self, query: &str);

    /// Retrieval context embedded in the answer response
    fn show_context(&self, context: &str);

    /// Evidence hits for the current question (`shown` is the inline subset)
    fn render_evidence(&self, shown: &[RetrievalHit], total: usize);

    /// A suggested follow-up query derived from the question
    fn show_suggestion(&self, query: &str);

    /// Drop any evidence currently displayed (session switched)
    fn clear_evidence(&self);

    /// A consolidation summary is ready for review
    fn show_summary(&self, summary: &str);

    /// A consolidation commit finished with a classification
    fn show_outcome(&self, relationship: Relationship, message: &str);
}
