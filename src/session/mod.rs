//! Session registry and active-session management
//!
//! Caches session metadata from the remote store and owns the single active
//! session: its metadata, its turn log, and a dirty flag for unsaved turns.
//! The list is re-fetched from the store on every read — the store is the
//! source of truth, the cache only preserves display order between calls.
//!
//! Failed store calls never corrupt local state: the list and the active
//! pointer stay whatever they were before the call.

pub mod log;
pub mod types;

pub use log::TurnLog;
pub use types::{Role, SessionDetail, SessionMeta, Turn, TurnState};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{ChatError, Result};

/// The session currently bound to the UI
#[derive(Debug)]
pub struct ActiveSession {
    pub meta: SessionMeta,
    pub log: TurnLog,
    dirty: bool,
}

/// CRUD-style cache of session metadata plus the active session pointer
pub struct SessionRegistry {
    backend: Arc<dyn Backend>,
    sessions: Vec<SessionMeta>,
    active: Option<ActiveSession>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sessions: Vec::new(),
            active: None,
        }
    }

    /// Fetch the session list fresh from the store, most recent first
    pub async fn list(&mut self) -> Result<&[SessionMeta]> {
        let fresh = self.backend.list_sessions().await?;
        self.sessions = fresh;
        Ok(&self.sessions)
    }

    /// Cached ordering from the last successful `list()`
    pub fn cached(&self) -> &[SessionMeta] {
        &self.sessions
    }

    /// Create a session; it lands at the front and becomes active
    ///
    /// Like a switch, this flushes the previous session's unsaved turns
    /// best-effort before the active pointer moves.
    pub async fn create(&mut self, title: Option<&str>) -> Result<&SessionMeta> {
        self.flush_active().await;
        let meta = self.backend.create_session(title).await?;
        info!("created session {}", meta.id);
        self.sessions.insert(0, meta.clone());
        let active = self.active.insert(ActiveSession {
            meta,
            log: TurnLog::new(),
            dirty: false,
        });
        Ok(&active.meta)
    }

    /// Make `id` the active session, loading its turn log from the store
    ///
    /// Unsaved turns of the previously active session are flushed first,
    /// best-effort: a flush failure is logged and switching proceeds.
    /// Switching to the already-active session is a no-op.
    pub async fn switch_active(&mut self, id: &str) -> Result<()> {
        if self.active.as_ref().is_some_and(|a| a.meta.id == id) {
            debug!("session {id} already active");
            return Ok(());
        }

        self.flush_active().await;

        let detail = self.backend.get_session(id).await?;
        info!("switched to session {id} ({} turns)", detail.turns.len());
        self.active = Some(ActiveSession {
            meta: detail.meta,
            log: TurnLog::from_turns(detail.turns),
            dirty: false,
        });
        Ok(())
    }

    /// Rename a session in the store and in the local cache
    pub async fn rename(&mut self, id: &str, title: &str) -> Result<()> {
        self.backend.rename_session(id, title).await?;
        if let Some(meta) = self.sessions.iter_mut().find(|s| s.id == id) {
            meta.title = title.to_string();
        }
        if let Some(active) = &mut self.active {
            if active.meta.id == id {
                active.meta.title = title.to_string();
            }
        }
        Ok(())
    }

    /// Delete a session; deleting the active one switches to the next
    /// remaining session, or creates a fresh one if none remain
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.backend.delete_session(id).await?;
        info!("deleted session {id}");
        self.sessions.retain(|s| s.id != id);

        let was_active = self.active.as_ref().is_some_and(|a| a.meta.id == id);
        if !was_active {
            return Ok(());
        }
        self.active = None;

        // the store decides what remains; re-list rather than trust the cache
        self.list().await?;
        match self.sessions.first().map(|s| s.id.clone()) {
            Some(next) => self.switch_active(&next).await?,
            None => {
                self.create(None).await?;
            }
        }
        Ok(())
    }

    /// Push the active session's turns to the store (idempotent bulk replace)
    pub async fn persist_active(&mut self) -> Result<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| ChatError::state("no active session"))?;
        self.backend
            .replace_turns(&active.meta.id, &active.log.snapshot())
            .await?;
        active.dirty = false;
        active.meta.message_count = active.log.len();
        Ok(())
    }

    /// Re-read the active session's title from the store
    ///
    /// The server may auto-title a session after its first exchange; per the
    /// store's consistency policy this re-fetches the whole list.
    pub async fn refresh_title(&mut self) -> Result<()> {
        let Some(id) = self.active.as_ref().map(|a| a.meta.id.clone()) else {
            return Ok(());
        };
        self.list().await?;
        if let Some(title) = self
            .sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.title.clone())
        {
            if let Some(active) = &mut self.active {
                active.meta.title = title;
            }
        }
        Ok(())
    }

    /// Bind some session at startup: the most recent one, or a fresh one if
    /// the store is empty
    pub async fn ensure_active(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }
        self.list().await?;
        match self.sessions.first().map(|s| s.id.clone()) {
            Some(id) => self.switch_active(&id).await,
            None => self.create(None).await.map(|_| ()),
        }
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.meta.id.as_str())
    }

    pub fn active_meta(&self) -> Option<&SessionMeta> {
        self.active.as_ref().map(|a| &a.meta)
    }

    pub fn log(&self) -> Result<&TurnLog> {
        self.active
            .as_ref()
            .map(|a| &a.log)
            .ok_or_else(|| ChatError::state("no active session"))
    }

    pub fn log_mut(&mut self) -> Result<&mut TurnLog> {
        self.active
            .as_mut()
            .map(|a| &mut a.log)
            .ok_or_else(|| ChatError::state("no active session"))
    }

    /// Note that the active log has turns the store has not seen yet
    pub fn mark_dirty(&mut self) {
        if let Some(active) = &mut self.active {
            active.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.dirty)
    }

    /// Best-effort flush of unsaved turns before losing the active log
    async fn flush_active(&mut self) {
        let Some(active) = &mut self.active else {
            return;
        };
        if !active.dirty {
            return;
        }
        match self
            .backend
            .replace_turns(&active.meta.id, &active.log.snapshot())
            .await
        {
            Ok(()) => active.dirty = false,
            Err(e) => warn!(
                "failed to flush session {} before switch: {e}",
                active.meta.id
            ),
        }
    }
}
