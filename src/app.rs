//! Per-window in-memory state: the note list and the selected note.
//!
//! Local mutations go through the service, land in memory, then get
//! published. Events from other windows are applied to memory without
//! touching the store, except `NotesRefreshed` which re-reads everything.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Note, NoteDraft, NotePatch};
use crate::service::NoteService;
use crate::sync::{Broadcaster, Subscription, SyncEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    /// Most recently updated first.
    pub notes: Vec<Note>,
    /// Always `None` or the id of a note in `notes`.
    pub selected: Option<String>,
}

impl AppState {
    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn selected_note(&self) -> Option<&Note> {
        self.selected.as_deref().and_then(|id| self.note(id))
    }

    fn replace_or_insert(&mut self, note: &Note) {
        match self.notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note.clone(),
            None => self.notes.insert(0, note.clone()),
        }
    }

    fn remove(&mut self, id: &str) {
        self.notes.retain(|n| n.id != id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
    }

    fn sort_by_recency(&mut self) {
        self.notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    fn drop_stale_selection(&mut self) {
        if let Some(id) = self.selected.as_deref() {
            if self.note(id).is_none() {
                self.selected = None;
            }
        }
    }
}

pub struct Window {
    service: NoteService,
    broadcaster: Arc<dyn Broadcaster>,
    subscription: Option<Subscription>,
    state: watch::Sender<AppState>,
}

impl Window {
    /// Load every note, select the most recent one and start listening.
    pub async fn open(service: NoteService, broadcaster: Arc<dyn Broadcaster>) -> Result<Self> {
        // Subscribe before reading so nothing published in between is lost
        let subscription = broadcaster.subscribe();
        let notes = service.list_notes_sorted_by_recency().await?;
        let selected = notes.first().map(|n| n.id.clone());
        debug!("window opened with {} notes", notes.len());

        let (state, _) = watch::channel(AppState { notes, selected });
        Ok(Self {
            service,
            broadcaster,
            subscription: Some(subscription),
            state,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn selected_note(&self) -> Option<Note> {
        self.state.borrow().selected_note().cloned()
    }

    /// Receiver notified after every change, local or remote.
    pub fn watch_state(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub fn service(&self) -> &NoteService {
        &self.service
    }

    // ==================== LOCAL MUTATIONS ====================

    pub async fn create_note(&mut self) -> Result<Note> {
        self.create_note_with(NoteDraft::default()).await
    }

    /// Create, select, then tell the other windows.
    pub async fn create_note_with(&mut self, draft: NoteDraft) -> Result<Note> {
        let note = self.service.create_note(draft).await?;
        self.state.send_modify(|s| {
            s.notes.retain(|n| n.id != note.id);
            s.notes.insert(0, note.clone());
            s.selected = Some(note.id.clone());
        });
        self.publish(SyncEvent::NoteCreated { note: note.clone() });
        Ok(note)
    }

    /// Patch a note, then re-read the whole list so the order matches the
    /// store's recency order exactly.
    pub async fn update_note(&mut self, id: &str, patch: NotePatch) -> Result<Note> {
        let note = self.service.update_note(id, patch).await?;

        let listed = self.service.list_notes_sorted_by_recency().await;
        self.state.send_modify(|s| match listed {
            Ok(notes) => {
                s.notes = notes;
                s.drop_stale_selection();
            }
            Err(e) => {
                warn!("could not re-read notes after updating {}: {}", id, e);
                s.replace_or_insert(&note);
                s.sort_by_recency();
            }
        });

        self.publish(SyncEvent::NoteUpdated { note: note.clone() });
        Ok(note)
    }

    pub async fn delete_note(&mut self, id: &str) -> Result<()> {
        self.service.delete_note(id).await?;
        self.state.send_modify(|s| s.remove(id));
        self.publish(SyncEvent::NoteDeleted {
            note_id: id.to_string(),
        });
        Ok(())
    }

    /// Re-read every note from the store and ask the other windows to do the same.
    pub async fn refresh(&mut self) -> Result<()> {
        self.reload().await?;
        self.publish(SyncEvent::NotesRefreshed {});
        Ok(())
    }

    /// Point the selection at a loaded note. Returns false for unknown ids.
    pub fn select_note(&mut self, id: &str) -> bool {
        self.state.send_if_modified(|s| {
            if s.note(id).is_none() || s.selected.as_deref() == Some(id) {
                return false;
            }
            s.selected = Some(id.to_string());
            true
        });
        self.state.borrow().selected.as_deref() == Some(id)
    }

    pub fn clear_selection(&mut self) {
        self.state.send_if_modified(|s| s.selected.take().is_some());
    }

    // ==================== REMOTE EVENTS ====================

    /// Apply another window's change to memory.
    pub async fn apply_remote(&mut self, event: &SyncEvent) -> Result<()> {
        debug!("applying remote {}", event.kind());
        match event {
            SyncEvent::NoteCreated { note } => {
                self.state.send_if_modified(|s| {
                    if s.note(&note.id).is_some() {
                        return false;
                    }
                    s.notes.insert(0, note.clone());
                    true
                });
            }
            SyncEvent::NoteUpdated { note } => {
                self.state.send_modify(|s| {
                    s.replace_or_insert(note);
                    s.sort_by_recency();
                });
            }
            SyncEvent::NoteDeleted { note_id } => {
                self.state.send_if_modified(|s| {
                    let before = (s.notes.len(), s.selected.clone());
                    s.remove(note_id);
                    before != (s.notes.len(), s.selected.clone())
                });
            }
            SyncEvent::NotesRefreshed {} => self.reload().await?,
        }
        Ok(())
    }

    /// Wait for the next event from another window and apply it.
    ///
    /// Returns `None` once the channel is closed. Failures while applying
    /// are logged and do not stop later events.
    pub async fn next_remote(&mut self) -> Option<SyncEvent> {
        let event = self.subscription.as_mut()?.recv().await?;
        if let Err(e) = self.apply_remote(&event).await {
            warn!("failed to apply remote {}: {}", event.kind(), e);
        }
        Some(event)
    }

    /// Apply remote events until `shutdown` resolves or the channel closes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.next_remote() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
        }
    }

    /// Release the channel registration.
    pub fn close(mut self) {
        self.subscription.take();
        debug!("window on {} closed", self.broadcaster.channel());
    }

    async fn reload(&mut self) -> Result<()> {
        let notes = self.service.list_notes_sorted_by_recency().await?;
        self.state.send_modify(|s| {
            s.notes = notes;
            s.drop_stale_selection();
        });
        Ok(())
    }

    fn publish(&self, event: SyncEvent) {
        if let Err(e) = self.broadcaster.publish(&event) {
            warn!("could not publish {}: {}", event.kind(), e);
        }
    }
}
