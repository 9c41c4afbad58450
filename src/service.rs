//! Note-level operations on top of the record store.
//!
//! Store calls are blocking SQLite work, so each one runs on the blocking
//! pool and the caller suspends until it completes. Updates and deletes to
//! the same note id are serialized through a per-id async lock held across
//! the whole read-modify-write, so back-to-back patches from one process
//! never overwrite each other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::db::Database;
use crate::error::{NotepadError, Result};
use crate::models::{duplicate_todo_id, Note, NoteDraft, NotePatch};

type IdLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Clone)]
pub struct NoteService {
    db: Arc<Mutex<Database>>,
    id_locks: Arc<Mutex<HashMap<String, IdLock>>>,
}

impl NoteService {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            id_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open the store at `path` and wrap it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub async fn create_note(&self, draft: NoteDraft) -> Result<Note> {
        let note = Note::new(draft);
        if let Some(todo_id) = note.duplicate_todo_id() {
            return Err(NotepadError::DuplicateTodo {
                note_id: note.id.clone(),
                todo_id: todo_id.to_string(),
            });
        }

        let stored = note.clone();
        self.with_db(move |db| db.insert_note(&stored)).await?;
        debug!("created note {}", note.id);
        Ok(note)
    }

    pub async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let id = id.to_string();
        self.with_db(move |db| db.get_note(&id)).await
    }

    /// Merge `patch` into the stored note and bump `updated_at`.
    pub async fn update_note(&self, id: &str, patch: NotePatch) -> Result<Note> {
        if let Some(todo_id) = patch.todos.as_deref().and_then(duplicate_todo_id) {
            return Err(NotepadError::DuplicateTodo {
                note_id: id.to_string(),
                todo_id: todo_id.to_string(),
            });
        }

        let entry = self.id_lock(id);
        let result = {
            let _guard = entry.lock().await;
            self.read_modify_write(id, patch).await
        };

        if let Ok(note) = &result {
            debug!("updated note {} at {}", note.id, note.updated_at);
        }
        result
    }

    /// Remove a note. Deleting an absent id is not an error.
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        let entry = self.id_lock(id);
        let result = {
            let _guard = entry.lock().await;
            let owned = id.to_string();
            self.with_db(move |db| db.delete_note(&owned)).await
        };

        if result? {
            debug!("deleted note {}", id);
        }
        Ok(())
    }

    /// Every note, most recently updated first.
    pub async fn list_notes_sorted_by_recency(&self) -> Result<Vec<Note>> {
        self.with_db(|db| db.list_notes()).await
    }

    async fn read_modify_write(&self, id: &str, patch: NotePatch) -> Result<Note> {
        let mut note = self
            .get_note(id)
            .await?
            .ok_or_else(|| NotepadError::NotFound(id.to_string()))?;

        note.apply(patch);

        let stored = note.clone();
        self.with_db(move |db| db.put_note(&stored)).await?;
        Ok(note)
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&db)
        })
        .await?
    }

    fn id_lock(&self, id: &str) -> IdLockEntry<'_> {
        let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(id.to_string()).or_default().clone();
        IdLockEntry {
            locks: &self.id_locks,
            id: id.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn held_id_locks(&self) -> usize {
        self.id_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A handle on one id's lock. Dropping it, including when the owning future
/// is cancelled, removes the map entry once nobody else holds or waits on it.
struct IdLockEntry<'a> {
    locks: &'a Mutex<HashMap<String, IdLock>>,
    id: String,
    lock: IdLock,
}

impl IdLockEntry<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for IdLockEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under this mutex: two means the map and us
        if locks.get(&self.id).is_some_and(|l| Arc::strong_count(l) == 2) {
            locks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Todo, DEFAULT_TITLE};
    use std::collections::HashSet;

    fn service() -> NoteService {
        NoteService::new(Database::open_memory().unwrap())
    }

    #[tokio::test]
    async fn test_create_note_defaults() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();

        assert_eq!(note.title, DEFAULT_TITLE);
        assert_eq!(note.content, "");
        assert!(note.todos.is_empty());
        assert_eq!(note.created_at, note.updated_at);
        assert_eq!(svc.get_note(&note.id).await.unwrap(), Some(note));
    }

    #[tokio::test]
    async fn test_created_ids_are_unique() {
        let svc = service();
        let mut ids = HashSet::new();
        for _ in 0..50 {
            let note = svc.create_note(NoteDraft::default()).await.unwrap();
            assert!(ids.insert(note.id));
        }
        assert_eq!(svc.list_notes_sorted_by_recency().await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_update_title_only() {
        let svc = service();
        let created = svc
            .create_note(NoteDraft {
                title: None,
                content: Some(String::new()),
                todos: None,
            })
            .await
            .unwrap();

        let updated = svc
            .update_note(&created.id, NotePatch::title("Groceries"))
            .await
            .unwrap();
        assert_eq!(updated.title, "Groceries");

        let stored = svc.get_note(&created.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
        assert_eq!(stored.content, "");
        assert_eq!(stored.created_at, created.created_at);
        assert!(stored.updated_at > stored.created_at);
    }

    #[tokio::test]
    async fn test_update_leaves_other_fields() {
        let svc = service();
        let created = svc
            .create_note(NoteDraft {
                title: Some("Trip".to_string()),
                content: Some("Pack bags".to_string()),
                todos: Some(vec![Todo::new("passport")]),
            })
            .await
            .unwrap();

        let updated = svc
            .update_note(&created.id, NotePatch::content("Pack light"))
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.todos, created.todos);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.content, "Pack light");
        assert!(updated.updated_at > created.updated_at);

        let again = svc
            .update_note(&created.id, NotePatch::default())
            .await
            .unwrap();
        assert_eq!(again.content, "Pack light");
        assert!(again.updated_at > updated.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let svc = service();
        let err = svc
            .update_note("missing-id", NotePatch::title("x"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, NotepadError::NotFound(ref id) if id == "missing-id"),
            "wrong error type: {err:#?}"
        );
        assert!(svc.list_notes_sorted_by_recency().await.unwrap().is_empty());
        assert_eq!(svc.held_id_locks(), 0);
    }

    #[tokio::test]
    async fn test_update_rejects_duplicate_todos() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();
        let todo = Todo::new("twice");

        let err = svc
            .update_note(&note.id, NotePatch::todos(vec![todo.clone(), todo]))
            .await
            .unwrap_err();
        assert!(matches!(err, NotepadError::DuplicateTodo { .. }));
        assert_eq!(svc.get_note(&note.id).await.unwrap(), Some(note));
    }

    #[tokio::test]
    async fn test_delete_then_list() {
        let svc = service();
        let keep = svc.create_note(NoteDraft::default()).await.unwrap();
        let gone = svc.create_note(NoteDraft::default()).await.unwrap();

        svc.delete_note(&gone.id).await.unwrap();
        svc.delete_note(&gone.id).await.unwrap();
        svc.delete_note("nonexistent").await.unwrap();

        let listed = svc.list_notes_sorted_by_recency().await.unwrap();
        assert_eq!(listed, vec![keep]);
        assert!(svc.get_note(&gone.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_after_updates() {
        let svc = service();
        let a = svc.create_note(NoteDraft::default()).await.unwrap();
        let b = svc.create_note(NoteDraft::default()).await.unwrap();
        let c = svc.create_note(NoteDraft::default()).await.unwrap();

        svc.update_note(&a.id, NotePatch::title("a")).await.unwrap();

        let listed = svc.list_notes_sorted_by_recency().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids[0], a.id);
        assert!(ids.contains(&b.id.as_str()));
        assert!(ids.contains(&c.id.as_str()));
        assert!(listed
            .windows(2)
            .all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_patches_both_land() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();

        let (first, second) = tokio::join!(
            svc.update_note(&note.id, NotePatch::title("A")),
            svc.update_note(&note.id, NotePatch::content("B")),
        );
        first.unwrap();
        second.unwrap();

        let stored = svc.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "A");
        assert_eq!(stored.content, "B");
        assert_eq!(svc.held_id_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_updates_never_lose_a_field() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let titles = svc.clone();
            let id = note.id.clone();
            handles.push(tokio::spawn(async move {
                titles.update_note(&id, NotePatch::title(format!("A{}", i))).await
            }));
            let contents = svc.clone();
            let id = note.id.clone();
            handles.push(tokio::spawn(async move {
                contents.update_note(&id, NotePatch::content(format!("B{}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = svc.get_note(&note.id).await.unwrap().unwrap();
        assert!(stored.title.starts_with('A'), "title lost: {}", stored.title);
        assert!(stored.content.starts_with('B'), "content lost: {}", stored.content);
        assert_eq!(svc.held_id_locks(), 0);
    }

    #[tokio::test]
    async fn test_delete_waits_for_inflight_update() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();

        let (updated, deleted) = tokio::join!(
            svc.update_note(&note.id, NotePatch::title("late")),
            svc.delete_note(&note.id),
        );
        updated.unwrap();
        deleted.unwrap();

        // The delete ran after the update, so nothing is resurrected
        assert!(svc.get_note(&note.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_updates_release_their_locks() {
        let svc = service();
        let note = svc.create_note(NoteDraft::default()).await.unwrap();

        for i in 0..50 {
            let pending = svc.update_note(&note.id, NotePatch::title(format!("t{}", i)));
            let _ = tokio::time::timeout(std::time::Duration::ZERO, pending).await;
            let pending = svc.delete_note("elsewhere");
            let _ = tokio::time::timeout(std::time::Duration::ZERO, pending).await;
        }
        assert_eq!(svc.held_id_locks(), 0);

        // The lock still works after all the cancellations
        svc.update_note(&note.id, NotePatch::title("done")).await.unwrap();
        assert_eq!(svc.get_note(&note.id).await.unwrap().unwrap().title, "done");
        assert_eq!(svc.held_id_locks(), 0);
    }
}
