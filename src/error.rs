use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotepadError>;

#[derive(Debug, Error)]
pub enum NotepadError {
    /// The database could not be opened or migrated. Fatal for the window.
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A single store operation failed.
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error("note {0} not found")]
    NotFound(String),

    /// Identifier collision on insert. Unreachable with v4 ids.
    #[error("note {0} already exists")]
    DuplicateKey(String),

    #[error("note {note_id} has more than one todo with id {todo_id}")]
    DuplicateTodo { note_id: String, todo_id: String },

    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl NotepadError {
    pub(crate) fn unavailable(
        path: impl Into<PathBuf>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
