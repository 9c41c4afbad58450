use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Todo;

pub const DEFAULT_TITLE: &str = "Untitled Note";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub todos: Vec<Todo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional initial fields for a new note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    pub title: Option<String>,
    pub content: Option<String>,
    pub todos: Option<Vec<Todo>>,
}

/// Merge-patch: only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub todos: Option<Vec<Todo>>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn todos(todos: Vec<Todo>) -> Self {
        Self {
            todos: Some(todos),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.todos.is_none()
    }
}

impl Note {
    /// Build a fresh note with a new id and `created_at == updated_at`.
    pub fn new(draft: NoteDraft) -> Self {
        let now = super::now();
        Self {
            id: super::new_id(),
            title: draft
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            content: draft.content.unwrap_or_default(),
            todos: draft.todos.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a merge-patch and bump `updated_at`.
    pub fn apply(&mut self, patch: NotePatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(todos) = patch.todos {
            self.todos = todos;
        }
        self.touch();
    }

    /// Advance `updated_at` to now, or one nanosecond past its current value
    /// when the clock has not moved, so it always strictly increases.
    pub fn touch(&mut self) {
        let floor = self.updated_at + Duration::nanoseconds(1);
        self.updated_at = super::now().max(floor);
    }

    /// First todo id that appears more than once, if any.
    pub fn duplicate_todo_id(&self) -> Option<&str> {
        duplicate_todo_id(&self.todos)
    }

    pub fn completed_todos(&self) -> usize {
        self.todos.iter().filter(|t| t.completed).count()
    }
}

pub(crate) fn duplicate_todo_id(todos: &[Todo]) -> Option<&str> {
    let mut seen = HashSet::new();
    todos
        .iter()
        .find(|t| !seen.insert(t.id.as_str()))
        .map(|t| t.id.as_str())
}
