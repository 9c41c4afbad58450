use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task item embedded in a note. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(text: &str) -> Self {
        Self {
            id: super::new_id(),
            text: text.trim().to_string(),
            completed: false,
            created_at: super::now(),
        }
    }
}

/// Append a new todo and return its id.
pub fn add_todo(todos: &mut Vec<Todo>, text: &str) -> String {
    let todo = Todo::new(text);
    let id = todo.id.clone();
    todos.push(todo);
    id
}

/// Flip the completed flag. Returns false if no todo has that id.
pub fn toggle_todo(todos: &mut [Todo], id: &str) -> bool {
    match todos.iter_mut().find(|t| t.id == id) {
        Some(todo) => {
            todo.completed = !todo.completed;
            true
        }
        None => false,
    }
}

/// Replace a todo's text. Blank text removes the todo.
pub fn set_todo_text(todos: &mut Vec<Todo>, id: &str, text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return remove_todo(todos, id);
    }
    match todos.iter_mut().find(|t| t.id == id) {
        Some(todo) => {
            todo.text = text.to_string();
            true
        }
        None => false,
    }
}

pub fn remove_todo(todos: &mut Vec<Todo>, id: &str) -> bool {
    let before = todos.len();
    todos.retain(|t| t.id != id);
    todos.len() != before
}
