use anyhow::{anyhow, Result};

use crate::models::{add_todo, remove_todo, set_todo_text, toggle_todo, Note, NotePatch, Todo};
use super::display::short_id;
use super::session::{resolve_todo, Session};
use super::ui::status;
use super::TodoCommands;

/// Execute a todo subcommand. Every change rewrites the note's whole todo list.
pub async fn run_todo(session: &mut Session, command: TodoCommands) -> Result<()> {
    match command {
        TodoCommands::Add { note, text } => {
            if text.trim().is_empty() {
                return Err(anyhow!("Todo text cannot be empty."));
            }
            let note = session.note(&note)?;
            let mut todos = note.todos.clone();
            let id = add_todo(&mut todos, &text);
            save_todos(session, &note, todos).await?;
            status(&format!("Added {}  {}", short_id(&id), text.trim()));
        }
        TodoCommands::Done { note, todo } => set_completed(session, &note, &todo, true).await?,
        TodoCommands::Undo { note, todo } => set_completed(session, &note, &todo, false).await?,
        TodoCommands::Edit { note, todo, text } => {
            let note = session.note(&note)?;
            let target = resolve_todo(&note.todos, &todo)?.clone();
            let mut todos = note.todos.clone();
            set_todo_text(&mut todos, &target.id, &text);
            save_todos(session, &note, todos).await?;
            if text.trim().is_empty() {
                status(&format!("Removed {}  {}", short_id(&target.id), target.text));
            } else {
                status(&format!("Updated {}  {}", short_id(&target.id), text.trim()));
            }
        }
        TodoCommands::Rm { note, todo } => {
            let note = session.note(&note)?;
            let target = resolve_todo(&note.todos, &todo)?.clone();
            let mut todos = note.todos.clone();
            remove_todo(&mut todos, &target.id);
            save_todos(session, &note, todos).await?;
            status(&format!("Removed {}  {}", short_id(&target.id), target.text));
        }
    }
    Ok(())
}

async fn set_completed(session: &mut Session, note: &str, todo: &str, done: bool) -> Result<()> {
    let note = session.note(note)?;
    let target = resolve_todo(&note.todos, todo)?.clone();
    let label = if done { "Done" } else { "Not done" };

    if target.completed == done {
        status(&format!("{} already: {}", label, target.text));
        return Ok(());
    }

    let mut todos = note.todos.clone();
    toggle_todo(&mut todos, &target.id);
    save_todos(session, &note, todos).await?;
    status(&format!("{}: {}", label, target.text));
    Ok(())
}

async fn save_todos(session: &mut Session, note: &Note, todos: Vec<Todo>) -> Result<Note> {
    let updated = session
        .window_mut()
        .update_note(&note.id, NotePatch::todos(todos))
        .await?;
    Ok(updated)
}
