use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::models::{NoteDraft, NotePatch};
use super::display::{print_note, short_id};
use super::session::Session;
use super::ui::{confirm, status};

/// Execute the show command. Without an id, shows the most recent note.
pub fn run_show(session: &Session, id: Option<&str>) -> Result<()> {
    let note = match id {
        Some(id) => session.note(id)?,
        None => session
            .window()
            .selected_note()
            .ok_or_else(|| anyhow!("No notes yet."))?,
    };
    print_note(&note, "", Utc::now());
    Ok(())
}

pub async fn run_new(
    session: &mut Session,
    title: Option<String>,
    content: Option<String>,
) -> Result<()> {
    let draft = NoteDraft {
        title,
        content,
        todos: None,
    };
    let note = session.window_mut().create_note_with(draft).await?;
    status(&format!("Created {}  {}", short_id(&note.id), note.title));
    Ok(())
}

pub async fn run_edit(
    session: &mut Session,
    id: &str,
    title: Option<String>,
    content: Option<String>,
) -> Result<()> {
    let patch = NotePatch {
        title,
        content,
        todos: None,
    };
    if patch.is_empty() {
        return Err(anyhow!("Nothing to change. Pass --title or --content."));
    }

    let note = session.note(id)?;
    let updated = session.window_mut().update_note(&note.id, patch).await?;
    status(&format!("Updated {}  {}", short_id(&updated.id), updated.title));
    Ok(())
}

pub async fn run_delete(session: &mut Session, id: &str, force: bool) -> Result<()> {
    let note = session.note(id)?;

    if !force {
        let confirmed = confirm(&format!("Delete \"{}\"?", note.title)).unwrap_or(false);
        if !confirmed {
            return Ok(());
        }
    }

    session.window_mut().delete_note(&note.id).await?;
    status(&format!("Deleted {}  {}", short_id(&note.id), note.title));
    Ok(())
}
