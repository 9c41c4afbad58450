use anyhow::Result;
use chrono::Utc;

use crate::search::{result_summary, Search};
use super::display::print_note_row;
use super::session::Session;
use super::ui::status;

/// Execute the list command, optionally narrowed by a search query.
pub fn run_list(session: &Session, query: Option<&str>) -> Result<()> {
    let state = session.window().state();

    let mut search = Search::default();
    if let Some(query) = query {
        search.set_query(query);
        search.execute();
    }
    let notes = search.filter(&state.notes);

    if search.is_active() {
        status(&result_summary(notes.len(), search.active()));
    } else if notes.is_empty() {
        status("No notes yet. Create one with `notepad new`.");
        return Ok(());
    }

    let now = Utc::now();
    for note in notes {
        let selected = state.selected.as_deref() == Some(note.id.as_str());
        print_note_row(note, selected, search.active(), now);
    }
    Ok(())
}
