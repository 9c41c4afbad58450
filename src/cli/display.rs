use chrono::{DateTime, Local, Utc};
use crossterm::style::Stylize;

use crate::models::{Note, Todo};
use crate::search::{highlight, Segment};
use super::ui::{selection_prefix, truncate};

const SHORT_ID_LEN: usize = 8;
const TITLE_WIDTH: usize = 40;
const PREVIEW_WIDTH: usize = 60;

/// Leading characters of an id, enough to type back as a prefix.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// "Just now", "5m ago", "3h ago", or the local date for anything older than a day.
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - at).num_minutes();
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 24 * 60 {
        format!("{}h ago", minutes / 60)
    } else {
        at.with_timezone(&Local).format("%b %-d, %Y").to_string()
    }
}

/// `text` with every case-insensitive occurrence of `query` styled.
pub fn highlighted(text: &str, query: &str) -> String {
    highlight(text, query)
        .into_iter()
        .map(|Segment { text, matched }| {
            if matched {
                text.black().on_yellow().to_string()
            } else {
                text.to_string()
            }
        })
        .collect()
}

pub fn todo_summary(note: &Note) -> Option<String> {
    if note.todos.is_empty() {
        return None;
    }
    Some(format!("{}/{} done", note.completed_todos(), note.todos.len()))
}

/// One line per note, as in `notepad list`.
pub fn print_note_row(note: &Note, selected: bool, query: &str, now: DateTime<Utc>) {
    let title = truncate(&note.title, TITLE_WIDTH);
    let mut line = format!(
        "{}{}  {}",
        selection_prefix(selected),
        short_id(&note.id).dark_grey(),
        highlighted(&title, query).bold()
    );
    if let Some(todos) = todo_summary(note) {
        line.push_str(&format!("  [{}]", todos));
    }
    line.push_str(&format!("  {}", format_relative(note.updated_at, now).dark_grey()));
    println!("{}", line);

    if let Some(preview) = content_preview(&note.content) {
        println!("    {}", highlighted(&preview, query));
    }
}

/// Full note: header, content, then the todo list.
pub fn print_note(note: &Note, query: &str, now: DateTime<Utc>) {
    println!("{}", highlighted(&note.title, query).bold());
    println!(
        "{}",
        format!(
            "{}  updated {}  created {}",
            note.id,
            format_relative(note.updated_at, now),
            format_relative(note.created_at, now)
        )
        .dark_grey()
    );

    if !note.content.is_empty() {
        println!();
        for line in note.content.lines() {
            println!("  {}", highlighted(line, query));
        }
    }

    if !note.todos.is_empty() {
        println!();
        for todo in &note.todos {
            println!("  {}", todo_line(todo, query));
        }
    }
}

fn todo_line(todo: &Todo, query: &str) -> String {
    let text = highlighted(&todo.text, query);
    let id = short_id(&todo.id).dark_grey();
    if todo.completed {
        format!("[x] {}  {}", text.crossed_out(), id)
    } else {
        format!("[ ] {}  {}", text, id)
    }
}

fn content_preview(content: &str) -> Option<String> {
    let first = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(truncate(first, PREVIEW_WIDTH))
}
