//! Case-insensitive search across notes and their todos.

use regex::{Regex, RegexBuilder};

use crate::models::Note;

/// Typed query plus the query actually used for filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Search {
    query: String,
    active: String,
}

impl Search {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    /// Update the typed query. Clearing the input deactivates the search at once.
    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        if query.trim().is_empty() {
            self.active.clear();
        }
    }

    pub fn execute(&mut self) {
        self.active = self.query.trim().to_string();
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.active.clear();
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn filter<'a>(&self, notes: &'a [Note]) -> Vec<&'a Note> {
        filter_notes(notes, &self.active)
    }
}

/// True if title, content or any todo contains `query`, ignoring case.
/// A blank query matches everything.
pub fn note_matches(note: &Note, query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    match literal_pattern(query) {
        Some(re) => matches_pattern(note, &re),
        None => false,
    }
}

/// Notes matching `query`, in input order.
pub fn filter_notes<'a>(notes: &'a [Note], query: &str) -> Vec<&'a Note> {
    if query.trim().is_empty() {
        return notes.iter().collect();
    }
    match literal_pattern(query) {
        Some(re) => notes.iter().filter(|n| matches_pattern(n, &re)).collect(),
        None => Vec::new(),
    }
}

// Same pattern as `highlight`, so a match always has something to highlight
fn matches_pattern(note: &Note, re: &Regex) -> bool {
    re.is_match(&note.title)
        || re.is_match(&note.content)
        || note.todos.iter().any(|t| re.is_match(&t.text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub matched: bool,
}

/// Split `text` into runs that do and do not match `query`.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<Segment<'a>> {
    let Some(re) = literal_pattern(query) else {
        return plain(text);
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for m in re.find_iter(text) {
        if m.start() > last {
            segments.push(Segment {
                text: &text[last..m.start()],
                matched: false,
            });
        }
        segments.push(Segment {
            text: m.as_str(),
            matched: true,
        });
        last = m.end();
    }
    if last < text.len() {
        segments.push(Segment {
            text: &text[last..],
            matched: false,
        });
    }
    segments
}

pub fn result_summary(count: usize, query: &str) -> String {
    match count {
        0 => format!("No results for \"{}\"", query),
        1 => format!("Found 1 note matching \"{}\"", query),
        n => format!("Found {} notes matching \"{}\"", n, query),
    }
}

fn literal_pattern(query: &str) -> Option<Regex> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .ok()
}

fn plain(text: &str) -> Vec<Segment<'_>> {
    if text.is_empty() {
        return Vec::new();
    }
    vec![Segment {
        text,
        matched: false,
    }]
}
