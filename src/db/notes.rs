use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row, Transaction};

use super::Database;
use crate::error::{NotepadError, Result};
use crate::models::{Note, Todo};

/// Fixed-width UTC text with full nanoseconds, so index order is
/// chronological order and nothing is lost on the way back.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Helper to convert timestamp parse errors to rusqlite errors
fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

const NOTE_COLUMNS: &str = "id, title, content, created_at, updated_at";
const TODO_COLUMNS: &str = "note_id, id, text, completed, created_at";

impl Database {
    // ==================== NOTE CREATE ====================

    /// Insert a new note with its todos. Fails with `DuplicateKey` if the id is taken.
    pub fn insert_note(&self, note: &Note) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT INTO notes (id, title, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                note.id,
                note.title,
                note.content,
                ts(&note.created_at),
                ts(&note.updated_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(NotepadError::DuplicateKey(note.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        Self::write_todos(&tx, note)?;
        tx.commit()?;
        Ok(())
    }

    // ==================== NOTE READ ====================

    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS),
                [id],
                Self::row_to_note,
            )
            .optional()?;

        let Some(mut note) = note else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM todos WHERE note_id = ? ORDER BY position ASC",
            TODO_COLUMNS
        ))?;
        note.todos = stmt
            .query_map([id], |row| Self::row_to_todo(row).map(|(_, todo)| todo))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(note))
    }

    /// Every note, most recently updated first. Ties fall back to creation time.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notes ORDER BY updated_at DESC, created_at DESC",
            NOTE_COLUMNS
        ))?;
        let mut notes = stmt
            .query_map([], Self::row_to_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // All todos in one query instead of one per note
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM todos ORDER BY note_id, position ASC",
            TODO_COLUMNS
        ))?;
        let mut todos: HashMap<String, Vec<Todo>> = HashMap::new();
        for row in stmt.query_map([], Self::row_to_todo)? {
            let (note_id, todo) = row?;
            todos.entry(note_id).or_default().push(todo);
        }

        for note in &mut notes {
            if let Some(list) = todos.remove(&note.id) {
                note.todos = list;
            }
        }

        Ok(notes)
    }

    pub fn count_notes(&self) -> Result<u32> {
        let count: u32 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== NOTE UPDATE ====================

    /// Upsert by id, replacing every field and the whole todo list.
    pub fn put_note(&self, note: &Note) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"INSERT INTO notes (id, title, content, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   content = excluded.content,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at"#,
            params![
                note.id,
                note.title,
                note.content,
                ts(&note.created_at),
                ts(&note.updated_at),
            ],
        )?;
        tx.execute("DELETE FROM todos WHERE note_id = ?", [&note.id])?;
        Self::write_todos(&tx, note)?;

        tx.commit()?;
        Ok(())
    }

    // ==================== NOTE DELETE ====================

    /// Delete a note and its todos (via CASCADE). Returns false if it was absent.
    pub fn delete_note(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM notes WHERE id = ?", [id])?;
        Ok(rows > 0)
    }

    // ==================== HELPERS ====================

    fn write_todos(tx: &Transaction<'_>, note: &Note) -> Result<()> {
        if note.todos.is_empty() {
            return Ok(());
        }

        let mut stmt = tx.prepare(
            "INSERT INTO todos (note_id, id, position, text, completed, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for (position, todo) in note.todos.iter().enumerate() {
            let written = stmt.execute(params![
                note.id,
                todo.id,
                position as i64,
                todo.text,
                todo.completed as i32,
                ts(&todo.created_at),
            ]);
            match written {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(NotepadError::DuplicateTodo {
                        note_id: note.id.clone(),
                        todo_id: todo.id.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        Ok(Note {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            todos: Vec::new(),
            created_at: parse_ts(3, &created_at)?,
            updated_at: parse_ts(4, &updated_at)?,
        })
    }

    fn row_to_todo(row: &Row) -> rusqlite::Result<(String, Todo)> {
        let created_at: String = row.get(4)?;
        Ok((
            row.get(0)?,
            Todo {
                id: row.get(1)?,
                text: row.get(2)?,
                completed: row.get::<_, i32>(3)? == 1,
                created_at: parse_ts(4, &created_at)?,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NoteDraft, NotePatch, Todo};
    use chrono::Duration;

    fn note_with(title: &str, todos: &[&str]) -> Note {
        Note::new(NoteDraft {
            title: Some(title.to_string()),
            content: Some(format!("{} body", title)),
            todos: Some(todos.iter().map(|t| Todo::new(t)).collect()),
        })
    }

    #[test]
    fn test_insert_and_get_note() {
        let db = Database::open_memory().unwrap();
        let note = note_with("Groceries", &["milk", "eggs"]);

        db.insert_note(&note).unwrap();

        let retrieved = db.get_note(&note.id).unwrap().unwrap();
        assert_eq!(retrieved, note);
        assert_eq!(retrieved.todos[0].text, "milk");
        assert_eq!(retrieved.todos[1].text, "eggs");
    }

    #[test]
    fn test_get_missing_is_none() {
        let db = Database::open_memory().unwrap();
        assert!(db.get_note("missing-id").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_key() {
        let db = Database::open_memory().unwrap();
        let note = note_with("One", &[]);
        db.insert_note(&note).unwrap();

        let err = db.insert_note(&note).unwrap_err();
        assert!(
            matches!(err, NotepadError::DuplicateKey(ref id) if id == &note.id),
            "wrong error type: {err:#?}"
        );
        assert_eq!(db.count_notes().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_todo_rolls_back_insert() {
        let db = Database::open_memory().unwrap();
        let todo = Todo::new("same");
        let mut note = note_with("Dup", &[]);
        note.todos = vec![todo.clone(), todo];

        let err = db.insert_note(&note).unwrap_err();
        assert!(matches!(err, NotepadError::DuplicateTodo { .. }));
        // Nothing half-written
        assert!(db.get_note(&note.id).unwrap().is_none());
    }

    #[test]
    fn test_put_round_trip() {
        let db = Database::open_memory().unwrap();
        let mut note = note_with("Plan", &["a", "b", "c"]);
        db.insert_note(&note).unwrap();

        note.todos.remove(1);
        note.todos[0].completed = true;
        note.todos.push(Todo::new("d"));
        note.apply(NotePatch::title("Plan v2"));
        db.put_note(&note).unwrap();

        assert_eq!(db.get_note(&note.id).unwrap().unwrap(), note);
        assert_eq!(db.count_notes().unwrap(), 1);
    }

    #[test]
    fn test_put_inserts_when_absent() {
        let db = Database::open_memory().unwrap();
        let note = note_with("Fresh", &["x"]);
        db.put_note(&note).unwrap();
        assert_eq!(db.get_note(&note.id).unwrap().unwrap(), note);
    }

    #[test]
    fn test_list_notes_by_recency() {
        let db = Database::open_memory().unwrap();

        let mut notes = Vec::new();
        for i in 0..4 {
            let mut note = note_with(&format!("Note{}", i), &["t"]);
            note.updated_at = note.created_at + Duration::seconds(i);
            db.insert_note(&note).unwrap();
            notes.push(note);
        }
        // Bump the oldest to the top
        notes[0].updated_at = notes[3].updated_at + Duration::seconds(10);
        db.put_note(&notes[0]).unwrap();

        let listed = db.list_notes().unwrap();
        let titles: Vec<_> = listed.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Note0", "Note3", "Note2", "Note1"]);
        assert!(listed.iter().all(|n| n.todos.len() == 1));

        // Pure read
        assert_eq!(db.list_notes().unwrap(), listed);
    }

    #[test]
    fn test_delete_note_cascades() {
        let db = Database::open_memory().unwrap();
        let note = note_with("Bye", &["a", "b"]);
        db.insert_note(&note).unwrap();

        assert!(db.delete_note(&note.id).unwrap());
        assert!(db.get_note(&note.id).unwrap().is_none());

        let orphans: u32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM todos", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);

        // Absent is not an error
        assert!(!db.delete_note(&note.id).unwrap());
        assert!(!db.delete_note("never-existed").unwrap());
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T09:59:59.999999Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + Duration::nanoseconds(1);
        assert!(ts(&early) < ts(&late));
        assert_eq!(ts(&early).len(), ts(&late).len());
        assert_eq!(parse_ts(0, &ts(&early)).unwrap(), early);
    }

    #[test]
    fn test_round_trip_keeps_full_clock_precision() {
        let db = Database::open_memory().unwrap();
        let mut note = note_with("Precise", &["tick"]);
        db.insert_note(&note).unwrap();

        // Timestamps straight from the clock, as a remote payload may carry
        note.updated_at = Utc::now();
        note.todos[0].created_at = Utc::now();
        note.todos.push(Todo {
            id: "late".to_string(),
            text: "tock".to_string(),
            completed: false,
            created_at: Utc::now() + Duration::nanoseconds(123),
        });
        db.put_note(&note).unwrap();

        assert_eq!(db.get_note(&note.id).unwrap().unwrap(), note);
        assert_eq!(db.list_notes().unwrap(), vec![note]);
    }
}
