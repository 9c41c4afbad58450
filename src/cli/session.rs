//! One CLI invocation's view of the notes: a `Window` wired to the store
//! and to whichever broadcaster is available.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use tokio::time::timeout;

use crate::app::Window;
use crate::config::Config;
use crate::models::{Note, Todo};
use crate::service::NoteService;
use crate::sync::{Broadcaster, LocalBus, TcpBroadcaster};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Session {
    window: Window,
    relay: Option<Arc<TcpBroadcaster>>,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        let service = NoteService::open(&config.db_path)
            .with_context(|| format!("Could not open notes at {}", config.db_path.display()))?;

        let relay = connect_relay(config).await.map(Arc::new);
        let broadcaster: Arc<dyn Broadcaster> = match &relay {
            Some(tcp) => tcp.clone(),
            None => Arc::new(LocalBus::new(&config.channel).join()),
        };

        let window = Window::open(service, broadcaster).await?;
        Ok(Self { window, relay })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    /// True when changes reach other processes through the relay.
    pub fn is_connected(&self) -> bool {
        self.relay.is_some()
    }

    /// The note whose id is `ident` or uniquely starts with it.
    pub fn note(&self, ident: &str) -> Result<Note> {
        let state = self.window.state();
        resolve_note(&state.notes, ident).cloned()
    }

    /// Detach from the channel, making sure pending events reach the relay.
    pub async fn close(self) {
        self.window.close();
        if let Some(relay) = self.relay {
            if let Err(e) = relay.flush().await {
                warn!("could not flush relay connection: {}", e);
            }
        }
    }
}

async fn connect_relay(config: &Config) -> Option<TcpBroadcaster> {
    match timeout(
        CONNECT_TIMEOUT,
        TcpBroadcaster::connect(config.relay_addr, &config.channel),
    )
    .await
    {
        Ok(Ok(tcp)) => {
            debug!("connected to relay at {}", config.relay_addr);
            Some(tcp)
        }
        Ok(Err(e)) => {
            debug!("relay at {} unavailable: {}", config.relay_addr, e);
            None
        }
        Err(_) => {
            debug!("relay at {} timed out", config.relay_addr);
            None
        }
    }
}

pub fn resolve_note<'a>(notes: &'a [Note], ident: &str) -> Result<&'a Note> {
    resolve_prefix(notes, ident, |n| &n.id, "note")
}

pub fn resolve_todo<'a>(todos: &'a [Todo], ident: &str) -> Result<&'a Todo> {
    resolve_prefix(todos, ident, |t| &t.id, "todo")
}

fn resolve_prefix<'a, T>(
    items: &'a [T],
    ident: &str,
    id_of: impl Fn(&T) -> &str,
    what: &str,
) -> Result<&'a T> {
    let ident = ident.trim();
    if ident.is_empty() {
        return Err(anyhow!("Identifier cannot be empty."));
    }

    if let Some(exact) = items.iter().find(|item| id_of(item) == ident) {
        return Ok(exact);
    }

    let mut matches = items.iter().filter(|item| id_of(item).starts_with(ident));
    match (matches.next(), matches.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(anyhow!("No {} found with ID: {}", what, ident)),
        (Some(_), Some(_)) => Err(anyhow!(
            "'{}' matches more than one {}; use more characters",
            ident,
            what
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;

    fn note_with_id(id: &str) -> Note {
        let mut note = Note::new(NoteDraft::default());
        note.id = id.to_string();
        note
    }

    #[test]
    fn test_resolve_exact_and_prefix() {
        let notes = vec![note_with_id("abc123"), note_with_id("abd456"), note_with_id("ab")];
        assert_eq!(resolve_note(&notes, "abc").unwrap().id, "abc123");
        assert_eq!(resolve_note(&notes, " abd4 ").unwrap().id, "abd456");
        // An exact id wins even if it is also a prefix of others
        assert_eq!(resolve_note(&notes, "ab").unwrap().id, "ab");
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() {
        let notes = vec![note_with_id("abc123"), note_with_id("abd456")];
        let err = resolve_note(&notes, "a").unwrap_err();
        assert!(err.to_string().contains("more than one note"));

        let err = resolve_note(&notes, "zz").unwrap_err();
        assert!(err.to_string().contains("No note found"));

        assert!(resolve_note(&notes, "  ").is_err());
    }

    #[test]
    fn test_resolve_todo() {
        let mut a = Todo::new("one");
        a.id = "t-1".to_string();
        let mut b = Todo::new("two");
        b.id = "u-2".to_string();
        let todos = vec![a, b];
        assert_eq!(resolve_todo(&todos, "u").unwrap().text, "two");
        assert!(resolve_todo(&todos, "x").is_err());
    }

    #[tokio::test]
    async fn test_session_falls_back_without_relay() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let relay_addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config {
            db_path: dir.path().join("notes.db"),
            channel: "test".to_string(),
            relay_addr,
        };
        let mut session = Session::open(&config).await.unwrap();
        assert!(!session.is_connected());

        let note = session.window_mut().create_note().await.unwrap();
        let prefix = &note.id[..8];
        assert_eq!(session.note(prefix).unwrap().id, note.id);
        session.close().await;
    }
}
