//! Long-running subcommands: following other windows and running the relay.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use tokio::sync::Notify;

use crate::app::AppState;
use crate::config::Config;
use crate::sync::{Relay, SyncEvent};
use super::display::short_id;
use super::session::Session;
use super::ui::{status, warning};

pub async fn run_refresh(session: &mut Session) -> Result<()> {
    session.window_mut().refresh().await?;
    let count = session.window().state().notes.len();
    status(&format!("Reloaded {} notes", count));
    Ok(())
}

/// Print every change made by other windows until Ctrl+C.
pub async fn run_watch(session: &mut Session, config: &Config) -> Result<()> {
    if !session.is_connected() {
        warning(&format!(
            "No relay at {}. Start one with `notepad relay` to see other windows.",
            config.relay_addr
        ));
    }
    status(&format!("Watching {} (Ctrl+C to stop)", config.channel));

    let shutdown = ctrlc_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = session.window_mut().next_remote() => match event {
                Some(event) => status(&describe(&event, &session.window().state())),
                None => {
                    warning("Sync channel closed.");
                    break;
                }
            },
        }
    }
    Ok(())
}

/// Run the loopback relay until Ctrl+C.
pub async fn run_relay(config: &Config) -> Result<()> {
    let relay = Relay::bind(config.relay_addr)
        .await
        .with_context(|| format!("Could not listen on {}", config.relay_addr))?;
    status(&format!("Relay listening on {} (Ctrl+C to stop)", relay.local_addr()?));
    relay.run_until(ctrlc_shutdown()).await?;
    Ok(())
}

fn describe(event: &SyncEvent, state: &AppState) -> String {
    match event {
        SyncEvent::NoteCreated { note } => {
            format!("+ {}  {}", short_id(&note.id), note.title)
        }
        SyncEvent::NoteUpdated { note } => {
            format!("~ {}  {}", short_id(&note.id), note.title)
        }
        SyncEvent::NoteDeleted { note_id } => format!("- {}", short_id(note_id)),
        SyncEvent::NotesRefreshed {} => format!("* reloaded {} notes", state.notes.len()),
    }
}

/// Resolves on the first Ctrl+C.
fn ctrlc_shutdown() -> impl Future<Output = ()> {
    let notify = Arc::new(Notify::new());
    let handler_notify = notify.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, shutting down...");
        handler_notify.notify_one();
    }) {
        warn!("could not install Ctrl+C handler: {}", e);
    }
    async move { notify.notified().await }
}
