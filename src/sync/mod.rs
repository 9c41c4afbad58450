//! Cross-window change notifications.
//!
//! Every open window joins one well-known channel and tells the others about
//! the mutations it made. Nothing here is persisted: a window that misses an
//! event catches up on its next read from the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::models::Note;

mod local;
mod relay;

pub use local::{LocalBus, LocalEndpoint};
pub use relay::{Relay, TcpBroadcaster};

/// Channel shared by every instance of the application.
pub const DEFAULT_CHANNEL: &str = "notepad-sync";

const BUS_CAPACITY: usize = 256;

/// Frames that arrived from another process carry this origin.
const REMOTE_ORIGIN: u64 = 0;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

fn next_origin() -> u64 {
    NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed)
}

/// A mutation another window should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    #[serde(rename = "CREATED")]
    NoteCreated { note: Note },
    #[serde(rename = "UPDATED")]
    NoteUpdated { note: Note },
    #[serde(rename = "DELETED")]
    NoteDeleted {
        #[serde(rename = "noteId")]
        note_id: String,
    },
    #[serde(rename = "REFRESHED")]
    NotesRefreshed {},
}

impl SyncEvent {
    pub fn encode(&self) -> Result<String, BroadcastError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, BroadcastError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoteCreated { .. } => "CREATED",
            Self::NoteUpdated { .. } => "UPDATED",
            Self::NoteDeleted { .. } => "DELETED",
            Self::NotesRefreshed {} => "REFRESHED",
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broadcast channel is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fan-out of change events to every other instance on the same channel.
///
/// Delivery is fire-and-forget: no acknowledgement, retry or replay.
/// An endpoint never receives the events it published itself.
pub trait Broadcaster: Send + Sync {
    fn channel(&self) -> &str;

    fn publish(&self, event: &SyncEvent) -> Result<(), BroadcastError>;

    /// Start receiving events published from now on by other endpoints.
    fn subscribe(&self) -> Subscription;
}

#[derive(Clone, Debug)]
pub(crate) struct Frame {
    origin: u64,
    payload: Arc<str>,
}

/// Receiving half of a channel registration. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    origin: u64,
    rx: broadcast::Receiver<Frame>,
}

impl Subscription {
    pub(crate) fn new(channel: &str, origin: u64, rx: broadcast::Receiver<Frame>) -> Self {
        Self {
            channel: channel.to_string(),
            origin,
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event from another endpoint, in publish order. Malformed
    /// messages are logged and skipped. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => {
                    if let Some(event) = self.accept(frame) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("subscriber on {} missed {} messages", self.channel, missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Like `recv` but returns `None` instead of waiting.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    if let Some(event) = self.accept(frame) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("subscriber on {} missed {} messages", self.channel, missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn accept(&self, frame: Frame) -> Option<SyncEvent> {
        if frame.origin == self.origin {
            return None;
        }
        match SyncEvent::decode(&frame.payload) {
            Ok(event) => {
                trace!("received {} on {}", event.kind(), self.channel);
                Some(event)
            }
            Err(e) => {
                warn!("dropping malformed message on {}: {}", self.channel, e);
                None
            }
        }
    }
}
