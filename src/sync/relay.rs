//! Loopback relay so windows in separate processes can share one channel.
//!
//! Wire format is line based. A client opens a TCP connection, sends the
//! channel name on the first line and waits for the `READY` line. After
//! that every line it sends is one encoded `SyncEvent`, and it receives every
//! line sent by the other connections on the same channel. The relay never
//! parses events and never echoes a line back to its sender.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use super::{
    next_origin, BroadcastError, Broadcaster, Frame, Subscription, SyncEvent, BUS_CAPACITY,
    REMOTE_ORIGIN,
};

const READY: &str = "READY";

/// Longest line either side accepts. A peer sending more is disconnected.
const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<Frame>>>>;

enum Outgoing {
    Line(String),
    Flush(oneshot::Sender<()>),
}

pub struct Relay {
    listener: TcpListener,
}

impl Relay {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, BroadcastError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BroadcastError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `shutdown` resolves, then drop them all.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), BroadcastError>
    where
        F: Future<Output = ()>,
    {
        let channels: Channels = Arc::new(Mutex::new(HashMap::new()));
        let mut connections = JoinSet::new();
        let mut next_conn: u64 = 1;
        tokio::pin!(shutdown);

        info!("relay listening on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = next_conn;
                        next_conn += 1;
                        debug!("connection {} from {}", conn, peer);
                        let channels = channels.clone();
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(stream, conn, channels).await {
                                debug!("connection {} ended: {}", conn, e);
                            }
                        });
                    }
                    Err(e) => warn!("accept error: {}", e),
                },
                // Reap finished connections so the set does not grow
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("relay shutting down");
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    conn: u64,
    channels: Channels,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = LineReader::new(reader);

    let Some(channel) = lines.next_line().await? else {
        return Ok(());
    };
    let channel = channel.trim().to_string();
    if channel.is_empty() {
        return Ok(());
    }

    let tx = {
        let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone()
    };
    let mut rx = tx.subscribe();
    write_line(&mut writer, READY).await?;
    debug!("connection {} joined {}", conn, channel);

    let result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => {
                    trace!("connection {} sent {} bytes", conn, line.len());
                    // The only possible error is not having subscribers
                    let _ = tx.send(Frame { origin: conn, payload: line.into() });
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
            frame = rx.recv() => match frame {
                Ok(frame) if frame.origin == conn => {}
                Ok(frame) => {
                    if let Err(e) = write_line(&mut writer, &frame.payload).await {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("connection {} on {} missed {} messages", conn, channel, missed);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    drop(rx);
    let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
    if tx.receiver_count() == 0 {
        channels.remove(&channel);
    }
    result
}

/// Newline-delimited reader with a length cap.
///
/// Partial lines stay buffered between calls, so `next_line` can be used in
/// `select!` without losing data.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_LINE_LEN)
    }

    fn with_limit(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Next line without its terminator. `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let room = (self.max_len + 1).saturating_sub(self.buf.len()) as u64;
        let read = (&mut self.reader)
            .take(room)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > self.max_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line longer than {} bytes", self.max_len),
            ));
        } else if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let line = std::mem::take(&mut self.buf);
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// A `Broadcaster` backed by one connection to a `Relay`.
///
/// Dropping it closes the connection.
pub struct TcpBroadcaster {
    channel: String,
    origin: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    incoming: Arc<Mutex<Option<broadcast::Sender<Frame>>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpBroadcaster {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        channel: &str,
    ) -> Result<Self, BroadcastError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = LineReader::new(reader);

        write_line(&mut writer, channel).await?;
        match lines.next_line().await? {
            Some(line) if line == READY => {}
            _ => return Err(BroadcastError::Closed),
        }

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let writer_task = tokio::spawn(async move {
            while let Some(item) = outgoing_rx.recv().await {
                match item {
                    Outgoing::Line(payload) => {
                        if let Err(e) = write_line(&mut writer, &payload).await {
                            warn!("relay write failed: {}", e);
                            break;
                        }
                    }
                    Outgoing::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        let (incoming_tx, _) = broadcast::channel(BUS_CAPACITY);
        let incoming = Arc::new(Mutex::new(Some(incoming_tx.clone())));
        let reader_incoming = incoming.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let _ = incoming_tx.send(Frame {
                            origin: REMOTE_ORIGIN,
                            payload: line.into(),
                        });
                    }
                    Ok(None) => {
                        debug!("relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("relay read failed: {}", e);
                        break;
                    }
                }
            }
            // Close the channel so subscribers see the end
            reader_incoming
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        });

        debug!("joined relay channel {}", channel);
        Ok(Self {
            channel: channel.to_string(),
            origin: next_origin(),
            outgoing,
            incoming,
            tasks: vec![writer_task, reader_task],
        })
    }

    /// Wait until everything published so far has been written to the relay.
    pub async fn flush(&self) -> Result<(), BroadcastError> {
        let (done, written) = oneshot::channel();
        self.outgoing
            .send(Outgoing::Flush(done))
            .map_err(|_| BroadcastError::Closed)?;
        written.await.map_err(|_| BroadcastError::Closed)
    }
}

impl Broadcaster for TcpBroadcaster {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn publish(&self, event: &SyncEvent) -> Result<(), BroadcastError> {
        let payload = event.encode()?;
        trace!("publishing {} on {}", event.kind(), self.channel);
        self.outgoing
            .send(Outgoing::Line(payload))
            .map_err(|_| BroadcastError::Closed)
    }

    fn subscribe(&self) -> Subscription {
        let incoming = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = match incoming.as_ref() {
            Some(tx) => tx.subscribe(),
            // Connection already gone: hand out a receiver that is closed
            None => broadcast::channel(1).1,
        };
        Subscription::new(&self.channel, self.origin, rx)
    }
}

impl Drop for TcpBroadcaster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
