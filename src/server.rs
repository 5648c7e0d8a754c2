//! TCP listener and per-connection sessions
//!
//! One tokio task per connection. Each session loops reading framed
//! messages, dispatching them, and writing the response; a second task owns
//! the write half so block broadcasts from other sessions interleave safely
//! with responses. The accept loop watches the shutdown channel between
//! accepts instead of blocking indefinitely.

use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::error::Result;
use crate::protocol::{self, DISCONNECT_MESSAGE};
use crate::router::Router;

/// Buffered broadcast slots before slow sessions start missing blocks.
const BROADCAST_CAPACITY: usize = 64;

/// Accept connections until the shutdown channel flips. The listener is
/// bound by the caller so tests can bind port 0 and read the chosen port.
pub async fn run(
    listener: TcpListener,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (events, _) = broadcast::channel::<(u64, String)>(BROADCAST_CAPACITY);
    let mut next_session = 0u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        next_session += 1;
                        let session = Session {
                            id: next_session,
                            router: router.clone(),
                            events: events.clone(),
                            shutdown: shutdown.clone(),
                        };
                        info!("New connection from {}", peer);
                        tokio::spawn(async move {
                            session.handle(stream).await;
                            info!("{} disconnected", peer);
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown too.
                if changed.is_err() || *shutdown.borrow() {
                    info!("Listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

struct Session {
    id: u64,
    router: Arc<Router>,
    events: broadcast::Sender<(u64, String)>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    async fn handle(mut self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();

        // The writer task is the only place that touches the socket's write
        // half; responses and broadcasts are funneled through one queue.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if protocol::write_frame(&mut writer, &payload).await.is_err() {
                    break;
                }
            }
        });

        let mut events = self.events.subscribe();
        let forward_tx = out_tx.clone();
        let session_id = self.id;
        let forward_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    // Accepted blocks go to every session except the one
                    // that submitted them.
                    Ok((source, payload)) if source != session_id => {
                        if forward_tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Session {} missed {} broadcasts", session_id, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.read_loop(&mut reader, &out_tx).await;

        drop(out_tx);
        forward_task.abort();
        let _ = writer_task.await;
    }

    async fn read_loop(
        &mut self,
        reader: &mut OwnedReadHalf,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        loop {
            let frame = tokio::select! {
                frame = protocol::read_frame(reader) => frame,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            };

            match frame {
                Ok(None) => return,
                Ok(Some(msg)) if msg == DISCONNECT_MESSAGE => return,
                Ok(Some(msg)) => {
                    let dispatch = self.router.dispatch(&msg);
                    if out_tx.send(dispatch.response).is_err() {
                        return;
                    }
                    if let Some(payload) = dispatch.broadcast {
                        let _ = self.events.send((self.id, payload));
                    }
                }
                Err(e) => {
                    warn!("Session {} protocol error: {}", self.id, e);
                    return;
                }
            }
        }
    }
}
