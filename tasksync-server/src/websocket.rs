use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::store::{ChangeBatch, TaskRepository};
use crate::AppState;

/// Keeps a feed in the registry until dropped, whether or not the upgrade
/// ever completes.
pub struct FeedRegistration {
    repo: TaskRepository,
    feed_id: Uuid,
}

impl Drop for FeedRegistration {
    fn drop(&mut self) {
        self.repo.unregister_feed(&self.feed_id);
        tracing::debug!(feed_id = %self.feed_id, "change feed closed");
    }
}

pub async fn changes_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Registered before the handshake response, so every commit after the
    // client sees the upgrade reaches it.
    let (feed_id, changes) = state.repo.register_feed(state.feed_buffer);
    let registration = FeedRegistration {
        repo: state.repo.clone(),
        feed_id,
    };
    ws.on_upgrade(move |socket| handle_change_feed(socket, registration, changes))
}

/// Streams change events to one subscriber until either side goes away.
/// The feed is push-only; anything the client sends besides Close is ignored.
pub async fn handle_change_feed(
    socket: WebSocket,
    registration: FeedRegistration,
    mut changes: mpsc::Receiver<ChangeBatch>,
) {
    let feed_id = registration.feed_id;
    let (mut sender, mut receiver) = socket.split();

    'feed: loop {
        tokio::select! {
            batch = changes.recv() => {
                let Some(batch) = batch else {
                    // Evicted by the repository.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                for event in batch.iter() {
                    let json = match serde_json::to_string(event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(%e, "failed to encode change event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break 'feed;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%e, %feed_id, "change feed socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    drop(registration);
}
