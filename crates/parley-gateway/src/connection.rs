use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, trace, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::dispatcher::{Dispatcher, Registration};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one socket until either side goes away.
///
/// `user_id` is `None` for connections opened without a `userId`; those only
/// receive broadcasts and never appear in the online set.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Option<Uuid>) {
    let (sender, mut receiver) = socket.split();

    let Registration {
        conn_id,
        targeted,
        broadcasts,
    } = dispatcher.connect(user_id).await;

    match user_id {
        Some(id) => info!("User connected: {} (conn {})", id, conn_id),
        None => info!("Anonymous socket connected (conn {})", conn_id),
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(pump_outbound(sender, broadcasts, targeted, pong_flag_send));

    // The client never sends commands; only watch for pongs and close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    let preview: String = text.chars().take(200).collect();
                    trace!("Ignoring inbound frame: {}", preview);
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user_id, conn_id).await;
    match user_id {
        Some(id) => info!("User disconnected: {} (conn {})", id, conn_id),
        None => info!("Anonymous socket disconnected (conn {})", conn_id),
    }
}

/// Forward broadcasts and targeted events to the client and keep the
/// heartbeat. Returns when the connection should be torn down.
async fn pump_outbound<S>(
    mut sender: S,
    mut broadcasts: broadcast::Receiver<ServerEvent>,
    mut targeted: mpsc::UnboundedReceiver<ServerEvent>,
    pong_received: Arc<AtomicBool>,
) where
    S: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            result = broadcasts.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }
            result = targeted.recv() => {
                let Some(event) = result else { break };
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Serialize and write one event. Returns false once the socket is unusable.
async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use tokio::task::JoinHandle;

    /// Run the outbound pump against an in-memory sink. Returns the frames it
    /// writes, the sender side of both channels and the pong flag.
    #[allow(clippy::type_complexity)]
    fn spawn_pump() -> (
        JoinHandle<()>,
        mpsc::UnboundedReceiver<Message>,
        broadcast::Sender<ServerEvent>,
        mpsc::UnboundedSender<ServerEvent>,
        Arc<AtomicBool>,
    ) {
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let sink = Box::pin(sink::unfold(frames_tx, |tx, frame: Message| async move {
            tx.send(frame).map(|_| tx)
        }));
        let (broadcast_tx, broadcasts) = broadcast::channel(16);
        let (targeted_tx, targeted) = mpsc::unbounded_channel();
        let pong = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(pump_outbound(sink, broadcasts, targeted, pong.clone()));
        (task, frames, broadcast_tx, targeted_tx, pong)
    }

    fn pings(frames: &mut mpsc::UnboundedReceiver<Message>) -> usize {
        let mut count = 0;
        while let Ok(frame) = frames.try_recv() {
            if matches!(frame, Message::Ping(_)) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_dropped_after_two_missed_pongs() {
        let (task, mut frames, _b, _t, _pong) = spawn_pump();

        tokio::time::sleep(HEARTBEAT_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(pings(&mut frames), 1);
        assert!(!task.is_finished());

        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        assert_eq!(pings(&mut frames), 1);
        assert!(!task.is_finished());

        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        assert!(task.is_finished());
        assert_eq!(pings(&mut frames), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_keep_connection_open() {
        let (task, mut frames, _b, _t, pong) = spawn_pump();

        // Wake just after each tick rather than on it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        for _ in 0..5 {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            pong.store(true, Ordering::Release);
        }
        assert!(!task.is_finished());
        assert_eq!(pings(&mut frames), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_written_as_json_text() {
        let (task, mut frames, broadcast_tx, targeted_tx, _pong) = spawn_pump();
        let user = Uuid::new_v4();

        broadcast_tx.send(ServerEvent::GetOnlineUsers(vec![user])).unwrap();
        match frames.recv().await {
            Some(Message::Text(text)) => {
                let decoded: ServerEvent = serde_json::from_str(&text).unwrap();
                assert_eq!(decoded, ServerEvent::GetOnlineUsers(vec![user]));
            }
            other => panic!("expected text frame, got {:?}", other),
        }

        drop(targeted_tx);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(task.is_finished());
    }
}
