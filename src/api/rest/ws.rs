use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt};
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::backend::ChangeEvent;
use crate::error::AppError;
use crate::models::report::Report;
use crate::models::task::Task;
use crate::session::Session;
use crate::state::AppState;
use crate::sync::LiveState;

/// Frames sent to a live client: one snapshot, then every applied change.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame<'a> {
    Snapshot {
        reports: Vec<Report>,
        tasks: Vec<Task>,
    },
    Change(&'a ChangeEvent),
    Lagged {
        skipped: u64,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    let live = LiveState::start(
        session,
        state.store.as_ref(),
        Arc::clone(&state.feed),
        state.event_buffer_size,
    )
    .await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, live)).into_response())
}

async fn handle_socket(socket: WebSocket, live: LiveState) {
    let (mut sender, mut receiver) = socket.split();
    let mut changes = BroadcastStream::new(live.changes());
    let user_id = live.session().user_id;

    info!(user_id = %user_id, "websocket client connected");

    let snapshot = Frame::Snapshot {
        reports: live.reports(),
        tasks: live.tasks(),
    };
    if send_frame(&mut sender, &snapshot).await.is_err() {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        // The live state must outlive the forwarding loop.
        let _live = live;
        while let Some(next) = changes.next().await {
            let sent = match next {
                Ok(event) => send_frame(&mut sender, &Frame::Change(&event)).await,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging behind change feed");
                    send_frame(&mut sender, &Frame::Lagged { skipped }).await
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(user_id = %user_id, "websocket client disconnected");
}

async fn send_frame<S>(sender: &mut S, frame: &Frame<'_>) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "failed to serialize frame for ws");
            return Ok(());
        }
    };

    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
