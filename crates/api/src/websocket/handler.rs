//! WebSocket handler for Axum
//!
//! Upgrades the HTTP connection and pumps frames between the socket and the
//! notification hub. Authentication happens in-band after the upgrade.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use tokio::sync::mpsc;

use super::connection::{Connection, Outbound};
use super::hub::NotificationHub;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Time allowed for the writer to flush its last frames after the reader stops
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    State(app_state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    if !app_state.hub.is_accepting() {
        tracing::warn!("Refusing WebSocket upgrade during shutdown");
        return Err(ApiError::ServiceUnavailable);
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = Arc::clone(&app_state.hub);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (sink, mut receiver) = socket.split();

    // Create channel for frames headed to this connection
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();

    let Some(conn) = hub.register(tx).await else {
        // Shutdown began between upgrade and admission; a close frame is queued
        let _ = write_loop(sink, rx, None).await;
        return;
    };
    let connection_id = conn.id;

    let mut send_task = tokio::spawn(write_loop(sink, rx, Some(Arc::clone(&conn))));

    // Handle incoming messages until either side closes
    loop {
        tokio::select! {
            () = conn.closed() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => hub.handle_text(&conn, &text).await,
                Some(Ok(Message::Binary(_))) => hub.handle_binary(&conn).await,
                Some(Ok(Message::Pong(_) | Message::Ping(_))) => hub.handle_pong(&conn),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(
                        connection_id = %connection_id,
                        "WebSocket close frame received"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            },
        }
    }

    // Cleanup on disconnect
    hub.disconnect(&conn).await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }

    tracing::info!(connection_id = %connection_id, "WebSocket connection finished");
}

/// Drain outbound frames into the socket until a close or terminate frame,
/// or until the connection ends and the queue is empty.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    conn: Option<Arc<Connection>>,
) -> Result<(), axum::Error> {
    loop {
        let frame = match &conn {
            Some(conn) => tokio::select! {
                biased;
                frame = rx.recv() => frame,
                () = conn.closed() => rx.try_recv().ok(),
            },
            None => rx.try_recv().ok(),
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        match frame {
            Outbound::Text(text) => sink.send(Message::Text(text.to_string())).await?,
            Outbound::Ping => sink.send(Message::Ping(Vec::new())).await?,
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: Cow::Owned(reason),
                    })))
                    .await;
                return Ok(());
            }
            Outbound::Terminate => return Ok(()),
        }
    }
}
