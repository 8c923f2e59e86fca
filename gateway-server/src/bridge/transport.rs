//! WebSocket transport loop for bridge sessions

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use gateway_protocol::{ConnectionNotice, JsonRpcResponse, AUTH_FAILURE_CLOSE_CODE};

use super::error::SessionError;
use super::session::BridgeSession;

/// How long to wait for the peer's close acknowledgement
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Drive one authenticated WebSocket connection until either side closes
pub async fn run_session<S>(
    mut ws: WebSocketStream<S>,
    mut session: BridgeSession,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.start();
    let connection_id = session.connection_id().to_string();

    let notice = ConnectionNotice::established(&connection_id).into_response();
    if let Err(e) = send_response(&mut ws, &notice).await {
        warn!(connection_id = %connection_id, error = %e, "Failed to send connection notice");
        session.close().await;
        return;
    }

    loop {
        tokio::select! {
            incoming = ws.next() => {
                let reply = match incoming {
                    Some(Ok(Message::Text(text))) => session.on_message(text.as_str()).await,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => session.on_message(text).await,
                        Err(_) => Some(JsonRpcResponse::error(
                            gateway_protocol::RequestId::empty(),
                            SessionError::InvalidRequest.into(),
                        )),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        session.heartbeat();
                        if ws.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                        None
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.heartbeat();
                        None
                    }
                    Some(Ok(Message::Frame(_))) => None,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection_id = %connection_id, frame = ?frame, "Peer closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                };

                if let Some(reply) = reply {
                    if let Err(e) = send_response(&mut ws, &reply).await {
                        warn!(connection_id = %connection_id, error = %e, "Failed to send reply");
                        break;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                info!(connection_id = %connection_id, "Closing bridge connection for shutdown");
                let _ = ws.close(None).await;
                break;
            }
        }
    }

    session.close().await;
    info!(connection_id = %connection_id, "Bridge connection finished");
}

/// Close an upgraded connection whose app is not allowed to connect
pub async fn reject_with_auth_failure<S>(ws: WebSocketStream<S>, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    close_with(ws, CloseCode::from(AUTH_FAILURE_CLOSE_CODE), reason).await;
}

/// Send a close frame and wait briefly for the peer to acknowledge it
pub async fn close_with<S>(mut ws: WebSocketStream<S>, code: CloseCode, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "Failed to send close frame");
        return;
    }

    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

async fn send_response<S>(
    ws: &mut WebSocketStream<S>,
    response: &JsonRpcResponse,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = response.to_line()?;
    ws.send(Message::Text(line.into())).await?;
    Ok(())
}
