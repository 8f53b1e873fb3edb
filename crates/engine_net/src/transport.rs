//! WebSocket transport tasks.
//!
//! Transport tasks never touch the world. They decode incoming frames into
//! the receiving system's single-slot buffer and forward encoded frames
//! from its outbound channel; everything else happens on the system's own
//! tick.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, connect_async};
use tracing::{debug, info, warn};

use crate::client::ClientLink;
use crate::codec::{Frame, decode_frame};
use crate::error::NetError;
use crate::server::ServerHub;

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(bytes) => Message::binary(bytes),
    }
}

fn into_frame(message: Message) -> Option<Frame> {
    if message.is_text() {
        message.to_text().ok().map(|text| Frame::Text(text.to_owned()))
    } else if message.is_binary() {
        Some(Frame::Binary(message.into_data().to_vec()))
    } else {
        None
    }
}

/// Shuttle frames between a socket and its owner until either side closes.
async fn pump<S, F>(ws: WebSocketStream<S>, mut outbound: mpsc::UnboundedReceiver<Frame>, mut on_frame: F)
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(Frame),
{
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    break;
                };
                if let Err(err) = sink.send(into_message(frame)).await {
                    debug!(error = %err, "WebSocket send failed");
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if message.is_close() {
                        break;
                    }
                    if let Some(frame) = into_frame(message) {
                        on_frame(frame);
                    }
                }
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket receive failed");
                    break;
                }
                None => break,
            },
        }
    }
}

/// Bind the server socket.
///
/// # Errors
///
/// Returns [`NetError::Io`] if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NetError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Spawn the accept loop. Aborting the returned task drops every
/// connection task with it.
#[must_use]
pub fn spawn_server(listener: TcpListener, hub: Arc<ServerHub>) -> JoinHandle<()> {
    tokio::spawn(accept_loop(listener, hub))
}

async fn accept_loop(listener: TcpListener, hub: Arc<ServerHub>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&hub)));
                }
                Err(err) => warn!(error = %err, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, hub: Arc<ServerHub>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%peer, error = %err, "WebSocket handshake failed");
            return;
        }
    };

    let (client, outbound) = hub.connect();
    info!(%peer, %client, "client connected");

    pump(ws, outbound, |frame| match decode_frame(&frame) {
        Ok(state) => {
            hub.deliver(client, state);
        }
        Err(err) => warn!(%client, error = %err, "dropping undecodable frame"),
    })
    .await;

    hub.disconnect(client);
    info!(%peer, %client, "client disconnected");
}

/// Connect to a server and spawn the client's transport task.
///
/// The task ends when the socket closes or `outbound` is closed, and marks
/// `link` closed on its way out.
///
/// # Errors
///
/// Returns [`NetError::WebSocket`] if the connection or handshake fails.
pub async fn connect(
    url: &str,
    link: Arc<ClientLink>,
    outbound: mpsc::UnboundedReceiver<Frame>,
) -> Result<JoinHandle<()>, NetError> {
    let (ws, _response) = connect_async(url).await?;
    info!(url, "connected to server");

    Ok(tokio::spawn(async move {
        pump(ws, outbound, |frame| match decode_frame(&frame) {
            Ok(state) => {
                link.deliver(state);
            }
            Err(err) => warn!(error = %err, "dropping undecodable frame"),
        })
        .await;
        link.close();
        info!("disconnected from server");
    }))
}
