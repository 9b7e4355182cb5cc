//! WebSocket transport for the networked variant (§4.7, §6). Each
//! `ClientMessage`/`ServerMessage` is bincode-encoded into one binary
//! WebSocket frame; tokio-tungstenite already frames messages, so no
//! extra length prefix is needed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::server::PolicyServer;
use crate::wire::{decode, encode, ClientMessage, ServerMessage, WireError};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Robot-side connection: dials the server and exposes request/response
/// pairs for the four RPC methods (§6).
pub struct RobotClientConnection {
    socket: ClientSocket,
}

impl RobotClientConnection {
    /// Connects with the reconnect-on-failure loop from the Omniston WS
    /// client, but returning a single live connection rather than
    /// looping internally — callers own the retry policy for a given
    /// session (handshake state must not straddle reconnects silently).
    pub async fn connect(server_address: &str) -> Result<Self, ConnectionError> {
        let (socket, _) = connect_async(server_address)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        Ok(Self { socket })
    }

    pub async fn connect_with_retry(
        server_address: &str,
        retry_delay: Duration,
    ) -> Self {
        loop {
            match Self::connect(server_address).await {
                Ok(conn) => return conn,
                Err(e) => {
                    warn!(error = %e, "connect failed, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), ConnectionError> {
        let bytes = encode(msg)?;
        self.socket
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    pub async fn recv(&mut self) -> Result<ServerMessage, ConnectionError> {
        loop {
            let frame = self
                .socket
                .next()
                .await
                .ok_or_else(|| ConnectionError::Transport("connection closed".into()))?
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            match frame {
                Message::Binary(bytes) => return Ok(decode(&bytes)?),
                Message::Close(_) => {
                    return Err(ConnectionError::Transport("server closed connection".into()))
                }
                _ => continue,
            }
        }
    }

    pub async fn request(&mut self, msg: ClientMessage) -> Result<ServerMessage, ConnectionError> {
        self.send(&msg).await?;
        self.recv().await
    }
}

/// Server-side listener: accepts one WebSocket connection per robot and
/// serves it against a shared [`PolicyServer`].
pub async fn serve(addr: SocketAddr, policy_server: Arc<PolicyServer>) -> Result<(), ConnectionError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    info!(%addr, "policy server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let policy_server = policy_server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, policy_server).await {
                warn!(%peer, error = %e, "connection ended");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    policy_server: Arc<PolicyServer>,
) -> Result<(), ConnectionError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    let (mut write, mut read) = ws.split();

    while let Some(frame) = read.next().await {
        let frame = frame.map_err(|e| ConnectionError::Transport(e.to_string()))?;
        let bytes = match frame {
            Message::Binary(b) => b,
            Message::Close(_) => break,
            _ => continue,
        };

        let msg: ClientMessage = decode(&bytes)?;
        let reply = dispatch(&policy_server, msg).await?;
        let out = encode(&reply)?;
        write
            .send(Message::Binary(out.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    }
    debug!("client disconnected");
    Ok(())
}

async fn dispatch(
    policy_server: &PolicyServer,
    msg: ClientMessage,
) -> Result<ServerMessage, ConnectionError> {
    match msg {
        ClientMessage::Ready => {
            policy_server.ready();
            Ok(ServerMessage::ReadyAck)
        }
        ClientMessage::SendPolicyInstructions(cfg) => {
            policy_server
                .send_policy_instructions(&cfg)
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            Ok(ServerMessage::PolicyInstructionsAck)
        }
        ClientMessage::SendObservation(obs) => {
            let accepted = policy_server.offer_observation(obs);
            Ok(ServerMessage::ObservationAck { accepted })
        }
        ClientMessage::GetActions => {
            let actions = policy_server
                .get_actions()
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            Ok(ServerMessage::Actions(actions))
        }
    }
}
