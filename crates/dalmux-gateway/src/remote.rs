//! Remote listener
//!
//! Accepts sockets carrying length-delimited JSON frames. The first frame must
//! be a login; every later frame is a numbered call answered on the same
//! socket. A socket closing without a disconnect leaves the session in place
//! so the client can reconnect; the reaper removes it once idle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dalmux_core::codec::{from_slice, to_bytes, WireError};
use dalmux_core::protocol::{ClientFrame, EntityRequest, EntityResponse, Outcome, ServerFrame};
use dalmux_core::{Error, FRAMEWORK_VERSION};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::server::EntityServer;

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

pub struct RemoteServer {
    server: Arc<EntityServer>,
    config: RemoteConfig,
}

impl RemoteServer {
    pub fn new(server: Arc<EntityServer>, config: RemoteConfig) -> Self {
        Self { server, config }
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.addr()?;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind remote listener on {}", addr))
    }

    /// Accept connections until `token` is cancelled
    pub async fn serve(self, listener: TcpListener, token: CancellationToken) -> anyhow::Result<()> {
        info!("[Remote] Listening on {}", listener.local_addr()?);
        loop {
            let (socket, peer) = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            let server = Arc::clone(&self.server);
            let max_frame_length = self.config.max_frame_length;
            tokio::spawn(async move {
                if let Err(err) = handle_conn(socket, peer, server, max_frame_length).await {
                    debug!(error = ?err, "[Remote] Connection from {} closed", peer);
                }
            });
        }
        info!("[Remote] Listener stopped");
        Ok(())
    }
}

async fn send(framed: &mut FramedStream, frame: &ServerFrame) -> anyhow::Result<()> {
    framed.send(Bytes::from(to_bytes(frame)?)).await?;
    Ok(())
}

async fn handle_conn(
    socket: TcpStream,
    peer: SocketAddr,
    server: Arc<EntityServer>,
    max_frame_length: usize,
) -> anyhow::Result<()> {
    socket.set_nodelay(true)?;
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec();
    let mut framed = Framed::new(socket, codec);

    let Some(first) = framed.next().await else {
        return Ok(());
    };
    let request = match from_slice::<ClientFrame>(&first?)? {
        ClientFrame::Login { request } => request,
        ClientFrame::Call { .. } => {
            let error = Error::Authentication("login required before calls".to_string());
            send(&mut framed, &ServerFrame::LoginFailed { error: WireError::from(&error) }).await?;
            return Ok(());
        }
    };

    let session = match server.connect(request, Some(peer.ip().to_string())).await {
        Ok(session) => session,
        Err(e) => {
            warn!("[Remote] Login from {} failed: {}", peer, e);
            send(&mut framed, &ServerFrame::LoginFailed { error: WireError::from(&e) }).await?;
            return Ok(());
        }
    };
    let client_id = session.client().client_id();
    send(
        &mut framed,
        &ServerFrame::LoggedIn {
            client_id,
            server_version: FRAMEWORK_VERSION.to_string(),
        },
    )
    .await?;

    while let Some(bytes) = framed.next().await {
        let (id, request) = match from_slice::<ClientFrame>(&bytes?)? {
            ClientFrame::Call { id, request } => (id, request),
            ClientFrame::Login { .. } => {
                warn!("[Remote] Repeated login from {} ignored", peer);
                continue;
            }
        };

        if request == EntityRequest::Disconnect {
            server.disconnect(&client_id).await;
            let reply = ServerFrame::Reply {
                id,
                outcome: Outcome::Ok(EntityResponse::Unit),
            };
            send(&mut framed, &reply).await?;
            return Ok(());
        }

        // The reaper may have ended the session between calls
        let outcome = match server.session(&client_id) {
            Some(session) => Outcome::from_result(session.handle(request).await),
            None => Outcome::Err(WireError::from(&Error::Closed)),
        };
        let closed = matches!(outcome, Outcome::Err(WireError::Closed));
        send(&mut framed, &ServerFrame::Reply { id, outcome }).await?;
        if closed {
            break;
        }
    }

    debug!("[Remote] Socket of client {} closed", client_id);
    Ok(())
}
