//! Remote transport: a persistent socket with length-delimited JSON frames
//!
//! The first frame on a connection is a login carrying the
//! [`ConnectionRequest`]; after a successful login every call is a numbered
//! request answered by exactly one reply with the same number.

use std::sync::Arc;

use async_trait::async_trait;
use dalmux_core::codec::{from_slice, to_bytes};
use dalmux_core::protocol::{ClientFrame, EntityRequest, Outcome, ServerFrame};
use dalmux_core::{ConnectionRequest, Domain, Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RemoteClientConfig;
use crate::proxy::{Channel, ProxyConnection};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// `EntityConnection` over the remote transport.
pub type RemoteEntityConnection = ProxyConnection<RemoteChannel>;

fn io_error(e: std::io::Error) -> Error {
    Error::Transport(e.to_string())
}

/// One logged-in socket.
pub struct RemoteChannel {
    framed: FramedStream,
    config: RemoteClientConfig,
    client_id: Uuid,
    server_version: String,
    next_id: u64,
    open: bool,
}

impl RemoteChannel {
    /// Connect and log in; a rejected login fails with the server's error
    pub async fn connect(
        config: &RemoteClientConfig,
        request: &ConnectionRequest,
        domain: &Domain,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect(&config.address),
        )
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "connecting to {} timed out after {} ms",
                config.address, config.connect_timeout_ms
            ))
        })?
        .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;

        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(config.max_frame_length)
            .new_codec();
        let mut framed = Framed::new(stream, codec);

        let login = ClientFrame::Login {
            request: request.clone(),
        };
        framed
            .send(Bytes::from(to_bytes(&login)?))
            .await
            .map_err(io_error)?;

        let frame = Self::read_frame(&mut framed, config).await?;
        match frame {
            ServerFrame::LoggedIn {
                client_id,
                server_version,
            } => {
                info!(
                    "[Remote] Logged in to {} as {} (client {}, server {})",
                    config.address, request.user, client_id, server_version
                );
                Ok(Self {
                    framed,
                    config: config.clone(),
                    client_id,
                    server_version,
                    next_id: 1,
                    open: true,
                })
            }
            ServerFrame::LoginFailed { error } => {
                let error = error.into_error(domain);
                warn!("[Remote] Login to {} failed: {}", config.address, error);
                Err(error)
            }
            ServerFrame::Reply { .. } => Err(Error::Transport(
                "expected a login response, got a reply".to_string(),
            )),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    async fn read_frame(framed: &mut FramedStream, config: &RemoteClientConfig) -> Result<ServerFrame> {
        let next = tokio::time::timeout(config.request_timeout(), framed.next())
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "no response from {} within {} ms",
                    config.address, config.request_timeout_ms
                ))
            })?;
        match next {
            Some(Ok(bytes)) => from_slice(&bytes),
            Some(Err(e)) => Err(io_error(e)),
            None => Err(Error::Transport(format!(
                "connection to {} closed by server",
                config.address
            ))),
        }
    }
}

#[async_trait]
impl Channel for RemoteChannel {
    async fn call(&mut self, request: EntityRequest) -> Result<Outcome> {
        if !self.open {
            return Err(Error::Closed);
        }

        let id = self.next_id;
        self.next_id += 1;
        let frame = ClientFrame::Call { id, request };
        if let Err(e) = self.framed.send(Bytes::from(to_bytes(&frame)?)).await {
            self.open = false;
            return Err(io_error(e));
        }

        loop {
            let frame = match Self::read_frame(&mut self.framed, &self.config).await {
                Ok(frame) => frame,
                Err(e) => {
                    // A late reply would be matched against the wrong call
                    self.open = false;
                    return Err(e);
                }
            };
            match frame {
                ServerFrame::Reply { id: reply_id, outcome } if reply_id == id => {
                    return Ok(outcome)
                }
                ServerFrame::Reply { id: stale, .. } => {
                    debug!("[Remote] Discarding stale reply {}", stale);
                }
                _ => {
                    self.open = false;
                    return Err(Error::Transport("unexpected login frame".to_string()));
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if let Err(e) = self.call(EntityRequest::Disconnect).await {
            debug!("[Remote] Disconnect not acknowledged: {}", e);
        }
        self.open = false;
        SinkExt::<Bytes>::close(&mut self.framed).await.map_err(io_error)?;
        info!("[Remote] Client {} disconnected", self.client_id);
        Ok(())
    }
}

impl RemoteEntityConnection {
    /// Open a session on a remote server
    pub async fn connect(
        domain: Arc<Domain>,
        request: ConnectionRequest,
        config: &RemoteClientConfig,
    ) -> Result<Self> {
        let channel = RemoteChannel::connect(config, &request, &domain).await?;
        Ok(ProxyConnection::new(domain, request.user, channel))
    }
}
