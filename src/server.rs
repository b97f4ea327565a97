//! WebSocket signaling server.
//!
//! Accepts one long-lived WebSocket per client on the configured path and
//! runs each connection as a session: read a frame, dispatch it, queue the
//! response. A per-session writer task owns the socket sink and also carries
//! offers forwarded to the session's peer while the reader is busy.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;

use crate::config::RelayConfig;
use crate::dispatcher::Dispatcher;
use crate::network::{NetworkDirectory, SignalingOnlyAcceptor};
use crate::rendezvous::RendezvousRegister;
use crate::router::{SessionId, SessionRouter};
use crate::signaling::protocol::{PeerNode, Response as RelayResponse, PROTOCOL_VERSION};
use crate::signaling::validate::{parse_request, Frame};

/// Frames buffered per session while a request is in flight.
const MAX_BACKLOG: usize = 32;

/// Shared state handed to every session.
struct SessionContext {
    path: String,
    outbound_queue: usize,
    dispatcher: Arc<Dispatcher>,
    router: Arc<SessionRouter>,
}

/// Signaling relay server.
pub struct RelayServer {
    config: RelayConfig,
    context: Arc<SessionContext>,
}

impl RelayServer {
    /// Build a server with the in-memory directory, rendezvous register,
    /// session router and signaling-only acceptor.
    pub fn new(config: RelayConfig) -> Self {
        let discoverer = PeerNode::new(config.discoverer_id.clone());
        let router = Arc::new(SessionRouter::new());
        let dispatcher = Dispatcher::new(
            Arc::new(NetworkDirectory::new(discoverer.clone())),
            Arc::new(RendezvousRegister::new()),
            Arc::new(SignalingOnlyAcceptor::new(discoverer)),
            router.clone(),
        )
        .with_answer_timeout(config.answer_timeout());

        Self::with_dispatcher(config, Arc::new(dispatcher), router)
    }

    /// Build a server around an existing dispatcher. `router` must be the
    /// relay the dispatcher forwards offers through.
    pub fn with_dispatcher(
        config: RelayConfig,
        dispatcher: Arc<Dispatcher>,
        router: Arc<SessionRouter>,
    ) -> Self {
        let context = Arc::new(SessionContext {
            path: config.path.clone(),
            outbound_queue: config.outbound_queue,
            dispatcher,
            router,
        });
        Self { config, context }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.context.dispatcher
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            "Signaling relay listening on ws://{}{} (protocol v{}, discoverer '{}')",
            local_addr, self.context.path, PROTOCOL_VERSION, self.config.discoverer_id
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_session(stream, peer_addr, context).await {
                            debug!("Session from {} ended: {:#}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Run a single WebSocket session until the client disconnects.
async fn handle_session<S>(
    stream: S,
    peer_addr: SocketAddr,
    context: Arc<SessionContext>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut origin: Option<String> = None;
    let expected_path = context.path.as_str();
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() != expected_path {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .with_context(|| format!("WebSocket handshake with {} failed", peer_addr))?;

    let session_id = context.router.next_session_id();
    let origin = origin.unwrap_or_else(|| peer_addr.to_string());
    info!("Session {} connected from {}", session_id, origin);

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::channel::<RelayResponse>(context.outbound_queue);

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let text = match response.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode response: {}", e);
                    continue;
                }
            };
            sink.send(Message::Text(text)).await?;
        }
        sink.close().await
    });

    let result = receive_loop(session_id, &mut source, &tx, &context).await;

    // Cleanup: always unbind on any exit so forwards stop targeting this session.
    context.router.unbind_session(session_id);
    drop(tx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Session {} writer closed: {}", session_id, e),
        Err(e) => warn!("Session {} writer task failed: {}", session_id, e),
    }

    info!("Session {} from {} disconnected", session_id, origin);
    result
}

async fn receive_loop<St>(
    session_id: SessionId,
    source: &mut St,
    tx: &mpsc::Sender<RelayResponse>,
    context: &SessionContext,
) -> Result<()>
where
    St: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    // Frames that arrived while a request was still being handled.
    let mut backlog: VecDeque<Message> = VecDeque::new();

    loop {
        let message = match backlog.pop_front() {
            Some(message) => message,
            None => match source.next().await {
                Some(message) => message.map_err(|e| anyhow!("Read error: {}", e))?,
                None => break,
            },
        };

        let frame = match &message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Close(_) => break,
            // Ping/pong are answered by tungstenite.
            _ => continue,
        };

        let response = match parse_request(frame) {
            Ok(request) => {
                if let Some(sender_id) = request.sender_id() {
                    context.router.bind(sender_id, session_id, tx);
                }

                // Keep reading while the request is handled so a disconnect
                // drops the handler and releases any pending rendezvous.
                let handling = context.dispatcher.handle(request);
                tokio::pin!(handling);
                loop {
                    tokio::select! {
                        response = &mut handling => break response,
                        incoming = source.next() => match incoming {
                            None | Some(Ok(Message::Close(_))) => {
                                debug!("Session {} closed with a request in flight", session_id);
                                return Ok(());
                            }
                            Some(Err(e)) => return Err(anyhow!("Read error: {}", e)),
                            Some(Ok(Message::Text(_) | Message::Binary(_)))
                                if backlog.len() >= MAX_BACKLOG =>
                            {
                                warn!(
                                    "Session {} backlog full; dropping frame received mid-request",
                                    session_id
                                );
                            }
                            Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                                backlog.push_back(message);
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
            Err(e) => {
                debug!("Session {} sent invalid frame: {}", session_id, e);
                RelayResponse::error(e.to_string())
            }
        };

        tx.send(response)
            .await
            .map_err(|_| anyhow!("Writer closed"))?;
    }

    Ok(())
}

/// Run the relay server (convenience function).
pub async fn run_relay_server(config: RelayConfig) -> Result<()> {
    RelayServer::new(config).run().await
}
