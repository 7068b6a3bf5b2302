//! Diameter server loop
//!
//! Accepts peers forever and runs each connection in its own task. Within a
//! connection, handling is strictly sequential: the answer to request N is
//! flushed before request N+1 is read, and the client correlates answers
//! through the echoed Hop-by-Hop and End-to-End identifiers, so the server
//! tracks nothing across requests beyond the session state.
//!
//! Configuration and dictionary are immutable after start-up and shared into
//! every connection task by reference counting; there is no cross-connection
//! mutable state.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dictionary::Dictionary;
use crate::dispatch::Dispatcher;
use crate::error::{DiameterError, DiameterResult};
use crate::session::{Session, SessionState};
use crate::transport::{DiameterListener, DiameterTransport};

/// Diameter server owning the listener and the shared read-only state
pub struct DiameterServer {
    listener: DiameterListener,
    config: Arc<ServerConfig>,
    dict: Arc<Dictionary>,
}

impl DiameterServer {
    /// Bind the listener
    pub async fn bind(
        addr: SocketAddr,
        config: Arc<ServerConfig>,
        dict: Arc<Dictionary>,
    ) -> DiameterResult<Self> {
        let listener = DiameterListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            dict,
        })
    }

    /// Get the local address this server is bound to
    pub fn local_addr(&self) -> DiameterResult<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept peers until the surrounding task is cancelled
    pub async fn run(self) -> DiameterResult<()> {
        loop {
            match self.listener.accept().await {
                Ok(transport) => {
                    let config = Arc::clone(&self.config);
                    let dict = Arc::clone(&self.dict);
                    let peer = transport.peer_addr();
                    log::info!("accepted connection from {peer}");
                    // A panicking connection task is contained by the
                    // runtime: the listener keeps accepting and the peer
                    // socket closes when the task is dropped.
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(transport, config, dict).await {
                            log::warn!("connection from {peer} ended with error: {e}");
                        }
                        log::info!("closed connection from {peer}");
                    });
                }
                Err(e) => {
                    log::warn!("failed to accept Diameter connection: {e}");
                }
            }
        }
    }
}

/// Run the read/dispatch/answer loop for one peer connection.
///
/// Framing failures are terminal and answer nothing. An idle socket or a
/// peer-side close ends the connection cleanly; a partial frame, malformed
/// header or length violation drops it with an error.
pub async fn serve_connection(
    mut transport: DiameterTransport,
    config: Arc<ServerConfig>,
    dict: Arc<Dictionary>,
) -> DiameterResult<()> {
    let peer = transport.peer_addr();
    let dispatcher = Dispatcher::new(Arc::clone(&config), Arc::clone(&dict));
    let mut session = Session::new(&config.origin_host);

    loop {
        let msg = match transport.recv().await {
            Ok(msg) => msg,
            Err(DiameterError::IdleTimeout) => {
                log::info!("peer {peer} idle past the watchdog window, closing");
                break;
            }
            Err(DiameterError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::info!("peer {peer} closed the connection");
                break;
            }
            Err(e) => {
                log::warn!("dropping peer {peer}: {e}");
                session.state = SessionState::Closed;
                return Err(e);
            }
        };

        log::debug!(
            "command {} from {peer}, hop-by-hop {}",
            msg.header.command_code,
            msg.header.hop_by_hop_id
        );
        let outcome = dispatcher.dispatch(&mut session, &msg);
        transport.send(&outcome.answer).await?;

        if outcome.close {
            log::info!("peer {peer} session closed");
            break;
        }
    }

    session.state = SessionState::Closed;
    let _ = transport.shutdown().await;
    Ok(())
}
