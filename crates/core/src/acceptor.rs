//! TCP acceptor (§4.3): binds the listener and spawns one connection task
//! per accepted socket. Admission control lives in [`crate::admission`];
//! the acceptor itself never rejects a connection, it only spawns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::connection::{handle_connection, ConnectionConfig};
use crate::error::{Result, ServiceError};
use crate::pipeline::PipelineDispatcher;
use crate::transaction::{SessionId, SourceAddress};

/// Accepts TCP connections and hands each off to its own connection task.
pub struct Acceptor {
    listener: TcpListener,
    next_session_id: AtomicU64,
}

impl Acceptor {
    /// Bind the listener. `addr.port() == 0` asks the OS for a free port;
    /// read the actual bound address back with [`Acceptor::local_addr`].
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(ServiceError::Transport)?;
        Ok(Self {
            listener,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// The address actually bound, with the real port if `0` was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(ServiceError::Transport)
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn run(
        self,
        admission: Arc<AdmissionController>,
        dispatcher: Arc<PipelineDispatcher>,
        config: ConnectionConfig,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("acceptor stopping");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, &admission, &dispatcher, config, shutdown.clone()),
                        Err(err) => tracing::error!(error = %err, "accept failed"),
                    }
                }
            }
        }
    }

    fn spawn_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        admission: &Arc<AdmissionController>,
        dispatcher: &Arc<PipelineDispatcher>,
        config: ConnectionConfig,
        shutdown: CancellationToken,
    ) {
        let std::net::IpAddr::V4(host) = peer.ip() else {
            tracing::warn!(%peer, "rejecting non-IPv4 peer");
            return;
        };
        let source = SourceAddress {
            host,
            port: peer.port(),
        };
        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let admission = admission.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            handle_connection(stream, source, session_id, admission, dispatcher, config, shutdown)
                .await;
        });
    }
}
