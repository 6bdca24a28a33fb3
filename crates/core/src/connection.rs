//! Per-connection protocol state machine (§4.4).
//!
//! Drives one TCP connection through `Queued -> Greeting -> Streaming ->
//! Closed`, translating wire frames into [`SessionBatcher`] calls and
//! feeding flushed transactions to a [`SessionCommitChain`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use recsync_wire::message::ClientFrame;
use recsync_wire::{read_client_frame, write_server_frame, ServerFrame, WireError};

use crate::admission::AdmissionController;
use crate::error::{Result, ServiceError};
use crate::pipeline::PipelineDispatcher;
use crate::session::{SessionBatcher, SessionCommitChain};
use crate::transaction::{SessionId, SourceAddress};

/// Server's maximum supported protocol version; the effective version
/// negotiated with a client is `min(this, clientVersion)`.
pub const SERVER_MAX_VERSION: u8 = 0;

/// Parameters governing one connection's behavior.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Keepalive round-trip bound; also used as the idle-to-ping interval.
    pub ping_timeout: Duration,
    /// Session batcher's `commitInterval`.
    pub commit_interval: Duration,
    /// Session batcher's `commitSizeLimit` (0 disables).
    pub commit_size_limit: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(3),
            commit_interval: Duration::from_secs(5),
            commit_size_limit: 0,
        }
    }
}

enum KeepaliveState {
    Idle,
    Waiting { nonce: u32 },
}

/// Run one connection end to end: admission wait, greeting, streaming,
/// and the terminal disconnect transaction. Returns once the socket is
/// closed.
pub async fn handle_connection<S>(
    stream: S,
    source: SourceAddress,
    session_id: SessionId,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<PipelineDispatcher>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Queued: hold off on any reads until a slot is free.
    let _ticket = admission.admit().await;

    let (reader_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader_half);

    // Greeting: announce ourselves before reading anything from the client.
    if write_server_frame(&mut writer, ServerFrame::Greet { version: SERVER_MAX_VERSION })
        .await
        .is_err()
    {
        return;
    }

    let client_key = match await_client_greet(&mut reader).await {
        Ok(key) => key,
        Err(err) => {
            tracing::warn!(%source, error = %err, "rejecting connection at greeting");
            return;
        }
    };
    tracing::info!(%source, client_key, "client greeted, entering streaming");

    let batcher = SessionBatcher::new(
        session_id,
        source,
        config.commit_interval,
        config.commit_size_limit,
    );
    let chain = SessionCommitChain::spawn(session_id, dispatcher);

    let bytes_received =
        stream_loop(&mut reader, &mut writer, batcher, &chain, config, &shutdown).await;

    tracing::info!(%source, bytes_received, "connection closed, upload summary");
}

async fn await_client_greet(
    reader: &mut (impl AsyncRead + Unpin + Send),
) -> Result<u32> {
    match read_client_frame(reader).await {
        Ok(ClientFrame::Greet {
            client_type: 0,
            client_key,
            ..
        }) => Ok(client_key),
        Ok(other) => Err(ServiceError::Protocol(format!(
            "expected ClientGreet(type=0), got {other:?}"
        ))),
        Err(err) => Err(ServiceError::Protocol(err.to_string())),
    }
}

/// Streaming loop: reads frames, drives the batcher, manages keepalive.
/// Returns the number of bytes it is aware of having exchanged (frame
/// count proxy; exact byte accounting happens at the transport layer).
async fn stream_loop(
    reader: &mut (impl AsyncRead + Unpin + Send),
    writer: &mut (impl AsyncWrite + Unpin + Send),
    mut batcher: SessionBatcher,
    chain: &SessionCommitChain,
    config: ConnectionConfig,
    shutdown: &CancellationToken,
) -> u64 {
    let mut keepalive = KeepaliveState::Idle;
    let mut deadline = Instant::now() + config.ping_timeout;
    let mut frames_in = 0u64;

    loop {
        if chain.has_failed() {
            break;
        }

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::debug!("connection closing on service shutdown");
                break;
            }

            _ = tokio::time::sleep_until(deadline) => {
                match keepalive {
                    KeepaliveState::Idle => {
                        match send_ping(writer).await {
                            Some(nonce) => {
                                keepalive = KeepaliveState::Waiting { nonce };
                                deadline = Instant::now() + config.ping_timeout;
                            }
                            None => break,
                        }
                    }
                    KeepaliveState::Waiting { .. } => {
                        tracing::warn!("keepalive timeout, closing connection");
                        break;
                    }
                }
            }

            frame = read_client_frame(reader) => {
                match frame {
                    Err(err) if !err.is_fatal() => {
                        // Tolerated: body shorter than a known prefix.
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "protocol error, closing connection");
                        break;
                    }
                    Ok(frame) => {
                        frames_in += 1;
                        if matches!(keepalive, KeepaliveState::Idle) {
                            deadline = Instant::now() + config.ping_timeout;
                        }
                        // §4.4 Streaming|ClientDone: flush, and if a ping is
                        // already outstanding, send another one too.
                        if matches!(frame, ClientFrame::Done) && matches!(keepalive, KeepaliveState::Waiting { .. }) {
                            match send_ping(writer).await {
                                Some(nonce) => {
                                    keepalive = KeepaliveState::Waiting { nonce };
                                    deadline = Instant::now() + config.ping_timeout;
                                }
                                None => break,
                            }
                        }
                        if !apply_frame(frame, &mut batcher, chain, &mut keepalive) {
                            break;
                        }
                    }
                }
            }
        }
    }

    chain.submit(batcher.close());
    frames_in
}

/// Send a `ServerPing` with a fresh nonce. Returns the nonce, or `None` if
/// the write failed and the connection must close.
async fn send_ping(writer: &mut (impl AsyncWrite + Unpin + Send)) -> Option<u32> {
    let nonce: u32 = rand::rng().random();
    write_server_frame(writer, ServerFrame::Ping { nonce }).await.ok()?;
    Some(nonce)
}

/// Apply one decoded frame to the batcher/keepalive state. Returns false
/// if the connection must close (bad pong, or unrecoverable state).
fn apply_frame(
    frame: ClientFrame,
    batcher: &mut SessionBatcher,
    chain: &SessionCommitChain,
    keepalive: &mut KeepaliveState,
) -> bool {
    match frame {
        ClientFrame::Greet { .. } => {
            tracing::warn!("unexpected second greeting, ignoring");
            true
        }
        ClientFrame::Pong { nonce } => match keepalive {
            KeepaliveState::Waiting { nonce: expected } if *expected == nonce => {
                *keepalive = KeepaliveState::Idle;
                true
            }
            KeepaliveState::Waiting { .. } => {
                tracing::warn!("pong nonce mismatch, closing connection");
                false
            }
            KeepaliveState::Idle => true,
        },
        ClientFrame::Info { recid: 0, key, value } => {
            batcher.ioc_info(key, value);
            true
        }
        ClientFrame::Info { recid, key, value } => {
            batcher.rec_info(recid, key, value);
            true
        }
        ClientFrame::AddRecord {
            recid,
            record_type,
            name,
            is_alias: false,
        } => {
            if let Some(flushed) = batcher.add_record(recid, record_type, name) {
                chain.submit(flushed);
            }
            true
        }
        ClientFrame::AddRecord {
            recid,
            name,
            is_alias: true,
            ..
        } => {
            batcher.add_alias(recid, name);
            true
        }
        ClientFrame::DelRecord { recid } => {
            if let Some(flushed) = batcher.del_record(recid) {
                chain.submit(flushed);
            }
            true
        }
        ClientFrame::Done => {
            chain.submit(batcher.done());
            true
        }
        ClientFrame::Unknown { msgid } => {
            tracing::debug!(msgid, "ignoring unrecognized message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use recsync_wire::header::FrameHeader;
    use recsync_wire::message::{MSG_CLIENT_DONE, MSG_CLIENT_GREET};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    struct RecordingProcessor {
        seen: Arc<std::sync::Mutex<Vec<Transaction>>>,
        count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::pipeline::Processor for RecordingProcessor {
        fn name(&self) -> &str {
            "recording"
        }
        async fn commit(&self, transaction: Arc<Transaction>) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((*transaction).clone());
            Ok(())
        }
    }

    async fn write_client_greet(stream: &mut (impl AsyncWrite + Unpin + Send), client_key: u32) {
        let mut body = vec![0u8, 0u8, 0u8, 0u8];
        body.extend_from_slice(&client_key.to_be_bytes());
        let header = FrameHeader {
            msgid: MSG_CLIENT_GREET,
            body_len: body.len() as u32,
        };
        header.write(stream).await.unwrap();
        stream.write_all(&body).await.unwrap();
    }

    async fn write_done(stream: &mut (impl AsyncWrite + Unpin + Send)) {
        FrameHeader {
            msgid: MSG_CLIENT_DONE,
            body_len: 0,
        }
        .write(stream)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn greet_then_done_yields_one_initial_transaction() {
        let (mut client, server) = tokio::io::duplex(4096);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let processor = Arc::new(RecordingProcessor {
            seen: seen.clone(),
            count: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(PipelineDispatcher::new(vec![processor]));
        let admission = Arc::new(AdmissionController::new(4));

        let source = SourceAddress {
            host: std::net::Ipv4Addr::new(127, 0, 0, 1),
            port: 5555,
        };
        let handle = tokio::spawn(handle_connection(
            server,
            source,
            SessionId(1),
            admission,
            dispatcher,
            ConnectionConfig {
                ping_timeout: Duration::from_secs(60),
                ..Default::default()
            },
            CancellationToken::new(),
        ));

        // Read ServerGreet.
        let mut hdr = [0u8; FrameHeader::SIZE];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut hdr).await.unwrap();
        let mut body = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut body).await.unwrap();

        write_client_greet(&mut client, 42).await;
        write_done(&mut client).await;
        drop(client);

        handle.await.unwrap();

        let committed = seen.lock().unwrap();
        assert_eq!(committed.len(), 2); // initial-empty + disconnect
        assert!(committed[0].initial);
        assert!(committed[0].records_to_add.is_empty());
        assert!(!committed[1].connected);
    }
}
