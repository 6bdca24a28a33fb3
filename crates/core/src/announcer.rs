//! UDP beacon announcer (§4.2).

use std::collections::HashSet;
use std::net::SocketAddrV4;

use tokio::net::UdpSocket;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ServiceError, Result};
use recsync_wire::AnnounceFrame;

/// Periodically broadcasts an [`AnnounceFrame`] to a fixed set of
/// destinations until cancelled.
#[derive(Debug)]
pub struct Announcer {
    socket: UdpSocket,
    destinations: Vec<SocketAddrV4>,
    period: Duration,
}

impl Announcer {
    /// Bind a broadcast-capable UDP socket and validate `destinations`.
    ///
    /// `bind_addr` should share the TCP listener's interface so the
    /// announcement and the service agree on which address is reachable.
    pub async fn start(
        bind_addr: std::net::Ipv4Addr,
        destinations: Vec<SocketAddrV4>,
        period: Duration,
    ) -> Result<Self> {
        if destinations.is_empty() {
            return Err(ServiceError::Config(
                "announce destination list must not be empty".into(),
            ));
        }

        let socket = UdpSocket::bind((bind_addr, 0))
            .await
            .map_err(ServiceError::Transport)?;
        socket
            .set_broadcast(true)
            .map_err(ServiceError::Transport)?;

        Ok(Self {
            socket,
            destinations,
            period,
        })
    }

    /// Run the announce loop, sending `frame` to every destination on
    /// every tick (the first tick fires immediately), until `shutdown` is
    /// cancelled.
    pub async fn run(self, frame: AnnounceFrame, shutdown: CancellationToken) {
        let encoded = frame.encode();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing: HashSet<SocketAddrV4> = HashSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("announcer stopping");
                    return;
                }
                _ = ticker.tick() => {
                    for dest in &self.destinations {
                        match self.socket.send_to(&encoded, dest).await {
                            Ok(_) => {
                                failing.remove(dest);
                            }
                            Err(err) => {
                                if failing.insert(*dest) {
                                    tracing::warn!(%dest, error = %err, "announce send failed");
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_destination_list() {
        let err = Announcer::start(std::net::Ipv4Addr::UNSPECIFIED, vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[tokio::test]
    async fn sends_first_tick_immediately() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = listener.local_addr().unwrap();
        let SocketAddrV4Helper(dest) = SocketAddrV4Helper::from(dest);

        let announcer = Announcer::start(
            std::net::Ipv4Addr::new(127, 0, 0, 1),
            vec![dest],
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let frame = AnnounceFrame {
            addr: [127, 0, 0, 1],
            tcp_port: 4242,
            server_key: 7,
        };
        let handle = tokio::spawn(announcer.run(frame, shutdown_clone));

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), listener.recv_from(&mut buf))
            .await
            .expect("first tick should fire without waiting a full period")
            .unwrap();
        assert_eq!(&buf[..n], &frame.encode());

        shutdown.cancel();
        handle.await.unwrap();
    }

    struct SocketAddrV4Helper(SocketAddrV4);
    impl From<std::net::SocketAddr> for SocketAddrV4Helper {
        fn from(addr: std::net::SocketAddr) -> Self {
            match addr {
                std::net::SocketAddr::V4(v4) => SocketAddrV4Helper(v4),
                std::net::SocketAddr::V6(_) => panic!("expected v4 address"),
            }
        }
    }
}
