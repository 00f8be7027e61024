//! Best-effort UDP multicast datagram transport (spec §4.6): at-most-once
//! delivery, no acknowledgement or retransmit. Transient OS-level send
//! failures are dropped rather than propagated, the same contract
//! `strand-cam`'s `DatagramSocket::send_complete` uses for its UDP path.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::message::SwarmMessage;

const MAX_DATAGRAM: usize = 65_535;

/// Parsed form of the `lcm_uri` config field, e.g.
/// `udpm://239.255.76.67:7667?ttl=1`.
#[derive(Debug, Clone, Copy)]
pub struct MulticastAddr {
    pub group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
}

pub fn parse_lcm_uri(uri: &str) -> Result<MulticastAddr> {
    let rest = uri
        .strip_prefix("udpm://")
        .ok_or_else(|| Error::Config(format!("unsupported lcm_uri scheme: {uri}")))?;
    let (addr_part, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (host, port) = addr_part
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("missing port in lcm_uri: {uri}")))?;
    let group: Ipv4Addr = host
        .parse()
        .map_err(|_| Error::Config(format!("invalid multicast address: {host}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
    let ttl = query
        .split('&')
        .find_map(|kv| kv.strip_prefix("ttl="))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    Ok(MulticastAddr { group, port, ttl })
}

/// A bound, multicast-joined UDP socket carrying [`SwarmMessage`]s (spec
/// §4.6).
pub struct SwarmTransport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl SwarmTransport {
    pub async fn bind(addr: MulticastAddr) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, addr.port)).await?;
        socket.join_multicast_v4(addr.group, Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(addr.ttl)?;
        socket.set_multicast_loop_v4(true)?;
        let dest = SocketAddr::new(addr.group.into(), addr.port);
        Ok(SwarmTransport { socket, dest })
    }

    /// Sends one message. Would-block and connection-refused are logged
    /// and dropped, matching the at-most-once contract; anything else is
    /// escalated.
    pub async fn broadcast(&self, msg: &SwarmMessage) -> Result<()> {
        let bytes = msg.to_bytes()?;
        match self.socket.send_to(&bytes, self.dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::warn!("swarm transport: dropping datagram, would block");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::warn!("swarm transport: dropping datagram, connection refused");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drains every datagram currently queued on the socket without
    /// blocking. Malformed datagrams are logged and skipped rather than
    /// failing the whole drain.
    pub fn drain_available(&self) -> Vec<SwarmMessage> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(n) => match SwarmMessage::from_bytes(&buf[..n]) {
                    Ok(msg) => out.push(msg),
                    Err(e) => tracing::warn!(error = %e, "swarm transport: dropping malformed datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "swarm transport: recv error");
                    break;
                }
            }
        }
        out
    }
}

/// Runs the transport's receive side on a periodic tick (spec §4.6 "a
/// periodic scan on a 10 ms tick drains received messages and dispatches
/// callbacks"; §5 network thread). Exits once `shutdown` is set.
pub async fn run_recv_loop(
    transport: Arc<SwarmTransport>,
    tick: Duration,
    desc_tx: channellib::Sender<swarmvio_types::VisualImageDescArray>,
    edge_tx: channellib::Sender<swarmvio_types::LoopEdge>,
    shutdown: Arc<AtomicBool>,
) {
    use crossbeam_ok::CrossbeamOk;

    let mut interval = tokio::time::interval(tick);
    while !shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        for msg in transport.drain_available() {
            match msg {
                SwarmMessage::Desc(desc) => {
                    desc_tx.send(desc).cb_ok();
                }
                SwarmMessage::Edge(edge) => {
                    edge_tx.send(edge).cb_ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lcm_uri_with_ttl() {
        let addr = parse_lcm_uri("udpm://239.255.76.67:7667?ttl=1").unwrap();
        assert_eq!(addr.group, Ipv4Addr::new(239, 255, 76, 67));
        assert_eq!(addr.port, 7667);
        assert_eq!(addr.ttl, 1);
    }

    #[test]
    fn defaults_ttl_when_absent() {
        let addr = parse_lcm_uri("udpm://239.255.76.67:7667").unwrap();
        assert_eq!(addr.ttl, 1);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(parse_lcm_uri("tcp://127.0.0.1:7667").is_err());
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_lcm_uri("udpm://239.255.76.67").is_err());
    }

    #[tokio::test]
    async fn loopback_multicast_round_trips_a_message() {
        let addr = MulticastAddr {
            group: Ipv4Addr::new(239, 255, 76, 70),
            port: 0,
            ttl: 1,
        };
        let receiver = SwarmTransport::bind(addr).await.unwrap();
        let local_port = receiver.socket.local_addr().unwrap().port();
        let sender_addr = MulticastAddr { port: local_port, ..addr };
        let sender = SwarmTransport::bind(sender_addr).await.unwrap();

        let msg = SwarmMessage::Edge(swarmvio_types::LoopEdge {
            frame_a: swarmvio_types::FrameId(1),
            frame_b: swarmvio_types::FrameId(2),
            relative_pose: swarmvio_geom::Pose::identity(),
            covariance: nalgebra::Matrix6::identity(),
            inliers: 10,
        });
        sender.broadcast(&msg).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let received = receiver.drain_available();
        assert_eq!(received.len(), 1);
    }
}
