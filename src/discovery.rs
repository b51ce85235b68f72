//! UDP multicast rendezvous.
//!
//! The coordinator joins a multicast group and answers `DISCOVER` datagrams
//! with `ANNOUNCE central <tcp_port>`, letting LAN clients find its TCP
//! address without configuration. Bind or join failures degrade to
//! "discovery disabled" — the coordinator keeps running without it.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default multicast group.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 1);

/// Default multicast port.
pub const DEFAULT_PORT: u16 = 30001;

/// Client probe payload (ASCII, no delimiter).
pub const DISCOVER: &str = "DISCOVER";

/// Default client wait for an announcement.
pub const LOCATE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Build the responder's announcement payload.
pub fn announce_payload(tcp_port: u16) -> String {
    format!("ANNOUNCE central {tcp_port}")
}

/// Parse an announcement, tolerating trailing whitespace and newlines.
/// Returns the advertised TCP port.
pub fn parse_announce(payload: &str) -> Option<u16> {
    let mut parts = payload.trim_end().split(' ');
    if parts.next() != Some("ANNOUNCE") || parts.next() != Some("central") {
        return None;
    }
    let port = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(port)
}

/// How the responder reacts to one datagram: the reply to send back, if any.
pub fn respond_to(payload: &[u8], tcp_port: u16) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    (text.trim_end_matches(['\r', '\n', ' ']) == DISCOVER).then(|| announce_payload(tcp_port))
}

/// Spawn the discovery responder. Returns None (discovery disabled) when the
/// socket cannot be bound or the group cannot be joined.
pub async fn spawn_responder(
    group: Ipv4Addr,
    port: u16,
    tcp_port: u16,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, port, "Discovery disabled: bind failed");
            return None;
        }
    };
    if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
        warn!(error = %e, group = %group, "Discovery disabled: multicast join failed");
        return None;
    }
    let _ = socket.set_multicast_loop_v4(true);

    info!(group = %group, port, "Multicast discovery started");

    Some(tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (n, sender) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Discovery receive failed");
                            continue;
                        }
                    };
                    let Some(reply) = respond_to(&buf[..n], tcp_port) else {
                        debug!(from = %sender, "Ignoring non-discovery datagram");
                        continue;
                    };
                    debug!(from = %sender, reply = %reply, "Answering DISCOVER");
                    if let Err(e) = socket.send_to(reply.as_bytes(), sender).await {
                        warn!(error = %e, to = %sender, "Failed to send ANNOUNCE");
                    }
                }
            }
        }
        debug!("Discovery responder stopped");
    }))
}

/// Locate a coordinator: send `DISCOVER` to the group and wait for the first
/// well-formed announcement. The returned address combines the datagram
/// source with the advertised TCP port.
pub async fn locate(
    group: Ipv4Addr,
    port: u16,
    timeout: Duration,
) -> std::io::Result<Option<SocketAddr>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket
        .send_to(DISCOVER.as_bytes(), (group, port))
        .await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 512];
    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let Ok(received) = received else {
            return Ok(None);
        };
        let (n, sender) = received?;
        if let Some(tcp_port) = std::str::from_utf8(&buf[..n])
            .ok()
            .and_then(parse_announce)
        {
            return Ok(Some(SocketAddr::new(sender.ip(), tcp_port)));
        }
        // Anything else on the group is ignored; keep waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_round_trip() {
        assert_eq!(parse_announce(&announce_payload(8080)), Some(8080));
        assert_eq!(parse_announce("ANNOUNCE central 8080\r\n"), Some(8080));
        assert_eq!(parse_announce("ANNOUNCE central 8080  "), Some(8080));
    }

    #[test]
    fn malformed_announcements_are_rejected() {
        assert_eq!(parse_announce("ANNOUNCE vehicle 8080"), None);
        assert_eq!(parse_announce("ANNOUNCE central"), None);
        assert_eq!(parse_announce("ANNOUNCE central notaport"), None);
        assert_eq!(parse_announce("ANNOUNCE central 8080 extra"), None);
        assert_eq!(parse_announce("HELLO"), None);
    }

    #[test]
    fn responder_answers_discover_only() {
        assert_eq!(
            respond_to(b"DISCOVER", 8080).as_deref(),
            Some("ANNOUNCE central 8080")
        );
        assert_eq!(
            respond_to(b"DISCOVER\r\n", 9000).as_deref(),
            Some("ANNOUNCE central 9000")
        );
        assert_eq!(respond_to(b"discover", 8080), None);
        assert_eq!(respond_to(b"PING", 8080), None);
        assert_eq!(respond_to(&[0xFF, 0xFE], 8080), None);
    }

    #[tokio::test]
    async fn locate_times_out_quietly_without_a_responder() {
        // An unused group/port pair: nobody answers. Environments without a
        // multicast route may fail the probe send instead; both are fine,
        // finding a coordinator is not.
        let found = locate(
            Ipv4Addr::new(239, 192, 0, 250),
            39999,
            Duration::from_millis(100),
        )
        .await;
        match found {
            Ok(found) => assert!(found.is_none()),
            Err(_) => {}
        }
    }
}
