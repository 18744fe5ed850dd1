//! TCP listener helper.
//!
//! Binds the wildcard address with `SO_REUSEADDR` so a restarted server can
//! reclaim a port that is still in `TIME_WAIT`. An IPv6 dual-stack socket is
//! preferred; if the host has no IPv6 support the helper falls back to
//! IPv4. Also applies the optional keepalive tuple to accepted client
//! sockets.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::error::JapiError;

/// TCP keepalive settings applied to accepted client sockets.
///
/// When `enable` is false the operating system defaults are left untouched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TcpKeepaliveConfig {
    /// Whether to enable the keepalive mechanism at all.
    pub enable: bool,
    /// Seconds of idle time before the first probe is sent.
    pub idle_secs: u64,
    /// Seconds between consecutive probes.
    pub interval_secs: u64,
    /// Number of unanswered probes after which the connection is killed.
    pub probes: u32,
}

/// Binds a listening socket on the given port, all interfaces.
pub fn bind(port: u16) -> Result<TcpListener, JapiError> {
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match bind_addr(v6) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            log::debug!("IPv6 wildcard bind failed ({e}), falling back to IPv4");
            bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        }
    }
}

fn bind_addr(addr: SocketAddr) -> Result<TcpListener, JapiError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // setsockopt must happen before bind. Failure is not fatal, the port
    // just stays unavailable for the TIME_WAIT period after a shutdown.
    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("failed to set SO_REUSEADDR, socket reuse won't be possible: {e}");
    }
    if addr.is_ipv6() {
        let _ = socket.set_only_v6(false);
    }

    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;

    TcpListener::from_std(socket.into()).map_err(JapiError::Io)
}

/// Applies the keepalive tuple to an accepted client socket.
pub(crate) fn apply_keepalive(
    stream: &TcpStream,
    config: &TcpKeepaliveConfig,
) -> std::io::Result<()> {
    if !config.enable {
        return Ok(());
    }
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(config.idle_secs))
        .with_interval(Duration::from_secs(config.interval_secs))
        .with_retries(config.probes);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind(0).expect("bind on an ephemeral port");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_applies_to_live_socket() {
        let listener = bind(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let port = addr.port();

        let client = tokio::spawn(async move {
            TcpStream::connect(("127.0.0.1", port)).await.unwrap()
        });
        let (accepted, _) = listener.accept().await.unwrap();

        let config = TcpKeepaliveConfig {
            enable: true,
            idle_secs: 30,
            interval_secs: 5,
            probes: 3,
        };
        apply_keepalive(&accepted, &config).expect("keepalive accepted by the kernel");
        client.await.unwrap();
    }
}
