//! TCP socket configuration for the listener and accepted connections.
//!
//! [`SocketConfig`] bundles the options applied to every socket: TCP_NODELAY,
//! TCP keepalive, `SO_REUSEADDR` and dual-stack IPv6 when binding `[::]`.

use std::net::SocketAddr;
use std::time::Duration;

use quarry_config::NetworkConfig;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Socket options applied to the listener and every accepted stream.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes.
    pub keepalive_interval: Duration,
    /// Probes before the OS declares the peer dead.
    pub keepalive_retries: u32,
    /// `SO_REUSEADDR` on the listener. Default: true except on Windows.
    pub reuse_addr: bool,
    /// Listen backlog.
    pub backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
            backlog: 128,
        }
    }
}

impl SocketConfig {
    /// OS-level keepalive tuned to fire before the server's idle timeout would.
    pub fn from_network(network: &NetworkConfig) -> Self {
        let idle = network.idle_timeout().max(Duration::from_secs(2));
        Self {
            keepalive_idle: idle,
            keepalive_interval: network.keepalive_interval().max(Duration::from_secs(1)),
            ..Self::default()
        }
    }
}

/// Apply socket options to an accepted or connected [`TcpStream`].
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let sock_ref = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        sock_ref.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Bind a non-blocking listener with `SO_REUSEADDR` and, for IPv6
/// addresses, dual-stack enabled.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_accepts_configured_streams() {
        let config = SocketConfig::default();
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        configure_stream(&server_side, &config).unwrap();
        configure_stream(&client, &config).unwrap();

        assert!(server_side.nodelay().unwrap());
        assert!(SockRef::from(&server_side).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_ipv6_listener_when_available() {
        let config = SocketConfig::default();
        match create_listener("[::1]:0".parse().unwrap(), &config) {
            Ok(listener) => {
                let addr = listener.local_addr().unwrap();
                assert!(TcpStream::connect(addr).await.is_ok());
            }
            Err(_) => eprintln!("IPv6 not available, skipping test"),
        }
    }

    #[tokio::test]
    async fn test_nodelay_can_be_disabled() {
        let listener =
            create_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default()).unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let config = SocketConfig {
            tcp_nodelay: false,
            ..Default::default()
        };
        configure_stream(&client, &config).unwrap();
        assert!(!client.nodelay().unwrap());
    }

    #[test]
    fn test_keepalive_follows_network_config() {
        let network = NetworkConfig {
            idle_timeout_secs: 20,
            keepalive_interval_secs: 4,
            ..NetworkConfig::default()
        };
        let config = SocketConfig::from_network(&network);
        assert_eq!(config.keepalive_idle, Duration::from_secs(20));
        assert_eq!(config.keepalive_interval, Duration::from_secs(4));
        assert!(config.tcp_nodelay);
    }
}
