//! Cross-platform UDP socket configuration.
//!
//! Provides [`SocketConfig`] to encapsulate socket options (`SO_REUSEADDR`,
//! buffer sizes, dual-stack IPv6) and [`bind_udp`] to apply them before
//! binding.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

/// Socket options applied to every UDP socket the transport opens.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Enable `SO_REUSEADDR` on server sockets. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
    /// Kernel receive buffer size in bytes. Default: 256 KiB.
    pub recv_buffer: usize,
    /// Kernel send buffer size in bytes. Default: 256 KiB.
    pub send_buffer: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_addr: !cfg!(target_os = "windows"),
            recv_buffer: 256 * 1024,
            send_buffer: 256 * 1024,
        }
    }
}

/// Create, configure and bind a non-blocking UDP socket.
///
/// IPv6 sockets are made dual-stack so one socket serves both families.
pub fn bind_udp(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    // The kernel may clamp these; failure is not fatal.
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer) {
        tracing::debug!("Could not set receive buffer size: {e}");
    }
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer) {
        tracing::debug!("Could not set send buffer size: {e}");
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Dual-stack wildcard address (`[::]`).
pub fn default_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
}

/// IPv4-only wildcard address (`0.0.0.0`).
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Wildcard address of the same family as `peer`, on an ephemeral port.
pub fn ephemeral_for(peer: SocketAddr) -> SocketAddr {
    if peer.is_ipv6() {
        default_bind_address(0)
    } else {
        ipv4_bind_address(0)
    }
}
