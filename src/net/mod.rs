//! Network binding discovery for the notify endpoint

use std::net::{IpAddr, Ipv4Addr, TcpListener, UdpSocket};

use rand::Rng;

use crate::error::{BridgeError, Result};

const PORT_RANGE_START: u16 = 8000;
const PORT_RANGE_END: u16 = 65000;
const MAX_PORT_ATTEMPTS: usize = 256;

/// Address the notify endpoint advertises to the broker. Resolved once at
/// startup, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkBinding {
    pub local_ip: IpAddr,
    pub port: u16,
}

/// Resolve the local address and a free port in one step.
pub fn discover_binding() -> Result<NetworkBinding> {
    Ok(NetworkBinding {
        local_ip: local_ip(),
        port: find_free_port()?,
    })
}

/// Find a free TCP port by probing random candidates in [8000, 65000).
pub fn find_free_port() -> Result<u16> {
    find_free_port_with(port_is_free)
}

/// Probe-injectable variant of `find_free_port`. Attempts are bounded;
/// exhaustion is fatal at startup.
pub fn find_free_port_with<F>(mut probe: F) -> Result<u16>
where
    F: FnMut(u16) -> bool,
{
    let mut rng = rand::rng();
    for _ in 0..MAX_PORT_ATTEMPTS {
        let candidate = rng.random_range(PORT_RANGE_START..PORT_RANGE_END);
        if probe(candidate) {
            return Ok(candidate);
        }
    }
    Err(BridgeError::PortExhaustion(MAX_PORT_ATTEMPTS))
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Local address as seen on the outbound interface. Connecting a UDP
/// socket never sends a packet; it only asks the OS for a route.
pub fn local_ip() -> IpAddr {
    let routed = UdpSocket::bind(("0.0.0.0", 0)).and_then(|socket| {
        socket.connect(("10.255.255.255", 1))?;
        socket.local_addr()
    });

    match routed {
        Ok(addr) => addr.ip(),
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
