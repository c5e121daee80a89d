//! Host identity probing: outbound IP and hardware MAC address.
//!
//! Both probes run once at startup and are pushed to the coordinator so the
//! machine record reflects where the agent actually lives.

use std::net::UdpSocket;

/// Identity fields probed once at startup.
#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    pub ip: Option<String>,
    pub mac: Option<String>,
}

impl HostIdentity {
    /// Probe the host. Either field may be absent; the coordinator keeps
    /// whatever it had for fields the probe cannot fill.
    pub fn probe() -> Self {
        Self {
            ip: outbound_ip(),
            mac: hardware_mac(),
        }
    }
}

/// Discover the IP address this host uses for outbound traffic.
///
/// Connecting a UDP socket to a public address selects the outbound
/// interface without sending any packets.
pub fn outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// Discover the hardware MAC address of the primary interface.
///
/// Returns `None` when no interface reports one, or when the reported
/// address is a multicast/randomized placeholder rather than real hardware.
pub fn hardware_mac() -> Option<String> {
    let mac = mac_address::get_mac_address().ok()??;
    format_mac(mac.bytes())
}

/// Format six address bytes as uppercase colon-separated hex.
///
/// Multicast addresses (bit 0 of the first octet) are rejected: platforms
/// without a discoverable MAC report a random node id with that bit set.
fn format_mac(bytes: [u8; 6]) -> Option<String> {
    if bytes[0] & 0x01 != 0 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
