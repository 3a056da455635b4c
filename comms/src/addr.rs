use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Returns the address this host reaches the network with, the loopback
/// address if it has none.
///
/// No packet is sent, connecting a UDP socket only picks a route.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
