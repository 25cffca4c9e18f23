//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::constants::{MAX_PACKET_SIZE, RECEIVE_POLL_MS};
use crate::error::NetworkError;

fn new_udp_socket() -> Result<Socket, NetworkError> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::SocketCreate(e.to_string()))
}

/// Bind `0.0.0.0:port` for receiving, with address reuse and a short read
/// timeout so the receive loop can notice shutdown
pub fn bind_receive_socket(port: u16) -> Result<UdpSocket, NetworkError> {
    let bind_failed = |e: std::io::Error| NetworkError::BindFailed {
        port,
        reason: e.to_string(),
    };

    let socket = new_udp_socket()?;
    socket.set_reuse_address(true).map_err(bind_failed)?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket
        .set_read_timeout(Some(Duration::from_millis(RECEIVE_POLL_MS)))
        .map_err(bind_failed)?;

    Ok(socket.into())
}

/// Open an unbound-port socket for sending
pub fn open_send_socket() -> Result<UdpSocket, NetworkError> {
    let socket = new_udp_socket()?;
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed {
            port: 0,
            reason: e.to_string(),
        })?;
    Ok(socket.into())
}

/// Send one datagram, treating a short write as a failure
pub fn send_datagram(
    socket: &UdpSocket,
    datagram: &[u8],
    dest: SocketAddr,
) -> Result<usize, NetworkError> {
    if datagram.len() > MAX_PACKET_SIZE {
        return Err(NetworkError::PacketTooLarge(datagram.len()));
    }
    let sent = socket
        .send_to(datagram, dest)
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    if sent != datagram.len() {
        return Err(NetworkError::SendFailed(format!(
            "short write of {} of {} bytes",
            sent,
            datagram.len()
        )));
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_socket_allows_reuse() {
        let first = bind_receive_socket(0).unwrap();
        let port = first.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(
            first.read_timeout().unwrap(),
            Some(Duration::from_millis(RECEIVE_POLL_MS))
        );
    }

    #[test]
    fn test_send_reaches_receiver() {
        let rx = bind_receive_socket(0).unwrap();
        let port = rx.local_addr().unwrap().port();
        let tx = open_send_socket().unwrap();

        let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        assert_eq!(send_datagram(&tx, b"VBAN", dest).unwrap(), 4);

        let mut buf = [0u8; 16];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"VBAN");
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let tx = open_send_socket().unwrap();
        let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9));
        let datagram = vec![0u8; MAX_PACKET_SIZE + 1];

        assert!(matches!(
            send_datagram(&tx, &datagram, dest),
            Err(NetworkError::PacketTooLarge(n)) if n == MAX_PACKET_SIZE + 1
        ));
    }
}
