//! Constructs the UDP and TCP sockets used for outbound DNS queries.
//!
//! Every socket created through a [`SocketFactory`] optionally carries a
//! process-wide `SO_MARK` (Linux only, used to steer outbound packets around
//! routing loops) and an outbound bind IP. Both are fixed at construction
//! time rather than read from ambient global state, so a [`SocketFactory`]
//! can simply be cloned (it is cheap, `Copy`-sized) into every task that
//! needs to dial an upstream.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, UdpSocket};

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketFactory {
    mark: Option<u32>,
    bind_ip: Option<Ipv4Addr>,
}

impl SocketFactory {
    pub fn new(mark: Option<u32>, bind_ip: Option<Ipv4Addr>) -> Self {
        // A mark of zero is the same as "unset" per the original tool's semantics.
        let mark = mark.filter(|m| *m != 0);

        Self { mark, bind_ip }
    }

    /// Creates an unconnected, non-blocking UDP socket ready for outbound queries.
    pub fn udp_socket(&self) -> Result<UdpSocket, Error> {
        let socket = self.make_socket(Type::DGRAM)?;
        socket
            .bind(&self.local_addr().into())
            .map_err(Error::Bind)?;

        UdpSocket::from_std(socket.into()).map_err(Error::MakeAsync)
    }

    /// Creates an unconnected, non-blocking TCP socket ready to `connect`.
    pub fn tcp_socket(&self) -> Result<TcpSocket, Error> {
        let socket = self.make_socket(Type::STREAM)?;
        socket
            .bind(&self.local_addr().into())
            .map_err(Error::Bind)?;

        Ok(TcpSocket::from_std_stream(socket.into()))
    }

    fn make_socket(&self, ty: Type) -> Result<Socket, Error> {
        let protocol = match ty {
            Type::DGRAM => Protocol::UDP,
            Type::STREAM => Protocol::TCP,
            _ => unreachable!("only DGRAM and STREAM sockets are created"),
        };

        let socket =
            Socket::new(Domain::IPV4, ty, Some(protocol)).map_err(Error::CreateSocket)?;
        socket.set_nonblocking(true).map_err(Error::CreateSocket)?;

        if let Some(mark) = self.mark {
            set_mark(&socket, mark)?;
        }

        Ok(socket)
    }

    fn local_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0)
    }
}

#[cfg(target_os = "linux")]
fn set_mark(socket: &Socket, mark: u32) -> Result<(), Error> {
    socket.set_mark(mark).map_err(Error::SetMark)
}

#[cfg(not(target_os = "linux"))]
fn set_mark(_socket: &Socket, mark: u32) -> Result<(), Error> {
    tracing::warn!(%mark, "Outbound socket marks are only supported on Linux; ignoring");

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create socket: {0}")]
    CreateSocket(std::io::Error),
    #[error("failed to bind socket: {0}")]
    Bind(std::io::Error),
    #[error("failed to set SO_MARK: {0}")]
    SetMark(std::io::Error),
    #[error("failed to convert to an async socket: {0}")]
    MakeAsync(std::io::Error),
}

/// An unspecified (`0.0.0.0`) IPv4 socket address on the given port, used for binding listeners.
pub fn unspecified_v4(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_socket_can_send_and_receive() {
        let factory = SocketFactory::default();

        let a = factory.udp_socket().unwrap();
        let b = factory.udp_socket().unwrap();

        let b_addr = b.local_addr().unwrap();
        a.send_to(b"hello", b_addr).await.unwrap();

        let mut buf = [0u8; 5];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn mark_of_zero_is_treated_as_unset() {
        let factory = SocketFactory::new(Some(0), None);

        assert_eq!(factory.mark, None);
    }

    #[tokio::test]
    async fn tcp_socket_can_connect() {
        let factory = SocketFactory::default();

        let listener = tokio::net::TcpListener::bind(unspecified_v4(0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let socket = factory.tcp_socket().unwrap();
        let connect = socket.connect(addr);
        let accept = listener.accept();

        let (connect_result, accept_result) = tokio::join!(connect, accept);
        connect_result.unwrap();
        accept_result.unwrap();
    }
}
