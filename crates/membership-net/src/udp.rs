//! Non-blocking UDP transport
//!
//! One datagram per message. The socket is polled with `try_*` calls so the
//! protocol tick never waits on the network.

use bytes::Bytes;
use membership_core::{NodeAddress, Transport, TransportError};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM: usize = 65_507;

pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind a socket. Must be called from within a tokio runtime.
    pub async fn bind(addr: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddr::V4(addr)).await?;
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait until at least one datagram can be read.
    pub async fn readable(&self) -> Result<(), TransportError> {
        Ok(self.socket.readable().await?)
    }
}

impl Transport for UdpTransport {
    fn send(
        &mut self,
        _from: NodeAddress,
        to: NodeAddress,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if payload.len() > MAX_DATAGRAM {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds datagram limit", payload.len()),
            )));
        }
        let dest = SocketAddr::V4(SocketAddrV4::from(to));
        match self.socket.try_send_to(&payload, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(TransportError::Unreachable(to))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self) -> Vec<Bytes> {
        let mut received = Vec::new();
        loop {
            match self.socket.try_recv_from(&mut self.buf) {
                Ok((len, from)) => {
                    debug!(%from, len, "datagram received");
                    received.push(Bytes::copy_from_slice(&self.buf[..len]));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP errors from earlier sends surface here on some platforms
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset
                    || e.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    continue
                }
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    break;
                }
            }
        }
        received
    }
}
