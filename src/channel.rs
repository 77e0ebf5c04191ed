//! Datagram transport used by a transfer session.
//!
//! A session only ever needs two things from the network: send a datagram to
//! an address, and wait for the next datagram with a deadline. Both are
//! expressed by [`DatagramChannel`] so the state machine can be driven by a
//! real UDP socket or by a scripted channel in tests.

use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Duration};

use crate::error::{Result, TftpError};
use crate::MAX_PACKET_SIZE;

/// Outcome of a single wait on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    Datagram(Vec<u8>, SocketAddr),
    Timeout,
}

#[async_trait]
pub trait DatagramChannel: Send {
    async fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Waits for one datagram or for `wait` to elapse, whichever is first.
    async fn recv(&mut self, wait: Duration) -> io::Result<Recv>;
}

/// UDP socket bound to an ephemeral local port.
pub struct UdpChannel {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpChannel {
    /// Binds a local socket of the same family as `server`.
    pub async fn bind_for(server: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TftpError::Connect(format!("bind {local}: {e}")))?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            // One spare byte so an oversized datagram is seen as oversized
            buf: vec![0; MAX_PACKET_SIZE + 1],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramChannel for UdpChannel {
    async fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr).await
    }

    async fn recv(&mut self, wait: Duration) -> io::Result<Recv> {
        match timeout(wait, self.socket.recv_from(&mut self.buf)).await {
            Ok(res) => {
                let (n, addr) = res?;
                Ok(Recv::Datagram(self.buf[..n].to_vec(), addr))
            }
            Err(_) => Ok(Recv::Timeout),
        }
    }
}

/// Resolves `host` to the first address it maps to on `port`.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| TftpError::Connect(format!("resolve {host}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| TftpError::Connect(format!("{host} has no address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_times_out() {
        let mut chan = UdpChannel::bind_for("127.0.0.1:69".parse().unwrap())
            .await
            .unwrap();
        let res = chan.recv(Duration::from_millis(20)).await.unwrap();
        assert_eq!(res, Recv::Timeout);
    }

    #[tokio::test]
    async fn send_and_recv_on_loopback() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut chan = UdpChannel::from_socket(socket);
        let local = chan.local_addr().unwrap();

        chan.send_to(b"ping", peer_addr).await.unwrap();
        let mut buf = [0; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, local);

        peer.send_to(b"pong", local).await.unwrap();
        let res = chan.recv(Duration::from_secs(1)).await.unwrap();
        assert_eq!(res, Recv::Datagram(b"pong".to_vec(), peer_addr));
    }

    #[tokio::test]
    async fn resolves_literal_address() {
        let addr = resolve("127.0.0.1", 69).await.unwrap();
        assert_eq!(addr, "127.0.0.1:69".parse().unwrap());
    }
}
