//! Transport abstraction
//!
//! A thin async trait over the UDP socket so the session loop can run
//! against a real socket in production and a channel-backed loopback in
//! tests.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::error::{DerethError, NetError, Result};

/// Datagram transport used by the session loop
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize>;
    /// Receive one datagram, returning its length and source
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        UdpSocket::send_to(self, buf, addr)
            .await
            .map_err(DerethError::Io)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
            .await
            .map_err(DerethError::Io)
    }
}

/// Channel-backed transport for driving the session loop in tests
pub struct LoopbackTransport {
    outbound: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbound: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl LoopbackTransport {
    /// Create a transport plus the far ends of its two channels: what the
    /// session sends, and a sender for injecting datagrams.
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
        mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: Mutex::new(in_rx),
            },
            out_rx,
            in_tx,
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.outbound
            .send((buf.to_vec(), addr))
            .map_err(|_| DerethError::Net(NetError::SocketClosed))?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        let (data, addr) = inbound
            .recv()
            .await
            .ok_or(DerethError::Net(NetError::SocketClosed))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let (transport, mut out_rx, in_tx) = LoopbackTransport::new();

        transport.send_to(&[1, 2, 3], addr()).await.unwrap();
        let (sent, to) = out_rx.recv().await.unwrap();
        assert_eq!(sent, vec![1, 2, 3]);
        assert_eq!(to, addr());

        in_tx.send((vec![4, 5], addr())).unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = transport.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[4, 5]);
        assert_eq!(from, addr());
    }

    #[tokio::test]
    async fn test_loopback_closed_channel_errors() {
        let (transport, _out_rx, in_tx) = LoopbackTransport::new();
        drop(in_tx);
        let mut buf = [0u8; 16];
        assert!(transport.recv_from(&mut buf).await.is_err());
    }
}
