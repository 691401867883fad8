//! UDP transport
//!
//! One socket carries both directions. A background task receives tracking
//! and hello datagrams and remembers the sender as the peer; encoded packets
//! go to that peer, split into MTU-sized chunks.
//!
//! Sends go through a non-blocking handle to the same socket that sits
//! outside the Tokio reactor, so the encode worker can send from its own
//! thread. A full send buffer is retried briefly; past that the rest of the
//! packet is dropped.

use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::clock::ClockOffsetEstimator;
use super::wire::{chunk_video_packet, decode_header, PacketKind, TrackingPacket, MAX_CHUNK_PAYLOAD};
use super::Transport;
use crate::error::{DisplayError, Result};
use crate::types::{timestamp_us, TrackingSample};

const MAX_DATAGRAM: usize = 2048;

/// Pause between attempts while the send buffer is full
const SEND_RETRY_DELAY: Duration = Duration::from_micros(250);

/// Attempts per datagram before the packet is abandoned
const SEND_ATTEMPTS: u32 = 40;

#[derive(Debug, Default)]
struct ReceiveState {
    peer: Option<SocketAddr>,
    latest: Option<TrackingSample>,
    clock: ClockOffsetEstimator,
}

/// Tokio UDP implementation of [`Transport`]
pub struct UdpTransport {
    sender: std::net::UdpSocket,
    state: Arc<Mutex<ReceiveState>>,
    task: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind the listen address and start receiving.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let sender = std::net::UdpSocket::bind(addr)?;
        sender.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(sender.try_clone()?)?;
        let local = sender.local_addr()?;
        let state = Arc::new(Mutex::new(ReceiveState::default()));

        let task = tokio::spawn(receive_loop(socket, state.clone()));
        info!("UDP transport listening on {}", local);

        Ok(Self { sender, state, task })
    }

    /// Send to `peer` until a client announces itself
    pub fn set_peer(&self, peer: SocketAddr) {
        self.state.lock().peer = Some(peer);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.state.lock().peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sender.local_addr()?)
    }

    fn send_datagram(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match self.sender.send_to(datagram, peer) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && attempt < SEND_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(SEND_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Transport for UdpTransport {
    fn send(&self, data: &[u8], presentation_time: u64, frame_index: u64) -> Result<()> {
        let Some(peer) = self.peer() else {
            trace!("No peer yet, dropping packet for frame {}", frame_index);
            return Ok(());
        };
        let datagrams = chunk_video_packet(data, presentation_time, frame_index, MAX_CHUNK_PAYLOAD)?;
        for (sent, datagram) in datagrams.iter().enumerate() {
            self.send_datagram(datagram, peer).map_err(|e| {
                DisplayError::transport(format!(
                    "Send to {} failed after {} of {} chunks: {}",
                    peer,
                    sent,
                    datagrams.len(),
                    e
                ))
            })?;
        }
        trace!(
            "Frame {}: {} bytes in {} datagrams",
            frame_index,
            data.len(),
            datagrams.len()
        );
        Ok(())
    }

    fn has_tracking_sample(&self) -> bool {
        self.state.lock().latest.is_some()
    }

    fn latest_tracking_sample(&self) -> Option<TrackingSample> {
        self.state.lock().latest
    }

    fn client_to_server_time(&self, client_time: u64) -> u64 {
        self.state.lock().clock.to_server(client_time)
    }
}

async fn receive_loop(socket: UdpSocket, state: Arc<Mutex<ReceiveState>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from a departed peer surface here; keep listening
                debug!("UDP receive error: {}", e);
                continue;
            }
        };
        let received_at = timestamp_us();

        let (header, payload) = match decode_header(&buf[..len]) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring datagram from {}: {}", from, e);
                continue;
            }
        };

        match header.kind {
            PacketKind::Tracking => match TrackingPacket::decode(payload) {
                Ok(packet) => {
                    let sample = packet.to_sample();
                    let mut state = state.lock();
                    state.clock.observe(sample.client_time, received_at);
                    state.latest = Some(sample);
                    remember_peer(&mut state, from);
                    trace!("Tracking sample {} from {}", sample.frame_index, from);
                }
                Err(e) => warn!("Ignoring tracking datagram from {}: {}", from, e),
            },
            PacketKind::Hello => remember_peer(&mut state.lock(), from),
            PacketKind::Video => debug!("Unexpected video datagram from {}", from),
        }
    }
}

fn remember_peer(state: &mut ReceiveState, from: SocketAddr) {
    if state.peer != Some(from) {
        info!("Client connected from {}", from);
        state.peer = Some(from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::{hello_datagram, FrameAssembler, HEADER_SIZE, MAX_DATAGRAM_SIZE};
    use std::time::Duration;

    async fn wait_for_peer(transport: &UdpTransport) {
        for _ in 0..100 {
            if transport.peer().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_send_without_peer_is_dropped() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        assert!(transport.send(&[1, 2, 3], 0, 0).is_ok());
        assert!(!transport.has_tracking_sample());
    }

    #[tokio::test]
    async fn test_tracking_then_video() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let server = transport.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let sample = TrackingSample::new(7, 1_000);
        client
            .send_to(&TrackingPacket::from_sample(&sample).encode(), server)
            .await
            .unwrap();

        for _ in 0..100 {
            if transport.has_tracking_sample() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.latest_tracking_sample().unwrap().frame_index, 7);
        assert_eq!(transport.peer(), Some(client.local_addr().unwrap()));

        // The very first send on a fresh socket goes out
        transport.send(&[0xab; 10], 5_000, 7).unwrap();
        let mut buf = [0u8; 64];
        let len = tokio::time::timeout(Duration::from_secs(1), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, HEADER_SIZE + 10);
        let (header, payload) = decode_header(&buf[..len]).unwrap();
        assert_eq!(header.frame_index, 7);
        assert_eq!(header.presentation_time, 5_000);
        assert_eq!(payload, &[0xab; 10]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_larger_than_mtu_arrives_whole() {
        let transport = Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
        let server = transport.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&hello_datagram(), server).await.unwrap();
        wait_for_peer(&transport).await;
        assert_eq!(transport.peer(), Some(client.local_addr().unwrap()));

        let frame: Vec<u8> = (0..64 * 1024).map(|i| (i % 253) as u8).collect();
        let receiver = tokio::spawn(async move {
            let mut assembler = FrameAssembler::new(5_000_000);
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let mut datagrams = 0;
            loop {
                let len = client.recv(&mut buf).await.unwrap();
                assert!(len <= MAX_DATAGRAM_SIZE);
                datagrams += 1;
                let (header, payload) = decode_header(&buf[..len]).unwrap();
                if let Some(packet) = assembler.push(&header, payload) {
                    return (packet, datagrams);
                }
            }
        });

        let sender = transport.clone();
        let data = frame.clone();
        tokio::task::spawn_blocking(move || sender.send(&data, 9_000, 12))
            .await
            .unwrap()
            .unwrap();

        let (packet, datagrams) = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(datagrams, frame.len().div_ceil(MAX_CHUNK_PAYLOAD));
        assert_eq!(packet.frame_index, 12);
        assert_eq!(packet.presentation_time, 9_000);
        assert_eq!(packet.data.as_ref(), frame.as_slice());
    }
}
