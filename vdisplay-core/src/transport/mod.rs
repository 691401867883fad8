//! Network transport contract
//!
//! The pipeline hands every encoded packet to a [`Transport`] together with
//! the presentation time and frame index it was encoded for, and polls it
//! for the newest head-tracking sample. [`UdpTransport`] is the bundled
//! implementation.

mod clock;
mod udp;
mod wire;

pub use clock::ClockOffsetEstimator;
pub use udp::UdpTransport;
pub use wire::{
    chunk_video_packet, decode_header, hello_datagram, AssembledPacket, FrameAssembler,
    PacketHeader, PacketKind, TrackingPacket, HEADER_SIZE, MAX_CHUNK_PAYLOAD, MAX_DATAGRAM_SIZE,
};

use crate::error::Result;
use crate::types::TrackingSample;

/// Packet sink and tracking source
pub trait Transport: Send + Sync {
    /// Send one encoded packet
    fn send(&self, data: &[u8], presentation_time: u64, frame_index: u64) -> Result<()>;

    /// Whether a tracking sample has been received
    fn has_tracking_sample(&self) -> bool;

    /// Most recent tracking sample
    fn latest_tracking_sample(&self) -> Option<TrackingSample>;

    /// Convert a client timestamp to server time (microseconds)
    fn client_to_server_time(&self, client_time: u64) -> u64;
}
