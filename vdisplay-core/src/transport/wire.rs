//! Wire format
//!
//! Every datagram starts with a 32-byte little-endian header:
//!
//! | offset | size | field             |
//! |--------|------|-------------------|
//! | 0      | 4    | kind              |
//! | 4      | 4    | payload length    |
//! | 8      | 8    | frame index       |
//! | 16     | 8    | presentation time |
//! | 24     | 4    | total length      |
//! | 28     | 2    | chunk index       |
//! | 30     | 2    | chunk count       |
//!
//! An encoded packet larger than one datagram is split into chunks that
//! share frame index, presentation time and total length; the receiver
//! puts them back together with a [`FrameAssembler`]. Tracking datagrams
//! carry a [`TrackingPacket`] as a single chunk.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{DisplayError, Result};
use crate::types::{timestamp_us, EyeMatrices, Matrix44, Quaternion, TrackingSample};

pub const HEADER_SIZE: usize = 32;

/// Largest datagram we send; stays under a 1500-byte Ethernet MTU with
/// room for IP and UDP headers
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Payload bytes that fit in one datagram
pub const MAX_CHUNK_PAYLOAD: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Datagram type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Encoded video, server to client
    Video,
    /// Head tracking, client to server
    Tracking,
    /// Client announcing its address
    Hello,
}

impl PacketKind {
    fn to_wire(self) -> u32 {
        match self {
            Self::Video => 1,
            Self::Tracking => 2,
            Self::Hello => 3,
        }
    }

    fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Video),
            2 => Some(Self::Tracking),
            3 => Some(Self::Hello),
            _ => None,
        }
    }
}

/// Parsed datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    /// Payload bytes in this datagram
    pub length: u32,
    pub frame_index: u64,
    pub presentation_time: u64,
    /// Payload bytes across all chunks of the packet
    pub total_length: u32,
    pub chunk_index: u16,
    pub chunk_count: u16,
}

impl PacketHeader {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.kind.to_wire());
        buf.put_u32_le(self.length);
        buf.put_u64_le(self.frame_index);
        buf.put_u64_le(self.presentation_time);
        buf.put_u32_le(self.total_length);
        buf.put_u16_le(self.chunk_index);
        buf.put_u16_le(self.chunk_count);
    }
}

/// Split one encoded packet into datagrams of at most
/// `HEADER_SIZE + max_payload` bytes.
///
/// An empty packet still produces one datagram so the client sees the
/// frame.
pub fn chunk_video_packet(
    data: &[u8],
    presentation_time: u64,
    frame_index: u64,
    max_payload: usize,
) -> Result<Vec<Bytes>> {
    if max_payload == 0 {
        return Err(DisplayError::transport("Chunk payload size must be non-zero"));
    }
    let total_length = u32::try_from(data.len())
        .map_err(|_| DisplayError::transport(format!("Packet too large: {} bytes", data.len())))?;
    let chunk_count = data.len().div_ceil(max_payload).max(1);
    let chunk_count = u16::try_from(chunk_count).map_err(|_| {
        DisplayError::transport(format!(
            "Packet of {} bytes needs {} chunks",
            data.len(),
            chunk_count
        ))
    })?;

    let mut header = PacketHeader {
        kind: PacketKind::Video,
        length: 0,
        frame_index,
        presentation_time,
        total_length,
        chunk_index: 0,
        chunk_count,
    };
    if data.is_empty() {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.put(&mut buf);
        return Ok(vec![buf.freeze()]);
    }

    let mut datagrams = Vec::with_capacity(chunk_count as usize);
    for (index, chunk) in data.chunks(max_payload).enumerate() {
        header.length = chunk.len() as u32;
        header.chunk_index = index as u16;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
        header.put(&mut buf);
        buf.put_slice(chunk);
        datagrams.push(buf.freeze());
    }
    Ok(datagrams)
}

/// Datagram a client sends to announce its address
pub fn hello_datagram() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    PacketHeader {
        kind: PacketKind::Hello,
        length: 0,
        frame_index: 0,
        presentation_time: timestamp_us(),
        total_length: 0,
        chunk_index: 0,
        chunk_count: 1,
    }
    .put(&mut buf);
    buf.freeze()
}

/// Split a datagram into header and payload
pub fn decode_header(datagram: &[u8]) -> Result<(PacketHeader, &[u8])> {
    if datagram.len() < HEADER_SIZE {
        return Err(DisplayError::transport(format!(
            "Datagram too short: {} bytes",
            datagram.len()
        )));
    }
    let mut buf = &datagram[..HEADER_SIZE];
    let kind = buf.get_u32_le();
    let kind = PacketKind::from_wire(kind)
        .ok_or_else(|| DisplayError::transport(format!("Unknown packet kind {}", kind)))?;
    let header = PacketHeader {
        kind,
        length: buf.get_u32_le(),
        frame_index: buf.get_u64_le(),
        presentation_time: buf.get_u64_le(),
        total_length: buf.get_u32_le(),
        chunk_index: buf.get_u16_le(),
        chunk_count: buf.get_u16_le(),
    };

    if header.chunk_index >= header.chunk_count || header.length > header.total_length {
        return Err(DisplayError::transport(format!(
            "Bad chunk {} of {} ({} of {} bytes)",
            header.chunk_index, header.chunk_count, header.length, header.total_length
        )));
    }

    let payload = &datagram[HEADER_SIZE..];
    if payload.len() < header.length as usize {
        return Err(DisplayError::transport(format!(
            "Truncated payload: {} of {} bytes",
            payload.len(),
            header.length
        )));
    }
    Ok((header, &payload[..header.length as usize]))
}

/// Encoded packet put back together from its chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPacket {
    pub frame_index: u64,
    pub presentation_time: u64,
    pub data: Bytes,
}

struct PartialPacket {
    first_seen_us: u64,
    presentation_time: u64,
    total_length: u32,
    received: usize,
    chunks: Vec<Option<Bytes>>,
}

/// Collects video chunks by frame index until a packet is complete.
///
/// Packets still missing chunks after `timeout_us` are discarded on the
/// next push.
pub struct FrameAssembler {
    timeout_us: u64,
    packets: HashMap<u64, PartialPacket>,
}

impl FrameAssembler {
    pub fn new(timeout_us: u64) -> Self {
        Self {
            timeout_us,
            packets: HashMap::new(),
        }
    }

    /// Add one chunk; returns the packet once every chunk has arrived
    pub fn push(&mut self, header: &PacketHeader, payload: &[u8]) -> Option<AssembledPacket> {
        if header.kind != PacketKind::Video || header.chunk_index >= header.chunk_count {
            return None;
        }
        let now = timestamp_us();
        let timeout = self.timeout_us;
        self.packets
            .retain(|_, packet| now.saturating_sub(packet.first_seen_us) < timeout);

        let packet = self
            .packets
            .entry(header.frame_index)
            .or_insert_with(|| PartialPacket {
                first_seen_us: now,
                presentation_time: header.presentation_time,
                total_length: header.total_length,
                received: 0,
                chunks: vec![None; header.chunk_count as usize],
            });

        // Chunks of one packet agree on their shape
        if packet.chunks.len() != header.chunk_count as usize
            || packet.total_length != header.total_length
        {
            return None;
        }
        let slot = &mut packet.chunks[header.chunk_index as usize];
        if slot.is_none() {
            *slot = Some(Bytes::copy_from_slice(payload));
            packet.received += 1;
        }
        if packet.received < packet.chunks.len() {
            return None;
        }

        let packet = self.packets.remove(&header.frame_index)?;
        let mut data = BytesMut::with_capacity(packet.total_length as usize);
        for chunk in packet.chunks.into_iter().flatten() {
            data.put(chunk);
        }
        if data.len() != packet.total_length as usize {
            return None;
        }
        Some(AssembledPacket {
            frame_index: header.frame_index,
            presentation_time: packet.presentation_time,
            data: data.freeze(),
        })
    }

    /// Packets with chunks still outstanding
    pub fn pending(&self) -> usize {
        self.packets.len()
    }
}

/// Tracking payload as sent by the client
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TrackingPacket {
    pub frame_index: u64,
    pub client_time: u64,
    /// w, x, y, z
    pub orientation: [f32; 4],
    pub position: [f32; 3],
    _pad: u32,
    /// Column-major per-eye view matrices
    pub eye_view: [[f32; 16]; 2],
    /// Column-major per-eye projection matrices
    pub eye_projection: [[f32; 16]; 2],
}

impl TrackingPacket {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_sample(sample: &TrackingSample) -> Self {
        let q = sample.orientation;
        Self {
            frame_index: sample.frame_index,
            client_time: sample.client_time,
            orientation: [q.w as f32, q.x as f32, q.y as f32, q.z as f32],
            position: sample.position,
            _pad: 0,
            eye_view: [sample.eyes[0].view.m, sample.eyes[1].view.m],
            eye_projection: [sample.eyes[0].projection.m, sample.eyes[1].projection.m],
        }
    }

    pub fn to_sample(&self) -> TrackingSample {
        let [w, x, y, z] = self.orientation;
        let eye = |i: usize| EyeMatrices {
            view: Matrix44 { m: self.eye_view[i] },
            projection: Matrix44 {
                m: self.eye_projection[i],
            },
        };
        TrackingSample {
            frame_index: self.frame_index,
            client_time: self.client_time,
            orientation: Quaternion::new(w as f64, x as f64, y as f64, z as f64),
            position: self.position,
            eyes: [eye(0), eye(1)],
        }
    }

    /// Full datagram (header + payload)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + Self::SIZE);
        PacketHeader {
            kind: PacketKind::Tracking,
            length: Self::SIZE as u32,
            frame_index: self.frame_index,
            presentation_time: self.client_time,
            total_length: Self::SIZE as u32,
            chunk_index: 0,
            chunk_count: 1,
        }
        .put(&mut buf);
        buf.put_slice(bytemuck::bytes_of(self));
        buf.freeze()
    }

    /// Parse a tracking payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        bytemuck::try_pod_read_unaligned(payload)
            .map_err(|e| DisplayError::transport(format!("Bad tracking payload: {:?}", e)))
    }
}
