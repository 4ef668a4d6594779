//! Inbound L2CAP reassembly for one connection

use heapless::Vec;

use crate::{
    acl::packet::{AclPacket, BroadcastFlag, PacketBoundary},
    constants::{L2CAP_BASIC_HEADER_SIZE, MAX_FRAME_SIZE},
};

/// A reassembled L2CAP frame, basic header included
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

/// Rebuilds L2CAP PDUs from ACL fragments
///
/// The expected size of a PDU is learned from the L2CAP length field once the first
/// four bytes are in. A first fragment shorter than that is kept only as a header
/// prefix for the continuations that follow it.
#[derive(Debug, Default)]
pub struct Assembler {
    buffer: Frame,
    expected: Option<usize>,
    assembling: bool,
}

impl Assembler {
    /// Create an idle assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a PDU is partially received
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.assembling
    }

    /// Feed one ACL packet, returning a frame once a PDU is complete
    pub fn push(&mut self, packet: &AclPacket<'_>) -> Option<Frame> {
        let header = packet.header;
        if header.broadcast_flag != BroadcastFlag::PointToPoint {
            warn!("[ACL] Dropping broadcast packet on {:?}", header.handle);
            return None;
        }

        match header.packet_boundary {
            PacketBoundary::FirstNonFlushable => {
                warn!("[ACL] Dropping non-flushable start packet on {:?}", header.handle);
                return None;
            }
            PacketBoundary::ContinuingFragment if !self.assembling => {
                warn!("[ACL] Dropping continuation without start on {:?}", header.handle);
                return None;
            }
            PacketBoundary::ContinuingFragment => {}
            PacketBoundary::FirstFlushable | PacketBoundary::CompletePdu => {
                if self.assembling {
                    warn!(
                        "[ACL] Dropping unfinished PDU of {} bytes on {:?}",
                        self.buffer.len(),
                        header.handle
                    );
                }
                self.reset();
                self.assembling = true;
            }
        }

        if self.buffer.extend_from_slice(packet.data).is_err() {
            warn!("[ACL] PDU exceeds frame buffer on {:?}", header.handle);
            self.reset();
            return None;
        }

        if self.expected.is_none() && self.buffer.len() >= L2CAP_BASIC_HEADER_SIZE {
            let length = u16::from_le_bytes([self.buffer[0], self.buffer[1]]);
            self.expected = Some(usize::from(length) + L2CAP_BASIC_HEADER_SIZE);
        }

        let expected = self.expected?;
        if self.buffer.len() > expected {
            warn!(
                "[ACL] PDU overran declared length {} on {:?}",
                expected, header.handle
            );
            self.reset();
            return None;
        }
        if self.buffer.len() < expected {
            return None;
        }

        let frame = core::mem::take(&mut self.buffer);
        self.reset();
        Some(frame)
    }

    /// Discard any partial PDU
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.assembling = false;
    }
}
