use bytes::Buf;
use tracing::trace;

use crate::error::{Result, WireError};

/// Size of the metadata block appended to each received data-plane frame.
pub const METADATA_SIZE: usize = 128;

/// Decoded bytes of the metadata block.
const FRAME_METADATA_SIZE: usize = 48;

/// Per-frame metadata appended by the device to each data-plane frame.
///
/// Positional big-endian fixed-width fields; only the leading 48 bytes of
/// the 128-byte block carry data today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    pub flags: u32,
    /// Packet sequence number of the last payload packet.
    pub psn: u32,
    pub crc: u32,
    /// Time when the first sample data for the frame was received.
    pub timestamp_s: u64,
    pub timestamp_ns: u32,
    pub bytes_written: u64,
    pub frame_number: u32,
    /// Time at which the metadata packet was sent.
    pub metadata_s: u64,
    pub metadata_ns: u32,
}

impl FrameMetadata {
    /// Decode a metadata block. A short buffer is fatal: the block is
    /// produced by hardware at a fixed size, so underflow means the frame
    /// receive path handed us garbage.
    pub fn deserialize(mut buffer: &[u8]) -> Result<Self> {
        let available = buffer.len();
        if available < FRAME_METADATA_SIZE {
            return Err(WireError::BufferUnderflow {
                what: "frame metadata",
                needed: FRAME_METADATA_SIZE,
                available,
            });
        }
        let metadata = Self {
            flags: buffer.get_u32(),
            psn: buffer.get_u32(),
            crc: buffer.get_u32(),
            timestamp_s: buffer.get_u64(),
            timestamp_ns: buffer.get_u32(),
            bytes_written: buffer.get_u64(),
            frame_number: buffer.get_u32(),
            metadata_s: buffer.get_u64(),
            metadata_ns: buffer.get_u32(),
        };
        trace!(
            flags = metadata.flags,
            psn = metadata.psn,
            crc = metadata.crc,
            frame_number = metadata.frame_number,
            bytes_written = metadata.bytes_written,
            "frame metadata"
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    #[test]
    fn deserialize_positional_fields() {
        let mut buffer = Vec::with_capacity(METADATA_SIZE);
        buffer.put_u32(0x1); // flags
        buffer.put_u32(0x00AB_CDEF); // psn
        buffer.put_u32(0xCAFE_F00D); // crc
        buffer.put_u64(1_700_000_000); // timestamp_s
        buffer.put_u32(999_999_999); // timestamp_ns
        buffer.put_u64(4 * 1024 * 1024); // bytes_written
        buffer.put_u32(42); // frame_number
        buffer.put_u64(1_700_000_001); // metadata_s
        buffer.put_u32(5); // metadata_ns
        buffer.resize(METADATA_SIZE, 0);

        let metadata = FrameMetadata::deserialize(&buffer).unwrap();
        assert_eq!(metadata.flags, 0x1);
        assert_eq!(metadata.psn, 0x00AB_CDEF);
        assert_eq!(metadata.crc, 0xCAFE_F00D);
        assert_eq!(metadata.timestamp_s, 1_700_000_000);
        assert_eq!(metadata.timestamp_ns, 999_999_999);
        assert_eq!(metadata.bytes_written, 4 * 1024 * 1024);
        assert_eq!(metadata.frame_number, 42);
        assert_eq!(metadata.metadata_s, 1_700_000_001);
        assert_eq!(metadata.metadata_ns, 5);
    }

    #[test]
    fn short_buffer_is_fatal() {
        let err = FrameMetadata::deserialize(&[0u8; 47]).unwrap_err();
        assert!(matches!(
            err,
            WireError::BufferUnderflow {
                needed: 48,
                available: 47,
                ..
            }
        ));
    }
}
