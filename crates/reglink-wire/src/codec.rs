use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Request command byte: write one 32-bit word.
pub const WR_DWORD: u8 = 0x04;
/// Request command byte: read one 32-bit word.
pub const RD_DWORD: u8 = 0x14;

/// Request flag: the device must acknowledge this request.
pub const REQUEST_FLAGS_ACK_REQUEST: u8 = 0b0000_0001;
/// Request flag: the device must verify our sequence number against its
/// latched value and fail the command on a mismatch.
pub const REQUEST_FLAGS_SEQUENCE_CHECK: u8 = 0b0000_0010;

/// Allocation size guaranteed to hold the largest request or reply frame.
pub const CONTROL_PACKET_SIZE: usize = 20;

/// Reply header: cmd (1) + flags (1) + sequence (2) + response code (1).
const REPLY_HEADER_SIZE: usize = 5;
/// Read-reply payload: reserved (1) + address (4) + value (4) + latched sequence (2).
const READ_PAYLOAD_SIZE: usize = 11;

/// Flags for an ordinary request. Every request asks for an ack; the
/// sequence check is optional because it faults when another requester
/// has touched the device since our last exchange.
pub fn request_flags(sequence_check: bool) -> u8 {
    let mut flags = REQUEST_FLAGS_ACK_REQUEST;
    if sequence_check {
        flags |= REQUEST_FLAGS_SEQUENCE_CHECK;
    }
    flags
}

/// Device response codes echoed in the reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    ErrorGeneral,
    InvalidAddr,
    InvalidCmd,
    InvalidPktLength,
    InvalidFlags,
    BufferFull,
    InvalidBlockSize,
    InvalidIndirectAddr,
    CommandTimeout,
    SequenceCheckFail,
    /// A code this crate does not know about; kept verbatim.
    Unknown(u8),
}

impl ResponseCode {
    pub fn from_wire(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x02 => Self::ErrorGeneral,
            0x03 => Self::InvalidAddr,
            0x04 => Self::InvalidCmd,
            0x05 => Self::InvalidPktLength,
            0x06 => Self::InvalidFlags,
            0x07 => Self::BufferFull,
            0x08 => Self::InvalidBlockSize,
            0x09 => Self::InvalidIndirectAddr,
            0x0A => Self::CommandTimeout,
            0x0B => Self::SequenceCheckFail,
            other => Self::Unknown(other),
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::ErrorGeneral => 0x02,
            Self::InvalidAddr => 0x03,
            Self::InvalidCmd => 0x04,
            Self::InvalidPktLength => 0x05,
            Self::InvalidFlags => 0x06,
            Self::BufferFull => 0x07,
            Self::InvalidBlockSize => 0x08,
            Self::InvalidIndirectAddr => 0x09,
            Self::CommandTimeout => 0x0A,
            Self::SequenceCheckFail => 0x0B,
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "RESPONSE_SUCCESS",
            Self::ErrorGeneral => "RESPONSE_ERROR_GENERAL",
            Self::InvalidAddr => "RESPONSE_INVALID_ADDR",
            Self::InvalidCmd => "RESPONSE_INVALID_CMD",
            Self::InvalidPktLength => "RESPONSE_INVALID_PKT_LENGTH",
            Self::InvalidFlags => "RESPONSE_INVALID_FLAGS",
            Self::BufferFull => "RESPONSE_BUFFER_FULL",
            Self::InvalidBlockSize => "RESPONSE_INVALID_BLOCK_SIZE",
            Self::InvalidIndirectAddr => "RESPONSE_INVALID_INDIRECT_ADDR",
            Self::CommandTimeout => "RESPONSE_COMMAND_TIMEOUT",
            Self::SequenceCheckFail => "RESPONSE_SEQUENCE_CHECK_FAIL",
            Self::Unknown(code) => return write!(f, "{code:#04x}(unknown)"),
        };
        write!(f, "{:#04x}({name})", self.as_wire())
    }
}

/// A control-plane request frame.
///
/// Wire format, big-endian multi-byte fields:
/// ```text
/// ┌─────────┬──────────┬──────────────┬──────────┬─────────────┬───────────────────┐
/// │ cmd (1) │ flags(1) │ sequence (2) │ rsvd (2) │ address (4) │ value (4, writes) │
/// └─────────┴──────────┴──────────────┴──────────┴─────────────┴───────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    ReadDword {
        sequence: u16,
        flags: u8,
        address: u32,
    },
    WriteDword {
        sequence: u16,
        flags: u8,
        address: u32,
        value: u32,
    },
}

impl ControlRequest {
    pub fn sequence(&self) -> u16 {
        match self {
            Self::ReadDword { sequence, .. } | Self::WriteDword { sequence, .. } => *sequence,
        }
    }

    pub fn address(&self) -> u32 {
        match self {
            Self::ReadDword { address, .. } | Self::WriteDword { address, .. } => *address,
        }
    }

    /// Encode this request into the wire format.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(CONTROL_PACKET_SIZE);
        match *self {
            Self::ReadDword {
                sequence,
                flags,
                address,
            } => {
                dst.put_u8(RD_DWORD);
                dst.put_u8(flags);
                dst.put_u16(sequence);
                dst.put_u8(0); // reserved
                dst.put_u8(0); // reserved
                dst.put_u32(address);
            }
            Self::WriteDword {
                sequence,
                flags,
                address,
                value,
            } => {
                dst.put_u8(WR_DWORD);
                dst.put_u8(flags);
                dst.put_u16(sequence);
                dst.put_u8(0); // reserved
                dst.put_u8(0); // reserved
                dst.put_u32(address);
                dst.put_u32(value);
            }
        }
    }

    /// Decode a request from a datagram. Used by device simulators and for
    /// request tracing; the device side of this protocol lives in firmware.
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        let available = src.len();
        if available < 10 {
            return Err(WireError::BufferUnderflow {
                what: "control request",
                needed: 10,
                available,
            });
        }
        let cmd = src.get_u8();
        let flags = src.get_u8();
        let sequence = src.get_u16();
        src.advance(2); // reserved
        let address = src.get_u32();
        match cmd {
            RD_DWORD => Ok(Self::ReadDword {
                sequence,
                flags,
                address,
            }),
            WR_DWORD => {
                if src.remaining() < 4 {
                    return Err(WireError::BufferUnderflow {
                        what: "write request value",
                        needed: 14,
                        available,
                    });
                }
                let value = src.get_u32();
                Ok(Self::WriteDword {
                    sequence,
                    flags,
                    address,
                    value,
                })
            }
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

/// Fields present only in read replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPayload {
    /// Address echoed from the request; sanity-checked by callers.
    pub address: u32,
    /// The register value.
    pub value: u32,
    /// Last sequence number the device itself processed.
    pub latched_sequence: u16,
}

/// A decoded control-plane reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReply {
    pub cmd_code: u8,
    pub flags: u8,
    pub sequence: u16,
    pub response_code: ResponseCode,
    /// Present on read replies, absent on write acks.
    pub payload: Option<ReadPayload>,
}

impl ControlReply {
    /// Decode a reply datagram.
    ///
    /// A frame shorter than the 5-byte header is an error; the read payload
    /// is optional because write acks stop at the response code.
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        let available = src.len();
        if available < REPLY_HEADER_SIZE {
            return Err(WireError::BufferUnderflow {
                what: "control reply",
                needed: REPLY_HEADER_SIZE,
                available,
            });
        }
        let cmd_code = src.get_u8();
        let flags = src.get_u8();
        let sequence = src.get_u16();
        let response_code = ResponseCode::from_wire(src.get_u8());

        let payload = if src.remaining() >= READ_PAYLOAD_SIZE {
            src.advance(1); // reserved
            let address = src.get_u32();
            let value = src.get_u32();
            let latched_sequence = src.get_u16();
            Some(ReadPayload {
                address,
                value,
                latched_sequence,
            })
        } else {
            None
        };

        Ok(Self {
            cmd_code,
            flags,
            sequence,
            response_code,
            payload,
        })
    }

    /// The read payload, or `BufferUnderflow` when the device sent a bare ack
    /// where read data was expected.
    pub fn read_payload(&self) -> Result<&ReadPayload> {
        self.payload.as_ref().ok_or(WireError::BufferUnderflow {
            what: "read reply payload",
            needed: REPLY_HEADER_SIZE + READ_PAYLOAD_SIZE,
            available: REPLY_HEADER_SIZE,
        })
    }

    /// Encode this reply into the wire format. The inverse of [`decode`];
    /// device simulators use it to script replies.
    ///
    /// [`decode`]: Self::decode
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(CONTROL_PACKET_SIZE);
        dst.put_u8(self.cmd_code);
        dst.put_u8(self.flags);
        dst.put_u16(self.sequence);
        dst.put_u8(self.response_code.as_wire());
        if let Some(payload) = &self.payload {
            dst.put_u8(0); // reserved
            dst.put_u32(payload.address);
            dst.put_u32(payload.value);
            dst.put_u16(payload.latched_sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_wire_layout() {
        let request = ControlRequest::ReadDword {
            sequence: 0x0102,
            flags: request_flags(true),
            address: 0x0400_0010,
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        assert_eq!(
            buf.as_ref(),
            &[0x14, 0x03, 0x01, 0x02, 0x00, 0x00, 0x04, 0x00, 0x00, 0x10]
        );
    }

    #[test]
    fn write_request_wire_layout() {
        let request = ControlRequest::WriteDword {
            sequence: 0x0100,
            flags: request_flags(false),
            address: 0x8,
            value: 0xDEAD_BEEF,
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        assert_eq!(
            buf.as_ref(),
            &[0x04, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn request_roundtrip() {
        for request in [
            ControlRequest::ReadDword {
                sequence: 7,
                flags: 1,
                address: 0x80,
            },
            ControlRequest::WriteDword {
                sequence: 0xFFFF,
                flags: 3,
                address: 0x4,
                value: 0x8,
            },
        ] {
            let mut buf = BytesMut::new();
            request.encode(&mut buf);
            assert_eq!(ControlRequest::decode(&buf).unwrap(), request);
        }
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let mut buf = BytesMut::new();
        ControlRequest::ReadDword {
            sequence: 1,
            flags: 1,
            address: 0,
        }
        .encode(&mut buf);
        buf[0] = 0x42;
        assert!(matches!(
            ControlRequest::decode(&buf),
            Err(WireError::UnknownCommand(0x42))
        ));
    }

    #[test]
    fn reply_decode_read() {
        let reply = ControlReply {
            cmd_code: RD_DWORD,
            flags: 0x01,
            sequence: 0x0104,
            response_code: ResponseCode::Success,
            payload: Some(ReadPayload {
                address: 0x4,
                value: 0xDEAD_BEEF,
                latched_sequence: 0x0104,
            }),
        };
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        assert_eq!(buf.len(), 16);

        let decoded = ControlReply::decode(&buf).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.read_payload().unwrap().value, 0xDEAD_BEEF);
    }

    #[test]
    fn reply_decode_write_ack_has_no_payload() {
        let buf = [WR_DWORD, 0x01, 0x01, 0x00, 0x00, 0x00];
        let decoded = ControlReply::decode(&buf).unwrap();
        assert_eq!(decoded.sequence, 0x0100);
        assert!(decoded.response_code.is_success());
        assert!(decoded.payload.is_none());
        assert!(decoded.read_payload().is_err());
    }

    #[test]
    fn reply_decode_short_header_fails() {
        let err = ControlReply::decode(&[0x14, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, WireError::BufferUnderflow { available: 3, .. }));
    }

    #[test]
    fn response_code_roundtrip_and_names() {
        for code in 0u8..=0x0C {
            let parsed = ResponseCode::from_wire(code);
            assert_eq!(parsed.as_wire(), code);
        }
        assert_eq!(
            ResponseCode::from_wire(0x03).to_string(),
            "0x03(RESPONSE_INVALID_ADDR)"
        );
        assert_eq!(
            ResponseCode::from_wire(0x0B).to_string(),
            "0x0b(RESPONSE_SEQUENCE_CHECK_FAIL)"
        );
        assert!(ResponseCode::from_wire(0x00).is_success());
        assert!(!ResponseCode::from_wire(0x0A).is_success());
    }

    #[test]
    fn sequence_check_flag_is_optional() {
        assert_eq!(request_flags(false), REQUEST_FLAGS_ACK_REQUEST);
        assert_eq!(
            request_flags(true),
            REQUEST_FLAGS_ACK_REQUEST | REQUEST_FLAGS_SEQUENCE_CHECK
        );
    }
}
