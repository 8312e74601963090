//! Binary framing for the FPGA control plane.
//!
//! Every control-plane exchange is a single UDP datagram carrying one of the
//! fixed-layout records defined here: a register read/write request, its
//! reply, or the per-frame metadata block appended to data-plane frames.
//! Multi-byte fields are big-endian on the wire.

pub mod codec;
pub mod error;
pub mod metadata;

pub use codec::{
    request_flags, ControlReply, ControlRequest, ReadPayload, ResponseCode, CONTROL_PACKET_SIZE,
    RD_DWORD, REQUEST_FLAGS_ACK_REQUEST, REQUEST_FLAGS_SEQUENCE_CHECK, WR_DWORD,
};
pub use error::{Result, WireError};
pub use metadata::{FrameMetadata, METADATA_SIZE};
