use reglink_wire::ResponseCode;

/// Errors that can occur on a control-plane session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation attempted on a session whose link is closed.
    #[error("not connected")]
    NotConnected,

    /// Malformed address or parameter, rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device actively rejected the request. Never retried.
    #[error("{operation} address={address:#010x} failed with response code {code}")]
    Protocol {
        operation: &'static str,
        address: u32,
        code: ResponseCode,
    },

    /// A read reply echoed a different address than the request carried.
    #[error("reply address {actual:#010x} does not match request address {expected:#010x}")]
    AddressMismatch { expected: u32, actual: u32 },

    /// The deadline elapsed across all retries.
    #[error("{operation} address={address:#010x} timed out")]
    Timeout {
        operation: &'static str,
        address: u32,
    },

    /// Frame-level encode/decode error.
    #[error("wire error: {0}")]
    Wire(#[from] reglink_wire::WireError),

    /// Socket-level I/O error.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
