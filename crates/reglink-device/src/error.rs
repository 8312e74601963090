use reglink_session::SessionError;

/// Errors that can occur on device and bus-controller operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Register-engine or transport error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Malformed size or configuration, rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not permitted in the device's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The device reported or exhibited an inconsistent bus state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bus transaction's timeout policy was exhausted.
    #[error("{0} timed out")]
    Timeout(String),

    /// The board does not support the requested feature.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Discovery metadata is missing a required field.
    #[error("metadata has no {0:?}")]
    MissingMetadata(&'static str),

    /// Lock-file or ARP I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
