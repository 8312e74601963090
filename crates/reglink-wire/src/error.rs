/// Errors that can occur during control-frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer ended before the record was complete.
    #[error("buffer underflow decoding {what} (need {needed} bytes, have {available})")]
    BufferUnderflow {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// The command byte does not name a known request.
    #[error("unknown command code {0:#04x}")]
    UnknownCommand(u8),
}

pub type Result<T> = std::result::Result<T, WireError>;
