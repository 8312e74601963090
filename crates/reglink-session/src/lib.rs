//! Blocking UDP session and register access engine.
//!
//! The device processes one outstanding command at a time, so the session
//! serializes all callers through a single mutex spanning the whole
//! serialize → send → receive → match exchange. Reliability over the lossy
//! transport comes from bounded retries: each attempt mints a fresh
//! sequence number, and replies to abandoned attempts are discarded by
//! sequence mismatch.

pub mod error;
pub mod link;
pub mod session;
pub mod timeout;

pub use error::{Result, SessionError};
pub use link::{ControlLink, UdpLink};
pub use session::{ControlSession, SessionConfig, INITIAL_SEQUENCE};
pub use timeout::Timeout;
