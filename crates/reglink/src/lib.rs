//! UDP control-plane driver for network-attached FPGA peripherals.
//!
//! reglink talks to an FPGA's firmware over a lossy UDP control channel:
//! sequenced register reads and writes with bounded retries, plus the bus
//! controllers (I2C, SPI, GPIO) and device lifecycle built on top of them.
//!
//! # Crate Structure
//!
//! - [`wire`] — Binary control-frame codec and frame-metadata decode
//! - [`session`] — Blocking UDP link, timeout policy, register engine
//! - [`device`] — Device handle, bus controllers, locks, lifecycle
//!   (behind the `device` feature)

/// Re-export wire types.
pub mod wire {
    pub use reglink_wire::*;
}

/// Re-export session types.
pub mod session {
    pub use reglink_session::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use reglink_device::*;
}
