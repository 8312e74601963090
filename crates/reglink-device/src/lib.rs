//! Device handle for a network-attached FPGA peripheral.
//!
//! Builds on the session layer's register engine: bus controllers (I2C,
//! SPI, GPIO) as register-level state machines, cross-process locks
//! arbitrating the physically shared bus cores, the discovery metadata
//! contract, and start/reset/stop lifecycle orchestration.

pub mod arp;
pub mod device;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod lock;
pub mod metadata;
pub mod registry;
pub mod regmap;
pub mod spi;

mod words;

pub use device::{Device, ResetListener};
pub use error::{DeviceError, Result};
pub use gpio::{Direction, Gpio};
pub use i2c::I2c;
pub use lock::{NamedLock, NamedLockGuard};
pub use metadata::{Enumerator, Metadata};
pub use registry::DeviceRegistry;
pub use spi::{Spi, SpiConfig};
