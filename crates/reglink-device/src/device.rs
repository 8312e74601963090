use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use reglink_session::{ControlLink, ControlSession, SessionConfig, Timeout};

use crate::arp;
use crate::error::{DeviceError, Result};
use crate::gpio::Gpio;
use crate::i2c::I2c;
use crate::lock::NamedLock;
use crate::metadata::{Enumerator, Metadata};
use crate::regmap::{BL_I2C_CTRL, CLNX_SPI_CTRL, FPGA_DATE, FPGA_PTP_SYNC_TS_0, FPGA_VERSION};
use crate::spi::{Spi, SpiConfig};

/// Clock synthesizer behind the baseboard I2C controller.
const RENESAS_I2C_ADDRESS: u32 = 0x09;

/// Software-event register driving the reset strobe.
const RESET_REGISTER: u32 = 0x4;
/// Power and clock gate register.
const CLOCK_REGISTER: u32 = 0x8;

/// Sequence number the device latches across its own reset; the first
/// post-reset request must carry the successor of its initial 0.
const POST_RESET_SEQUENCE: u16 = 1;

/// Observer notified after a device reset completes and the control plane
/// is reachable again. Callers that cache device state (calibration,
/// sensor configuration) re-apply it here.
pub trait ResetListener: Send + Sync {
    fn on_reset(&self);
}

/// Handle to one network-attached FPGA peripheral.
///
/// Owns the control session, the cross-process bus locks, and the cached
/// identity registers. Cheap to share behind an [`Arc`]; all methods take
/// `&self`.
pub struct Device {
    session: ControlSession,
    board_id: Option<u32>,
    version: Mutex<Option<u32>>,
    datecode: Mutex<Option<u32>>,
    i2c_lock: NamedLock,
    spi_lock: NamedLock,
    device_lock: NamedLock,
    listeners: Mutex<Vec<Arc<dyn ResetListener>>>,
}

impl Device {
    /// Build a device handle from discovery metadata. No I/O happens here;
    /// call [`start`](Self::start) to reach the device.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let serial_number = metadata.serial_number()?.to_string();
        let config = SessionConfig {
            peer_ip: metadata.peer_ip()?.to_string(),
            control_port: metadata.control_port()?,
            serial_number: serial_number.clone(),
            sequence_check: metadata.sequence_number_checking.unwrap_or(true),
        };
        Ok(Self {
            session: ControlSession::new(config),
            board_id: metadata.board_id,
            version: Mutex::new(None),
            datecode: Mutex::new(None),
            i2c_lock: NamedLock::open(&serial_number, "i2c")?,
            spi_lock: NamedLock::open(&serial_number, "spi")?,
            device_lock: NamedLock::open(&serial_number, "device")?,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Build a device over an already-open link. Simulators and tests use
    /// this in place of the UDP path.
    pub fn with_link(metadata: &Metadata, link: Box<dyn ControlLink>) -> Result<Self> {
        let device = Self::from_metadata(metadata)?;
        device.session.attach(link);
        Ok(device)
    }

    pub fn session(&self) -> &ControlSession {
        &self.session
    }

    pub fn serial_number(&self) -> &str {
        self.session.serial_number()
    }

    pub fn board_id(&self) -> Option<u32> {
        self.board_id
    }

    pub(crate) fn check_sequence(&self) -> bool {
        self.session.config().sequence_check
    }

    pub(crate) fn i2c_bus_lock(&self) -> &NamedLock {
        &self.i2c_lock
    }

    pub(crate) fn spi_bus_lock(&self) -> &NamedLock {
        &self.spi_lock
    }

    /// Connect to the device and read its identity registers.
    ///
    /// The first exchange tolerates a cold device with a generous
    /// deadline, and skips the sequence check since the device's latched
    /// counter is unknown at this point.
    pub fn start(&self) -> Result<()> {
        if !self.session.is_connected() {
            self.session.connect()?;
        }
        let timeout = Timeout::first_contact();
        let version = self.get_fpga_version(&timeout)?;
        let datecode = self.session.read_uint32_with(FPGA_DATE, &timeout, false)?;
        *self.lock_cache(&self.datecode) = Some(datecode);
        info!(
            serial_number = self.serial_number(),
            version = format_args!("{version:#x}"),
            datecode = format_args!("{datecode:#x}"),
            "started"
        );
        Ok(())
    }

    /// Drop the control link. Register operations fail `NotConnected`
    /// until the next [`start`](Self::start).
    pub fn stop(&self) {
        self.session.close();
    }

    /// Register an observer for reset completion. Listeners fire in
    /// registration order.
    pub fn on_reset(&self, listener: Arc<dyn ResetListener>) {
        self.lock_listeners().push(listener);
    }

    pub fn read_uint32(&self, address: u32) -> Result<u32> {
        Ok(self.session.read_uint32(address)?)
    }

    pub fn write_uint32(&self, address: u32, value: u32) -> Result<bool> {
        Ok(self.session.write_uint32(address, value)?)
    }

    /// Clear `mask` bits in a register, returning the written value. The
    /// read-modify-write runs under the cross-process device lock.
    pub fn and_uint32(&self, address: u32, mask: u32) -> Result<u32> {
        let _guard = self.device_lock.acquire()?;
        let value = self.session.read_uint32(address)? & mask;
        self.session.write_uint32(address, value)?;
        Ok(value)
    }

    /// Set `mask` bits in a register, returning the written value. The
    /// read-modify-write runs under the cross-process device lock.
    pub fn or_uint32(&self, address: u32, mask: u32) -> Result<u32> {
        let _guard = self.device_lock.acquire()?;
        let value = self.session.read_uint32(address)? | mask;
        self.session.write_uint32(address, value)?;
        Ok(value)
    }

    /// Read the FPGA version register and refresh the cached copy.
    pub fn get_fpga_version(&self, timeout: &Timeout) -> Result<u32> {
        let version = self
            .session
            .read_uint32_with(FPGA_VERSION, timeout, false)?;
        *self.lock_cache(&self.version) = Some(version);
        Ok(version)
    }

    /// Read the FPGA datecode register and refresh the cached copy.
    pub fn get_fpga_date(&self) -> Result<u32> {
        let datecode = self.session.read_uint32(FPGA_DATE)?;
        *self.lock_cache(&self.datecode) = Some(datecode);
        Ok(datecode)
    }

    /// Cached FPGA version, populated by [`start`](Self::start).
    pub fn fpga_version(&self) -> Result<u32> {
        let version = *self.lock_cache(&self.version);
        version.ok_or_else(|| DeviceError::InvalidState("device has not been started".to_string()))
    }

    /// Cached FPGA datecode, populated by [`start`](Self::start).
    pub fn fpga_date(&self) -> Result<u32> {
        let datecode = *self.lock_cache(&self.datecode);
        datecode.ok_or_else(|| DeviceError::InvalidState("device has not been started".to_string()))
    }

    /// The I2C controller bank at `i2c_address`.
    pub fn i2c(&self, i2c_address: u32) -> I2c<'_> {
        I2c::new(self, i2c_address)
    }

    /// The SPI controller bank at `spi_address`, configured for one target.
    pub fn spi(&self, spi_address: u32, config: SpiConfig) -> Spi<'_> {
        Spi::new(self, spi_address, config)
    }

    /// The GPIO controller, sized for the board discovery reported.
    pub fn gpio(&self) -> Result<Gpio<'_>> {
        let board_id = self.board_id.ok_or(DeviceError::MissingMetadata("board_id"))?;
        Gpio::new(self, board_id)
    }

    /// Wait for the FPGA's PTP clock to lock to the host's grandmaster.
    /// Returns the first nonzero timestamp word, or `None` if the deadline
    /// passes first.
    pub fn ptp_synchronize(&self, timeout: &Timeout) -> Result<Option<u32>> {
        loop {
            let value = self.session.read_uint32(FPGA_PTP_SYNC_TS_0)?;
            if value != 0 {
                return Ok(Some(value));
            }
            if timeout.expired() {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Program the clock synthesizer with `clock_profile`, one I2C write
    /// per entry, then ungate the clocks.
    pub fn setup_clock(&self, clock_profile: &[Vec<u8>]) -> Result<()> {
        let i2c = self.i2c(BL_I2C_CTRL);
        for write_bytes in clock_profile {
            i2c.i2c_transaction(RENESAS_I2C_ADDRESS, write_bytes, 0)?;
        }
        self.write_uint32(CLOCK_REGISTER, 0x30)?;
        thread::sleep(Duration::from_millis(100));
        self.write_uint32(CLOCK_REGISTER, 0x3)?;
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// Reset the device and wait for it to come back.
    ///
    /// The reset strobe kills the link mid-flight, so the trigger write
    /// expects no acknowledgement. Recovery then needs `enumerator` to see
    /// the device announce itself again before the control plane is
    /// usable; the session's sequence counter resyncs to the value the
    /// freshly booted device expects.
    pub fn reset(&self, enumerator: &dyn Enumerator) -> Result<()> {
        info!(serial_number = self.serial_number(), "resetting");

        // Point the clock synthesizer at its stored startup profile.
        let spi = self.spi(
            CLNX_SPI_CTRL,
            SpiConfig {
                chip_select: 0,
                clock_divisor: 0xF,
                cpol: false,
                cpha: true,
                width: 1,
                turnaround_cycles: 0,
            },
        );
        spi.spi_transaction(&[0x01, 0x07], &[0x0C], 0)?;
        self.write_uint32(CLOCK_REGISTER, 0)?;
        thread::sleep(Duration::from_millis(100));
        spi.spi_transaction(&[0x01, 0x07], &[0x0F], 0)?;
        thread::sleep(Duration::from_millis(100));
        self.write_uint32(CLOCK_REGISTER, 0x3)?;

        // The device goes down before it can acknowledge this one.
        let acked = self.session.write_uint32_with(
            RESET_REGISTER,
            0x8,
            &Timeout::default(),
            false,
            self.check_sequence(),
        )?;
        debug!(acked, "reset trigger written");

        let timeout = Timeout::first_contact();
        let metadata = enumerator.find_channel(self.session.config().peer_ip.as_str(), &timeout)?;
        self.seed_arp_cache(&metadata);

        // The rebooted device latched sequence 0; our next request must
        // carry its successor.
        self.session.resync_sequence(POST_RESET_SEQUENCE);

        let timeout = Timeout::first_contact();
        let version = loop {
            match self.get_fpga_version(&timeout) {
                Ok(version) => break version,
                Err(err) => {
                    if !timeout.retry_wait() {
                        return Err(DeviceError::Timeout(format!(
                            "reset of {}", self.serial_number()
                        )));
                    }
                    debug!(%err, "device not back yet");
                }
            }
        };
        info!(
            serial_number = self.serial_number(),
            version = format_args!("{version:#x}"),
            "reset complete"
        );

        let listeners: Vec<Arc<dyn ResetListener>> = self.lock_listeners().clone();
        for listener in listeners {
            listener.on_reset();
        }
        Ok(())
    }

    /// Install the rediscovered MAC/IP mapping in the kernel ARP cache so
    /// the first post-reset exchange does not wait out ARP resolution.
    /// Needs CAP_NET_ADMIN and complete metadata; failure costs latency,
    /// not correctness.
    fn seed_arp_cache(&self, metadata: &Metadata) {
        let (interface, client_ip, mac_id) = match (
            metadata.interface.as_deref(),
            metadata.client_ip_address.as_deref(),
            metadata.mac_id.as_deref(),
        ) {
            (Some(interface), Some(client_ip), Some(mac_id)) => (interface, client_ip, mac_id),
            _ => {
                debug!("metadata incomplete, skipping ARP cache seed");
                return;
            }
        };
        let result = client_ip
            .parse::<Ipv4Addr>()
            .map_err(|_| DeviceError::InvalidArgument(format!("invalid IP address {client_ip:?}")))
            .and_then(|ip| {
                let mac = arp::parse_mac(mac_id)?;
                arp::arp_set(interface, ip, &mac)
            });
        if let Err(err) = result {
            warn!(interface, client_ip, mac_id, %err, "could not seed ARP cache");
        }
    }

    fn lock_cache<'a>(&self, cache: &'a Mutex<Option<u32>>) -> MutexGuard<'a, Option<u32>> {
        cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn ResetListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
