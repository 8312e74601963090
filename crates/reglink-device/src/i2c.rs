use tracing::{debug, trace};

use reglink_session::Timeout;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::regmap::{I2C_BUSY, I2C_CORE_EN, I2C_DONE, I2C_DONE_CLEAR, I2C_START};
use crate::words::{pack_word_le, unpack_word_le};

/// I2C fast mode (400 kHz), the only speed the peripherals here use.
const I2C_CLOCK_400KHZ: u32 = 0b0000_0101;

/// One logical I2C controller bank.
///
/// The FPGA has a single physical I2C core; what look like independent
/// controller instances are pin-muxed outputs of that one core, so every
/// transaction runs under the device's shared I2C lock.
pub struct I2c<'a> {
    device: &'a Device,
    reg_control: u32,
    reg_num_bytes: u32,
    reg_clk_ctrl: u32,
    reg_data_buffer: u32,
}

impl<'a> I2c<'a> {
    pub(crate) fn new(device: &'a Device, i2c_address: u32) -> Self {
        Self {
            device,
            reg_control: i2c_address,
            reg_num_bytes: i2c_address + 4,
            reg_clk_ctrl: i2c_address + 8,
            reg_data_buffer: i2c_address + 16,
        }
    }

    /// Set the bus clock to 400 kHz. Done once at init.
    pub fn set_i2c_clock(&self) -> Result<bool> {
        let timeout = Timeout::i2c();
        Ok(self
            .device
            .session()
            .write_uint32_with(self.reg_clk_ctrl, I2C_CLOCK_400KHZ, &timeout, true, self.device.check_sequence())?)
    }

    /// Run one I2C transaction with the default bus timeout policy.
    pub fn i2c_transaction(
        &self,
        peripheral_i2c_address: u32,
        write_bytes: &[u8],
        read_byte_count: u32,
    ) -> Result<Vec<u8>> {
        self.i2c_transaction_with(
            peripheral_i2c_address,
            write_bytes,
            read_byte_count,
            &Timeout::i2c(),
        )
    }

    /// Write `write_bytes` to the peripheral, then read `read_byte_count`
    /// bytes back, as one bus transaction.
    ///
    /// The shared I2C lock spans the entire register sequence, not the
    /// individual accesses: interleaving two half-programmed transactions
    /// on the single core would corrupt both.
    pub fn i2c_transaction_with(
        &self,
        peripheral_i2c_address: u32,
        write_bytes: &[u8],
        read_byte_count: u32,
        timeout: &Timeout,
    ) -> Result<Vec<u8>> {
        debug!(
            peripheral = format_args!("{peripheral_i2c_address:#x}"),
            write_byte_count = write_bytes.len(),
            read_byte_count,
            "i2c_transaction"
        );
        if peripheral_i2c_address >= 0x80 {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid peripheral_i2c_address {peripheral_i2c_address:#x}, has to be less than 0x80"
            )));
        }
        let write_byte_count = write_bytes.len();
        if write_byte_count >= 0x100 {
            return Err(DeviceError::InvalidArgument(format!(
                "write_bytes is too large ({write_byte_count:#x} bytes), has to be less than 0x100"
            )));
        }
        if read_byte_count >= 0x100 {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid read_byte_count {read_byte_count:#x}, has to be less than 0x100"
            )));
        }

        let session = self.device.session();
        let check_sequence = self.device.check_sequence();
        let _bus = self.device.i2c_bus_lock().acquire()?;

        // The core has no reset; the best we can do is require it idle.
        let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
        if value & I2C_BUSY != 0 {
            return Err(DeviceError::Protocol(format!(
                "unexpected I2C_BUSY bit set, reg_control={:#x}, control value={value:#x}",
                self.reg_control
            )));
        }

        // Set the peripheral address and enable the core, pulsing
        // I2C_DONE_CLEAR high then low.
        let enabled = (peripheral_i2c_address << 16) | I2C_CORE_EN;
        session.write_uint32_with(
            self.reg_control,
            enabled | I2C_DONE_CLEAR,
            timeout,
            true,
            check_sequence,
        )?;
        session.write_uint32_with(self.reg_control, enabled, timeout, true, check_sequence)?;
        let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
        if value & I2C_DONE != 0 {
            return Err(DeviceError::Protocol(format!(
                "I2C_DONE still set after clear, control value={value:#x}"
            )));
        }

        let num_bytes = (write_byte_count as u32) | (read_byte_count << 8);
        session.write_uint32_with(self.reg_num_bytes, num_bytes, timeout, true, check_sequence)?;

        for (index, chunk) in write_bytes.chunks(4).enumerate() {
            session.write_uint32_with(
                self.reg_data_buffer + (index as u32) * 4,
                pack_word_le(chunk),
                timeout,
                true,
                check_sequence,
            )?;
        }

        // Kick the transaction; re-issue START until the core reports
        // BUSY or DONE.
        loop {
            session.write_uint32_with(
                self.reg_control,
                enabled | I2C_START,
                timeout,
                true,
                check_sequence,
            )?;
            let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
            if value & (I2C_DONE | I2C_BUSY) != 0 {
                break;
            }
            if !timeout.retry_wait() {
                return Err(DeviceError::Timeout(format!(
                    "i2c_transaction peripheral={peripheral_i2c_address:#x}"
                )));
            }
        }

        // Poll until done. A future firmware revision will add an event
        // packet for this.
        loop {
            let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
            trace!(control = format_args!("{value:#x}"), "i2c poll");
            if value & I2C_DONE != 0 {
                break;
            }
            if !timeout.retry_wait() {
                return Err(DeviceError::Timeout(format!(
                    "i2c_transaction peripheral={peripheral_i2c_address:#x}"
                )));
            }
        }

        // Read back whole words, then trim to the requested length.
        let word_count = read_byte_count.div_ceil(4);
        let mut received = Vec::with_capacity((word_count * 4) as usize);
        for index in 0..word_count {
            let word =
                session.read_uint32_with(self.reg_data_buffer + index * 4, timeout, check_sequence)?;
            unpack_word_le(word, &mut received);
        }
        received.truncate(read_byte_count as usize);
        Ok(received)
    }
}
