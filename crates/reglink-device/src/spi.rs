use tracing::{debug, trace};

use reglink_session::Timeout;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::regmap::{SPI_BUSY, SPI_CFG_CPHA, SPI_CFG_CPOL, SPI_START};
use crate::words::{pack_word_le, unpack_word_le};

/// Data buffer shared by the egress and ingress halves of a transfer.
const SPI_BUFFER_SIZE: usize = 288;
/// Command bytes get their own count field, capped at 4 bits.
const SPI_MAX_COMMAND_BYTES: usize = 16;

/// Bus parameters for one SPI target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    /// Chip select line, 0..8.
    pub chip_select: u32,
    /// Clock divisor, 0..16; the core runs at ref_clk / (divisor + 1).
    pub clock_divisor: u32,
    pub cpol: bool,
    pub cpha: bool,
    /// Bus width in lanes: 1, 2, or 4.
    pub width: u32,
    /// Idle cycles between the command phase and data, 0..16.
    pub turnaround_cycles: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            chip_select: 0,
            clock_divisor: 0xF,
            cpol: true,
            cpha: true,
            width: 1,
            turnaround_cycles: 0,
        }
    }
}

impl SpiConfig {
    /// Encode into the core's configuration register layout.
    pub fn encode(&self) -> Result<u32> {
        if self.clock_divisor >= 16 {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid clock_divisor {}, has to be less than 16",
                self.clock_divisor
            )));
        }
        if self.chip_select >= 8 {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid chip_select {}, has to be less than 8",
                self.chip_select
            )));
        }
        if self.turnaround_cycles >= 16 {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid turnaround_cycles {}, has to be less than 16",
                self.turnaround_cycles
            )));
        }
        let width = match self.width {
            1 => 0,
            2 => 2 << 8,
            4 => 3 << 8,
            other => {
                return Err(DeviceError::InvalidArgument(format!(
                    "invalid width {other}, has to be 1, 2, or 4"
                )));
            }
        };
        let mut cfg = self.clock_divisor | (self.chip_select << 12) | width;
        if self.cpol {
            cfg |= SPI_CFG_CPOL;
        }
        if self.cpha {
            cfg |= SPI_CFG_CPHA;
        }
        Ok(cfg)
    }
}

/// One SPI controller bank.
///
/// The two banks share a single physical core, so transactions run under
/// the device's shared SPI lock.
pub struct Spi<'a> {
    device: &'a Device,
    config: SpiConfig,
    reg_control: u32,
    reg_num_bytes: u32,
    reg_cfg: u32,
    reg_num_bytes2: u32,
    reg_data_buffer: u32,
}

impl<'a> Spi<'a> {
    pub(crate) fn new(device: &'a Device, spi_address: u32, config: SpiConfig) -> Self {
        Self {
            device,
            config,
            reg_control: spi_address,
            reg_num_bytes: spi_address + 4,
            reg_cfg: spi_address + 8,
            reg_num_bytes2: spi_address + 12,
            reg_data_buffer: spi_address + 16,
        }
    }

    /// Run one transaction with the default bus timeout policy.
    pub fn spi_transaction(
        &self,
        write_command_bytes: &[u8],
        write_data_bytes: &[u8],
        read_byte_count: u32,
    ) -> Result<Vec<u8>> {
        self.spi_transaction_with(
            write_command_bytes,
            write_data_bytes,
            read_byte_count,
            &Timeout::spi(),
        )
    }

    /// Clock out the command then data bytes, then clock in
    /// `read_byte_count` bytes, as one chip-select assertion.
    ///
    /// Returns only the read-phase bytes; the write-phase echo that shares
    /// the data buffer is discarded.
    pub fn spi_transaction_with(
        &self,
        write_command_bytes: &[u8],
        write_data_bytes: &[u8],
        read_byte_count: u32,
        timeout: &Timeout,
    ) -> Result<Vec<u8>> {
        debug!(
            command_byte_count = write_command_bytes.len(),
            data_byte_count = write_data_bytes.len(),
            read_byte_count,
            "spi_transaction"
        );
        let command_byte_count = write_command_bytes.len();
        if command_byte_count >= SPI_MAX_COMMAND_BYTES {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid command length {command_byte_count}, has to be less than {SPI_MAX_COMMAND_BYTES}"
            )));
        }
        let write_byte_count = command_byte_count + write_data_bytes.len();
        let buffer_count = write_byte_count + read_byte_count as usize;
        if buffer_count >= SPI_BUFFER_SIZE {
            return Err(DeviceError::InvalidArgument(format!(
                "spi transaction is {buffer_count} bytes, has to be less than {SPI_BUFFER_SIZE}"
            )));
        }
        let cfg = self.config.encode()?;

        let session = self.device.session();
        let check_sequence = self.device.check_sequence();
        let _bus = self.device.spi_bus_lock().acquire()?;

        let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
        if value & SPI_BUSY != 0 {
            return Err(DeviceError::Protocol(format!(
                "unexpected SPI_BUSY bit set, reg_control={:#x}, control value={value:#x}",
                self.reg_control
            )));
        }

        session.write_uint32_with(self.reg_cfg, cfg, timeout, true, check_sequence)?;

        let mut write_bytes = Vec::with_capacity(write_byte_count);
        write_bytes.extend_from_slice(write_command_bytes);
        write_bytes.extend_from_slice(write_data_bytes);
        for (index, chunk) in write_bytes.chunks(4).enumerate() {
            session.write_uint32_with(
                self.reg_data_buffer + (index as u32) * 4,
                pack_word_le(chunk),
                timeout,
                true,
                check_sequence,
            )?;
        }

        let num_bytes = (write_byte_count as u32) | (read_byte_count << 16);
        session.write_uint32_with(self.reg_num_bytes, num_bytes, timeout, true, check_sequence)?;
        let num_bytes2 = self.config.turnaround_cycles | ((command_byte_count as u32) << 8);
        session.write_uint32_with(self.reg_num_bytes2, num_bytes2, timeout, true, check_sequence)?;

        // START is sent without retry: a lost reply here is ambiguous
        // (the transfer may already be clocking) and re-sending would
        // start a second one.
        let acked = session.write_uint32_with(
            self.reg_control,
            SPI_START,
            timeout,
            false,
            check_sequence,
        )?;
        if !acked {
            return Err(DeviceError::Protocol(
                "no acknowledgement for SPI START".to_string(),
            ));
        }

        loop {
            let value = session.read_uint32_with(self.reg_control, timeout, check_sequence)?;
            trace!(control = format_args!("{value:#x}"), "spi poll");
            if value & SPI_BUSY == 0 {
                break;
            }
            if !timeout.retry_wait() {
                return Err(DeviceError::Timeout("spi_transaction".to_string()));
            }
        }

        // The read phase lands in the buffer right after the written
        // bytes; fetch from the enclosing word boundary and slice out
        // just the read region.
        let start = write_byte_count & !3;
        let mut received = Vec::with_capacity(buffer_count - start + 3);
        for offset in (start..buffer_count).step_by(4) {
            let word =
                session.read_uint32_with(self.reg_data_buffer + offset as u32, timeout, check_sequence)?;
            unpack_word_le(word, &mut received);
        }
        let skip = write_byte_count - start;
        Ok(received[skip..skip + read_byte_count as usize].to_vec())
    }
}
