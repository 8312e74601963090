//! Fixed register map of the FPGA family. Word-aligned throughout.

// SPI controller banks
pub const CLNX_SPI_CTRL: u32 = 0x0300_0000;
pub const CPNX_SPI_CTRL: u32 = 0x0300_0200;
// I2C controller banks
pub const BL_I2C_CTRL: u32 = 0x0400_0000;
pub const CAM_I2C_CTRL: u32 = 0x0400_0200;

// Identity and PTP registers
pub const FPGA_VERSION: u32 = 0x80;
pub const FPGA_DATE: u32 = 0x84;
pub const FPGA_PTP_SYNC_TS_0: u32 = 0x180;

// I2C control register bits
pub const I2C_START: u32 = 0b0000_0000_0000_0001;
pub const I2C_CORE_EN: u32 = 0b0000_0000_0000_0010;
pub const I2C_DONE_CLEAR: u32 = 0b0000_0000_0001_0000;
pub const I2C_BUSY: u32 = 0b0000_0001_0000_0000;
pub const I2C_DONE: u32 = 0b0001_0000_0000_0000;

// SPI control register bits
pub const SPI_START: u32 = 0b0000_0000_0000_0001;
pub const SPI_BUSY: u32 = 0b0000_0001_0000_0000;
// SPI configuration register bits
pub const SPI_CFG_CPOL: u32 = 0b0000_0000_0001_0000;
pub const SPI_CFG_CPHA: u32 = 0b0000_0000_0010_0000;

// GPIO register banks: one word per 32 pins, three parallel banks.
// OUTPUT is write-only (current values read back via STATUS), DIRECTION is
// read/write, STATUS is read-only.
pub const GPIO_OUTPUT_BASE_REGISTER: u32 = 0x0000_000C;
pub const GPIO_DIRECTION_BASE_REGISTER: u32 = 0x0000_002C;
pub const GPIO_STATUS_BASE_REGISTER: u32 = 0x0000_008C;
pub const GPIO_REGISTER_ADDRESS_OFFSET: u32 = 0x0000_0004;

// Board IDs reported in enumeration metadata
pub const HOLOLINK_LITE_BOARD_ID: u32 = 2;
pub const HOLOLINK_100G_BOARD_ID: u32 = 3;
pub const MICROCHIP_POLARFIRE_BOARD_ID: u32 = 4;
pub const HOLOLINK_NANO_BOARD_ID: u32 = 5;
