use tracing::debug;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::regmap::{
    GPIO_DIRECTION_BASE_REGISTER, GPIO_OUTPUT_BASE_REGISTER, GPIO_REGISTER_ADDRESS_OFFSET,
    GPIO_STATUS_BASE_REGISTER, HOLOLINK_LITE_BOARD_ID, HOLOLINK_NANO_BOARD_ID,
    MICROCHIP_POLARFIRE_BOARD_ID,
};

/// Upper bound on addressable pins across all boards.
const GPIO_PIN_RANGE: u32 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    fn from_bit(bit: u32) -> Self {
        if bit == 0 {
            Direction::Out
        } else {
            Direction::In
        }
    }
}

fn pin_count_for_board(board_id: u32) -> Result<u32> {
    match board_id {
        HOLOLINK_LITE_BOARD_ID => Ok(16),
        HOLOLINK_NANO_BOARD_ID => Ok(54),
        MICROCHIP_POLARFIRE_BOARD_ID => Err(DeviceError::UnsupportedDevice(
            "GPIO is not supported on this board".to_string(),
        )),
        other => Err(DeviceError::UnsupportedDevice(format!(
            "unknown board id {other:#x}"
        ))),
    }
}

/// GPIO controller over the three register banks.
///
/// Each bank is one word per 32 pins; pin N lives at bit N%32 of word
/// N/32.
pub struct Gpio<'a> {
    device: &'a Device,
    pin_count: u32,
}

impl<'a> Gpio<'a> {
    pub(crate) fn new(device: &'a Device, board_id: u32) -> Result<Self> {
        let pin_count = pin_count_for_board(board_id)?;
        debug_assert!(pin_count <= GPIO_PIN_RANGE);
        Ok(Self { device, pin_count })
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    fn check_pin(&self, pin: u32) -> Result<()> {
        if pin >= self.pin_count {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid pin {pin}, has to be less than {}",
                self.pin_count
            )));
        }
        Ok(())
    }

    fn bank_register(base: u32, pin: u32) -> u32 {
        base + (pin / 32) * GPIO_REGISTER_ADDRESS_OFFSET
    }

    fn bit(pin: u32) -> u32 {
        1 << (pin % 32)
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        self.check_pin(pin)?;
        debug!(pin, ?direction, "set_direction");
        let register = Self::bank_register(GPIO_DIRECTION_BASE_REGISTER, pin);
        let value = self.device.read_uint32(register)?;
        let updated = match direction {
            Direction::Out => value & !Self::bit(pin),
            Direction::In => value | Self::bit(pin),
        };
        self.device.write_uint32(register, updated)?;
        Ok(())
    }

    pub fn get_direction(&self, pin: u32) -> Result<Direction> {
        self.check_pin(pin)?;
        let register = Self::bank_register(GPIO_DIRECTION_BASE_REGISTER, pin);
        let value = self.device.read_uint32(register)?;
        Ok(Direction::from_bit((value >> (pin % 32)) & 1))
    }

    /// Drive an output pin. The pin must be configured as an output.
    ///
    /// Current pin levels are read from the STATUS bank since OUTPUT is
    /// write-only.
    pub fn set_value(&self, pin: u32, value: bool) -> Result<()> {
        self.check_pin(pin)?;
        if self.get_direction(pin)? != Direction::Out {
            return Err(DeviceError::InvalidState(format!(
                "pin {pin} is not configured as an output"
            )));
        }
        debug!(pin, value, "set_value");
        let status = self
            .device
            .read_uint32(Self::bank_register(GPIO_STATUS_BASE_REGISTER, pin))?;
        let updated = if value {
            status | Self::bit(pin)
        } else {
            status & !Self::bit(pin)
        };
        self.device
            .write_uint32(Self::bank_register(GPIO_OUTPUT_BASE_REGISTER, pin), updated)?;
        Ok(())
    }

    /// Read the current level of a pin, input or output.
    pub fn get_value(&self, pin: u32) -> Result<bool> {
        self.check_pin(pin)?;
        let status = self
            .device
            .read_uint32(Self::bank_register(GPIO_STATUS_BASE_REGISTER, pin))?;
        Ok(status & Self::bit(pin) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_bit_mapping() {
        assert_eq!(Direction::from_bit(0), Direction::Out);
        assert_eq!(Direction::from_bit(1), Direction::In);
    }

    #[test]
    fn bank_registers_stride_by_word() {
        assert_eq!(
            Gpio::bank_register(GPIO_DIRECTION_BASE_REGISTER, 0),
            GPIO_DIRECTION_BASE_REGISTER
        );
        assert_eq!(
            Gpio::bank_register(GPIO_DIRECTION_BASE_REGISTER, 31),
            GPIO_DIRECTION_BASE_REGISTER
        );
        assert_eq!(
            Gpio::bank_register(GPIO_DIRECTION_BASE_REGISTER, 32),
            GPIO_DIRECTION_BASE_REGISTER + 4
        );
        assert_eq!(Gpio::bit(33), 2);
    }

    #[test]
    fn pin_counts_per_board() {
        assert_eq!(pin_count_for_board(HOLOLINK_LITE_BOARD_ID).ok(), Some(16));
        assert_eq!(pin_count_for_board(HOLOLINK_NANO_BOARD_ID).ok(), Some(54));
        assert!(matches!(
            pin_count_for_board(MICROCHIP_POLARFIRE_BOARD_ID),
            Err(DeviceError::UnsupportedDevice(_))
        ));
        assert!(matches!(
            pin_count_for_board(0x77),
            Err(DeviceError::UnsupportedDevice(_))
        ));
    }
}
