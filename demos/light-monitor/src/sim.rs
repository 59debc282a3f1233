//! An `OPT3001` emulated on an in-memory I²C bus.

use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
use embedded_hal_async::i2c::I2c;

use sensa_drivers::opt3001::{Configuration, DEVICE_ID, MANUFACTURER_ID, Mode, Register};

// Illuminance cycled through by successive conversions, in lux.
const LUX_PATTERN: [f32; 8] = [3.5, 8.0, 45.0, 320.0, 870.0, 1500.0, 12000.0, 640.0];

// Configuration reads a single-shot conversion takes to complete.
const CONVERSION_POLLS: u8 = 3;

// Power-on default of the configuration register.
const POWER_ON_CONFIG: u16 = 0xC810;

/// Register file of an emulated `OPT3001`.
pub struct SimulatedOpt3001 {
    address: u8,
    pointer: u8,
    config: Configuration,
    result: u16,
    low_limit: u16,
    high_limit: u16,
    step: usize,
    pending_polls: Option<u8>,
}

impl SimulatedOpt3001 {
    /// Creates a sensor answering on the given 7-bit address.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            pointer: 0,
            config: Configuration::from_bits(POWER_ON_CONFIG),
            result: 0,
            low_limit: 0,
            high_limit: 0xBFFF,
            step: 0,
            pending_polls: None,
        }
    }

    fn convert(&mut self) {
        self.result = encode(LUX_PATTERN[self.step % LUX_PATTERN.len()]);
        self.step += 1;
    }

    fn write_register(&mut self, register: u8, value: u16) -> Result<(), ErrorKind> {
        match register {
            r if r == Register::Configuration as u8 => {
                // Flags are read-only.
                let config = Configuration::from_bits((value & 0xFE00) | (value & 0x001F));
                self.pending_polls = (config.mode() == Mode::SingleShot).then_some(CONVERSION_POLLS);
                self.config = config;
            }
            r if r == Register::LowLimit as u8 => self.low_limit = value,
            r if r == Register::HighLimit as u8 => self.high_limit = value,
            _ => return Err(ErrorKind::Other),
        }

        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u16, ErrorKind> {
        let value = match register {
            r if r == Register::Result as u8 => {
                if self.config.mode() == Mode::Continuous {
                    self.convert();
                }
                // Reading the result clears the conversion-ready flag.
                self.config = Configuration::from_bits(self.config.bits() & !0x0080);
                self.result
            }
            r if r == Register::Configuration as u8 => {
                if let Some(polls) = self.pending_polls {
                    if polls <= 1 {
                        self.convert();
                        self.pending_polls = None;
                        self.config = self.config.with_mode(Mode::Shutdown);
                        self.config = Configuration::from_bits(self.config.bits() | 0x0080);
                    } else {
                        self.pending_polls = Some(polls - 1);
                    }
                }
                self.config.bits()
            }
            r if r == Register::LowLimit as u8 => self.low_limit,
            r if r == Register::HighLimit as u8 => self.high_limit,
            r if r == Register::ManufacturerId as u8 => MANUFACTURER_ID,
            r if r == Register::DeviceId as u8 => DEVICE_ID,
            _ => return Err(ErrorKind::Other),
        };

        Ok(value)
    }
}

impl ErrorType for SimulatedOpt3001 {
    type Error = ErrorKind;
}

impl I2c<u8> for SimulatedOpt3001 {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations {
            match operation {
                Operation::Write([register]) => self.pointer = *register,
                Operation::Write([register, high, low]) => {
                    self.pointer = *register;
                    self.write_register(*register, u16::from_be_bytes([*high, *low]))?;
                }
                Operation::Write(_) => return Err(ErrorKind::Other),
                Operation::Read(buf) if buf.len() == 2 => {
                    let value = self.read_register(self.pointer)?;
                    buf.copy_from_slice(&value.to_be_bytes());
                }
                Operation::Read(_) => return Err(ErrorKind::Other),
            }
        }

        Ok(())
    }
}

/// Encodes an illuminance into a result register value, choosing the
/// smallest exponent whose mantissa fits in 12 bits.
pub fn encode(lux: f32) -> u16 {
    let mut exponent = 0u16;
    let mut mantissa = (lux / 0.01).round();
    while mantissa > 4095.0 && exponent < 11 {
        exponent += 1;
        mantissa = (lux / (0.01 * f32::from(1u16 << exponent))).round();
    }

    (exponent << 12) | (mantissa.clamp(0.0, 4095.0) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    use sensa_drivers::opt3001::decode;

    async fn read(sensor: &mut SimulatedOpt3001, register: Register) -> u16 {
        let mut buf = [0; 2];
        sensor
            .write_read(0x44, &[register as u8], &mut buf)
            .await
            .unwrap();
        u16::from_be_bytes(buf)
    }

    #[test]
    fn test_encode_keeps_resolution() {
        assert_eq!(encode(5.0), 0x01F4);
        assert_eq!(encode(80.0), 0x1FA0);
        assert!((decode(encode(12000.0)) - 12000.0).abs() < 3.0);
    }

    #[tokio::test]
    async fn test_single_shot_conversion_completes() {
        let mut sensor = SimulatedOpt3001::new(0x44);
        sensor.write(0x44, &[0x01, 0xCA, 0x00]).await.unwrap();

        let mut config = 0;
        for _ in 0..CONVERSION_POLLS {
            config = read(&mut sensor, Register::Configuration).await;
        }
        let config = Configuration::from_bits(config);
        assert!(config.conversion_ready());
        assert_eq!(config.mode(), Mode::Shutdown);

        assert_eq!(read(&mut sensor, Register::Result).await, encode(3.5));
        let config = Configuration::from_bits(read(&mut sensor, Register::Configuration).await);
        assert!(!config.conversion_ready());
    }

    #[tokio::test]
    async fn test_wrong_address_is_not_acknowledged() {
        let mut sensor = SimulatedOpt3001::new(0x44);

        assert_eq!(
            sensor.write(0x45, &[0x00]).await,
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        );
    }
}
