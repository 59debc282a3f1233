//! # OPT3001 Driver
//!
//! This module provides an asynchronous, architecture-agnostic driver for the
//! `OPT3001` ambient light sensor, reading light intensity in lux over I²C.
//!
//! The driver is safe to share between tasks: every register transaction
//! goes through the [`Arbiter`](crate::arbiter::Arbiter) owned by the device,
//! so two tasks can read results, change the configuration and poll for
//! conversions at the same time without their bus phases interleaving.
//!
//! A device goes through the following states:
//!
//! ```text
//! Uninitialized --init--> Idle --configure_*--> Continuous | SingleShot
//!       ^                                                  |
//!       +--------------------------deinit------------------+
//! ```
//!
//! For detailed information and specifications, see the
//! [datasheet](https://www.ti.com/lit/ds/symlink/opt3001.pdf).

/// Configuration register bit-packing.
pub mod config;

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

use embassy_time::Duration;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use log::{error, info};

use crate::register::{AccessError, RegisterDevice};

pub use config::{Configuration, ConversionTime, Mode, RANGE_AUTOMATIC};

/// Expected content of the manufacturer-id register ("TI").
pub const MANUFACTURER_ID: u16 = 0x5449;
/// Expected content of the device-id register.
pub const DEVICE_ID: u16 = 0x3001;

/// Interval between two polls of the conversion-ready flag, in milliseconds.
pub const POLL_INTERVAL_MS: u32 = 10;

/// Errors that may occur while interacting with the `OPT3001` sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt3001Error<E> {
    /// The device handle is misconfigured.
    InvalidArgument,
    /// I²C bus error.
    Bus(E),
    /// The bus arbiter or a conversion did not become available in time.
    Timeout,
    /// The device has not been initialized, or has been torn down.
    NotInitialized,
    /// The identification registers do not describe an `OPT3001`.
    NotFound {
        /// Content of the manufacturer-id register.
        manufacturer_id: u16,
        /// Content of the device-id register.
        device_id: u16,
    },
}

impl<E> From<AccessError<E>> for Opt3001Error<E> {
    fn from(e: AccessError<E>) -> Self {
        match e {
            AccessError::Timeout => Self::Timeout,
            AccessError::Bus(e) => Self::Bus(e),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Opt3001Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid device configuration"),
            Self::Bus(e) => write!(f, "bus error: {e:?}"),
            Self::Timeout => f.write_str("timeout"),
            Self::NotInitialized => f.write_str("device not initialized"),
            Self::NotFound {
                manufacturer_id,
                device_id,
            } => write!(
                f,
                "unexpected device (manufacturer {manufacturer_id:#06x}, device {device_id:#06x})"
            ),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for Opt3001Error<E> {}

/// I²C address of the `OPT3001` sensor.
///
/// The sensor supports four addresses depending on where the ADDR pin is
/// connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// `0x44` when ADDR is connected to GND.
    Gnd = 0x44,
    /// `0x45` when ADDR is connected to VDD.
    Vdd = 0x45,
    /// `0x46` when ADDR is connected to SDA.
    Sda = 0x46,
    /// `0x47` when ADDR is connected to SCL.
    Scl = 0x47,
}

/// `OPT3001` registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Result of the last conversion.
    Result = 0x00,
    /// Configuration.
    Configuration = 0x01,
    /// Low limit of the interrupt window.
    LowLimit = 0x02,
    /// High limit of the interrupt window.
    HighLimit = 0x03,
    /// Manufacturer identifier.
    ManufacturerId = 0x7E,
    /// Device identifier.
    DeviceId = 0x7F,
}

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not initialized, or torn down.
    Uninitialized,
    /// Initialized, configuration not written yet.
    Idle,
    /// Configured for continuous conversions.
    Continuous,
    /// Configured for single-shot conversions.
    SingleShot,
}

/// A result or limit register value: a 4-bit exponent followed by a 12-bit
/// mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawResult(u16);

impl RawResult {
    /// Creates a [`RawResult`] from the raw register value.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Creates a [`RawResult`] from its exponent and mantissa.
    ///
    /// The exponent is truncated to 4 bits and the mantissa to 12 bits.
    #[must_use]
    pub const fn new(exponent: u8, mantissa: u16) -> Self {
        Self((((exponent & 0x0F) as u16) << 12) | (mantissa & 0x0FFF))
    }

    /// Returns the raw register value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// The high nibble.
    #[must_use]
    pub const fn exponent(self) -> u8 {
        ((self.0 >> 12) & 0x0F) as u8
    }

    /// The low 12 bits.
    #[must_use]
    pub const fn mantissa(self) -> u16 {
        self.0 & 0x0FFF
    }

    /// Converts the value to lux.
    #[must_use]
    pub fn lux(self) -> f32 {
        decode(self.0)
    }
}

/// A light measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Illuminance in lux.
    pub lux: f32,
    /// Register value the illuminance was computed from.
    pub raw: RawResult,
}

impl Reading {
    /// Builds a [`Reading`] from a raw register value.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self {
            lux: decode(raw),
            raw: RawResult::from_bits(raw),
        }
    }
}

/// Converts a result or limit register value to lux.
///
/// `lux = 0.01 × 2^exponent × mantissa`.
///
/// The datasheet only defines exponents up to 11, but larger ones are not
/// rejected: they simply produce values outside the sensor range.
#[must_use]
pub fn decode(raw: u16) -> f32 {
    let exponent = (raw >> 12) & 0x0F;
    let mantissa = raw & 0x0FFF;

    0.01 * f32::from(1u16 << exponent) * f32::from(mantissa)
}

/// `OPT3001` driver.
pub struct Opt3001<M, I2C>
where
    M: RawMutex,
{
    device: RegisterDevice<M, I2C>,
    state: BlockingMutex<M, Cell<State>>,
}

impl<M, I2C, E> Opt3001<M, I2C>
where
    M: RawMutex,
    I2C: I2c<u8, Error = E>,
{
    /// Creates an uninitialized [`Opt3001`] driver with the default bus
    /// arbiter timeout.
    #[must_use]
    pub fn new(i2c: I2C, address: Address) -> Self {
        Self::with_device(RegisterDevice::new(i2c, address as u8))
    }

    /// Creates an uninitialized [`Opt3001`] driver waiting at most
    /// `bus_timeout` for the bus arbiter on every transaction.
    #[must_use]
    pub fn with_bus_timeout(i2c: I2C, address: Address, bus_timeout: Duration) -> Self {
        Self::with_device(RegisterDevice::with_timeout(
            i2c,
            address as u8,
            bus_timeout,
        ))
    }

    /// Creates an uninitialized [`Opt3001`] driver on top of an existing
    /// register device.
    ///
    /// The address and timeout of the register device are only validated by
    /// [`Self::init`].
    #[must_use]
    pub fn with_device(device: RegisterDevice<M, I2C>) -> Self {
        Self {
            device,
            state: BlockingMutex::new(Cell::new(State::Uninitialized)),
        }
    }

    /// Returns the current driver state.
    pub fn state(&self) -> State {
        self.state.lock(Cell::get)
    }

    /// Initializes the device.
    ///
    /// Validates the handle and checks the identification registers. On
    /// failure the driver stays uninitialized and `init` can be called again.
    ///
    /// Calling `init` on an initialized device starts over: the driver is
    /// uninitialized until the identification succeeds, then `Idle`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - [`Opt3001Error::InvalidArgument`] if the address is not a valid
    ///   7-bit address or the bus timeout is zero.
    /// - [`Opt3001Error::NotFound`] if the identification registers do not
    ///   match an `OPT3001`.
    /// - A bus or timeout error if an identification read fails.
    pub async fn init(&mut self) -> Result<(), Opt3001Error<E>> {
        if !is_valid_address(self.device.address()) || self.device.timeout().as_ticks() == 0 {
            return Err(Opt3001Error::InvalidArgument);
        }

        self.state.get_mut().set(State::Uninitialized);

        let manufacturer_id = self
            .read(Register::ManufacturerId)
            .await
            .inspect_err(|_| error!("Failed to read manufacturer ID"))?;

        let device_id = self
            .read(Register::DeviceId)
            .await
            .inspect_err(|_| error!("Failed to read device ID"))?;

        if manufacturer_id != MANUFACTURER_ID || device_id != DEVICE_ID {
            error!(
                "Unexpected device at {:#04x}: manufacturer {manufacturer_id:#06x}, device {device_id:#06x}",
                self.device.address()
            );
            return Err(Opt3001Error::NotFound {
                manufacturer_id,
                device_id,
            });
        }

        self.state.get_mut().set(State::Idle);

        info!("OPT3001 initialized successfully");
        info!("Manufacturer ID: {manufacturer_id:#06X}");
        info!("Device ID: {device_id:#06X}");

        Ok(())
    }

    /// Tears the device down.
    ///
    /// The exclusive borrow guarantees that no transaction is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Opt3001Error::NotInitialized`] if the device is not
    /// initialized.
    pub fn deinit(&mut self) -> Result<(), Opt3001Error<E>> {
        let state = self.state.get_mut();
        if state.get() == State::Uninitialized {
            return Err(Opt3001Error::NotInitialized);
        }
        state.set(State::Uninitialized);

        Ok(())
    }

    /// Consumes the driver and returns the I²C bus.
    pub fn release(self) -> I2C {
        self.device.release()
    }

    /// Reads the manufacturer identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn manufacturer_id(&self) -> Result<u16, Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.read(Register::ManufacturerId).await
    }

    /// Reads the device identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn device_id(&self) -> Result<u16, Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.read(Register::DeviceId).await
    }

    /// Reads the configuration register.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn read_config(&self) -> Result<Configuration, Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.read(Register::Configuration)
            .await
            .map(Configuration::from_bits)
    }

    /// Writes the configuration register.
    ///
    /// The driver state follows the written mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// write fails.
    pub async fn write_config(&self, config: Configuration) -> Result<(), Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.write(Register::Configuration, config.bits()).await?;
        self.follow_mode(config.mode());

        Ok(())
    }

    /// Configures continuous conversions with an 800 ms conversion time and
    /// automatic full-scale range.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// write fails.
    pub async fn configure_continuous(&self) -> Result<(), Opt3001Error<E>> {
        self.write_config(Configuration::continuous()).await
    }

    /// Configures single-shot conversions with an 800 ms conversion time and
    /// automatic full-scale range.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// write fails.
    pub async fn configure_single_shot(&self) -> Result<(), Opt3001Error<E>> {
        self.write_config(Configuration::single_shot()).await
    }

    /// Starts a single conversion.
    ///
    /// Only the mode bits of the configuration register are changed; range,
    /// conversion time and the interrupt settings are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or a register
    /// transaction fails.
    pub async fn start_single_measurement(&self) -> Result<(), Opt3001Error<E>> {
        self.ensure_initialized()?;
        let _ = self
            .device
            .update_register(Register::Configuration as u8, |bits| {
                Configuration::from_bits(bits)
                    .with_mode(Mode::SingleShot)
                    .bits()
            })
            .await?;
        self.follow_mode(Mode::SingleShot);

        Ok(())
    }

    /// Polls the conversion-ready flag every [`POLL_INTERVAL_MS`] until it is
    /// set or `timeout` has elapsed.
    ///
    /// Elapsed time is counted in poll intervals, so the flag is checked at
    /// `0, 10, 20, …` milliseconds while that count is below `timeout`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - [`Opt3001Error::Timeout`] if the flag is not set in time.
    /// - The error of the first failing configuration read.
    pub async fn wait_for_conversion<D>(
        &self,
        delay: &mut D,
        timeout: Duration,
    ) -> Result<(), Opt3001Error<E>>
    where
        D: DelayNs,
    {
        self.ensure_initialized()?;

        // Counted in ticks so that no timeout can overflow the counter.
        let interval = Duration::from_millis(u64::from(POLL_INTERVAL_MS)).as_ticks();
        let mut elapsed = 0u64;
        while elapsed < timeout.as_ticks() {
            if self.read_config().await?.conversion_ready() {
                return Ok(());
            }
            delay.delay_ms(POLL_INTERVAL_MS).await;
            elapsed = elapsed.saturating_add(interval);
        }

        Err(Opt3001Error::Timeout)
    }

    /// Reads the last conversion result.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn read_result(&self) -> Result<Reading, Opt3001Error<E>> {
        self.read_reading(Register::Result).await
    }

    /// Reads the low limit of the interrupt window.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn read_low_limit(&self) -> Result<Reading, Opt3001Error<E>> {
        self.read_reading(Register::LowLimit).await
    }

    /// Reads the high limit of the interrupt window.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// read fails.
    pub async fn read_high_limit(&self) -> Result<Reading, Opt3001Error<E>> {
        self.read_reading(Register::HighLimit).await
    }

    /// Writes the low limit of the interrupt window.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// write fails.
    pub async fn write_low_limit(&self, limit: RawResult) -> Result<(), Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.write(Register::LowLimit, limit.bits()).await
    }

    /// Writes the high limit of the interrupt window.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not initialized or the register
    /// write fails.
    pub async fn write_high_limit(&self, limit: RawResult) -> Result<(), Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.write(Register::HighLimit, limit.bits()).await
    }

    async fn read_reading(&self, register: Register) -> Result<Reading, Opt3001Error<E>> {
        self.ensure_initialized()?;
        self.read(register).await.map(Reading::from_raw)
    }

    #[inline]
    async fn read(&self, register: Register) -> Result<u16, Opt3001Error<E>> {
        Ok(self.device.read_register(register as u8).await?)
    }

    #[inline]
    async fn write(&self, register: Register, value: u16) -> Result<(), Opt3001Error<E>> {
        Ok(self.device.write_register(register as u8, value).await?)
    }

    #[inline]
    fn ensure_initialized(&self) -> Result<(), Opt3001Error<E>> {
        if self.state() == State::Uninitialized {
            Err(Opt3001Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn follow_mode(&self, mode: Mode) {
        self.state.lock(|state| {
            // A concurrent deinit cannot happen: it needs exclusive access.
            state.set(match mode {
                Mode::Shutdown => State::Idle,
                Mode::SingleShot => State::SingleShot,
                Mode::Continuous => State::Continuous,
            });
        });
    }
}

// 7-bit addresses outside the ranges reserved by the I²C specification.
#[inline]
const fn is_valid_address(address: u8) -> bool {
    matches!(address, 0x08..=0x77)
}
