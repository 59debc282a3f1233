//! # Register Access Protocol
//!
//! Logical register operations for devices that expose 8-bit register
//! pointers and 16-bit big-endian registers over I²C.
//!
//! Every operation is executed while holding the device [`Arbiter`] for the
//! whole logical transaction:
//!
//! - a register write is a single bus write of `[register, high, low]`;
//! - a register read is a bus write of `[register]` followed by a bus read of
//!   two bytes, and nothing can be interleaved between the two phases.
//!
//! The arbiter wait is bounded by the timeout given at construction.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use embassy_time::Duration;

use embedded_hal_async::i2c::I2c;

use log::error;

use crate::arbiter::{AcquireTimeout, Arbiter, ArbiterGuard, DEFAULT_ACQUIRE_TIMEOUT_MS};

/// Errors returned by a register transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError<E> {
    /// The arbiter could not be acquired in time. No bus traffic happened.
    Timeout,
    /// The underlying bus transport failed.
    Bus(E),
}

impl<E> From<AcquireTimeout> for AccessError<E> {
    fn from(_: AcquireTimeout) -> Self {
        Self::Timeout
    }
}

impl<E: fmt::Debug> fmt::Display for AccessError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for the bus arbiter"),
            Self::Bus(e) => write!(f, "bus error: {e:?}"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for AccessError<E> {}

/// A register-addressed device on an arbitrated I²C bus.
pub struct RegisterDevice<M, I2C>
where
    M: RawMutex,
{
    arbiter: Arbiter<M, I2C>,
    address: u8,
    timeout: Duration,
}

impl<M, I2C, E> RegisterDevice<M, I2C>
where
    M: RawMutex,
    I2C: I2c<u8, Error = E>,
{
    /// Creates a [`RegisterDevice`] with the default arbiter timeout.
    #[must_use]
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self::with_timeout(i2c, address, Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS))
    }

    /// Creates a [`RegisterDevice`] with a custom arbiter timeout.
    #[must_use]
    pub fn with_timeout(i2c: I2C, address: u8, timeout: Duration) -> Self {
        Self {
            arbiter: Arbiter::new(i2c),
            address,
            timeout,
        }
    }

    /// Returns the 7-bit device address.
    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Returns the maximum arbiter wait of every transaction.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the arbiter guarding the transport.
    #[inline]
    pub fn arbiter(&self) -> &Arbiter<M, I2C> {
        &self.arbiter
    }

    /// Writes a 16-bit value into a register.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Timeout`] if the arbiter is not acquired in
    /// time, or [`AccessError::Bus`] if the bus write fails.
    pub async fn write_register(&self, register: u8, value: u16) -> Result<(), AccessError<E>> {
        let mut bus = self.arbiter.acquire(self.timeout).await?;
        self.write_locked(&mut bus, register, value).await
    }

    /// Reads a 16-bit value from a register.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Timeout`] if the arbiter is not acquired in
    /// time, or [`AccessError::Bus`] if either bus phase fails.
    pub async fn read_register(&self, register: u8) -> Result<u16, AccessError<E>> {
        let mut bus = self.arbiter.acquire(self.timeout).await?;
        self.read_locked(&mut bus, register).await
    }

    /// Reads a register, transforms its value and writes the result back,
    /// without releasing the arbiter in between.
    ///
    /// Returns the value that has been written.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Timeout`] if the arbiter is not acquired in
    /// time, or [`AccessError::Bus`] if any bus phase fails. Nothing is
    /// written when the read fails.
    pub async fn update_register<F>(&self, register: u8, f: F) -> Result<u16, AccessError<E>>
    where
        F: FnOnce(u16) -> u16,
    {
        let mut bus = self.arbiter.acquire(self.timeout).await?;
        let value = f(self.read_locked(&mut bus, register).await?);
        self.write_locked(&mut bus, register, value).await?;

        Ok(value)
    }

    /// Consumes the device and returns the bus transport.
    #[inline]
    pub fn release(self) -> I2C {
        self.arbiter.into_inner()
    }

    async fn write_locked(
        &self,
        bus: &mut ArbiterGuard<'_, M, I2C>,
        register: u8,
        value: u16,
    ) -> Result<(), AccessError<E>> {
        let [high, low] = value.to_be_bytes();

        bus.write(self.address, &[register, high, low])
            .await
            .map_err(|e| {
                error!("I2C write to register {register:#04x} failed");
                AccessError::Bus(e)
            })
    }

    async fn read_locked(
        &self,
        bus: &mut ArbiterGuard<'_, M, I2C>,
        register: u8,
    ) -> Result<u16, AccessError<E>> {
        // Select the register pointer first, then read its content.
        bus.write(self.address, &[register]).await.map_err(|e| {
            error!("I2C write of register pointer {register:#04x} failed");
            AccessError::Bus(e)
        })?;

        let mut buf = [0u8; 2];
        bus.read(self.address, &mut buf).await.map_err(|e| {
            error!("I2C read of register {register:#04x} failed");
            AccessError::Bus(e)
        })?;

        Ok(u16::from_be_bytes(buf))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    extern crate std;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::vec;
    use std::vec::Vec;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    const ADDRESS: u8 = 0x44;

    /// A single phase observed on the simulated bus.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Phase {
        Write(Vec<u8>),
        Read(usize),
    }

    /// A simulated register file that echoes writes back on reads.
    ///
    /// Every bus phase yields to the executor, so concurrent callers get the
    /// chance to interleave if the arbiter lets them.
    #[derive(Clone)]
    pub(crate) struct EchoBus {
        registers: Arc<StdMutex<[u16; 256]>>,
        pointer: Arc<StdMutex<u8>>,
        pub(crate) log: Arc<StdMutex<Vec<Phase>>>,
    }

    impl EchoBus {
        pub(crate) fn new() -> Self {
            Self {
                registers: Arc::new(StdMutex::new([0; 256])),
                pointer: Arc::new(StdMutex::new(0)),
                log: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        pub(crate) fn set(&self, register: u8, value: u16) {
            self.registers.lock().unwrap()[usize::from(register)] = value;
        }

        pub(crate) fn phases(&self) -> Vec<Phase> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ErrorType for EchoBus {
        type Error = ErrorKind;
    }

    impl I2c<u8> for EchoBus {
        async fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => {
                        self.log.lock().unwrap().push(Phase::Write(bytes.to_vec()));
                        match *bytes {
                            [register] => *self.pointer.lock().unwrap() = *register,
                            [register, high, low] => {
                                self.set(*register, u16::from_be_bytes([*high, *low]));
                            }
                            _ => return Err(ErrorKind::Other),
                        }
                    }
                    Operation::Read(buf) => {
                        self.log.lock().unwrap().push(Phase::Read(buf.len()));
                        let register = *self.pointer.lock().unwrap();
                        let value = self.registers.lock().unwrap()[usize::from(register)];
                        buf.copy_from_slice(&value.to_be_bytes());
                    }
                }
                tokio::task::yield_now().await;
            }

            Ok(())
        }
    }

    /// Checks that the bus only saw complete transactions.
    pub(crate) fn assert_no_interleaving(phases: &[Phase]) {
        let mut iter = phases.iter();
        while let Some(phase) = iter.next() {
            match phase {
                Phase::Write(bytes) if bytes.len() == 3 => {}
                Phase::Write(bytes) if bytes.len() == 1 => {
                    assert_eq!(iter.next(), Some(&Phase::Read(2)), "split register read");
                }
                other => panic!("unexpected bus phase {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_write_register_frame() {
        let expectations = [I2cTransaction::write(ADDRESS, vec![0x01, 0xCC, 0x10])];

        let i2c = I2cMock::new(&expectations);
        let device = RegisterDevice::<NoopRawMutex, _>::new(i2c, ADDRESS);

        device.write_register(0x01, 0xCC10).await.unwrap();

        device.release().done();
    }

    #[tokio::test]
    async fn test_read_register_big_endian() {
        let expectations = [
            I2cTransaction::write(ADDRESS, vec![0x7E]),
            I2cTransaction::read(ADDRESS, vec![0x54, 0x49]),
        ];

        let i2c = I2cMock::new(&expectations);
        let device = RegisterDevice::<NoopRawMutex, _>::new(i2c, ADDRESS);

        assert_eq!(device.read_register(0x7E).await.unwrap(), 0x5449);

        device.release().done();
    }

    #[tokio::test]
    async fn test_read_register_pointer_failure_skips_read() {
        let expectations =
            [I2cTransaction::write(ADDRESS, vec![0x00]).with_error(ErrorKind::Other)];

        let i2c = I2cMock::new(&expectations);
        let device = RegisterDevice::<NoopRawMutex, _>::new(i2c, ADDRESS);

        let result = device.read_register(0x00).await;
        assert_eq!(result, Err(AccessError::Bus(ErrorKind::Other)));

        // The arbiter has been released despite the failure.
        assert!(device.arbiter().try_acquire().is_some());

        device.release().done();
    }

    #[tokio::test]
    async fn test_write_register_failure_releases_arbiter() {
        let expectations = [
            I2cTransaction::write(ADDRESS, vec![0x02, 0x12, 0x34]).with_error(ErrorKind::Other)
        ];

        let i2c = I2cMock::new(&expectations);
        let device = RegisterDevice::<NoopRawMutex, _>::new(i2c, ADDRESS);

        let result = device.write_register(0x02, 0x1234).await;
        assert_eq!(result, Err(AccessError::Bus(ErrorKind::Other)));
        assert!(device.arbiter().try_acquire().is_some());

        device.release().done();
    }

    #[tokio::test]
    async fn test_update_register_single_hold() {
        let expectations = [
            I2cTransaction::write(ADDRESS, vec![0x01]),
            I2cTransaction::read(ADDRESS, vec![0xC4, 0x10]),
            I2cTransaction::write(ADDRESS, vec![0x01, 0xC6, 0x10]),
        ];

        let i2c = I2cMock::new(&expectations);
        let device = RegisterDevice::<NoopRawMutex, _>::new(i2c, ADDRESS);

        let written = device
            .update_register(0x01, |value| value | 0x0200)
            .await
            .unwrap();
        assert_eq!(written, 0xC610);

        device.release().done();
    }

    #[tokio::test]
    async fn test_held_arbiter_times_out_without_traffic() {
        let i2c = I2cMock::new(&[]);
        let device =
            RegisterDevice::<NoopRawMutex, _>::with_timeout(i2c, ADDRESS, Duration::from_millis(20));

        let guard = device.arbiter().try_acquire().unwrap();
        assert_eq!(
            device.write_register(0x02, 0xFFFF).await,
            Err(AccessError::Timeout)
        );
        assert_eq!(device.read_register(0x02).await, Err(AccessError::Timeout));
        drop(guard);

        device.release().done();
    }

    #[tokio::test]
    async fn test_round_trip_on_echo_bus() {
        let bus = EchoBus::new();
        let device = RegisterDevice::<NoopRawMutex, _>::new(bus.clone(), ADDRESS);

        for (register, value) in [(0x01, 0xCC10), (0x02, 0x0000), (0x03, 0xBFFF)] {
            device.write_register(register, value).await.unwrap();
            assert_eq!(device.read_register(register).await.unwrap(), value);
        }

        assert_no_interleaving(&bus.phases());
    }

    #[tokio::test]
    async fn test_concurrent_callers_do_not_interleave() {
        let bus = EchoBus::new();
        let device = RegisterDevice::<NoopRawMutex, _>::new(bus.clone(), ADDRESS);

        let caller = |register: u8, seed: u16| {
            let device = &device;
            async move {
                for i in 0..8u16 {
                    let value = seed.wrapping_add(i);
                    device.write_register(register, value).await.unwrap();
                    assert_eq!(device.read_register(register).await.unwrap(), value);
                }
            }
        };

        let ((), (), (), ()) = tokio::join!(
            caller(0x01, 0x1000),
            caller(0x02, 0x2000),
            caller(0x03, 0x3000),
            caller(0x10, 0x4000),
        );

        let phases = bus.phases();
        // Four callers, eight iterations, one write plus a two-phase read each.
        assert_eq!(phases.len(), 4 * 8 * 3);
        assert_no_interleaving(&phases);
    }
}
