//! # Reading pipeline
//!
//! A reader task samples an [`Opt3001`] and pushes every [`Reading`] into a
//! bounded FIFO queue; a processor task drains the queue and classifies the
//! light level.
//!
//! Both tasks receive the sensor and the queue explicitly, so several
//! pipelines can run side by side without any global state.
//!
//! ```ignore
//! static QUEUE: ReadingQueue<CriticalSectionRawMutex, DEFAULT_QUEUE_CAPACITY> = Channel::new();
//!
//! // Reader task.
//! let send_timeout = Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS);
//! run_reader(&sensor, QUEUE.sender(), &mut delay, DEFAULT_READ_PERIOD_MS, send_timeout).await;
//!
//! // Processor task.
//! run_processor(QUEUE.receiver()).await;
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

use embassy_time::{Duration, with_timeout};

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use log::{error, info, warn};

use crate::opt3001::{Opt3001, Opt3001Error, Reading};

/// Default queue capacity, in readings.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// Default maximum wait for a free queue slot, in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 100;
/// Default period of the reader task, in milliseconds.
pub const DEFAULT_READ_PERIOD_MS: u32 = 1000;

/// Readings below this value, in lux, are a low light condition.
pub const LOW_LIGHT_LUX: f32 = 10.0;
/// Readings above this value, in lux, are a high light condition.
pub const HIGH_LIGHT_LUX: f32 = 1000.0;

/// Bounded FIFO queue of readings.
pub type ReadingQueue<M, const N: usize> = Channel<M, Reading, N>;

/// Light level of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCondition {
    /// Below [`LOW_LIGHT_LUX`].
    Low,
    /// Between [`LOW_LIGHT_LUX`] and [`HIGH_LIGHT_LUX`], both included.
    Normal,
    /// Above [`HIGH_LIGHT_LUX`].
    High,
}

impl LightCondition {
    /// Classifies an illuminance in lux.
    #[must_use]
    pub fn classify(lux: f32) -> Self {
        if lux < LOW_LIGHT_LUX {
            Self::Low
        } else if lux > HIGH_LIGHT_LUX {
            Self::High
        } else {
            Self::Normal
        }
    }
}

/// Outcome of a reader step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Produced {
    /// The reading has been queued.
    Queued(Reading),
    /// The queue stayed full for the whole send timeout and the reading has
    /// been dropped.
    Dropped(Reading),
}

/// Reads one result and queues it.
///
/// Waits at most `send_timeout` for a free slot.
///
/// # Errors
///
/// Returns the sensor error if the result cannot be read. Nothing is queued
/// in that case.
pub async fn produce<M, I2C, E, const N: usize>(
    sensor: &Opt3001<M, I2C>,
    sender: Sender<'_, M, Reading, N>,
    send_timeout: Duration,
) -> Result<Produced, Opt3001Error<E>>
where
    M: RawMutex,
    I2C: I2c<u8, Error = E>,
    E: core::fmt::Debug,
{
    let reading = sensor
        .read_result()
        .await
        .inspect_err(|e| error!("Failed to read sensor: {e}"))?;

    match with_timeout(send_timeout, sender.send(reading)).await {
        Ok(()) => Ok(Produced::Queued(reading)),
        Err(_) => {
            warn!("Queue full, dropping reading");
            Ok(Produced::Dropped(reading))
        }
    }
}

/// Runs the reader task: one [`produce`] step every `period_ms`, each
/// waiting at most `send_timeout` for a free slot.
///
/// Read failures and dropped readings are logged and the task keeps going.
pub async fn run_reader<M, I2C, E, D, const N: usize>(
    sensor: &Opt3001<M, I2C>,
    sender: Sender<'_, M, Reading, N>,
    delay: &mut D,
    period_ms: u32,
    send_timeout: Duration,
) -> !
where
    M: RawMutex,
    I2C: I2c<u8, Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    loop {
        let _ = produce(sensor, sender, send_timeout).await;
        delay.delay_ms(period_ms).await;
    }
}

/// Waits for the next reading, logs it and classifies it.
pub async fn consume<M, const N: usize>(
    receiver: Receiver<'_, M, Reading, N>,
) -> (Reading, LightCondition)
where
    M: RawMutex,
{
    let reading = receiver.receive().await;
    info!(
        "Light: {:.2} lux (Raw: {:#06X})",
        reading.lux,
        reading.raw.bits()
    );

    let condition = LightCondition::classify(reading.lux);
    match condition {
        LightCondition::Low => warn!("Low light condition detected"),
        LightCondition::High => warn!("High light condition detected"),
        LightCondition::Normal => {}
    }

    (reading, condition)
}

/// Runs the processor task: [`consume`] forever.
pub async fn run_processor<M, const N: usize>(receiver: Receiver<'_, M, Reading, N>) -> !
where
    M: RawMutex,
{
    loop {
        let _ = consume(receiver).await;
    }
}
