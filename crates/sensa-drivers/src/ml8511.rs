//! # ML8511 Driver
//!
//! This module provides an architecture-agnostic driver for the `ML8511`
//! ultraviolet light sensor, whose output is an analog voltage proportional
//! to the UV intensity.
//!
//! The sensor output is sampled together with the board 3.3 V rail. Using the
//! rail as a reference compensates for an inaccurate ADC reference voltage:
//!
//! ```text
//! v_uv  = uv_level  * 3.3 / 4095
//! v_ref = ref_level * 3.3 / 4095
//! v     = v_uv * 3.3 / v_ref
//! ```
//!
//! The corrected voltage is then mapped linearly from `0.99 V..2.8 V` onto
//! `0..15 mW/cm²`.
//!
//! Since `embedded-hal` 1.0 has no ADC abstraction, channels are read through
//! the [`AnalogInput`] trait.

use core::fmt;

use embedded_hal_async::delay::DelayNs;

use log::{error, info};

/// Number of samples averaged for each channel.
pub const NUM_SAMPLES: u32 = 8;
/// Default period of [`Ml8511::run`], in milliseconds.
pub const DEFAULT_READ_PERIOD_MS: u32 = 1000;
const SAMPLE_DELAY_MS: u32 = 1;

// 12-bit ADC on a 3.3 V scale.
const ADC_MAX: f32 = 4095.0;
const SUPPLY_V: f32 = 3.3;

// Datasheet transfer function end points.
const OUTPUT_MIN_V: f32 = 0.99;
const OUTPUT_MAX_V: f32 = 2.8;
const INTENSITY_MAX: f32 = 15.0;

/// A single analog-to-digital channel.
#[allow(async_fn_in_trait)]
pub trait AnalogInput {
    /// Error type of a conversion.
    type Error;

    /// Performs one 12-bit conversion.
    async fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

/// Errors that may occur when interacting with the `ML8511` sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ml8511Error<E> {
    /// ADC conversion error.
    Adc(E),
    /// The 3.3 V reference channel read zero, so the output cannot be
    /// corrected.
    InvalidReference,
}

impl<E> From<E> for Ml8511Error<E> {
    fn from(e: E) -> Self {
        Ml8511Error::Adc(e)
    }
}

impl<E: fmt::Debug> fmt::Display for Ml8511Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adc(e) => write!(f, "ADC error: {e:?}"),
            Self::InvalidReference => f.write_str("3.3 V reference reads zero"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for Ml8511Error<E> {}

/// A UV measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvMeasurement {
    /// Averaged ADC level of the sensor output.
    pub uv_level: u16,
    /// Averaged ADC level of the 3.3 V reference.
    pub ref_level: u16,
    /// UV intensity in mW/cm².
    pub intensity: f32,
}

/// The `ML8511` driver.
pub struct Ml8511<U, R, D>
where
    D: DelayNs,
{
    uv: U,
    reference: R,
    delay: D,
}

impl<U, R, D, E> Ml8511<U, R, D>
where
    U: AnalogInput<Error = E>,
    R: AnalogInput<Error = E>,
    D: DelayNs,
{
    /// Creates an [`Ml8511`] driver from the sensor output channel, the
    /// 3.3 V reference channel and a delay provider.
    #[must_use]
    pub fn new(uv: U, reference: R, delay: D) -> Self {
        Self {
            uv,
            reference,
            delay,
        }
    }

    /// Reads the averaged ADC levels of both channels as
    /// `(uv_level, ref_level)`.
    ///
    /// # Errors
    ///
    /// Returns an error if any ADC conversion fails.
    pub async fn read_raw_values(&mut self) -> Result<(u16, u16), Ml8511Error<E>> {
        let uv_level = average(&mut self.uv, &mut self.delay).await?;
        let ref_level = average(&mut self.reference, &mut self.delay).await?;

        Ok((uv_level, ref_level))
    }

    /// Reads both channels and computes the UV intensity.
    ///
    /// # Errors
    ///
    /// Returns an error if any ADC conversion fails or the reference channel
    /// reads zero.
    pub async fn read_measurement(&mut self) -> Result<UvMeasurement, Ml8511Error<E>> {
        let (uv_level, ref_level) = self.read_raw_values().await?;

        Ok(UvMeasurement {
            uv_level,
            ref_level,
            intensity: intensity(uv_level, ref_level)?,
        })
    }

    /// Reads the UV intensity in mW/cm².
    ///
    /// # Errors
    ///
    /// Returns an error if any ADC conversion fails or the reference channel
    /// reads zero.
    pub async fn read_uv_intensity(&mut self) -> Result<f32, Ml8511Error<E>> {
        self.read_measurement().await.map(|m| m.intensity)
    }

    /// Consumes the driver and returns its channels and delay provider.
    pub fn release(self) -> (U, R, D) {
        (self.uv, self.reference, self.delay)
    }
}

impl<U, R, D, E> Ml8511<U, R, D>
where
    U: AnalogInput<Error = E>,
    R: AnalogInput<Error = E>,
    D: DelayNs,
    E: fmt::Debug,
{
    /// Reads and logs a measurement every `period_ms`.
    ///
    /// Failed measurements are logged and the loop keeps going. Dropping the
    /// returned future stops the readings.
    pub async fn run(&mut self, period_ms: u32) -> ! {
        info!("Starting continuous UV sensor reading");
        loop {
            match self.read_measurement().await {
                Ok(m) => info!(
                    "UV level: {}, reference level: {}, intensity: {:.2} mW/cm²",
                    m.uv_level, m.ref_level, m.intensity
                ),
                Err(e) => error!("Failed to read UV sensor: {e}"),
            }
            self.delay.delay_ms(period_ms).await;
        }
    }
}

async fn average<A, D>(channel: &mut A, delay: &mut D) -> Result<u16, A::Error>
where
    A: AnalogInput,
    D: DelayNs,
{
    let mut sum = 0u32;
    for _ in 0..NUM_SAMPLES {
        sum += u32::from(channel.read_raw().await?);
        delay.delay_ms(SAMPLE_DELAY_MS).await;
    }

    // The average of `u16` samples always fits into a `u16`.
    Ok(u16::try_from(sum / NUM_SAMPLES).unwrap_or(u16::MAX))
}

fn intensity<E>(uv_level: u16, ref_level: u16) -> Result<f32, Ml8511Error<E>> {
    if ref_level == 0 {
        return Err(Ml8511Error::InvalidReference);
    }

    let output_v = f32::from(uv_level) * SUPPLY_V / ADC_MAX;
    let ref_v = f32::from(ref_level) * SUPPLY_V / ADC_MAX;
    let corrected_v = SUPPLY_V / ref_v * output_v;

    Ok(map_range(
        corrected_v,
        OUTPUT_MIN_V,
        OUTPUT_MAX_V,
        0.0,
        INTENSITY_MAX,
    ))
}

#[inline]
fn map_range(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
