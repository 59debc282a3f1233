//! `sensa-drivers` is a library crate that provides architecture-agnostic
//! access to sensors sharing a bus between several tasks.
//!
//! The crate is organized in layers:
//!
//! - [`arbiter`]: a timeout-bounded mutual-exclusion lock owning the bus
//!   transport of a device.
//! - [`register`]: register reads and writes executed as single arbitrated
//!   transactions, for any device with 8-bit register pointers and 16-bit
//!   registers.
//! - Device drivers built on top of them, such as the `OPT3001` ambient light
//!   sensor, plus the `ML8511` UV sensor read through an ADC.
//! - A reading pipeline connecting a reader task and a processor task through
//!   a bounded queue.
//!
//! All drivers are implemented using only the [`embedded-hal`],
//! [`embedded-hal-async`] and [`embassy-sync`] abstractions, ensuring
//! compatibility with any platform that supports them.
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
//! [`embedded-hal-async`]: https://crates.io/crates/embedded-hal-async
//! [`embassy-sync`]: https://crates.io/crates/embassy-sync

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

pub mod arbiter;
pub mod register;

/// The `ML8511` driver.
#[cfg(feature = "ml8511")]
pub mod ml8511;

/// The `OPT3001` driver.
#[cfg(feature = "opt3001")]
pub mod opt3001;

/// The reader/processor pipeline for `OPT3001` readings.
#[cfg(feature = "pipeline")]
pub mod pipeline;
