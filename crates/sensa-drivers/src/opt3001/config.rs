//! Bit-level view of the `OPT3001` configuration register.
//!
//! The register is kept as an opaque `u16` and every field is packed and
//! unpacked explicitly, so the layout never depends on how a compiler lays
//! out bitfields.

// Field positions and widths from the datasheet.
const FAULT_COUNT_SHIFT: u16 = 0;
const FAULT_COUNT_MASK: u16 = 0b11;
const MASK_EXPONENT_BIT: u16 = 2;
const POLARITY_BIT: u16 = 3;
const LATCH_BIT: u16 = 4;
const FLAG_LOW_BIT: u16 = 5;
const FLAG_HIGH_BIT: u16 = 6;
const CONVERSION_READY_BIT: u16 = 7;
const OVERFLOW_BIT: u16 = 8;
const MODE_SHIFT: u16 = 9;
const MODE_MASK: u16 = 0b11;
const CONVERSION_TIME_BIT: u16 = 11;
const RANGE_SHIFT: u16 = 12;
const RANGE_MASK: u16 = 0b1111;

/// Range number selecting the automatic full-scale range.
pub const RANGE_AUTOMATIC: u8 = 0x0C;

/// Mode of conversion operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shutdown, the power-on default.
    Shutdown,
    /// A single conversion, after which the device returns to shutdown.
    SingleShot,
    /// Back-to-back conversions.
    Continuous,
}

impl Mode {
    #[inline]
    const fn bits(self) -> u16 {
        match self {
            Self::Shutdown => 0b00,
            Self::SingleShot => 0b01,
            Self::Continuous => 0b10,
        }
    }

    #[inline]
    const fn from_bits(bits: u16) -> Self {
        // Both 0b10 and 0b11 select continuous conversions.
        match bits & MODE_MASK {
            0b00 => Self::Shutdown,
            0b01 => Self::SingleShot,
            _ => Self::Continuous,
        }
    }
}

/// Conversion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionTime {
    /// 100 ms.
    Ms100,
    /// 800 ms.
    Ms800,
}

impl ConversionTime {
    /// Returns the conversion time in milliseconds.
    #[must_use]
    pub const fn as_ms(self) -> u32 {
        match self {
            Self::Ms100 => 100,
            Self::Ms800 => 800,
        }
    }
}

/// Content of the configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Configuration(u16);

impl Configuration {
    /// Creates a [`Configuration`] from the raw register value.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw register value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Configuration used for continuous measurements: continuous mode,
    /// 800 ms conversions, automatic full-scale range.
    #[must_use]
    pub const fn continuous() -> Self {
        Self(0)
            .with_mode(Mode::Continuous)
            .with_conversion_time(ConversionTime::Ms800)
            .with_range(RANGE_AUTOMATIC)
    }

    /// Configuration used for single-shot measurements: single-shot mode,
    /// 800 ms conversions, automatic full-scale range.
    #[must_use]
    pub const fn single_shot() -> Self {
        Self(0)
            .with_mode(Mode::SingleShot)
            .with_conversion_time(ConversionTime::Ms800)
            .with_range(RANGE_AUTOMATIC)
    }

    /// Number of consecutive faults required to trigger the interrupt,
    /// as the raw 2-bit field.
    #[must_use]
    pub const fn fault_count(self) -> u8 {
        ((self.0 >> FAULT_COUNT_SHIFT) & FAULT_COUNT_MASK) as u8
    }

    /// Sets the raw 2-bit fault-count field. Higher bits are ignored.
    #[must_use]
    pub const fn with_fault_count(self, count: u8) -> Self {
        self.with_field(FAULT_COUNT_SHIFT, FAULT_COUNT_MASK, count as u16)
    }

    /// Whether the exponent is masked in the result register.
    #[must_use]
    pub const fn mask_exponent(self) -> bool {
        self.bit(MASK_EXPONENT_BIT)
    }

    /// Sets the mask-exponent flag.
    #[must_use]
    pub const fn with_mask_exponent(self, set: bool) -> Self {
        self.with_bit(MASK_EXPONENT_BIT, set)
    }

    /// Interrupt pin polarity: `true` means active high.
    #[must_use]
    pub const fn polarity(self) -> bool {
        self.bit(POLARITY_BIT)
    }

    /// Sets the interrupt pin polarity.
    #[must_use]
    pub const fn with_polarity(self, active_high: bool) -> Self {
        self.with_bit(POLARITY_BIT, active_high)
    }

    /// Latched window-style comparison.
    #[must_use]
    pub const fn latch(self) -> bool {
        self.bit(LATCH_BIT)
    }

    /// Sets the latch field.
    #[must_use]
    pub const fn with_latch(self, set: bool) -> Self {
        self.with_bit(LATCH_BIT, set)
    }

    /// The result fell below the low limit.
    #[must_use]
    pub const fn flag_low(self) -> bool {
        self.bit(FLAG_LOW_BIT)
    }

    /// The result rose above the high limit.
    #[must_use]
    pub const fn flag_high(self) -> bool {
        self.bit(FLAG_HIGH_BIT)
    }

    /// A conversion has completed since the register was last read.
    #[must_use]
    pub const fn conversion_ready(self) -> bool {
        self.bit(CONVERSION_READY_BIT)
    }

    /// The measurement exceeded the full-scale range.
    #[must_use]
    pub const fn overflow(self) -> bool {
        self.bit(OVERFLOW_BIT)
    }

    /// Mode of conversion operation.
    #[must_use]
    pub const fn mode(self) -> Mode {
        Mode::from_bits(self.0 >> MODE_SHIFT)
    }

    /// Replaces the mode of conversion operation, keeping every other bit.
    #[must_use]
    pub const fn with_mode(self, mode: Mode) -> Self {
        self.with_field(MODE_SHIFT, MODE_MASK, mode.bits())
    }

    /// Conversion time.
    #[must_use]
    pub const fn conversion_time(self) -> ConversionTime {
        if self.bit(CONVERSION_TIME_BIT) {
            ConversionTime::Ms800
        } else {
            ConversionTime::Ms100
        }
    }

    /// Sets the conversion time.
    #[must_use]
    pub const fn with_conversion_time(self, time: ConversionTime) -> Self {
        self.with_bit(CONVERSION_TIME_BIT, matches!(time, ConversionTime::Ms800))
    }

    /// Range number; [`RANGE_AUTOMATIC`] selects the automatic range.
    #[must_use]
    pub const fn range(self) -> u8 {
        ((self.0 >> RANGE_SHIFT) & RANGE_MASK) as u8
    }

    /// Sets the 4-bit range number. Higher bits are ignored.
    #[must_use]
    pub const fn with_range(self, range: u8) -> Self {
        self.with_field(RANGE_SHIFT, RANGE_MASK, range as u16)
    }

    #[inline]
    const fn bit(self, bit: u16) -> bool {
        self.0 & (1 << bit) != 0
    }

    #[inline]
    const fn with_bit(self, bit: u16, set: bool) -> Self {
        self.with_field(bit, 1, set as u16)
    }

    #[inline]
    const fn with_field(self, shift: u16, mask: u16, value: u16) -> Self {
        Self((self.0 & !(mask << shift)) | ((value & mask) << shift))
    }
}

impl From<u16> for Configuration {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

impl From<Configuration> for u16 {
    fn from(config: Configuration) -> Self {
        config.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_configurations() {
        assert_eq!(Configuration::continuous().bits(), 0xCC00);
        assert_eq!(Configuration::single_shot().bits(), 0xCA00);
    }

    #[test]
    fn test_field_positions() {
        // Every single-bit flag set at once.
        let config = Configuration::from_bits(0b0000_0001_1111_1100);

        assert!(config.mask_exponent());
        assert!(config.polarity());
        assert!(config.latch());
        assert!(config.flag_low());
        assert!(config.flag_high());
        assert!(config.conversion_ready());
        assert!(config.overflow());
        assert_eq!(config.fault_count(), 0);
        assert_eq!(config.mode(), Mode::Shutdown);
        assert_eq!(config.conversion_time(), ConversionTime::Ms100);
        assert_eq!(config.range(), 0);
    }

    #[test]
    fn test_mode_decoding() {
        assert_eq!(Configuration::from_bits(0x0000).mode(), Mode::Shutdown);
        assert_eq!(Configuration::from_bits(0x0200).mode(), Mode::SingleShot);
        assert_eq!(Configuration::from_bits(0x0400).mode(), Mode::Continuous);
        assert_eq!(Configuration::from_bits(0x0600).mode(), Mode::Continuous);
    }

    #[test]
    fn test_with_mode_touches_only_mode_bits() {
        for bits in [0x0000, 0xFFFF, 0xC410, 0x3A5F, 0x0180] {
            let before = Configuration::from_bits(bits);
            for mode in [Mode::Shutdown, Mode::SingleShot, Mode::Continuous] {
                let after = before.with_mode(mode);
                assert_eq!((before.bits() ^ after.bits()) & !0x0600, 0);
                assert_eq!(after.mode(), mode);
            }
        }
    }

    #[test]
    fn test_setters_mask_out_of_range_values() {
        let config = Configuration::default()
            .with_fault_count(0xFF)
            .with_range(0xFF);

        assert_eq!(config.fault_count(), 0b11);
        assert_eq!(config.range(), 0x0F);
        assert_eq!(config.bits(), 0xF003);
    }

    #[test]
    fn test_single_bit_setters() {
        let config = Configuration::default()
            .with_latch(true)
            .with_polarity(true)
            .with_mask_exponent(true)
            .with_conversion_time(ConversionTime::Ms800);
        assert_eq!(config.bits(), 0x081C);

        let config = config.with_latch(false);
        assert!(!config.latch());
        assert_eq!(config.conversion_time().as_ms(), 800);
    }
}
