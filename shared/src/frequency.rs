//! Radio frequencies as carried on the wire.
//!
//! FSD encodes a frequency as its value in kHz minus 100000, so 122.800 MHz
//! travels as `22800`.

use std::fmt;

const WIRE_OFFSET_KHZ: u32 = 100_000;

/// Lowest voice frequency of the aviation VHF band (118.000 MHz)
pub const AVIATION_BAND_MIN_KHZ: u32 = 118_000;
/// Highest voice frequency of the aviation VHF band (136.975 MHz)
pub const AVIATION_BAND_MAX_KHZ: u32 = 136_975;

/// Frequency used by Euroscope for controller coordination queries
pub const EUROSCOPE_COORDINATION: &str = "@94835";

/// Frequency in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Frequency(u32);

impl Frequency {
    pub fn from_khz(khz: u32) -> Self {
        Frequency(khz)
    }

    pub fn khz(self) -> u32 {
        self.0
    }

    /// Parses the wire form (`22800`), tolerating an `@` prefix.
    pub fn from_wire(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('@').unwrap_or(text);
        let value: u32 = digits.trim().parse().ok()?;
        value.checked_add(WIRE_OFFSET_KHZ).map(Frequency)
    }

    pub fn to_wire(self) -> String {
        self.0.saturating_sub(WIRE_OFFSET_KHZ).to_string()
    }

    /// True for 118.000 to 136.975 MHz inclusive
    pub fn is_aviation_band(self) -> bool {
        (AVIATION_BAND_MIN_KHZ..=AVIATION_BAND_MAX_KHZ).contains(&self.0)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}
