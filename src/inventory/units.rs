//! Memory and storage sizes.
//!
//! Sizes are kept in bytes. SmartOS tools report memory in whole megabytes
//! and ZFS sizes with a binary unit suffix; both convert to bytes with
//! integer arithmetic only.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Bytes per megabyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// A size in bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MemorySize(u64);

impl MemorySize {
    /// Zero bytes.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Converts whole megabytes, saturating at `u64::MAX` bytes.
    #[must_use]
    pub const fn from_megabytes(mb: u64) -> Self {
        Self(mb.saturating_mul(BYTES_PER_MB))
    }

    /// Parses a whole megabyte count such as `"300"`.
    #[must_use]
    pub fn parse_megabytes(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().map(Self::from_megabytes)
    }

    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Returns the size in megabytes, truncating any partial megabyte.
    ///
    /// Exact inverse of [`MemorySize::from_megabytes`].
    #[must_use]
    pub const fn as_megabytes(self) -> u64 {
        self.0 / BYTES_PER_MB
    }

    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Formats with one decimal and a binary unit, e.g. `300.0M`.
    #[must_use]
    pub fn human(self) -> String {
        const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];

        let mut unit = 0;
        let mut divisor: u64 = 1;
        while unit + 1 < UNITS.len() && self.0 / divisor >= 1024 {
            divisor *= 1024;
            unit += 1;
        }

        if unit == 0 {
            return format!("{}B", self.0);
        }

        // tenths, rounded half up
        let tenths = (u128::from(self.0) * 10 + u128::from(divisor) / 2) / u128::from(divisor);
        format!("{}.{}{}", tenths / 10, tenths % 10, UNITS[unit])
    }
}

impl Add for MemorySize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sum for MemorySize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human())
    }
}

/// Parses a ZFS size such as `10G`, `512M`, `1.5T` or `8192` into bytes.
///
/// The fractional digits present in the text are kept exactly; a value that
/// does not land on a whole byte is truncated. Returns `None` for `-`,
/// `none` and anything unparseable.
#[must_use]
pub fn parse_sized(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("none") {
        return None;
    }

    let (number, exponent) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let exponent = match c.to_ascii_uppercase() {
                'B' => 0,
                'K' => 1,
                'M' => 2,
                'G' => 3,
                'T' => 4,
                'P' => 5,
                'E' => 6,
                _ => return None,
            };
            (&s[..s.len() - 1], exponent)
        }
        _ => (s, 0),
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let scale = 10u128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
    let mantissa: u128 = format!("{whole}{fraction}").parse().ok()?;
    let multiplier = 1024u128.pow(exponent);

    let bytes = mantissa.checked_mul(multiplier)? / scale;
    u64::try_from(bytes).ok()
}
