//! Fixed-point rate and share units.
//!
//! Rates are items per minute scaled by [`RATE_SCALE`] and stored as `i32`,
//! so `1500` means 1.5 items/min. Shares are proportional weights scaled by
//! [`SHARE_SCALE`] and stored as `i64`; a terminal consumer with full
//! potential weighs exactly `SHARE_SCALE`.
//!
//! All balancing arithmetic stays in these integer units. Division always
//! goes through [`div_rem_floor`] so that remainders are carried explicitly
//! instead of being silently dropped.

use crate::fixed::Fixed64;

/// Fixed-point items/min.
pub type Rate = i32;

/// Fixed-point share weight.
pub type Shares = i64;

/// Number of fractional decimal digits in a [`Rate`].
pub const FRACTIONAL_RATE_DIGITS: u32 = 3;

/// Scale factor between items/min and [`Rate`].
pub const RATE_SCALE: Rate = 10_i32.pow(FRACTIONAL_RATE_DIGITS);

/// Number of fractional decimal digits in a [`Shares`] value.
pub const FRACTIONAL_SHARE_DIGITS: u32 = 5;

/// Scale factor between a unit share and [`Shares`].
pub const SHARE_SCALE: Shares = 10_i64.pow(FRACTIONAL_SHARE_DIGITS);

/// Highest rate a manual output may be pinned to, in items/min.
pub const MAX_OUTPUT_ITEMS_PER_MINUTE: i32 = 780;

/// [`MAX_OUTPUT_ITEMS_PER_MINUTE`] in fixed-point.
pub const MAX_OUTPUT_RATE: Rate = MAX_OUTPUT_ITEMS_PER_MINUTE * RATE_SCALE;

/// Convert items/min to a fixed-point rate, truncating toward zero.
#[inline]
pub fn rate_from_items_per_minute(items_per_minute: f64) -> Rate {
    (items_per_minute * f64::from(RATE_SCALE)) as Rate
}

/// Convert a fixed-point rate back to items/min.
#[inline]
pub fn rate_to_items_per_minute(rate: Rate) -> f64 {
    f64::from(rate) / f64::from(RATE_SCALE)
}

/// Convert a consumer potential in `[0, 1]` into shares. Values outside the
/// range are clamped.
#[inline]
pub fn shares_from_potential(potential: Fixed64) -> Shares {
    let clamped = potential.clamp(Fixed64::ZERO, Fixed64::ONE);
    (clamped * Fixed64::from_num(SHARE_SCALE)).to_num::<i64>()
}

/// Floor division with remainder. For a positive divisor the remainder is
/// always in `0..divisor`.
///
/// Returns `(0, 0)` for a zero divisor so callers can treat "no shares" as
/// "nothing to distribute".
#[inline]
pub fn div_rem_floor(numerator: i64, divisor: i64) -> (i64, i64) {
    if divisor == 0 {
        return (0, 0);
    }
    (numerator.div_euclid(divisor), numerator.rem_euclid(divisor))
}

/// Narrow a wide intermediate rate back to [`Rate`], saturating at the
/// representable bounds.
#[inline]
pub fn saturate_rate(rate: i64) -> Rate {
    rate.clamp(i64::from(Rate::MIN), i64::from(Rate::MAX)) as Rate
}

/// Greatest common divisor of two non-negative values. `gcd(0, x) == x`.
pub fn gcd(a: i32, b: i32) -> i32 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i32
}

/// GCD folded over every value, starting from zero so that index 0 takes
/// part like any other entry.
pub fn gcd_all(values: &[i32]) -> i32 {
    values.iter().fold(0, |acc, &v| gcd(acc, v))
}
