use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Simulation time in seconds. Tick deltas, blocked durations and cycle
/// times are all measured in this unit.
pub type Seconds = Fixed64;

/// Convert an f64 to Fixed64. Use only at API boundaries, never in the tick loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and reporting.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Seconds from a float, e.g. a frame delta supplied by the host.
#[inline]
pub fn seconds(v: f64) -> Seconds {
    f64_to_fixed64(v)
}

/// Reciprocal of a positive integer count, or zero for non-positive counts.
#[inline]
pub fn reciprocal(count: i32) -> Fixed64 {
    if count > 0 {
        Fixed64::ONE / Fixed64::from_num(count)
    } else {
        Fixed64::ZERO
    }
}
