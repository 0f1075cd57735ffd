use core::cmp::max;

/// Scale a nominal channel count by `depth_multiplier` and round it to a multiple of
/// `depth_divisor`.
///
/// The rounded width is never below `min_depth` (the divisor when unset) and never
/// more than 10% narrower than the scaled width. A multiplier of exactly `1.0` returns
/// the nominal count as is, without rounding.
///
/// # Panics
///
/// Panics if `depth_divisor` is zero and `depth_multiplier` is not `1.0`. Network
/// builders reject a zero divisor before rounding any width.
#[allow(clippy::float_cmp)]
pub fn round_channels(
    channels: usize,
    depth_multiplier: f64,
    depth_divisor: usize,
    min_depth: Option<usize>,
) -> usize {
    if depth_multiplier == 1.0 {
        return channels;
    }

    let scaled = channels as f64 * depth_multiplier;
    let min_depth = min_depth.unwrap_or(depth_divisor);
    let rounded = (scaled + depth_divisor as f64 / 2.0) as usize / depth_divisor * depth_divisor;
    let mut rounded = max(rounded, min_depth);

    // Make sure that round down does not go down by more than 10%
    if (rounded as f64) < 0.9 * scaled {
        rounded += depth_divisor;
    }

    rounded
}
