/// Derived views over stored readings.
///
/// Submodules:
/// - `merge`: reconciles a fresh fetch with stored history inside a
///   trailing correction window.
/// - `seasons`: season calendar, cost-to-date and projection, and the
///   rolling-average series used to compare seasons.

pub mod merge;
pub mod seasons;
