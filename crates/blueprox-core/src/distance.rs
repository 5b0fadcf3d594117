//! RSSI to distance conversion.
//!
//! Uses the log-distance path loss model:
//!
//! ```text
//! distance = 10 ^ ((tx_power - rssi) / (10 * n))
//! ```
//!
//! where `tx_power` is the measured signal strength at one metre and `n` is the
//! path loss exponent of the environment.

/// Path loss exponent for indoor environments with some obstruction.
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.5;

/// Readings at or below this level are indistinguishable from the noise floor.
pub const NOISE_FLOOR_DBM: i16 = -100;

/// Returns `true` if `rssi` lies in the window trusted for aggregation, `(-100, 0)`.
#[must_use]
pub const fn in_trusted_range(rssi: i16) -> bool {
    rssi > NOISE_FLOOR_DBM && rssi < 0
}

/// Estimates distance in metres with the default exponent.
///
/// Returns `None` when `rssi` is missing or at/below the noise floor.
///
/// # Examples
///
/// ```
/// use blueprox_core::distance::estimate_distance;
///
/// let one_metre = estimate_distance(Some(-59), -59).unwrap();
/// assert!((one_metre - 1.0).abs() < 1e-9);
/// assert_eq!(estimate_distance(Some(-100), -59), None);
/// ```
#[must_use]
pub fn estimate_distance(rssi: Option<i16>, tx_power: i16) -> Option<f64> {
    estimate_distance_with(rssi, tx_power, DEFAULT_PATH_LOSS_EXPONENT)
}

/// Estimates distance in metres with an explicit path loss exponent.
#[must_use]
pub fn estimate_distance_with(rssi: Option<i16>, tx_power: i16, exponent: f64) -> Option<f64> {
    let rssi = rssi.filter(|&r| r > NOISE_FLOOR_DBM)?;
    let exponent_db = (f64::from(tx_power) - f64::from(rssi)) / (10.0 * exponent);
    let distance = 10f64.powf(exponent_db);
    (distance.is_finite() && distance > 0.0).then_some(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_TX_POWER_DBM;

    fn estimate_distance_at_reference(rssi: Option<i16>) -> Option<f64> {
        estimate_distance(rssi, DEFAULT_TX_POWER_DBM)
    }

    #[test]
    fn test_reference_power_is_one_metre() {
        let d = estimate_distance_at_reference(Some(-59)).unwrap();
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_value() {
        // -84 dBm is 25 dB below reference: 10^(25/25) = 10 m
        let d = estimate_distance_at_reference(Some(-84)).unwrap();
        assert!((d - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_absent_input() {
        assert_eq!(estimate_distance_at_reference(None), None);
    }

    #[test]
    fn test_noise_floor_is_absent() {
        for rssi in [-100, -101, -120, i16::MIN] {
            assert_eq!(estimate_distance_at_reference(Some(rssi)), None, "rssi {rssi}");
        }
    }

    #[test]
    fn test_strictly_decreasing_in_valid_range() {
        let mut previous = f64::INFINITY;
        for rssi in -99..0 {
            let d = estimate_distance_at_reference(Some(rssi)).unwrap();
            assert!(d > 0.0);
            assert!(d < previous, "distance must shrink as rssi rises ({rssi})");
            previous = d;
        }
    }

    #[test]
    fn test_custom_exponent() {
        let free_space = estimate_distance_with(Some(-79), -59, 2.0).unwrap();
        assert!((free_space - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_trusted_range() {
        assert!(in_trusted_range(-60));
        assert!(in_trusted_range(-99));
        assert!(!in_trusted_range(-100));
        assert!(!in_trusted_range(0));
        assert!(!in_trusted_range(12));
    }
}
