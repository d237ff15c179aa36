use geo::{Distance, Geodesic, Point};

use crate::models::Coordinates;

/// The collector expects miles computed with this divisor.
pub const METERS_PER_MILE: f64 = 1609.0;

/// Result of feeding one fix into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulated {
    pub total_m: f64,
    pub previous: Option<Coordinates>,
    pub increment_m: f64,
}

/// Distance between two points on the WGS-84 ellipsoid, in meters.
pub fn geodesic_distance_m(from: Coordinates, to: Coordinates) -> f64 {
    Geodesic.distance(
        Point::new(from.longitude, from.latitude),
        Point::new(to.longitude, to.latitude),
    )
}

/// Advances the running total by the leg from `previous` to `current`.
///
/// Without a previous fix the total is left alone and `current` becomes the
/// new previous fix. A leg that does not produce a finite, non-negative
/// distance counts as zero. A non-finite `current` is not adopted as the
/// previous fix, so one bad reading cannot poison the following legs.
pub fn accumulate(previous: Option<Coordinates>, total_m: f64, current: Coordinates) -> Accumulated {
    if !current.is_finite() {
        return Accumulated {
            total_m,
            previous,
            increment_m: 0.0,
        };
    }

    let increment_m = match previous {
        None => 0.0,
        Some(previous) if !previous.is_finite() => 0.0,
        Some(previous) => {
            let leg = geodesic_distance_m(previous, current);
            if leg.is_finite() && leg >= 0.0 {
                leg
            } else {
                0.0
            }
        }
    };

    Accumulated {
        total_m: total_m + increment_m,
        previous: Some(current),
        increment_m,
    }
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_percent(actual: f64, expected: f64, percent: f64) -> bool {
        (actual - expected).abs() <= expected * percent / 100.0
    }

    #[test]
    fn thousandth_of_a_degree_of_latitude() {
        let leg = geodesic_distance_m(Coordinates::new(40.0, -75.0), Coordinates::new(40.001, -75.0));
        assert!(within_percent(leg, 111.0, 5.0), "got {leg}");
    }

    #[test]
    fn accumulates_onto_prior_total() {
        let result = accumulate(
            Some(Coordinates::new(40.0, -75.0)),
            500.0,
            Coordinates::new(40.001, -75.0),
        );
        assert!(within_percent(result.total_m, 611.0, 1.0), "got {}", result.total_m);
        assert_eq!(result.previous, Some(Coordinates::new(40.001, -75.0)));
        assert!(within_percent(meters_to_miles(result.total_m), 0.38, 2.0));
    }

    #[test]
    fn first_fix_keeps_total() {
        let result = accumulate(None, 0.0, Coordinates::new(51.5, -0.12));
        assert_eq!(result.total_m, 0.0);
        assert_eq!(result.increment_m, 0.0);
        assert_eq!(result.previous, Some(Coordinates::new(51.5, -0.12)));
    }

    #[test]
    fn identical_points_add_nothing() {
        let here = Coordinates::new(60.17, 24.94);
        let result = accumulate(Some(here), 1234.5, here);
        assert_eq!(result.total_m, 1234.5);
    }

    #[test]
    fn nan_coordinates_leave_total_untouched() {
        let previous = Coordinates::new(60.17, 24.94);
        let result = accumulate(Some(previous), 42.0, Coordinates::new(f64::NAN, 24.94));
        assert_eq!(result.total_m, 42.0);
        assert_eq!(result.increment_m, 0.0);
        assert_eq!(result.previous, Some(previous));

        let result = accumulate(Some(Coordinates::new(f64::NAN, 0.0)), 42.0, previous);
        assert_eq!(result.total_m, 42.0);
        assert_eq!(result.previous, Some(previous));
    }
}
