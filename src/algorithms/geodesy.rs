//! Surface distance between geographic positions
//!
//! Divergence between beacon and GPS positions is measured on the WGS84
//! ellipsoid with Vincenty's inverse formula. For nearly antipodal points,
//! where the iteration does not converge, the spherical haversine distance is
//! used instead.

use crate::core::{UserPosition, EARTH_MEAN_RADIUS_M, WGS84_FLATTENING, WGS84_SEMI_MAJOR_AXIS_M};

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Geodesic distance in meters between two positions
pub fn distance_m(from: &UserPosition, to: &UserPosition) -> f64 {
    vincenty_distance_m(from, to).unwrap_or_else(|| haversine_distance_m(from, to))
}

/// Great-circle distance on a sphere of the mean Earth radius (meters)
pub fn haversine_distance_m(from: &UserPosition, to: &UserPosition) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_MEAN_RADIUS_M * c
}

/// Vincenty inverse distance on the WGS84 ellipsoid, `None` if it does not converge
pub fn vincenty_distance_m(from: &UserPosition, to: &UserPosition) -> Option<f64> {
    let a = WGS84_SEMI_MAJOR_AXIS_M;
    let f = WGS84_FLATTENING;
    let b = a * (1.0 - f);

    let l = (to.longitude - from.longitude).to_radians();
    let u1 = ((1.0 - f) * from.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * to.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();

        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }

        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            // equatorial line
            0.0
        };

        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
            let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));

            let distance = b * big_a * (sigma - delta_sigma);
            return distance.is_finite().then_some(distance);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coincident_points() {
        let p = UserPosition::new(52.220656, 21.0098999);
        assert_eq!(distance_m(&p, &p), 0.0);
    }

    #[test]
    fn test_flinders_peak_to_buninyong() {
        // Reference geodesic from Vincenty (1975)
        let flinders = UserPosition::new(-37.951_033_416_7, 144.424_867_888_9);
        let buninyong = UserPosition::new(-37.652_821_138_9, 143.926_495_527_8);
        let distance = vincenty_distance_m(&flinders, &buninyong).unwrap();
        assert!((distance - 54_972.271).abs() < 0.01);
    }

    #[test]
    fn test_one_degree_latitude_at_equator() {
        let a = UserPosition::new(0.0, 0.0);
        let b = UserPosition::new(1.0, 0.0);
        let distance = distance_m(&a, &b);
        assert!((distance - 110_574.4).abs() < 1.0);
    }

    #[test]
    fn test_building_scale_agreement() {
        // ~15 m apart, ellipsoid and sphere agree to a few centimeters
        let a = UserPosition::new(52.220656, 21.009900);
        let b = UserPosition::new(52.220756, 21.010050);
        let ellipsoidal = distance_m(&a, &b);
        let spherical = haversine_distance_m(&a, &b);
        assert!(ellipsoidal > 10.0 && ellipsoidal < 20.0);
        assert!((ellipsoidal - spherical).abs() < 0.1);
    }

    #[test]
    fn test_symmetry() {
        let a = UserPosition::new(52.2297, 21.0117);
        let b = UserPosition::new(52.2301, 21.0131);
        assert!((distance_m(&a, &b) - distance_m(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn test_near_antipodal_distance_is_finite() {
        let a = UserPosition::new(0.0, 0.0);
        let b = UserPosition::new(0.5, 179.7);
        let distance = distance_m(&a, &b);
        assert!(distance.is_finite());
        assert!(distance > 19_000_000.0 && distance < 20_100_000.0);
    }
}
