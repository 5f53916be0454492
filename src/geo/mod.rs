use crate::models::worker::Coordinate;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance in kilometers. NaN inputs yield NaN.
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().atan2((1.0 - haversine).sqrt());

    EARTH_RADIUS_KM * central_angle
}

/// Address text used when reverse geocoding is unavailable.
pub fn coordinate_label(point: &Coordinate) -> String {
    format!("{:.4}, {:.4}", point.lat, point.lng)
}

#[cfg(test)]
mod tests {
    use super::{coordinate_label, haversine_km};
    use crate::models::worker::Coordinate;

    #[test]
    fn zero_distance_for_same_point() {
        let p = Coordinate {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(12.9716, 77.5946);
        let b = Coordinate::new(-33.8688, 151.2093);
        assert!((haversine_km(&a, &b) - haversine_km(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_longitude_at_equator_is_about_111_km() {
        let origin = Coordinate::new(0.0, 0.0);
        let east = Coordinate::new(0.0, 1.0);
        let distance = haversine_km(&origin, &east);
        assert!((distance - 111.0).abs() < 1.0, "got {distance}");
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = Coordinate {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = Coordinate {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn nan_propagates() {
        let a = Coordinate::new(f64::NAN, 0.0);
        let b = Coordinate::new(1.0, 1.0);
        assert!(haversine_km(&a, &b).is_nan());
    }

    #[test]
    fn label_uses_four_decimals() {
        assert_eq!(coordinate_label(&Coordinate::new(10.0, -20.123456)), "10.0000, -20.1235");
    }
}
