// ── Dual-factor validator ──
//
// Pure function of (IP, optional location fix, campus config). Both factors
// must pass; a missing fix fails the location factor.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::config::{Campus, IpMatchMode, ValidationConfig};
use crate::model::{LocationCheck, LocationSignal, NetworkSignal, ValidationResult};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Validate one network sample and an optional location fix.
pub fn validate(
    signal: &NetworkSignal,
    location: Option<&LocationSignal>,
    config: &ValidationConfig,
) -> ValidationResult {
    let ip_valid = ip_matches(&signal.ip_address, &config.ip_prefix, config.ip_match);
    let (location_check, campus_name, distance_meters) = check_location(location, &config.campuses);

    ValidationResult {
        ip_address: Some(signal.ip_address.clone()),
        ip_valid,
        location_valid: location_check == LocationCheck::Within,
        location: location_check,
        campus_name,
        distance_meters,
    }
}

/// IP factor. An empty or unparseable rule never matches.
pub fn ip_matches(ip: &str, rule: &str, mode: IpMatchMode) -> bool {
    let ip = ip.trim();
    let rule = rule.trim();
    if ip.is_empty() || rule.is_empty() {
        return false;
    }

    match mode {
        IpMatchMode::Prefix => ip.starts_with(rule),
        IpMatchMode::Cidr => match (rule.parse::<IpNet>(), ip.parse::<IpAddr>()) {
            (Ok(net), Ok(addr)) => net.contains(&addr),
            _ => false,
        },
    }
}

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

fn usable_fix(fix: &LocationSignal) -> bool {
    fix.latitude.is_finite()
        && fix.longitude.is_finite()
        && (-90.0..=90.0).contains(&fix.latitude)
        && (-180.0..=180.0).contains(&fix.longitude)
}

/// Location factor. Reports the nearest matching campus, or the nearest
/// campus overall when none matched, for audit.
fn check_location(
    location: Option<&LocationSignal>,
    campuses: &[Campus],
) -> (LocationCheck, Option<String>, Option<f64>) {
    let Some(fix) = location.filter(|fix| usable_fix(fix)) else {
        return (LocationCheck::NoFix, None, None);
    };

    let mut nearest: Option<(&Campus, f64)> = None;
    let mut nearest_match: Option<(&Campus, f64)> = None;

    for campus in campuses {
        let distance = haversine_meters(fix.latitude, fix.longitude, campus.latitude, campus.longitude);
        if nearest.is_none_or(|(_, d)| distance < d) {
            nearest = Some((campus, distance));
        }
        if distance <= campus.radius_meters && nearest_match.is_none_or(|(_, d)| distance < d) {
            nearest_match = Some((campus, distance));
        }
    }

    match (nearest_match, nearest) {
        (Some((campus, distance)), _) => (LocationCheck::Within, Some(campus.name.clone()), Some(distance)),
        (None, Some((campus, distance))) => {
            (LocationCheck::OutOfRange, Some(campus.name.clone()), Some(distance))
        }
        (None, None) => (LocationCheck::OutOfRange, None, None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn signal(ip: &str) -> NetworkSignal {
        NetworkSignal {
            ip_address: ip.into(),
            sampled_at: at(),
        }
    }

    fn fix(latitude: f64, longitude: f64) -> LocationSignal {
        LocationSignal {
            latitude,
            longitude,
            accuracy_meters: 8.0,
            sampled_at: at(),
        }
    }

    fn config() -> ValidationConfig {
        ValidationConfig {
            ip_prefix: "10.22".into(),
            ip_match: IpMatchMode::Prefix,
            campuses: vec![
                Campus {
                    name: "Main".into(),
                    latitude: 51.5000,
                    longitude: -0.1200,
                    radius_meters: 100.0,
                },
                Campus {
                    name: "Annex".into(),
                    latitude: 51.5100,
                    longitude: -0.1200,
                    radius_meters: 250.0,
                },
            ],
        }
    }

    // ~0.00045 degrees of latitude is ~50 m.
    const FIFTY_METERS_LAT: f64 = 0.00045;

    #[test]
    fn both_factors_pass() {
        let result = validate(
            &signal("10.22.5.9"),
            Some(&fix(51.5000 + FIFTY_METERS_LAT, -0.1200)),
            &config(),
        );
        assert!(result.ip_valid);
        assert!(result.location_valid);
        assert!(result.is_valid());
        assert_eq!(result.location, LocationCheck::Within);
        assert_eq!(result.campus_name.as_deref(), Some("Main"));
        let d = result.distance_meters.unwrap();
        assert!((d - 50.0).abs() < 2.0, "distance was {d}");
    }

    #[test]
    fn null_location_fails_closed() {
        let result = validate(&signal("10.22.5.9"), None, &config());
        assert!(result.ip_valid);
        assert!(!result.location_valid);
        assert!(!result.is_valid());
        assert_eq!(result.location, LocationCheck::NoFix);
        assert!(result.distance_meters.is_none());
    }

    #[test]
    fn out_of_range_is_distinct_from_no_fix() {
        let result = validate(&signal("10.22.5.9"), Some(&fix(48.8566, 2.3522)), &config());
        assert!(result.ip_valid);
        assert!(!result.location_valid);
        assert_eq!(result.location, LocationCheck::OutOfRange);
        assert!(result.distance_meters.unwrap() > 300_000.0);
    }

    #[test]
    fn ip_mismatch_blocks_even_on_campus() {
        let result = validate(&signal("192.168.1.4"), Some(&fix(51.5000, -0.1200)), &config());
        assert!(!result.ip_valid);
        assert!(result.location_valid);
        assert!(!result.is_valid());
    }

    #[test]
    fn picks_nearest_matching_campus() {
        let mut cfg = config();
        cfg.campuses[0].radius_meters = 5_000.0;
        // Inside both radii, much closer to Annex.
        let result = validate(&signal("10.22.0.1"), Some(&fix(51.5095, -0.1200)), &cfg);
        assert_eq!(result.campus_name.as_deref(), Some("Annex"));
    }

    #[test]
    fn prefix_mode_over_approximates_subnets() {
        assert!(ip_matches("10.220.1.1", "10.22", IpMatchMode::Prefix));
        assert!(!ip_matches("10.220.1.1", "10.22.0.0/16", IpMatchMode::Cidr));
        assert!(ip_matches("10.22.200.1", "10.22.0.0/16", IpMatchMode::Cidr));
    }

    #[test]
    fn empty_or_malformed_rules_never_match() {
        assert!(!ip_matches("10.22.5.9", "", IpMatchMode::Prefix));
        assert!(!ip_matches("10.22.5.9", "   ", IpMatchMode::Prefix));
        assert!(!ip_matches("10.22.5.9", "10.22", IpMatchMode::Cidr));
        assert!(!ip_matches("not-an-ip", "10.0.0.0/8", IpMatchMode::Cidr));
    }

    #[test]
    fn garbage_coordinates_count_as_no_fix() {
        let result = validate(&signal("10.22.5.9"), Some(&fix(f64::NAN, 0.0)), &config());
        assert_eq!(result.location, LocationCheck::NoFix);
        let result = validate(&signal("10.22.5.9"), Some(&fix(123.0, 0.0)), &config());
        assert_eq!(result.location, LocationCheck::NoFix);
    }

    #[test]
    fn no_campuses_means_out_of_range() {
        let mut cfg = config();
        cfg.campuses.clear();
        let result = validate(&signal("10.22.5.9"), Some(&fix(51.5, -0.12)), &cfg);
        assert_eq!(result.location, LocationCheck::OutOfRange);
        assert!(result.campus_name.is_none());
    }

    #[test]
    fn validation_is_deterministic() {
        let cfg = config();
        let s = signal("10.22.5.9");
        let f = fix(51.5001, -0.1201);
        assert_eq!(validate(&s, Some(&f), &cfg), validate(&s, Some(&f), &cfg));
    }

    #[test]
    fn haversine_known_distance() {
        // London -> Paris is roughly 343.5 km.
        let d = haversine_meters(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343_500.0).abs() < 2_000.0, "distance was {d}");
        assert!(haversine_meters(10.0, 10.0, 10.0, 10.0).abs() < f64::EPSILON);
    }
}
