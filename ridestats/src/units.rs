//! Metric to imperial conversions applied once after parsing.

pub const FEET_PER_METER: f64 = 3.28084;
pub const MPH_PER_MPS: f64 = 2.23694;
pub const MILES_PER_METER: f64 = 0.000_621_371_2;

pub fn meters_to_feet(meters: f64) -> f64 {
    meters * FEET_PER_METER
}

pub fn feet_to_meters(feet: f64) -> f64 {
    feet / FEET_PER_METER
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPH_PER_MPS
}

pub fn mph_to_mps(mph: f64) -> f64 {
    mph / MPH_PER_MPS
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters * MILES_PER_METER
}

pub fn miles_to_meters(miles: f64) -> f64 {
    miles / MILES_PER_METER
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn conversions_invert() {
        for &v in &[-40.0, 0.0, 1.0, 12.5, 1609.344, 8848.0] {
            assert!(close(feet_to_meters(meters_to_feet(v)), v));
            assert!(close(mph_to_mps(mps_to_mph(v)), v));
            assert!(close(miles_to_meters(meters_to_miles(v)), v));
            assert!(close(fahrenheit_to_celsius(celsius_to_fahrenheit(v)), v));
        }
    }

    #[test]
    fn conversions_are_monotonic() {
        let conversions: [fn(f64) -> f64; 4] = [
            meters_to_feet,
            mps_to_mph,
            meters_to_miles,
            celsius_to_fahrenheit,
        ];
        for convert in conversions {
            assert!(convert(10.0) < convert(10.5));
            assert!(convert(-3.0) < convert(0.0));
        }
    }

    #[test]
    fn known_reference_values() {
        assert!(close(celsius_to_fahrenheit(100.0), 212.0));
        assert!(close(celsius_to_fahrenheit(-40.0), -40.0));
        assert!((meters_to_miles(1609.344) - 1.0).abs() < 1e-6);
        assert!((mps_to_mph(10.0) - 22.3694).abs() < 1e-9);
    }
}
