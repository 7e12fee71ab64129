use chrono::{DateTime, Duration, FixedOffset};
use serde::Serialize;

use crate::metrics;
use crate::{Channel, Params, Result, RideError};

/// Merged, unit-converted channels of one ride, index-aligned on `time`.
///
/// Distances are miles, elevation feet, speed mph and temperature
/// Fahrenheit. Latitude, longitude and temperature only exist when a track
/// document was merged in.
#[derive(Clone, Debug, Serialize)]
pub struct SampleStreams {
    time: Vec<DateTime<FixedOffset>>,
    utc_offset_s: i32,
    distance_mi: Vec<f64>,
    elevation_ft: Vec<f64>,
    speed_mph: Vec<f64>,
    heart_rate_bpm: Vec<u32>,
    cadence_rpm: Vec<u32>,
    power_w: Vec<u32>,
    latitude: Option<Vec<f64>>,
    longitude: Option<Vec<f64>>,
    temperature_f: Option<Vec<f64>>,
    calories: Option<f64>,
}

/// Owned channel vectors handed to [`SampleStreams::new`].
#[derive(Clone, Debug, Default)]
pub struct StreamParts {
    pub time: Vec<DateTime<FixedOffset>>,
    pub distance_mi: Vec<f64>,
    pub elevation_ft: Vec<f64>,
    pub speed_mph: Vec<f64>,
    pub heart_rate_bpm: Vec<u32>,
    pub cadence_rpm: Vec<u32>,
    pub power_w: Vec<u32>,
    pub latitude: Option<Vec<f64>>,
    pub longitude: Option<Vec<f64>>,
    pub temperature_f: Option<Vec<f64>>,
    pub calories: Option<f64>,
}

impl SampleStreams {
    /// Checks that every channel has exactly one value per timestamp.
    pub fn new(parts: StreamParts, utc_offset: FixedOffset) -> Result<Self> {
        let n = parts.time.len();
        if n == 0 {
            return Err(RideError::Parse("ride contains no samples".into()));
        }
        let lengths = [
            (Channel::Distance, Some(parts.distance_mi.len())),
            (Channel::Elevation, Some(parts.elevation_ft.len())),
            (Channel::Speed, Some(parts.speed_mph.len())),
            (Channel::HeartRate, Some(parts.heart_rate_bpm.len())),
            (Channel::Cadence, Some(parts.cadence_rpm.len())),
            (Channel::Power, Some(parts.power_w.len())),
            (Channel::Latitude, parts.latitude.as_ref().map(Vec::len)),
            (Channel::Longitude, parts.longitude.as_ref().map(Vec::len)),
            (Channel::Temperature, parts.temperature_f.as_ref().map(Vec::len)),
        ];
        for (channel, len) in lengths {
            if let Some(len) = len {
                if len != n {
                    return Err(RideError::Alignment(format!(
                        "{} channel has {} samples, time axis has {}",
                        channel, len, n
                    )));
                }
            }
        }
        Ok(Self {
            time: parts.time,
            utc_offset_s: utc_offset.local_minus_utc(),
            distance_mi: parts.distance_mi,
            elevation_ft: parts.elevation_ft,
            speed_mph: parts.speed_mph,
            heart_rate_bpm: parts.heart_rate_bpm,
            cadence_rpm: parts.cadence_rpm,
            power_w: parts.power_w,
            latitude: parts.latitude,
            longitude: parts.longitude,
            temperature_f: parts.temperature_f,
            calories: parts.calories,
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[DateTime<FixedOffset>] {
        &self.time
    }

    pub fn utc_offset_s(&self) -> i32 {
        self.utc_offset_s
    }

    pub fn distance_mi(&self) -> &[f64] {
        &self.distance_mi
    }

    pub fn elevation_ft(&self) -> &[f64] {
        &self.elevation_ft
    }

    pub fn speed_mph(&self) -> &[f64] {
        &self.speed_mph
    }

    pub fn heart_rate_bpm(&self) -> &[u32] {
        &self.heart_rate_bpm
    }

    pub fn cadence_rpm(&self) -> &[u32] {
        &self.cadence_rpm
    }

    pub fn power_w(&self) -> &[u32] {
        &self.power_w
    }

    pub fn latitude(&self) -> Option<&[f64]> {
        self.latitude.as_deref()
    }

    pub fn longitude(&self) -> Option<&[f64]> {
        self.longitude.as_deref()
    }

    pub fn temperature_f(&self) -> Option<&[f64]> {
        self.temperature_f.as_deref()
    }

    pub fn calories(&self) -> Option<f64> {
        self.calories
    }

    /// Wall-clock span between the first and last sample.
    pub fn ride_time(&self) -> Duration {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => *last - *first,
            _ => Duration::zero(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RideSummary {
    pub distance_mi: f64,
    pub ride_time_s: i64,
    pub avg_speed_mph: f64,
    pub max_speed_mph: f64,
    pub avg_cadence_rpm: u32,
    pub avg_heart_rate_bpm: u32,
    pub max_heart_rate_bpm: u32,
    pub avg_power_w: u32,
    pub max_power_w: u32,
    pub normalized_power_w: u32,
    pub ftp_w: f64,
    pub intensity_factor: f64,
    pub training_stress_score: u32,
    pub variability_index: Option<f64>,
    pub climb_ft: i64,
    pub descent_ft: i64,
    pub calories: Option<f64>,
    pub avg_temperature_f: Option<f64>,
}

/// A parsed ride together with its derived metrics.
#[derive(Clone, Debug, Serialize)]
pub struct Activity {
    streams: SampleStreams,
    summary: RideSummary,
}

impl Activity {
    pub fn analyze(streams: SampleStreams, params: &Params) -> Result<Self> {
        let summary = metrics::summarize(&streams, params)?;
        Ok(Self { streams, summary })
    }

    pub fn streams(&self) -> &SampleStreams {
        &self.streams
    }

    pub fn summary(&self) -> &RideSummary {
        &self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parts(n: usize) -> StreamParts {
        let offset = FixedOffset::west_opt(7 * 3600).unwrap();
        let start = offset.with_ymd_and_hms(2015, 12, 1, 8, 0, 0).unwrap();
        StreamParts {
            time: (0..n).map(|i| start + Duration::seconds(i as i64)).collect(),
            distance_mi: vec![0.0; n],
            elevation_ft: vec![0.0; n],
            speed_mph: vec![0.0; n],
            heart_rate_bpm: vec![0; n],
            cadence_rpm: vec![0; n],
            power_w: vec![0; n],
            ..StreamParts::default()
        }
    }

    #[test]
    fn rejects_ragged_channels() {
        let mut ragged = parts(10);
        ragged.power_w.pop();
        let err = SampleStreams::new(ragged, FixedOffset::east_opt(0).unwrap()).unwrap_err();
        assert!(matches!(err, RideError::Alignment(_)));

        let mut ragged = parts(10);
        ragged.temperature_f = Some(vec![50.0; 3]);
        assert!(SampleStreams::new(ragged, FixedOffset::east_opt(0).unwrap()).is_err());
    }

    #[test]
    fn rejects_empty_ride() {
        let err = SampleStreams::new(parts(0), FixedOffset::east_opt(0).unwrap()).unwrap_err();
        assert!(matches!(err, RideError::Parse(_)));
    }

    #[test]
    fn ride_time_spans_first_to_last() {
        let streams = SampleStreams::new(parts(61), FixedOffset::east_opt(0).unwrap()).unwrap();
        assert_eq!(streams.len(), 61);
        assert_eq!(streams.ride_time(), Duration::seconds(60));
    }
}
