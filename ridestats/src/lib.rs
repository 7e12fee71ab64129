//! Cycling telemetry ingestion and training-load metrics.
//!
//! A ride is read from a TCX course document (power, heart rate, cadence,
//! speed, distance, altitude) and an optional GPX track log (position,
//! elevation, temperature). The two are merged onto one time axis, converted
//! to imperial units and summarised into an [`Activity`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod activity;
pub mod metrics;
pub mod parse;
pub mod report;
pub mod timezone;
pub mod units;

pub use activity::{Activity, RideSummary, SampleStreams};
pub use parse::{load_activity, parse_documents};
pub use report::{format_summary, time_tick_indices, value_ticks};
pub use timezone::{FixedZone, TimezoneResolver, TzfLookup, WallClock, ZoneLookup};

#[derive(Error, Debug)]
pub enum RideError {
    #[error("failed to parse document: {0}")]
    Parse(String),
    #[error("no timezone found for coordinate ({latitude}, {longitude})")]
    Lookup { latitude: f64, longitude: f64 },
    #[error("insufficient {channel} data: need {required} samples, have {available}")]
    InsufficientData {
        channel: Channel,
        required: usize,
        available: usize,
    },
    #[error("{0} channel has no usable samples")]
    EmptyChannel(Channel),
    #[error("documents cannot be aligned: {0}")]
    Alignment(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RideError>;

/// Named sample channels carried by a ride.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Time,
    Latitude,
    Longitude,
    Elevation,
    Distance,
    HeartRate,
    Cadence,
    Speed,
    Power,
    Temperature,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Time => "time",
            Channel::Latitude => "latitude",
            Channel::Longitude => "longitude",
            Channel::Elevation => "elevation",
            Channel::Distance => "distance",
            Channel::HeartRate => "heart rate",
            Channel::Cadence => "cadence",
            Channel::Speed => "speed",
            Channel::Power => "power",
            Channel::Temperature => "temperature",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the UTC offset applied to every timestamp is chosen.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Offset of the ride's zone at the ride's own first instant.
    AtInstant,
    /// Offset of the ride's zone at the current wall-clock instant, minus one
    /// hour whenever the local system zone is not observing DST.
    Legacy,
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        OffsetPolicy::AtInstant
    }
}

/// How course and track samples are paired.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Nearest track sample in time for each course sample.
    Timestamp,
    /// Sample i of the course pairs with sample i of the track.
    Positional,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Timestamp
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElevationSource {
    /// Track elevation when a track document is present, course altitude otherwise.
    Auto,
    Course,
    Track,
}

impl Default for ElevationSource {
    fn default() -> Self {
        ElevationSource::Auto
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Functional threshold power in watts.
    pub ftp_w: f64,
    /// Seconds represented by one sample when scoring training stress.
    pub sample_interval_s: f64,
    pub offset_policy: OffsetPolicy,
    pub merge: MergeStrategy,
    /// Largest time gap accepted between paired course and track samples.
    pub merge_tolerance_s: f64,
    pub elevation_source: ElevationSource,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            ftp_w: 210.0,
            sample_interval_s: 1.0,
            offset_policy: OffsetPolicy::AtInstant,
            merge: MergeStrategy::Timestamp,
            merge_tolerance_s: 5.0,
            elevation_source: ElevationSource::Auto,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        if !(self.ftp_w.is_finite() && self.ftp_w > 0.0) {
            return Err(RideError::InvalidParameter(format!(
                "ftp must be positive, got {}",
                self.ftp_w
            )));
        }
        if !(self.sample_interval_s.is_finite() && self.sample_interval_s > 0.0) {
            return Err(RideError::InvalidParameter(format!(
                "sample interval must be positive, got {}",
                self.sample_interval_s
            )));
        }
        if !(self.merge_tolerance_s.is_finite() && self.merge_tolerance_s >= 0.0) {
            return Err(RideError::InvalidParameter(format!(
                "merge tolerance must be non-negative, got {}",
                self.merge_tolerance_s
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_fill_missing_fields_from_defaults() {
        let params: Params =
            serde_json::from_str(r#"{"ftp_w": 250, "merge": "positional"}"#).unwrap();
        assert_eq!(params.ftp_w, 250.0);
        assert_eq!(params.merge, MergeStrategy::Positional);
        assert_eq!(params.sample_interval_s, 1.0);
        assert_eq!(params.offset_policy, OffsetPolicy::AtInstant);
    }

    #[test]
    fn validate_rejects_non_positive_ftp() {
        let params = Params {
            ftp_w: 0.0,
            ..Params::default()
        };
        assert!(matches!(
            params.validate(),
            Err(RideError::InvalidParameter(_))
        ));
        assert!(Params::default().validate().is_ok());
    }
}
