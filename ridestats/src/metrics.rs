//! Derived ride metrics: climb/descent, normalized power, averages,
//! intensity factor and training stress score.

use ndarray::{Array1, ArrayView1};

use crate::activity::{RideSummary, SampleStreams};
use crate::{Channel, Params, Result, RideError};

/// Samples in the centered elevation smoothing window.
pub const CLIMB_SMOOTHING_WINDOW: usize = 25;
/// Samples in the normalized power rolling window.
pub const NP_WINDOW: usize = 30;

fn rolling_mean(values: &[f64], window: usize) -> Array1<f64> {
    ArrayView1::from(values)
        .windows(window)
        .into_iter()
        .map(|w| w.sum() / window as f64)
        .collect()
}

fn require(channel: Channel, available: usize, required: usize) -> Result<()> {
    if available < required {
        return Err(RideError::InsufficientData {
            channel,
            required,
            available,
        });
    }
    Ok(())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn mean<I>(channel: Channel, values: I) -> Result<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return Err(RideError::EmptyChannel(channel));
    }
    Ok(sum / count as f64)
}

fn max<I>(channel: Channel, values: I) -> Result<f64>
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
        .ok_or(RideError::EmptyChannel(channel))
}

fn as_f64(values: &[u32]) -> impl Iterator<Item = f64> + '_ {
    values.iter().map(|&v| f64::from(v))
}

/// Total climb and descent of an elevation series, after smoothing it with a
/// centered rolling mean over [`CLIMB_SMOOTHING_WINDOW`] samples.
pub fn climb_descent(elevation: &[f64]) -> Result<(i64, i64)> {
    require(Channel::Elevation, elevation.len(), CLIMB_SMOOTHING_WINDOW)?;
    let smoothed = rolling_mean(elevation, CLIMB_SMOOTHING_WINDOW);
    let mut climb = 0.0;
    let mut descent = 0.0;
    for pair in smoothed.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            climb += delta;
        } else {
            descent -= delta;
        }
    }
    Ok((climb.round() as i64, descent.round() as i64))
}

/// Normalized power:
/// 1) 30-sample rolling mean of power
/// 2) mean of the 4th powers
/// 3) 4th root
pub fn normalized_power(power: &[u32]) -> Result<u32> {
    require(Channel::Power, power.len(), NP_WINDOW)?;
    let watts: Vec<f64> = as_f64(power).collect();
    let fourth_power_avg = rolling_mean(&watts, NP_WINDOW)
        .mapv(|v| v.powi(4))
        .mean()
        .ok_or(RideError::EmptyChannel(Channel::Power))?;
    Ok(fourth_power_avg.powf(0.25).round() as u32)
}

pub fn average_speed(speed_mph: &[f64]) -> Result<f64> {
    Ok(round_to(mean(Channel::Speed, speed_mph.iter().copied())?, 1))
}

pub fn average_power(power: &[u32]) -> Result<u32> {
    Ok(mean(Channel::Power, as_f64(power))?.round() as u32)
}

pub fn average_heart_rate(heart_rate: &[u32]) -> Result<u32> {
    Ok(mean(Channel::HeartRate, as_f64(heart_rate))?.round() as u32)
}

/// Mean cadence while pedaling; zero samples (coasting) are left out.
pub fn average_cadence(cadence: &[u32]) -> Result<u32> {
    let pedaling = as_f64(cadence).filter(|&c| c > 0.0);
    Ok(mean(Channel::Cadence, pedaling)?.round() as u32)
}

fn check_ftp(ftp_w: f64) -> Result<()> {
    if !(ftp_w.is_finite() && ftp_w > 0.0) {
        return Err(RideError::InvalidParameter(format!(
            "ftp must be positive, got {}",
            ftp_w
        )));
    }
    Ok(())
}

/// IF = NP / FTP
pub fn intensity_factor(normalized_power_w: u32, ftp_w: f64) -> Result<f64> {
    check_ftp(ftp_w)?;
    Ok(round_to(f64::from(normalized_power_w) / ftp_w, 2))
}

/// TSS = (seconds × NP × IF) / (FTP × 3600) × 100, truncated.
///
/// `seconds` is the sample count times the sampling interval, which assumes
/// samples are evenly spaced at that interval.
pub fn training_stress_score(
    samples: usize,
    sample_interval_s: f64,
    normalized_power_w: u32,
    intensity_factor: f64,
    ftp_w: f64,
) -> Result<u32> {
    check_ftp(ftp_w)?;
    if !(sample_interval_s.is_finite() && sample_interval_s > 0.0) {
        return Err(RideError::InvalidParameter(format!(
            "sample interval must be positive, got {}",
            sample_interval_s
        )));
    }
    let seconds = samples as f64 * sample_interval_s;
    let score = (seconds * f64::from(normalized_power_w) * intensity_factor) / (ftp_w * 3600.0)
        * 100.0;
    Ok(score.trunc() as u32)
}

/// VI = NP / average power
pub fn variability_index(normalized_power_w: u32, avg_power_w: u32) -> Option<f64> {
    if avg_power_w == 0 {
        return None;
    }
    Some(round_to(
        f64::from(normalized_power_w) / f64::from(avg_power_w),
        2,
    ))
}

pub fn summarize(streams: &SampleStreams, params: &Params) -> Result<RideSummary> {
    params.validate()?;

    let normalized_power_w = normalized_power(streams.power_w())?;
    let avg_power_w = average_power(streams.power_w())?;
    let intensity = intensity_factor(normalized_power_w, params.ftp_w)?;
    let tss = training_stress_score(
        streams.len(),
        params.sample_interval_s,
        normalized_power_w,
        intensity,
        params.ftp_w,
    )?;
    let (climb_ft, descent_ft) = climb_descent(streams.elevation_ft())?;

    let avg_temperature_f = match streams.temperature_f() {
        Some(temps) => Some(round_to(mean(Channel::Temperature, temps.iter().copied())?, 1)),
        None => None,
    };

    Ok(RideSummary {
        distance_mi: round_to(max(Channel::Distance, streams.distance_mi().iter().copied())?, 2),
        ride_time_s: streams.ride_time().num_seconds(),
        avg_speed_mph: average_speed(streams.speed_mph())?,
        max_speed_mph: round_to(max(Channel::Speed, streams.speed_mph().iter().copied())?, 1),
        avg_cadence_rpm: average_cadence(streams.cadence_rpm())?,
        avg_heart_rate_bpm: average_heart_rate(streams.heart_rate_bpm())?,
        max_heart_rate_bpm: max(Channel::HeartRate, as_f64(streams.heart_rate_bpm()))? as u32,
        avg_power_w,
        max_power_w: max(Channel::Power, as_f64(streams.power_w()))? as u32,
        normalized_power_w,
        ftp_w: params.ftp_w,
        intensity_factor: intensity,
        training_stress_score: tss,
        variability_index: variability_index(normalized_power_w, avg_power_w),
        climb_ft,
        descent_ft,
        calories: streams.calories(),
        avg_temperature_f,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::StreamParts;
    use chrono::{Duration, FixedOffset, TimeZone};

    #[test]
    fn climb_of_increasing_series() {
        let elevation: Vec<f64> = (0..100).map(|i| i as f64).collect();
        // 76 smoothed points from 12.0 to 87.0
        assert_eq!(climb_descent(&elevation).unwrap(), (75, 0));

        let falling: Vec<f64> = elevation.iter().rev().copied().collect();
        assert_eq!(climb_descent(&falling).unwrap(), (0, 75));
    }

    #[test]
    fn flat_series_has_no_climb() {
        assert_eq!(climb_descent(&[512.0; 40]).unwrap(), (0, 0));
        assert_eq!(climb_descent(&[512.0; 25]).unwrap(), (0, 0));
    }

    #[test]
    fn smoothing_absorbs_short_spikes() {
        let mut elevation = vec![100.0; 60];
        elevation[30] = 125.0;
        // one spike of 25 shifts a 25-sample mean by exactly 1
        assert_eq!(climb_descent(&elevation).unwrap(), (1, 1));
    }

    #[test]
    fn climb_needs_full_window() {
        let err = climb_descent(&[1.0; 24]).unwrap_err();
        assert!(matches!(
            err,
            RideError::InsufficientData {
                channel: Channel::Elevation,
                required: 25,
                available: 24
            }
        ));
    }

    #[test]
    fn normalized_power_of_constant_effort() {
        assert_eq!(normalized_power(&[250; 30]).unwrap(), 250);
        assert_eq!(normalized_power(&[210; 3600]).unwrap(), 210);
    }

    #[test]
    fn normalized_power_weights_surges() {
        let mut power = vec![100u32; 60];
        for w in power.iter_mut().skip(30) {
            *w = 300;
        }
        let np = normalized_power(&power).unwrap();
        assert!(np > average_power(&power).unwrap());
        assert!(np < 300);
    }

    #[test]
    fn normalized_power_needs_full_window() {
        let err = normalized_power(&[200; 29]).unwrap_err();
        assert!(matches!(
            err,
            RideError::InsufficientData {
                channel: Channel::Power,
                required: 30,
                available: 29
            }
        ));
    }

    #[test]
    fn cadence_average_skips_coasting() {
        assert_eq!(average_cadence(&[0, 0, 80, 90, 100]).unwrap(), 90);
        assert!(matches!(
            average_cadence(&[0, 0, 0]),
            Err(RideError::EmptyChannel(Channel::Cadence))
        ));
    }

    #[test]
    fn averages_round_to_channel_precision() {
        assert_eq!(average_speed(&[17.24, 17.25, 17.31]).unwrap(), 17.3);
        assert_eq!(average_power(&[200, 201]).unwrap(), 201);
        assert_eq!(average_heart_rate(&[140, 141, 141]).unwrap(), 141);
        assert!(matches!(
            average_speed(&[]),
            Err(RideError::EmptyChannel(Channel::Speed))
        ));
    }

    #[test]
    fn one_hour_at_threshold_scores_one_hundred() {
        let power = vec![210u32; 3600];
        let np = normalized_power(&power).unwrap();
        let intensity = intensity_factor(np, 210.0).unwrap();
        assert_eq!(intensity, 1.0);
        assert_eq!(
            training_stress_score(power.len(), 1.0, np, intensity, 210.0).unwrap(),
            100
        );
    }

    #[test]
    fn stress_score_scales_with_sample_interval() {
        // 1800 samples at 2 s cover the same hour
        assert_eq!(training_stress_score(1800, 2.0, 210, 1.0, 210.0).unwrap(), 100);
        assert_eq!(training_stress_score(1800, 1.0, 210, 1.0, 210.0).unwrap(), 50);
        assert!(training_stress_score(1800, 0.0, 210, 1.0, 210.0).is_err());
    }

    #[test]
    fn intensity_factor_rounds_to_hundredths() {
        assert_eq!(intensity_factor(180, 210.0).unwrap(), 0.86);
        assert!(intensity_factor(180, 0.0).is_err());
    }

    #[test]
    fn variability_index_guards_zero_average() {
        assert_eq!(variability_index(220, 200), Some(1.1));
        assert_eq!(variability_index(220, 0), None);
    }

    #[test]
    fn summarize_synthetic_ride() {
        let n = 3600;
        let offset = FixedOffset::west_opt(7 * 3600).unwrap();
        let start = offset.with_ymd_and_hms(2015, 12, 1, 8, 0, 0).unwrap();
        let parts = StreamParts {
            time: (0..n).map(|i| start + Duration::seconds(i as i64)).collect(),
            distance_mi: (0..n).map(|i| (i / 200) as f64).collect(),
            elevation_ft: (0..n).map(|i| (i / 10) as f64).collect(),
            speed_mph: vec![18.0; n],
            heart_rate_bpm: vec![150; n],
            cadence_rpm: (0..n).map(|i| if i % 10 == 0 { 0 } else { 90 }).collect(),
            power_w: vec![210; n],
            temperature_f: Some(vec![50.0; n]),
            calories: Some(812.0),
            ..StreamParts::default()
        };
        let streams = SampleStreams::new(parts, offset).unwrap();
        let summary = summarize(&streams, &Params::default()).unwrap();

        assert_eq!(summary.distance_mi, 17.0);
        assert_eq!(summary.ride_time_s, 3599);
        assert_eq!(summary.avg_speed_mph, 18.0);
        assert_eq!(summary.avg_cadence_rpm, 90);
        assert_eq!(summary.avg_heart_rate_bpm, 150);
        assert_eq!(summary.avg_power_w, 210);
        assert_eq!(summary.normalized_power_w, 210);
        assert_eq!(summary.intensity_factor, 1.0);
        assert_eq!(summary.training_stress_score, 100);
        assert_eq!(summary.variability_index, Some(1.0));
        assert_eq!(summary.climb_ft, 357);
        assert_eq!(summary.descent_ft, 0);
        assert_eq!(summary.calories, Some(812.0));
        assert_eq!(summary.avg_temperature_f, Some(50.0));
    }
}
