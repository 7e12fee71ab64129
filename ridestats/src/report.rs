use std::fmt::Write;

use crate::activity::Activity;

fn clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Human-readable ride summary, one metric per line in a fixed order.
pub fn format_summary(activity: &Activity) -> String {
    let s = activity.summary();
    let mut out = String::new();
    let _ = writeln!(out, "Distance: {} mi", s.distance_mi);
    let _ = writeln!(out, "Ride Time: {}", clock(s.ride_time_s));
    let _ = writeln!(out, "Average Speed: {} mph", s.avg_speed_mph);
    let _ = writeln!(out, "Average Cadence: {}", s.avg_cadence_rpm);
    let _ = writeln!(out, "Average Heart Rate: {} bpm", s.avg_heart_rate_bpm);
    let _ = writeln!(out, "Average Power: {}W", s.avg_power_w);
    let _ = writeln!(out, "Normalized Power: {}W", s.normalized_power_w);
    let _ = writeln!(out, "FTP Setting: {}W", s.ftp_w);
    match s.calories {
        Some(kcal) => {
            let _ = writeln!(out, "Calories: {:.0}", kcal);
        }
        None => {
            let _ = writeln!(out, "Calories: n/a");
        }
    }
    let _ = writeln!(out, "Intensity Factor: {:.2}", s.intensity_factor);
    let _ = writeln!(out, "Training Stress Score: {}", s.training_stress_score);
    let _ = writeln!(out, "Total Ascent: {} ft", s.climb_ft);
    let _ = writeln!(out, "Total Descent: {} ft", s.descent_ft);
    if let Some(vi) = s.variability_index {
        let _ = writeln!(out, "Variability Index: {:.2}", vi);
    }
    if let Some(temp) = s.avg_temperature_f {
        let _ = writeln!(out, "Average Temperature: {} F", temp);
    }
    out
}

/// Sample indices for time-axis labels: four evenly spaced ticks starting at
/// the first sample, plus the last sample.
pub fn time_tick_indices(len: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let step = len / 4;
    let mut ticks: Vec<usize> = (0..4).map(|i| i * step).collect();
    ticks.push(len - 1);
    ticks.dedup();
    ticks
}

/// Four evenly spaced value-axis ticks from the channel minimum to its
/// maximum plus ten, truncated to whole numbers.
pub fn value_ticks(values: &[f64]) -> Option<[i64; 4]> {
    let (lo, hi) = values.iter().fold(None, |acc: Option<(f64, f64)>, &v| {
        Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
    })?;
    let top = hi + 10.0;
    let step = (top - lo) / 3.0;
    Some([
        lo as i64,
        (lo + step) as i64,
        (lo + 2.0 * step) as i64,
        top as i64,
    ])
}
