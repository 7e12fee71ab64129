use std::panic;
use std::path::Path;

use anyhow::Result;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use ridestats::{time_tick_indices, value_ticks, Activity};

const CHART_SIZE: (u32, u32) = (1200, 1000);

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

struct Panel {
    label: &'static str,
    values: Vec<f64>,
    color: RGBColor,
}

fn panels(activity: &Activity) -> Vec<Panel> {
    let streams = activity.streams();
    let as_f64 = |values: &[u32]| values.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();
    let mut panels = vec![
        Panel {
            label: "Elevation (ft)",
            values: streams.elevation_ft().to_vec(),
            color: RGBColor(0x00, 0x67, 0x00),
        },
        Panel {
            label: "Speed (mph)",
            values: streams.speed_mph().to_vec(),
            color: RGBColor(0x00, 0x77, 0xB9),
        },
        Panel {
            label: "Heart rate (bpm)",
            values: as_f64(streams.heart_rate_bpm()),
            color: RGBColor(0xEB, 0x00, 0x39),
        },
        Panel {
            label: "Power (W)",
            values: as_f64(streams.power_w()),
            color: RGBColor(0x9F, 0x00, 0xBD),
        },
        Panel {
            label: "Cadence (rpm)",
            values: as_f64(streams.cadence_rpm()),
            color: RGBColor(0xD4, 0x68, 0x00),
        },
    ];
    if let Some(temps) = streams.temperature_f() {
        panels.push(Panel {
            label: "Temperature (F)",
            values: temps.to_vec(),
            color: RGBColor(0x00, 0xA3, 0xA3),
        });
    }
    panels
}

/// Renders the stacked channel chart, turning backend errors and panics into
/// a message so a failed chart never aborts the run.
pub fn render_chart_guard(activity: &Activity, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(activity, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(activity: &Activity, path: &Path, kind: ChartKind) -> Result<()> {
    if activity.streams().is_empty() {
        return Ok(());
    }
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_panels(root, activity)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_panels(root, activity)
        }
    }
}

fn draw_panels<DB>(root: DrawingArea<DB, Shift>, activity: &Activity) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let times = activity.streams().time();
    let x_ticks: Vec<f64> = time_tick_indices(times.len())
        .into_iter()
        .map(|i| i as f64)
        .collect();
    let x_max = (times.len() - 1).max(1) as f64;
    let time_label = |v: &f64| {
        let idx = (v.round().max(0.0) as usize).min(times.len() - 1);
        times[idx].format("%H:%M:%S").to_string()
    };

    let panels = panels(activity);
    let areas = root.split_evenly((panels.len(), 1));
    let axis_font = FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal);
    let caption_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);

    for (area, panel) in areas.iter().zip(panels.iter()) {
        let Some(ticks) = value_ticks(&panel.values) else {
            continue;
        };
        let lo = panel.values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = panel.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let floor = lo - 10.0;
        let y_ticks: Vec<f64> = ticks.iter().map(|&t| t as f64).collect();

        let mut chart = ChartBuilder::on(area)
            .margin(8)
            .caption(panel.label, caption_font.clone())
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 25)
            .build_cartesian_2d(
                (0.0..x_max).with_key_points(x_ticks.clone()),
                (floor..hi + 10.0).with_key_points(y_ticks),
            )?;

        chart
            .configure_mesh()
            .light_line_style(&TRANSPARENT)
            .bold_line_style(&BLACK.mix(0.1))
            .x_labels(x_ticks.len())
            .y_labels(ticks.len())
            .x_label_formatter(&time_label)
            .y_label_formatter(&|v| format!("{:.0}", v))
            .label_style(axis_font.clone().color(&BLACK.mix(0.85)))
            .draw()?;

        let points = || {
            panel
                .values
                .iter()
                .enumerate()
                .map(|(i, &v)| (i as f64, v))
        };
        chart.draw_series(AreaSeries::new(points(), floor, panel.color.mix(0.3)))?;
        chart.draw_series(LineSeries::new(
            points(),
            ShapeStyle {
                color: panel.color.to_rgba(),
                filled: false,
                stroke_width: 1,
            },
        ))?;
    }

    root.present()?;
    Ok(())
}
