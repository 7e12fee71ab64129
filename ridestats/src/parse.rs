//! TCX/GPX ingestion.
//!
//! Both formats are read with a pull parser that gathers, per trackpoint, the
//! text of every nested element keyed by its local name (namespace prefixes
//! such as `ns3:Watts` or `gpxtpx:atemp` are dropped). Channels are then
//! built whole from those maps, one `Vec` per channel.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, warn};

use crate::activity::{Activity, SampleStreams, StreamParts};
use crate::timezone::TimezoneResolver;
use crate::units;
use crate::{ElevationSource, MergeStrategy, Params, Result, RideError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// Training Center course/activity export (`.tcx`).
    Course,
    /// GPS exchange track log (`.gpx`).
    Track,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tcx" => Some(DocumentKind::Course),
            "gpx" => Some(DocumentKind::Track),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawPoint {
    attributes: HashMap<String, String>,
    fields: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct RawDocument {
    points: Vec<RawPoint>,
    document_fields: HashMap<String, Vec<String>>,
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn read_attributes(start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| RideError::Parse(format!("bad attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| RideError::Parse(format!("bad attribute value: {}", e)))?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

/// Text inside a trackpoint belongs to every open element below it, so a
/// wrapper such as `<HeartRateBpm><Value>142</Value></HeartRateBpm>` reads
/// as "142" under both names.
fn append_text(open: &mut [(String, String)], point_depth: Option<usize>, text: &str) {
    match point_depth {
        Some(depth) => {
            for (_, buf) in open.iter_mut().skip(depth + 1) {
                buf.push_str(text);
            }
        }
        None => {
            if let Some((_, buf)) = open.last_mut() {
                buf.push_str(text);
            }
        }
    }
}

fn collect_points(xml: &str, point_tag: &str, document_tags: &[&str]) -> Result<RawDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut doc = RawDocument::default();
    let mut open: Vec<(String, String)> = Vec::new();
    let mut point: Option<(RawPoint, usize)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            RideError::Parse(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;
        match event {
            Event::Start(start) => {
                let name = local_name(&start);
                if point.is_none() && name == point_tag {
                    let raw = RawPoint {
                        attributes: read_attributes(&start)?,
                        fields: HashMap::new(),
                    };
                    point = Some((raw, open.len()));
                }
                open.push((name, String::new()));
            }
            Event::Empty(start) => {
                let name = local_name(&start);
                if let Some((raw, _)) = point.as_mut() {
                    raw.fields.entry(name).or_default();
                } else if name == point_tag {
                    doc.points.push(RawPoint {
                        attributes: read_attributes(&start)?,
                        fields: HashMap::new(),
                    });
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| RideError::Parse(format!("bad text content: {}", e)))?;
                append_text(&mut open, point.as_ref().map(|(_, d)| *d), &text);
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&mut open, point.as_ref().map(|(_, d)| *d), &text);
            }
            Event::End(_) => {
                let (name, text) = open
                    .pop()
                    .ok_or_else(|| RideError::Parse("unexpected closing tag".into()))?;
                let closes_point = matches!(&point, Some((_, depth)) if *depth == open.len());
                if closes_point {
                    if let Some((raw, _)) = point.take() {
                        doc.points.push(raw);
                    }
                } else if let Some((raw, _)) = point.as_mut() {
                    raw.fields
                        .entry(name)
                        .or_insert_with(|| text.trim().to_string());
                } else if document_tags.contains(&name.as_str()) {
                    doc.document_fields
                        .entry(name)
                        .or_default()
                        .push(text.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some((name, _)) = open.last() {
        return Err(RideError::Parse(format!(
            "document ended inside <{}>",
            name
        )));
    }
    Ok(doc)
}

fn parse_float(text: &str, what: &str) -> Result<f64> {
    let value: f64 = text
        .parse()
        .map_err(|_| RideError::Parse(format!("{}: '{}' is not a number", what, text)))?;
    if !value.is_finite() {
        return Err(RideError::Parse(format!("{}: '{}' is not finite", what, text)));
    }
    Ok(value)
}

/// Parses `YYYY-MM-DDTHH:MM:SS[.ffffff]Z` as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| RideError::Parse(format!("invalid timestamp '{}': {}", text, e)))
}

impl RawPoint {
    fn field(&self, index: usize, name: &str) -> Result<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| RideError::Parse(format!("trackpoint {}: missing <{}>", index, name)))
    }

    fn float(&self, index: usize, name: &str) -> Result<f64> {
        parse_float(
            self.field(index, name)?,
            &format!("trackpoint {} <{}>", index, name),
        )
    }

    fn count(&self, index: usize, name: &str) -> Result<u32> {
        let text = self.field(index, name)?;
        text.parse().map_err(|_| {
            RideError::Parse(format!(
                "trackpoint {} <{}>: '{}' is not a whole number",
                index, name, text
            ))
        })
    }

    fn timestamp(&self, index: usize, name: &str) -> Result<DateTime<Utc>> {
        parse_timestamp(self.field(index, name)?)
            .map_err(|e| RideError::Parse(format!("trackpoint {}: {}", index, e)))
    }

    fn attribute_float(&self, index: usize, name: &str) -> Result<f64> {
        let text = self.attributes.get(name).ok_or_else(|| {
            RideError::Parse(format!("trackpoint {}: missing attribute {}", index, name))
        })?;
        parse_float(text, &format!("trackpoint {} @{}", index, name))
    }
}

fn channel<T, F>(points: &[RawPoint], extract: F) -> Result<Vec<T>>
where
    F: Fn(usize, &RawPoint) -> Result<T>,
{
    points
        .iter()
        .enumerate()
        .map(|(i, p)| extract(i, p))
        .collect()
}

/// Raw (metric, UTC) channels of a course document.
#[derive(Debug)]
struct CourseLog {
    time: Vec<DateTime<Utc>>,
    first_position: Option<(f64, f64)>,
    altitude_m: Vec<f64>,
    distance_m: Vec<f64>,
    speed_mps: Vec<f64>,
    heart_rate_bpm: Vec<u32>,
    cadence_rpm: Vec<u32>,
    power_w: Vec<u32>,
    calories: Option<f64>,
}

fn parse_course(xml: &str) -> Result<CourseLog> {
    let doc = collect_points(xml, "Trackpoint", &["Calories"])?;
    let points = &doc.points;
    let first = points
        .first()
        .ok_or_else(|| RideError::Parse("course document has no <Trackpoint> elements".into()))?;

    let first_position = if first.fields.contains_key("LatitudeDegrees")
        || first.fields.contains_key("LongitudeDegrees")
    {
        Some((
            first.float(0, "LatitudeDegrees")?,
            first.float(0, "LongitudeDegrees")?,
        ))
    } else {
        None
    };

    let calories = match doc.document_fields.get("Calories") {
        Some(values) => {
            let mut total = 0.0;
            for v in values {
                total += parse_float(v, "<Calories>")?;
            }
            Some(total)
        }
        None => None,
    };

    let log = CourseLog {
        time: channel(points, |i, p| p.timestamp(i, "Time"))?,
        first_position,
        altitude_m: channel(points, |i, p| p.float(i, "AltitudeMeters"))?,
        distance_m: channel(points, |i, p| p.float(i, "DistanceMeters"))?,
        speed_mps: channel(points, |i, p| p.float(i, "Speed"))?,
        heart_rate_bpm: channel(points, |i, p| p.count(i, "HeartRateBpm"))?,
        cadence_rpm: channel(points, |i, p| p.count(i, "Cadence"))?,
        power_w: channel(points, |i, p| p.count(i, "Watts"))?,
        calories,
    };
    debug!(
        "course document: {} trackpoints, calories {:?}",
        log.time.len(),
        log.calories
    );
    Ok(log)
}

/// Raw (metric, UTC) channels of a track document.
#[derive(Debug)]
struct TrackLog {
    time: Vec<DateTime<Utc>>,
    latitude: Vec<f64>,
    longitude: Vec<f64>,
    elevation_m: Vec<f64>,
    temperature_c: Option<Vec<f64>>,
}

fn parse_track(xml: &str) -> Result<TrackLog> {
    let doc = collect_points(xml, "trkpt", &[])?;
    let points = &doc.points;
    let first = points
        .first()
        .ok_or_else(|| RideError::Parse("track document has no <trkpt> elements".into()))?;

    let temperature_c = if first.fields.contains_key("atemp") {
        Some(channel(points, |i, p| p.float(i, "atemp"))?)
    } else {
        None
    };

    let log = TrackLog {
        time: channel(points, |i, p| p.timestamp(i, "time"))?,
        latitude: channel(points, |i, p| p.attribute_float(i, "lat"))?,
        longitude: channel(points, |i, p| p.attribute_float(i, "lon"))?,
        elevation_m: channel(points, |i, p| p.float(i, "ele"))?,
        temperature_c,
    };
    debug!(
        "track document: {} points, temperature {}",
        log.time.len(),
        if log.temperature_c.is_some() { "present" } else { "absent" }
    );
    Ok(log)
}

fn nearest_index(sorted: &[DateTime<Utc>], target: DateTime<Utc>) -> usize {
    let idx = sorted.partition_point(|t| *t < target);
    if idx == 0 {
        0
    } else if idx == sorted.len() {
        idx - 1
    } else if target - sorted[idx - 1] <= sorted[idx] - target {
        idx - 1
    } else {
        idx
    }
}

/// Track index paired with each retained course sample. Course sample `i`
/// pairs with `pairs[i]`; course samples past `pairs.len()` are dropped.
fn pair_samples(
    course: &[DateTime<Utc>],
    track: &[DateTime<Utc>],
    params: &Params,
) -> Result<Vec<usize>> {
    match params.merge {
        MergeStrategy::Positional => {
            if course.len() != track.len() {
                warn!(
                    "positional merge: course has {} samples, track has {}; truncating to {}",
                    course.len(),
                    track.len(),
                    course.len().min(track.len())
                );
            }
            Ok((0..course.len().min(track.len())).collect())
        }
        MergeStrategy::Timestamp => {
            if track.windows(2).any(|w| w[1] < w[0]) {
                return Err(RideError::Parse(
                    "track timestamps are not in chronological order".into(),
                ));
            }
            let mut pairs = Vec::with_capacity(course.len());
            let mut worst_gap_s = 0.0f64;
            for (i, &t) in course.iter().enumerate() {
                let j = nearest_index(track, t);
                let gap_s = (t - track[j]).num_milliseconds().abs() as f64 / 1000.0;
                if gap_s > params.merge_tolerance_s {
                    return Err(RideError::Alignment(format!(
                        "course sample {} at {} is {:.1}s from the nearest track sample (tolerance {:.1}s)",
                        i, t, gap_s, params.merge_tolerance_s
                    )));
                }
                worst_gap_s = worst_gap_s.max(gap_s);
                pairs.push(j);
            }
            debug!(
                "timestamp merge: {} samples paired, largest gap {:.3}s",
                pairs.len(),
                worst_gap_s
            );
            Ok(pairs)
        }
    }
}

fn pick(values: &[f64], pairs: &[usize]) -> Vec<f64> {
    pairs.iter().map(|&j| values[j]).collect()
}

fn convert(values: &[f64], f: fn(f64) -> f64) -> Vec<f64> {
    values.iter().map(|&v| f(v)).collect()
}

fn build_streams(
    course: CourseLog,
    track: Option<TrackLog>,
    params: &Params,
    resolver: &TimezoneResolver,
) -> Result<SampleStreams> {
    let (latitude, longitude) = course
        .first_position
        .or_else(|| {
            track
                .as_ref()
                .and_then(|t| Some((*t.latitude.first()?, *t.longitude.first()?)))
        })
        .ok_or_else(|| {
            RideError::Parse(
                "first trackpoint has no <LatitudeDegrees>/<LongitudeDegrees> and no track document was supplied"
                    .into(),
            )
        })?;
    let offset: FixedOffset =
        resolver.resolve_offset(latitude, longitude, course.time[0], params.offset_policy)?;
    info!(
        "UTC offset {} resolved from ({:.4}, {:.4})",
        offset, latitude, longitude
    );

    let pairs = match &track {
        Some(t) => Some(pair_samples(&course.time, &t.time, params)?),
        None => None,
    };
    let n = pairs.as_ref().map_or(course.time.len(), Vec::len);
    let matched = track.as_ref().zip(pairs.as_deref());

    let elevation_m = match (params.elevation_source, matched) {
        (ElevationSource::Course, _) | (ElevationSource::Auto, None) => course.altitude_m[..n].to_vec(),
        (_, Some((track, pairs))) => pick(&track.elevation_m, pairs),
        (ElevationSource::Track, None) => {
            return Err(RideError::InvalidParameter(
                "track elevation requested but no track document was supplied".into(),
            ))
        }
    };

    let parts = StreamParts {
        time: course.time[..n]
            .iter()
            .map(|t| t.with_timezone(&offset))
            .collect(),
        distance_mi: convert(&course.distance_m[..n], units::meters_to_miles),
        elevation_ft: convert(&elevation_m, units::meters_to_feet),
        speed_mph: convert(&course.speed_mps[..n], units::mps_to_mph),
        heart_rate_bpm: course.heart_rate_bpm[..n].to_vec(),
        cadence_rpm: course.cadence_rpm[..n].to_vec(),
        power_w: course.power_w[..n].to_vec(),
        latitude: matched.map(|(t, p)| pick(&t.latitude, p)),
        longitude: matched.map(|(t, p)| pick(&t.longitude, p)),
        temperature_f: matched.and_then(|(t, p)| {
            t.temperature_c
                .as_ref()
                .map(|temps| convert(&pick(temps, p), units::celsius_to_fahrenheit))
        }),
        calories: course.calories,
    };
    SampleStreams::new(parts, offset)
}

/// Parse a course document and an optional track document already in memory.
pub fn parse_documents(
    course_xml: &str,
    track_xml: Option<&str>,
    params: &Params,
    resolver: &TimezoneResolver,
) -> Result<SampleStreams> {
    params.validate()?;
    let course = parse_course(course_xml)?;
    let track = track_xml.map(parse_track).transpose()?;
    build_streams(course, track, params, resolver)
}

fn read_document(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| RideError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|e| {
        RideError::Parse(format!("{} is not valid UTF-8: {}", path.display(), e))
    })
}

/// Read, merge and analyze a ride from disk.
pub fn load_activity(
    course_path: &Path,
    track_path: Option<&Path>,
    params: &Params,
    resolver: &TimezoneResolver,
) -> Result<Activity> {
    let course_xml = read_document(course_path)?;
    let track_xml = track_path.map(read_document).transpose()?;
    let streams = parse_documents(&course_xml, track_xml.as_deref(), params, resolver)?;
    info!(
        "parsed {} samples from {}{}",
        streams.len(),
        course_path.display(),
        track_path
            .map(|p| format!(" + {}", p.display()))
            .unwrap_or_default()
    );
    Activity::analyze(streams, params)
}
