use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use tracing::{debug, warn};
use tzf_rs::DefaultFinder;

use crate::{OffsetPolicy, Result, RideError};

/// Maps a coordinate to an IANA zone name.
pub trait ZoneLookup {
    fn zone_name(&self, latitude: f64, longitude: f64) -> Option<String>;
}

/// Polygon lookup over the bundled timezone boundary data.
pub struct TzfLookup {
    finder: DefaultFinder,
}

impl TzfLookup {
    pub fn new() -> Self {
        Self {
            finder: DefaultFinder::new(),
        }
    }
}

impl Default for TzfLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneLookup for TzfLookup {
    fn zone_name(&self, latitude: f64, longitude: f64) -> Option<String> {
        let name = self.finder.get_tz_name(longitude, latitude);
        // boundary data covers the oceans with nautical Etc/GMT±N zones
        if name.is_empty() || name.starts_with("Etc/") {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Always answers with the same zone, wherever the ride happened.
#[derive(Clone, Debug)]
pub struct FixedZone(pub String);

impl ZoneLookup for FixedZone {
    fn zone_name(&self, _latitude: f64, _longitude: f64) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Snapshot of the processing machine's clock, consulted only by
/// [`OffsetPolicy::Legacy`].
#[derive(Clone, Debug, PartialEq)]
pub struct WallClock {
    pub now: DateTime<Utc>,
    /// Whether the local system zone is observing daylight saving at `now`.
    pub local_dst: bool,
}

impl WallClock {
    pub fn system() -> Self {
        let now = Utc::now();
        let local_dst = match iana_time_zone::get_timezone() {
            Ok(name) => match name.parse::<Tz>() {
                Ok(tz) => observes_dst(tz, now),
                Err(_) => {
                    warn!("unrecognised system timezone {}, assuming standard time", name);
                    false
                }
            },
            Err(err) => {
                warn!("system timezone unavailable ({}), assuming standard time", err);
                false
            }
        };
        Self { now, local_dst }
    }
}

fn observes_dst(tz: Tz, at: DateTime<Utc>) -> bool {
    tz.offset_from_utc_datetime(&at.naive_utc()).dst_offset() != chrono::Duration::zero()
}

pub struct TimezoneResolver {
    lookup: Box<dyn ZoneLookup>,
    clock: Option<WallClock>,
}

impl TimezoneResolver {
    pub fn new(lookup: impl ZoneLookup + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
            clock: None,
        }
    }

    /// Pin the wall clock used by legacy resolution instead of reading the
    /// system clock at resolve time.
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// UTC offset for a ride starting at `reference` at the given coordinate.
    ///
    /// Legacy resolution ignores `reference`: it uses the zone's offset at the
    /// current instant and subtracts an hour when the machine running the
    /// analysis is on standard time, so historical rides resolve differently
    /// depending on when they are processed.
    pub fn resolve_offset(
        &self,
        latitude: f64,
        longitude: f64,
        reference: DateTime<Utc>,
        policy: OffsetPolicy,
    ) -> Result<FixedOffset> {
        let tz = self.zone_at(latitude, longitude)?;
        match policy {
            OffsetPolicy::AtInstant => Ok(tz.offset_from_utc_datetime(&reference.naive_utc()).fix()),
            OffsetPolicy::Legacy => {
                let clock = self.clock.clone().unwrap_or_else(WallClock::system);
                let current = tz.offset_from_utc_datetime(&clock.now.naive_utc()).fix();
                let mut seconds = current.local_minus_utc();
                if !clock.local_dst {
                    seconds -= 3600;
                }
                warn!(
                    "legacy offset resolution for {}: {}s (clock {}, local dst {})",
                    tz.name(),
                    seconds,
                    clock.now,
                    clock.local_dst
                );
                FixedOffset::east_opt(seconds).ok_or(RideError::Lookup {
                    latitude,
                    longitude,
                })
            }
        }
    }

    fn zone_at(&self, latitude: f64, longitude: f64) -> Result<Tz> {
        let not_found = || RideError::Lookup {
            latitude,
            longitude,
        };
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(not_found());
        }
        let name = self.lookup.zone_name(latitude, longitude).ok_or_else(not_found)?;
        debug!("coordinate ({}, {}) resolved to {}", latitude, longitude, name);
        name.parse::<Tz>().map_err(|_| not_found())
    }
}
