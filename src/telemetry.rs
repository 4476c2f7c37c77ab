use chrono::{DateTime, Utc};
use tracing::trace;

use crate::feed::Placemark;

/// Extended-data entry names published by the share feed
const LATITUDE: &str = "Latitude";
const LONGITUDE: &str = "Longitude";
const ELEVATION: &str = "Elevation";
const DEVICE_TYPE: &str = "Device Type";
const COURSE: &str = "Course";
const VELOCITY: &str = "Velocity";

/// Typed telemetry decoded from one feed placemark
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    /// Free text; may carry a routing directive
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Empty when the feed does not report it
    pub device_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_meters: f64,
    pub course_degrees: f64,
    pub speed_kmh: f64,
}

impl TelemetryRecord {
    /// Build a record from a placemark.
    ///
    /// Returns `None` when the placemark has no timestamp (e.g. the track line).
    /// Numeric values that fail to parse leave their field at zero; the rest of
    /// the placemark is still decoded.
    pub fn from_placemark(placemark: &Placemark) -> Option<Self> {
        let timestamp = placemark.timestamp?;

        let mut record = Self {
            description: placemark.description.clone(),
            timestamp,
            ..Self::default()
        };

        for entry in &placemark.extended_data {
            let field = match entry.name.as_str() {
                LATITUDE => &mut record.latitude,
                LONGITUDE => &mut record.longitude,
                // "1234.56 m from MSL"
                ELEVATION => &mut record.elevation_meters,
                // "123.45 ° True"
                COURSE => &mut record.course_degrees,
                // "12.3 km/h"
                VELOCITY => &mut record.speed_kmh,
                DEVICE_TYPE => {
                    record.device_type = entry.value.clone();
                    continue;
                }
                _ => continue,
            };

            match parse_leading_float(&entry.value) {
                Some(value) => *field = value,
                None => trace!("Ignoring unparseable {} value {:?}", entry.name, entry.value),
            }
        }

        Some(record)
    }
}

/// Parse the number at the start of `value`, ignoring any unit text after it.
///
/// Accepts an optional sign, digits, one decimal point and an exponent.
/// Returns `None` if no number can be read.
pub fn parse_leading_float(value: &str) -> Option<f64> {
    let value = value.trim_start();
    let bytes = value.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let mut seen_digit = false;
    let mut seen_point = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_point => seen_point = true,
            _ => break,
        }
        end += 1;
    }

    if !seen_digit {
        return None;
    }

    // Exponent only counts when followed by at least one digit
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        if bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
                exp_end += 1;
            }
            end = exp_end;
        }
    }

    value[..end].parse().ok()
}
