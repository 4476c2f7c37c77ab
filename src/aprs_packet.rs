//! APRS-IS position report encoding.
//!
//! Produces the uncompressed position-report text form relayed to APRS-IS:
//!
//! ```text
//! CALL>APRS,TCPIP*:/DDHHMMzDDMM.mmN/DDDMM.mmW<symbol>CCC/SSS/A=AAAAAA<comment>\n
//! ```
//!
//! Every block after the timestamp marker is optional and omitted when its
//! values are all zero. Encoding never touches the clock or the network.

use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Fixed path written after the source callsign
const PACKET_PATH: &str = ">APRS,TCPIP*:";

/// Hundredths of a minute in one degree
const HUNDREDTHS_PER_DEGREE: i64 = 60 * 100;

/// One position report ready to be encoded
#[derive(Debug, Clone, PartialEq)]
pub struct AprsPositionPacket {
    /// Source callsign, uppercased on encode
    pub callsign: String,
    /// Report time; `None` encodes the "no timestamp" marker
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    /// Symbol table and code, inserted verbatim
    pub symbol: String,
    pub course_degrees: i64,
    pub speed_knots: i64,
    pub altitude_feet: i64,
    /// Free text appended verbatim apart from line terminators
    pub comment: String,
}

impl AprsPositionPacket {
    /// Encode the packet as a single newline-terminated line
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(64 + self.comment.len());

        push_single_line(&mut line, &self.callsign.to_uppercase());
        line.push_str(PACKET_PATH);

        match self.timestamp {
            Some(timestamp) => {
                line.push('/');
                // Writing into a String cannot fail
                let _ = write!(line, "{}", timestamp.format("%d%H%Mz"));
            }
            None => line.push('!'),
        }

        if self.has_position() {
            line.push_str(&format_latitude(self.latitude));
            line.push('/');
            line.push_str(&format_longitude(self.longitude));
        }

        push_single_line(&mut line, &self.symbol);

        if self.course_degrees != 0 || self.speed_knots != 0 {
            let _ = write!(line, "{:03}/{:03}", self.course_degrees, self.speed_knots);
        }

        if self.altitude_feet != 0 {
            let _ = write!(line, "/A={:06}", self.altitude_feet);
        }

        push_single_line(&mut line, &self.comment);
        line.push('\n');
        line
    }

    /// A 0,0 position means the device had no fix
    pub fn has_position(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

/// Append free text with any CR or LF replaced by a space, so one packet is
/// always exactly one line on the wire
fn push_single_line(line: &mut String, text: &str) {
    line.extend(text.chars().map(|c| match c {
        '\r' | '\n' => ' ',
        c => c,
    }));
}

/// Split an absolute coordinate into whole degrees and hundredths of a minute.
///
/// Rounding happens on the combined value so 59.996' carries into the next
/// degree instead of printing as 60.00'.
fn degrees_and_minutes(value: f64) -> (i64, i64) {
    let hundredths = (value.abs() * HUNDREDTHS_PER_DEGREE as f64).round() as i64;
    (
        hundredths / HUNDREDTHS_PER_DEGREE,
        hundredths % HUNDREDTHS_PER_DEGREE,
    )
}

fn format_minutes(hundredths: i64) -> String {
    format!("{:02}.{:02}", hundredths / 100, hundredths % 100)
}

/// `DDMM.mmN` / `DDMM.mmS`
fn format_latitude(latitude: f64) -> String {
    let (degrees, minutes) = degrees_and_minutes(latitude);
    let hemisphere = if latitude > 0.0 { 'N' } else { 'S' };
    format!("{:02}{}{}", degrees, format_minutes(minutes), hemisphere)
}

/// `DDDMM.mmE` / `DDDMM.mmW`
fn format_longitude(longitude: f64) -> String {
    let (degrees, minutes) = degrees_and_minutes(longitude);
    let hemisphere = if longitude > 0.0 { 'E' } else { 'W' };
    format!("{:03}{}{}", degrees, format_minutes(minutes), hemisphere)
}
