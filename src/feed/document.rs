//! Decoding of the share feed's KML document.
//!
//! Only the parts the relay reads are modelled; everything else in the
//! document (styles, names, geometry) is skipped by the deserializer.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One named `ExtendedData/Data` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub name: String,
    pub value: String,
}

/// One placemark from the feed, in document order
#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    /// `TimeStamp/when`; `None` when absent or not RFC 3339
    pub timestamp: Option<DateTime<Utc>>,
    pub description: String,
    pub extended_data: Vec<DataEntry>,
}

#[derive(Debug, Deserialize)]
struct KmlRoot {
    #[serde(rename = "Document", default)]
    document: Option<KmlContainer>,
}

/// `Document` and `Folder` share the same shape for our purposes
#[derive(Debug, Default, Deserialize)]
struct KmlContainer {
    #[serde(rename = "Folder", default)]
    folders: Vec<KmlContainer>,
    #[serde(rename = "Placemark", default)]
    placemarks: Vec<KmlPlacemark>,
}

#[derive(Debug, Deserialize)]
struct KmlPlacemark {
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "TimeStamp", default)]
    timestamp: Option<KmlTimeStamp>,
    #[serde(rename = "ExtendedData", default)]
    extended_data: Option<KmlExtendedData>,
}

#[derive(Debug, Deserialize)]
struct KmlTimeStamp {
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KmlExtendedData {
    #[serde(rename = "Data", default)]
    data: Vec<KmlData>,
}

#[derive(Debug, Deserialize)]
struct KmlData {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    value: Option<String>,
}

impl From<KmlPlacemark> for Placemark {
    fn from(raw: KmlPlacemark) -> Self {
        let timestamp = raw
            .timestamp
            .and_then(|ts| ts.when)
            .and_then(|when| DateTime::parse_from_rfc3339(when.trim()).ok())
            .map(|when| when.with_timezone(&Utc));

        let extended_data = raw
            .extended_data
            .map(|ed| ed.data)
            .unwrap_or_default()
            .into_iter()
            .map(|data| DataEntry {
                name: data.name,
                value: data.value.unwrap_or_default(),
            })
            .collect();

        Self {
            timestamp,
            description: raw.description.unwrap_or_default(),
            extended_data,
        }
    }
}

fn collect_placemarks(container: KmlContainer, out: &mut Vec<Placemark>) {
    out.extend(container.placemarks.into_iter().map(Placemark::from));
    for folder in container.folders {
        collect_placemarks(folder, out);
    }
}

/// Decode a feed body into its placemarks
pub fn parse_feed(body: &str) -> Result<Vec<Placemark>, quick_xml::DeError> {
    let root: KmlRoot = quick_xml::de::from_str(body)?;

    let mut placemarks = Vec::new();
    if let Some(document) = root.document {
        collect_placemarks(document, &mut placemarks);
    }
    Ok(placemarks)
}
