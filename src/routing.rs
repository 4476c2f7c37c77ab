//! Routing directives embedded in message descriptions.
//!
//! A sender opts a message into relaying by starting its text with `APRS`,
//! optionally followed by colon-separated overrides:
//!
//! ```text
//! APRS[:<callsign>[:<symbol>[:<comment>]]]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::telemetry::TelemetryRecord;

/// Marker token that must lead the description
pub const DIRECTIVE_MARKER: &str = "APRS";

/// Positional overrides parsed from a description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDirective {
    pub callsign: Option<String>,
    pub symbol: Option<String>,
    pub comment: Option<String>,
}

impl RoutingDirective {
    /// Parse a description; `None` unless the first token is exactly `APRS`
    pub fn parse(description: &str) -> Option<Self> {
        let mut tokens = description.split(':');
        if tokens.next() != Some(DIRECTIVE_MARKER) {
            return None;
        }

        Some(Self {
            callsign: tokens.next().map(str::to_uppercase),
            symbol: tokens.next().map(str::to_string),
            comment: tokens.next().map(str::to_string),
        })
    }
}

/// Whether a callsign override is needed before a message is relayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EligibilityPolicy {
    /// The `APRS` marker alone is enough; missing tokens use the defaults
    #[default]
    MarkerOnly,
    /// The directive must also name a non-empty callsign
    RequireCallsign,
}

impl fmt::Display for EligibilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EligibilityPolicy::MarkerOnly => write!(f, "marker-only"),
            EligibilityPolicy::RequireCallsign => write!(f, "require-callsign"),
        }
    }
}

/// Station identity used when a directive leaves a field out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDefaults {
    pub callsign: String,
    pub symbol: String,
    pub comment: String,
}

/// Resolved station identity for one relayed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub callsign: String,
    pub symbol: String,
    pub comment: String,
}

/// Decide whether `record` is relayed and under which identity.
///
/// Returns `None` for descriptions without the marker, and under
/// [`EligibilityPolicy::RequireCallsign`] for directives with no callsign.
pub fn resolve_identity(
    record: &TelemetryRecord,
    defaults: &IdentityDefaults,
    policy: EligibilityPolicy,
) -> Option<Identity> {
    let directive = RoutingDirective::parse(&record.description)?;

    if policy == EligibilityPolicy::RequireCallsign
        && directive.callsign.as_deref().is_none_or(str::is_empty)
    {
        return None;
    }

    let mut identity = Identity {
        callsign: directive.callsign.unwrap_or_else(|| defaults.callsign.clone()),
        symbol: directive.symbol.unwrap_or_else(|| defaults.symbol.clone()),
        comment: directive
            .comment
            .map(|comment| comment + " ")
            .unwrap_or_else(|| defaults.comment.clone()),
    };

    if !record.device_type.is_empty() {
        identity.comment.push_str(" (");
        identity.comment.push_str(&record.device_type);
        identity.comment.push(')');
    }

    Some(identity)
}

impl FromStr for EligibilityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marker-only" => Ok(EligibilityPolicy::MarkerOnly),
            "require-callsign" => Ok(EligibilityPolicy::RequireCallsign),
            other => Err(format!(
                "unknown eligibility policy '{}' (expected marker-only or require-callsign)",
                other
            )),
        }
    }
}
