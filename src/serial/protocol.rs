//! Text line protocol spoken with the vehicle.
//!
//! Every unit is one newline-terminated line. Inbound lines are classified by
//! [`Inbound::classify`]; outbound requests are built from [`Command`].
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attitude::TelemetrySample;
use crate::mission::{Waypoint, WaypointStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    WrongFieldCount { expected: usize, found: usize },

    #[error("field `{field}` is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("status is not enclosed in double quotes")]
    MissingStatus,

    #[error("invalid waypoint count: {0:?}")]
    InvalidCount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryMarker {
    Begin,
    End,
    Error,
}

/// One classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HandshakeAccepted,
    HandshakeRejected,
    MissionBegin(Result<usize, ParseError>),
    MissionItem(Result<Waypoint, ParseError>),
    MissionEnd,
    Telemetry(TelemetryMarker),
    Sample(Result<TelemetrySample, ParseError>),
    Unrecognized,
}

const WP_FIELDS: [&str; 5] = ["latitude", "longitude", "altitude", "distance", "radius"];
const DATA_FIELDS: [&str; 6] = ["ax", "ay", "az", "gx", "gy", "gz"];

impl Inbound {
    /// Classify a trimmed line. Patterns are tried in protocol precedence order.
    pub fn classify(line: &str) -> Self {
        match line {
            "TRUE" => return Inbound::HandshakeAccepted,
            "FALSE" => return Inbound::HandshakeRejected,
            _ => {}
        }
        if line == "WP_BEGIN" {
            return Inbound::MissionBegin(Err(ParseError::InvalidCount(String::new())));
        }
        if let Some(rest) = line.strip_prefix("WP_BEGIN,") {
            let count = rest.trim();
            return Inbound::MissionBegin(
                count.parse::<usize>().map_err(|_| ParseError::InvalidCount(count.to_string())),
            );
        }
        if line.starts_with("WP,") {
            return Inbound::MissionItem(parse_waypoint(line));
        }
        match line {
            "WP_END" => return Inbound::MissionEnd,
            "DATA_BEGIN" => return Inbound::Telemetry(TelemetryMarker::Begin),
            "DATA_END" => return Inbound::Telemetry(TelemetryMarker::End),
            "DATA_ERR" => return Inbound::Telemetry(TelemetryMarker::Error),
            _ => {}
        }
        if let Some(rest) = line.strip_prefix("DATA,") {
            return Inbound::Sample(parse_sample(rest));
        }
        Inbound::Unrecognized
    }
}

/// Parse `WP,<lat>,<lon>,<alt>,<dist>,<radius>,"<status>"`.
///
/// The status is whatever sits between the first and the last double quote
/// on the line, so it may itself contain commas.
pub fn parse_waypoint(line: &str) -> Result<Waypoint, ParseError> {
    let first = line.find('"').ok_or(ParseError::MissingStatus)?;
    let last = line.rfind('"').ok_or(ParseError::MissingStatus)?;
    if last <= first {
        return Err(ParseError::MissingStatus);
    }
    let status = &line[first + 1..last];

    let numeric = line[..first].strip_prefix("WP,").unwrap_or(&line[..first]);
    let numeric = numeric.trim().trim_end_matches(',');
    let parts: Vec<&str> = numeric.split(',').map(str::trim).collect();
    if parts.len() != WP_FIELDS.len() {
        return Err(ParseError::WrongFieldCount { expected: WP_FIELDS.len(), found: parts.len() });
    }

    let mut values = [0.0f64; 5];
    for (slot, (field, raw)) in values.iter_mut().zip(WP_FIELDS.iter().zip(parts.iter())) {
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::InvalidNumber { field: *field, value: raw.to_string() })?;
    }

    let [latitude, longitude, altitude, distance, radius] = values;
    Ok(Waypoint::from_parts(latitude, longitude, altitude, distance, radius, WaypointStatus::from(status)))
}

/// Parse the six comma-separated integers that follow `DATA,`.
pub fn parse_sample(fields: &str) -> Result<TelemetrySample, ParseError> {
    let parts: Vec<&str> = fields.split(',').map(str::trim).collect();
    if parts.len() != DATA_FIELDS.len() {
        return Err(ParseError::WrongFieldCount { expected: DATA_FIELDS.len(), found: parts.len() });
    }
    let mut axes = [0i32; 6];
    for (slot, (field, raw)) in axes.iter_mut().zip(DATA_FIELDS.iter().zip(parts.iter())) {
        *slot = raw
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidNumber { field: *field, value: raw.to_string() })?;
    }
    let [ax, ay, az, gx, gy, gz] = axes;
    Ok(TelemetrySample { ax, ay, az, gx, gy, gz })
}

/// Requests sent from the ground station to the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Connect,
    Disconnect,
    ReadMission,
    MissionBegin(usize),
    MissionItem(Waypoint),
    MissionEnd,
    StartTelemetry,
    StopTelemetry,
}

impl Command {
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => f.write_str("CONNECT"),
            Command::Disconnect => f.write_str("DISCONNECT"),
            Command::ReadMission => f.write_str("READ"),
            Command::MissionBegin(n) => write!(f, "WP_BEGIN,{}", n),
            Command::MissionItem(wp) => write!(
                f,
                "WP,{:.7},{:.7},{:.2},{:.2},{:.2},\"{}\"",
                wp.latitude(),
                wp.longitude(),
                wp.altitude(),
                wp.distance(),
                wp.radius(),
                wp.status().as_str().replace('"', "'"),
            ),
            Command::MissionEnd => f.write_str("WP_END"),
            Command::StartTelemetry => f.write_str("DATA"),
            Command::StopTelemetry => f.write_str("DATA_STOP"),
        }
    }
}
