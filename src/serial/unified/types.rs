//! Types shared between the link task and its handle
use serde::{Serialize, Deserialize};

use crate::mission::WaypointStatus;

/// Operator requests forwarded to the link task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserCommand {
    Connect { port: String },
    AddWaypoint { lat: f64, lon: f64 },
    SetRadius { index: usize, value: f64 },
    SetAltitude { index: usize, value: f64 },
    SetStatus { index: usize, status: WaypointStatus },
    RemoveWaypoint { index: usize },
    UploadMission,
    RereadMission,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub lines_read: u64,
    pub bytes_read: u64,
    pub commands_written: u64,
    pub write_flush_timeouts: u64,
    pub telemetry_samples: u64,
    pub missions_received: u64,
    pub protocol_warnings: u64,
    pub protocol_infos: u64,
    pub buffer_overflows: u64,
    pub utf8_decode_errors: u64,
    pub transport_errors: u64,
    pub last_error: Option<String>,
}
