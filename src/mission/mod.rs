pub mod geo;

pub use geo::haversine_m;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::Command;

pub const MIN_RADIUS_M: f64 = 1.0;
pub const MAX_RADIUS_M: f64 = 5000.0;
pub const DEFAULT_ALTITUDE_M: f64 = 100.0;
pub const DEFAULT_RADIUS_M: f64 = 50.0;

/// What the vehicle should do at a waypoint.
///
/// The named variants are the set offered to operators; any other text the
/// vehicle or an operator supplies is kept verbatim in `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WaypointStatus {
    #[default]
    Waypoint,
    Takeoff,
    Land,
    VtolTakeoff,
    VtolLand,
    Loiter,
    Rtl,
    Custom(String),
}

impl WaypointStatus {
    pub const SUGGESTED: [WaypointStatus; 7] = [
        WaypointStatus::Waypoint,
        WaypointStatus::Takeoff,
        WaypointStatus::Land,
        WaypointStatus::VtolTakeoff,
        WaypointStatus::VtolLand,
        WaypointStatus::Loiter,
        WaypointStatus::Rtl,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            WaypointStatus::Waypoint => "WAYPOINT",
            WaypointStatus::Takeoff => "TAKEOFF",
            WaypointStatus::Land => "LAND",
            WaypointStatus::VtolTakeoff => "VTOL_TAKEOFF",
            WaypointStatus::VtolLand => "VTOL_LAND",
            WaypointStatus::Loiter => "LOITER",
            WaypointStatus::Rtl => "RTL",
            WaypointStatus::Custom(s) => s,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, WaypointStatus::Custom(_))
    }
}

impl From<&str> for WaypointStatus {
    fn from(s: &str) -> Self {
        match s {
            "WAYPOINT" => WaypointStatus::Waypoint,
            "TAKEOFF" => WaypointStatus::Takeoff,
            "LAND" => WaypointStatus::Land,
            "VTOL_TAKEOFF" => WaypointStatus::VtolTakeoff,
            "VTOL_LAND" => WaypointStatus::VtolLand,
            "LOITER" => WaypointStatus::Loiter,
            "RTL" => WaypointStatus::Rtl,
            other => WaypointStatus::Custom(other.to_string()),
        }
    }
}

impl From<String> for WaypointStatus {
    fn from(s: String) -> Self {
        WaypointStatus::from(s.as_str())
    }
}

impl From<WaypointStatus> for String {
    fn from(status: WaypointStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for WaypointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mission point. `distance` is owned by [`MissionModel`] and always
/// reflects the leg from the previous waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    latitude: f64,
    longitude: f64,
    altitude: f64,
    distance: f64,
    radius: f64,
    status: WaypointStatus,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, radius: f64, status: WaypointStatus) -> Self {
        Self::from_parts(latitude, longitude, altitude, 0.0, radius, status)
    }

    /// Build a waypoint exactly as reported on the wire. The distance is
    /// provisional until the waypoint is stored in a [`MissionModel`].
    pub fn from_parts(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        distance: f64,
        radius: f64,
        status: WaypointStatus,
    ) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            distance: distance.max(0.0),
            radius: clamp_radius(radius),
            status,
        }
    }

    pub fn latitude(&self) -> f64 { self.latitude }
    pub fn longitude(&self) -> f64 { self.longitude }
    pub fn altitude(&self) -> f64 { self.altitude }
    pub fn distance(&self) -> f64 { self.distance }
    pub fn radius(&self) -> f64 { self.radius }
    pub fn status(&self) -> &WaypointStatus { &self.status }

    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

pub fn clamp_radius(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_RADIUS_M;
    }
    value.clamp(MIN_RADIUS_M, MAX_RADIUS_M)
}

/// `(lat, lon, radius)` triple handed to the map surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub lat: f64,
    pub lon: f64,
    pub radius: f64,
}

/// Read-only view of the mission published to map and table views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub waypoints: Vec<Waypoint>,
    pub total_distance: f64,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for MissionSnapshot {
    fn default() -> Self {
        Self { waypoints: Vec::new(), total_distance: 0.0, revision: 0, updated_at: Utc::now() }
    }
}

impl MissionSnapshot {
    pub fn map_points(&self) -> Vec<MapPoint> {
        self.waypoints
            .iter()
            .map(|wp| MapPoint { lat: wp.latitude, lon: wp.longitude, radius: wp.radius })
            .collect()
    }
}

/// Ordered waypoint list in flight order.
#[derive(Debug, Clone)]
pub struct MissionModel {
    waypoints: Vec<Waypoint>,
    default_altitude: f64,
    default_radius: f64,
    revision: u64,
}

impl MissionModel {
    pub fn new() -> Self {
        Self::with_defaults(DEFAULT_ALTITUDE_M, DEFAULT_RADIUS_M)
    }

    pub fn with_defaults(default_altitude: f64, default_radius: f64) -> Self {
        Self {
            waypoints: Vec::new(),
            default_altitude,
            default_radius: clamp_radius(default_radius),
            revision: 0,
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a user-placed point with the default altitude, radius and status.
    /// Coordinates are clamped into valid latitude/longitude ranges; a
    /// non-finite coordinate adds nothing and returns `None`.
    pub fn append(&mut self, lat: f64, lon: f64) -> Option<usize> {
        if !lat.is_finite() || !lon.is_finite() {
            log::debug!("Ignoring waypoint at non-finite position ({}, {})", lat, lon);
            return None;
        }
        let wp = Waypoint::new(
            lat.clamp(-90.0, 90.0),
            lon.clamp(-180.0, 180.0),
            self.default_altitude,
            self.default_radius,
            WaypointStatus::default(),
        );
        Some(self.push(wp))
    }

    /// Append an already built waypoint, recomputing its leg distance.
    pub fn push(&mut self, mut wp: Waypoint) -> usize {
        wp.distance = self.waypoints.last().map(|prev| prev.distance_to(&wp)).unwrap_or(0.0);
        self.waypoints.push(wp);
        self.touch();
        self.waypoints.len() - 1
    }

    /// Remove the waypoint at `index`. Out-of-range indices are ignored.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.waypoints.len() {
            log::debug!("Ignoring removal of waypoint {} (mission has {})", index, self.waypoints.len());
            return false;
        }
        self.waypoints.remove(index);
        self.recompute_distances();
        self.touch();
        true
    }

    pub fn set_radius(&mut self, index: usize, value: f64) -> bool {
        match self.waypoints.get_mut(index) {
            Some(wp) => {
                wp.radius = clamp_radius(value);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, index: usize, value: impl Into<WaypointStatus>) -> bool {
        match self.waypoints.get_mut(index) {
            Some(wp) => {
                wp.status = value.into();
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn set_altitude(&mut self, index: usize, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.waypoints.get_mut(index) {
            Some(wp) => {
                wp.altitude = value;
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn replace_all(&mut self, list: Vec<Waypoint>) {
        self.waypoints = list;
        self.recompute_distances();
        self.touch();
    }

    pub fn clear(&mut self) {
        if self.waypoints.is_empty() {
            return;
        }
        self.waypoints.clear();
        self.touch();
    }

    pub fn total_distance(&self) -> f64 {
        self.waypoints.iter().map(|wp| wp.distance).sum()
    }

    pub fn map_points(&self) -> Vec<MapPoint> {
        self.snapshot().map_points()
    }

    pub fn snapshot(&self) -> MissionSnapshot {
        MissionSnapshot {
            waypoints: self.waypoints.clone(),
            total_distance: self.total_distance(),
            revision: self.revision,
            updated_at: Utc::now(),
        }
    }

    /// The full upload sequence: begin marker, one item per waypoint, end marker.
    pub fn upload_commands(&self) -> Vec<Command> {
        let mut cmds = Vec::with_capacity(self.waypoints.len() + 2);
        cmds.push(Command::MissionBegin(self.waypoints.len()));
        cmds.extend(self.waypoints.iter().cloned().map(Command::MissionItem));
        cmds.push(Command::MissionEnd);
        cmds
    }

    pub fn serialize_for_upload(&self) -> Vec<String> {
        self.upload_commands().iter().map(Command::to_line).collect()
    }

    fn recompute_distances(&mut self) {
        for i in 0..self.waypoints.len() {
            let d = if i == 0 { 0.0 } else { self.waypoints[i - 1].distance_to(&self.waypoints[i]) };
            self.waypoints[i].distance = d;
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

impl Default for MissionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_distances_consistent(model: &MissionModel) {
        let wps = model.waypoints();
        if let Some(first) = wps.first() {
            assert_eq!(first.distance(), 0.0);
        }
        for pair in wps.windows(2) {
            let expected = pair[0].distance_to(&pair[1]);
            assert!((pair[1].distance() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn append_uses_defaults_and_leg_distance() {
        let mut model = MissionModel::new();
        model.append(47.0, 8.0);
        model.append(47.01, 8.0);
        let second = model.get(1).unwrap();
        assert_eq!(second.altitude(), DEFAULT_ALTITUDE_M);
        assert_eq!(second.radius(), DEFAULT_RADIUS_M);
        assert_eq!(second.status(), &WaypointStatus::Waypoint);
        assert!((second.distance() - haversine_m(47.0, 8.0, 47.01, 8.0)).abs() < 1e-9);
        assert_distances_consistent(&model);
    }

    #[test]
    fn non_finite_positions_are_rejected() {
        let mut model = MissionModel::new();
        assert_eq!(model.append(47.0, 8.0), Some(0));
        let rev = model.revision();
        assert_eq!(model.append(f64::NAN, 8.0), None);
        assert_eq!(model.append(47.1, f64::NEG_INFINITY), None);
        assert_eq!(model.len(), 1);
        assert_eq!(model.revision(), rev);

        assert_eq!(model.append(95.0, 8.0), Some(1));
        assert_eq!(model.get(1).unwrap().latitude(), 90.0);
        assert!(model.total_distance().is_finite());
        assert!(model.serialize_for_upload().iter().all(|l| !l.contains("NaN")));
        assert_distances_consistent(&model);
    }

    #[test]
    fn remove_recomputes_following_legs() {
        let mut model = MissionModel::new();
        model.append(10.0, 10.0);
        model.append(10.1, 10.0);
        model.append(10.1, 10.2);
        assert!(model.remove(0));
        assert_eq!(model.len(), 2);
        assert_distances_consistent(&model);
        assert!(model.remove(1));
        assert_distances_consistent(&model);
    }

    #[test]
    fn out_of_range_edits_are_ignored() {
        let mut model = MissionModel::new();
        model.append(1.0, 1.0);
        let rev = model.revision();
        assert!(!model.remove(5));
        assert!(!model.set_radius(3, 20.0));
        assert!(!model.set_status(3, "LAND"));
        assert_eq!(model.len(), 1);
        assert_eq!(model.revision(), rev);
    }

    #[test]
    fn radius_is_clamped() {
        let mut model = MissionModel::new();
        model.append(1.0, 1.0);
        model.set_radius(0, -5.0);
        assert_eq!(model.get(0).unwrap().radius(), 1.0);
        model.set_radius(0, 9000.0);
        assert_eq!(model.get(0).unwrap().radius(), 5000.0);
        model.set_radius(0, 250.0);
        assert_eq!(model.get(0).unwrap().radius(), 250.0);
    }

    #[test]
    fn status_is_stored_verbatim() {
        let mut model = MissionModel::new();
        model.append(1.0, 1.0);
        model.set_status(0, "VTOL_LAND");
        assert_eq!(model.get(0).unwrap().status(), &WaypointStatus::VtolLand);
        model.set_status(0, "circle twice");
        assert_eq!(model.get(0).unwrap().status().as_str(), "circle twice");
    }

    #[test]
    fn replace_all_ignores_reported_distances() {
        let mut model = MissionModel::new();
        let list = vec![
            Waypoint::from_parts(0.0, 0.0, 50.0, 999.0, 10.0, WaypointStatus::Takeoff),
            Waypoint::from_parts(0.0, 0.01, 50.0, 1.0, 10.0, WaypointStatus::Land),
        ];
        model.replace_all(list);
        assert_distances_consistent(&model);
    }

    #[test]
    fn upload_lines_are_bracketed() {
        let mut model = MissionModel::new();
        model.append(47.1234567, 8.1234567);
        model.set_status(0, WaypointStatus::Loiter);
        let lines = model.serialize_for_upload();
        assert_eq!(
            lines,
            vec![
                "WP_BEGIN,1".to_string(),
                "WP,47.1234567,8.1234567,100.00,0.00,50.00,\"LOITER\"".to_string(),
                "WP_END".to_string(),
            ]
        );
    }

    #[test]
    fn status_serializes_as_plain_text() {
        let json = serde_json::to_string(&WaypointStatus::VtolTakeoff).unwrap();
        assert_eq!(json, "\"VTOL_TAKEOFF\"");
        let back: WaypointStatus = serde_json::from_str("\"free text\"").unwrap();
        assert_eq!(back, WaypointStatus::Custom("free text".into()));
    }
}
