//! Ground session: the single owner of protocol state, the mission list,
//! the attitude estimate and the connection lifecycle.
//!
//! Every entry point returns the ordered [`Action`]s the transport layer has
//! to carry out. Nothing here blocks or touches I/O.
pub mod orchestrator;
pub mod state;

pub use orchestrator::{ConnectionInfo, SyncOrchestrator};
pub use state::{ConnectionState, Download, MissionPhase, ProtocolState};

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::attitude::{Attitude, AttitudeEstimator, SensorScale};
use crate::config::LinkSettings;
use crate::mission::{MissionModel, MissionSnapshot, Waypoint, WaypointStatus};
use crate::serial::{Command, Inbound, TelemetryMarker};

/// Notifications for collaborators (map, table, horizon, log view).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    Connected,
    Disconnected,
    MissionReceived(Vec<Waypoint>),
    MissionChanged(MissionSnapshot),
    AttitudeUpdated { roll: f64, pitch: f64 },
    Telemetry(TelemetryMarker),
    ProtocolWarning { line: String, reason: String },
    ProtocolInfo { line: String },
    TransportError { port: String, description: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(Command),
    Emit(SessionEvent),
    CloseTransport,
}

pub struct GroundSession {
    orchestrator: SyncOrchestrator,
    phase: MissionPhase,
    mission: MissionModel,
    estimator: AttitudeEstimator,
    rollback_partial_mission: bool,
}

impl GroundSession {
    pub fn new(settings: &LinkSettings) -> Self {
        Self {
            orchestrator: SyncOrchestrator::new(),
            phase: MissionPhase::Idle,
            mission: MissionModel::with_defaults(settings.default_altitude_m, settings.default_radius_m),
            estimator: AttitudeEstimator::new(SensorScale {
                accel_counts_per_g: settings.accel_counts_per_g,
                gyro_counts_per_dps: settings.gyro_counts_per_dps,
            }),
            rollback_partial_mission: settings.rollback_partial_mission,
        }
    }

    pub fn state(&self) -> ProtocolState {
        ProtocolState {
            connection: self.orchestrator.state(),
            receiving_mission: self.phase.is_receiving(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.orchestrator.state()
    }

    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.orchestrator.connection()
    }

    pub fn mission(&self) -> &MissionModel {
        &self.mission
    }

    pub fn attitude(&self) -> Attitude {
        self.estimator.attitude()
    }

    pub fn handle_line(&mut self, line: &str) -> Vec<Action> {
        self.handle_line_at(line, Instant::now())
    }

    /// Process one framed line received at `now`.
    pub fn handle_line_at(&mut self, line: &str, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        match Inbound::classify(line) {
            Inbound::HandshakeAccepted => {
                let first = !self.orchestrator.state().is_connected();
                let follow_up = self.orchestrator.on_accepted();
                if first {
                    log::info!("Handshake accepted");
                    self.estimator.restart_timer();
                    actions.push(Action::Emit(SessionEvent::Connected));
                } else {
                    log::debug!("Duplicate handshake acceptance");
                }
                actions.extend(follow_up.into_iter().map(Action::Send));
            }
            Inbound::HandshakeRejected => match self.orchestrator.on_rejected() {
                Some(stop) => {
                    log::info!("Vehicle closed the link");
                    self.abandon_download(&mut actions);
                    self.estimator.restart_timer();
                    actions.push(Action::Send(stop));
                    actions.push(Action::CloseTransport);
                    actions.push(Action::Emit(SessionEvent::Disconnected));
                }
                None => log::debug!("FALSE while already disconnected"),
            },
            Inbound::MissionBegin(count) => {
                let announced = match count {
                    Ok(n) => Some(n),
                    Err(e) => {
                        actions.push(warning(line, e.to_string()));
                        None
                    }
                };
                if let MissionPhase::Receiving(dl) = &self.phase {
                    log::warn!("Mission download restarted after {} waypoints", dl.received);
                }
                let previous = match std::mem::take(&mut self.phase) {
                    MissionPhase::Receiving(dl) => dl.previous,
                    MissionPhase::Idle => self.mission.waypoints().to_vec(),
                };
                self.mission.clear();
                self.phase = MissionPhase::Receiving(Download { announced, received: 0, rejected: 0, previous });
                log::info!("Mission download started ({:?} waypoints announced)", announced);
                actions.push(Action::Emit(SessionEvent::MissionChanged(self.mission.snapshot())));
            }
            Inbound::MissionItem(parsed) => match &mut self.phase {
                MissionPhase::Receiving(dl) => match parsed {
                    Ok(wp) => {
                        dl.received += 1;
                        self.mission.push(wp);
                    }
                    Err(e) => {
                        dl.rejected += 1;
                        log::warn!("Discarding waypoint line {:?}: {}", line, e);
                        actions.push(warning(line, e.to_string()));
                    }
                },
                MissionPhase::Idle => actions.push(info(line)),
            },
            Inbound::MissionEnd => match std::mem::take(&mut self.phase) {
                MissionPhase::Receiving(dl) => {
                    if let Some(n) = dl.announced {
                        if n != dl.received {
                            log::warn!(
                                "Mission download announced {} waypoints, received {} ({} rejected)",
                                n, dl.received, dl.rejected
                            );
                        }
                    }
                    let list = self.mission.waypoints().to_vec();
                    self.mission.replace_all(list);
                    log::info!("Mission download complete: {} waypoints", self.mission.len());
                    actions.push(Action::Emit(SessionEvent::MissionReceived(self.mission.waypoints().to_vec())));
                    actions.push(Action::Emit(SessionEvent::MissionChanged(self.mission.snapshot())));
                }
                MissionPhase::Idle => actions.push(info(line)),
            },
            Inbound::Telemetry(marker) => {
                log::debug!("Telemetry stream marker {:?}", marker);
                actions.push(Action::Emit(SessionEvent::Telemetry(marker)));
            }
            Inbound::Sample(parsed) => {
                if !self.orchestrator.state().is_connected() {
                    log::debug!("Ignoring telemetry while not connected");
                    return actions;
                }
                match parsed {
                    Ok(sample) => {
                        let att = self.estimator.update(&sample, now);
                        actions.push(Action::Emit(SessionEvent::AttitudeUpdated { roll: att.roll, pitch: att.pitch }));
                    }
                    Err(e) => actions.push(warning(line, e.to_string())),
                }
            }
            Inbound::Unrecognized => actions.push(info(line)),
        }
        actions
    }

    /// The transport failed or was unplugged.
    pub fn transport_lost(&mut self, port: &str, description: &str) -> Vec<Action> {
        let mut actions = vec![Action::Emit(SessionEvent::TransportError {
            port: port.to_string(),
            description: description.to_string(),
        })];
        if self.orchestrator.on_transport_lost() {
            self.abandon_download(&mut actions);
            self.estimator.restart_timer();
            actions.push(Action::CloseTransport);
            actions.push(Action::Emit(SessionEvent::Disconnected));
        }
        actions
    }

    /// Best-effort teardown when the application is closing.
    pub fn shutdown(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.orchestrator.state() != ConnectionState::Disconnected {
            actions.push(Action::Send(Command::StopTelemetry));
            actions.push(Action::Send(Command::Disconnect));
            self.orchestrator.on_transport_lost();
            actions.push(Action::Emit(SessionEvent::Disconnected));
        }
        actions.push(Action::CloseTransport);
        actions
    }

    pub fn user_request_connect(&mut self, port: &str) -> Vec<Action> {
        self.orchestrator.request_connect(port).map(Action::Send).into_iter().collect()
    }

    pub fn user_add_waypoint_at(&mut self, lat: f64, lon: f64) -> Vec<Action> {
        let added = self.mission.append(lat, lon).is_some();
        self.edited(added)
    }

    pub fn user_set_radius(&mut self, index: usize, value: f64) -> Vec<Action> {
        let changed = self.mission.set_radius(index, value);
        self.edited(changed)
    }

    pub fn user_set_altitude(&mut self, index: usize, value: f64) -> Vec<Action> {
        let changed = self.mission.set_altitude(index, value);
        self.edited(changed)
    }

    pub fn user_set_status(&mut self, index: usize, value: impl Into<WaypointStatus>) -> Vec<Action> {
        let changed = self.mission.set_status(index, value);
        self.edited(changed)
    }

    pub fn user_remove_waypoint(&mut self, index: usize) -> Vec<Action> {
        let changed = self.mission.remove(index);
        self.edited(changed)
    }

    pub fn user_upload_mission(&mut self) -> Vec<Action> {
        if !self.orchestrator.can_upload(self.mission.len()) {
            log::info!(
                "Upload ignored (state {:?}, {} waypoints)",
                self.orchestrator.state(),
                self.mission.len()
            );
            return Vec::new();
        }
        log::info!("Uploading {} waypoints", self.mission.len());
        self.mission.upload_commands().into_iter().map(Action::Send).collect()
    }

    pub fn user_reread_mission(&mut self) -> Vec<Action> {
        if !self.orchestrator.can_reread() {
            log::info!("Mission re-read ignored while {:?}", self.orchestrator.state());
            return Vec::new();
        }
        self.mission.clear();
        vec![self.mission_changed(), Action::Send(Command::ReadMission)]
    }

    fn edited(&self, changed: bool) -> Vec<Action> {
        if changed {
            vec![self.mission_changed()]
        } else {
            Vec::new()
        }
    }

    fn mission_changed(&self) -> Action {
        Action::Emit(SessionEvent::MissionChanged(self.mission.snapshot()))
    }

    fn abandon_download(&mut self, actions: &mut Vec<Action>) {
        if let MissionPhase::Receiving(dl) = std::mem::take(&mut self.phase) {
            if self.rollback_partial_mission {
                log::warn!("Link dropped mid-download; restoring {} previous waypoints", dl.previous.len());
                self.mission.replace_all(dl.previous);
                actions.push(self.mission_changed());
            } else {
                log::warn!("Link dropped mid-download; keeping {} partial waypoints", dl.received);
            }
        }
    }
}

fn warning(line: &str, reason: String) -> Action {
    Action::Emit(SessionEvent::ProtocolWarning { line: line.to_string(), reason })
}

fn info(line: &str) -> Action {
    Action::Emit(SessionEvent::ProtocolInfo { line: line.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn connected_session(settings: &LinkSettings) -> GroundSession {
        let mut session = GroundSession::new(settings);
        session.user_request_connect("COM7");
        session.handle_line("TRUE");
        session
    }

    fn events(actions: &[Action]) -> Vec<&SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn sent(actions: &[Action]) -> Vec<&Command> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_true_connects_and_requests_sync() {
        let mut session = GroundSession::new(&LinkSettings::default());
        assert_eq!(sent(&session.user_request_connect("COM7")), vec![&Command::Connect]);
        let actions = session.handle_line("TRUE");
        assert_eq!(
            actions,
            vec![
                Action::Emit(SessionEvent::Connected),
                Action::Send(Command::ReadMission),
                Action::Send(Command::StartTelemetry),
            ]
        );
        assert!(session.handle_line("TRUE").is_empty());
    }

    #[test]
    fn false_stops_then_closes() {
        let mut session = connected_session(&LinkSettings::default());
        let actions = session.handle_line("FALSE");
        assert_eq!(
            actions,
            vec![
                Action::Send(Command::StopTelemetry),
                Action::CloseTransport,
                Action::Emit(SessionEvent::Disconnected),
            ]
        );
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn telemetry_ignored_until_connected() {
        let mut session = GroundSession::new(&LinkSettings::default());
        assert!(session.handle_line("DATA,0,0,16384,0,0,0").is_empty());
        assert!(session.handle_line("DATA,x").is_empty());
        let mut session = connected_session(&LinkSettings::default());
        let actions = session.handle_line("DATA,0,0,16384,0,0,0");
        assert!(matches!(events(&actions)[..], [SessionEvent::AttitudeUpdated { .. }]));
        let actions = session.handle_line("DATA,1,2,3");
        assert!(matches!(events(&actions)[..], [SessionEvent::ProtocolWarning { .. }]));
    }

    #[test]
    fn stray_waypoint_lines_are_informational() {
        let mut session = GroundSession::new(&LinkSettings::default());
        let actions = session.handle_line(r#"WP,1,2,3,0,10,"WAYPOINT""#);
        assert!(matches!(events(&actions)[..], [SessionEvent::ProtocolInfo { .. }]));
        let actions = session.handle_line("WP_END");
        assert!(matches!(events(&actions)[..], [SessionEvent::ProtocolInfo { .. }]));
        assert!(session.mission().is_empty());
    }

    #[test]
    fn disconnect_mid_download_keeps_partial_list_by_default() {
        let mut session = connected_session(&LinkSettings::default());
        session.user_add_waypoint_at(1.0, 1.0);
        session.handle_line("WP_BEGIN,3");
        session.handle_line(r#"WP,10.0,10.0,100.0,0.0,50.0,"TAKEOFF""#);
        session.handle_line("FALSE");
        assert_eq!(session.mission().len(), 1);
        assert_eq!(session.mission().get(0).unwrap().latitude(), 10.0);
        assert!(!session.state().receiving_mission);
    }

    #[test]
    fn rollback_restores_previous_list_when_enabled() {
        let settings = LinkSettings { rollback_partial_mission: true, ..LinkSettings::default() };
        let mut session = connected_session(&settings);
        session.user_add_waypoint_at(1.0, 1.0);
        session.user_add_waypoint_at(1.0, 1.1);
        session.handle_line("WP_BEGIN,3");
        session.handle_line(r#"WP,10.0,10.0,100.0,0.0,50.0,"TAKEOFF""#);
        session.transport_lost("COM7", "device removed");
        assert_eq!(session.mission().len(), 2);
        assert_eq!(session.mission().get(1).unwrap().longitude(), 1.1);
    }

    #[test]
    fn upload_and_reread_require_connection() {
        let mut session = GroundSession::new(&LinkSettings::default());
        session.user_add_waypoint_at(1.0, 1.0);
        assert!(session.user_upload_mission().is_empty());
        assert!(session.user_reread_mission().is_empty());
        assert_eq!(session.mission().len(), 1);

        let mut session = connected_session(&LinkSettings::default());
        assert!(session.user_upload_mission().is_empty());
        session.user_add_waypoint_at(1.0, 1.0);
        session.user_add_waypoint_at(1.0, 1.1);
        let cmds = session.user_upload_mission();
        assert_eq!(cmds.len(), 4);
        assert_eq!(sent(&cmds)[0], &Command::MissionBegin(2));
        assert_eq!(sent(&cmds)[3], &Command::MissionEnd);

        let actions = session.user_reread_mission();
        assert!(session.mission().is_empty());
        assert_eq!(sent(&actions), vec![&Command::ReadMission]);
    }

    #[test]
    fn reconnect_does_not_integrate_yaw_over_the_offline_gap() {
        let mut session = connected_session(&LinkSettings::default());
        let t0 = Instant::now();
        session.handle_line_at("DATA,0,0,16384,0,0,131", t0);
        session.handle_line_at("DATA,0,0,16384,0,0,131", t0 + Duration::from_secs(1));
        assert!((session.attitude().yaw - 1.0).abs() < 1e-9);

        session.handle_line("FALSE");
        session.user_request_connect("COM7");
        session.handle_line("TRUE");
        session.handle_line_at("DATA,0,0,16384,0,0,131", t0 + Duration::from_secs(600));
        assert!((session.attitude().yaw - 1.0).abs() < 1e-9);

        session.transport_lost("COM7", "unplugged");
        session.user_request_connect("COM7");
        session.handle_line("TRUE");
        session.handle_line_at("DATA,0,0,16384,0,0,131", t0 + Duration::from_secs(900));
        session.handle_line_at("DATA,0,0,16384,0,0,131", t0 + Duration::from_millis(900_500));
        assert!((session.attitude().yaw - 1.5).abs() < 1e-9);
    }

    #[test]
    fn non_finite_click_adds_nothing() {
        let mut session = GroundSession::new(&LinkSettings::default());
        assert!(session.user_add_waypoint_at(f64::NAN, 8.0).is_empty());
        assert!(session.user_add_waypoint_at(47.0, f64::INFINITY).is_empty());
        assert!(session.mission().is_empty());
        assert_eq!(session.user_add_waypoint_at(47.0, 8.0).len(), 1);
    }

    #[test]
    fn transport_loss_reports_error_and_disconnects() {
        let mut session = connected_session(&LinkSettings::default());
        let actions = session.transport_lost("COM7", "Permission denied");
        let evts = events(&actions);
        assert!(matches!(evts[0], SessionEvent::TransportError { port, .. } if port == "COM7"));
        assert_eq!(evts.last(), Some(&&SessionEvent::Disconnected));
        assert!(actions.contains(&Action::CloseTransport));
    }
}
