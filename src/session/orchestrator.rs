//! Connection lifecycle: handshake toggling and the once-per-connection
//! mission-read / telemetry-start requests.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::ConnectionState;
use crate::serial::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub port_name: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SyncOrchestrator {
    state: ConnectionState,
    connection: Option<ConnectionInfo>,
    mission_requested: bool,
    telemetry_requested: bool,
}

impl SyncOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref()
    }

    /// Toggle: disconnect when connected, start the handshake otherwise.
    pub fn request_connect(&mut self, port_name: &str) -> Option<Command> {
        match self.state {
            ConnectionState::Connected => {
                log::info!("Disconnect requested on {}", port_name);
                Some(Command::Disconnect)
            }
            ConnectionState::Connecting => {
                log::info!("Handshake already pending on {}; ignoring connect request", port_name);
                None
            }
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                self.connection = Some(ConnectionInfo {
                    id: Uuid::new_v4(),
                    port_name: port_name.to_string(),
                    opened_at: Utc::now(),
                });
                log::info!("Starting handshake on {}", port_name);
                Some(Command::Connect)
            }
        }
    }

    /// `TRUE` received. Returns the follow-up requests still owed for this
    /// connection; a repeated `TRUE` yields none.
    pub fn on_accepted(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Connected;
        let mut cmds = Vec::new();
        if !self.mission_requested {
            self.mission_requested = true;
            cmds.push(Command::ReadMission);
        }
        if !self.telemetry_requested {
            self.telemetry_requested = true;
            cmds.push(Command::StartTelemetry);
        }
        cmds
    }

    /// `FALSE` received. Returns the stop request to send before the
    /// transport is closed, or nothing if there was no link to tear down.
    pub fn on_rejected(&mut self) -> Option<Command> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.reset();
        Some(Command::StopTelemetry)
    }

    /// The transport went away underneath us. Returns whether a link was up.
    pub fn on_transport_lost(&mut self) -> bool {
        let was_up = self.state != ConnectionState::Disconnected;
        self.reset();
        was_up
    }

    pub fn can_upload(&self, mission_len: usize) -> bool {
        self.state.is_connected() && mission_len > 0
    }

    pub fn can_reread(&self) -> bool {
        self.state.is_connected()
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connection = None;
        self.mission_requested = false;
        self.telemetry_requested = false;
    }
}
