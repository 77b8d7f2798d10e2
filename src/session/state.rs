use serde::{Deserialize, Serialize};

use crate::mission::Waypoint;

/// Logical link state. Only protocol replies move it to `Connected` or
/// back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Mission transfer sub-state, independent of the link state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MissionPhase {
    #[default]
    Idle,
    Receiving(Download),
}

impl MissionPhase {
    pub fn is_receiving(&self) -> bool {
        matches!(self, MissionPhase::Receiving(_))
    }
}

/// Bookkeeping for a download between `WP_BEGIN` and `WP_END`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Download {
    pub announced: Option<usize>,
    pub received: usize,
    pub rejected: usize,
    /// Mission held before the download cleared it.
    pub previous: Vec<Waypoint>,
}

/// Combined view of both state machine axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub connection: ConnectionState,
    pub receiving_mission: bool,
}
