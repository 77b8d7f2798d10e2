//! Link task: owns the serial interface and the ground session, frames
//! inbound bytes and carries out the session's actions in order.
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};

use super::types::*;
use crate::config::LinkSettings;
use crate::mission::{MissionSnapshot, WaypointStatus};
use crate::serial::{LineFramer, SerialError, SerialInterface};
use crate::session::{Action, GroundSession, SessionEvent};

#[derive(Clone)]
pub struct UnifiedSerialHandle {
    pub cmd_tx: mpsc::Sender<UserCommand>,
    pub events_tx: broadcast::Sender<SessionEvent>,
    pub snapshot_rx: watch::Receiver<Arc<MissionSnapshot>>,
    pub metrics_rx: watch::Receiver<MetricsSnapshot>,
}

impl UnifiedSerialHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> { self.events_tx.subscribe() }
    pub fn snapshot_receiver(&self) -> watch::Receiver<Arc<MissionSnapshot>> { self.snapshot_rx.clone() }
    pub fn metrics_receiver(&self) -> watch::Receiver<MetricsSnapshot> { self.metrics_rx.clone() }

    pub async fn send(&self, cmd: UserCommand) -> Result<(), SerialError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SerialError::ProtocolError("Command channel closed".into()))
    }

    pub async fn user_request_connect(&self, port: impl Into<String>) -> Result<(), SerialError> {
        self.send(UserCommand::Connect { port: port.into() }).await
    }

    pub async fn user_add_waypoint_at(&self, lat: f64, lon: f64) -> Result<(), SerialError> {
        self.send(UserCommand::AddWaypoint { lat, lon }).await
    }

    pub async fn user_set_radius(&self, index: usize, value: f64) -> Result<(), SerialError> {
        self.send(UserCommand::SetRadius { index, value }).await
    }

    pub async fn user_set_altitude(&self, index: usize, value: f64) -> Result<(), SerialError> {
        self.send(UserCommand::SetAltitude { index, value }).await
    }

    pub async fn user_set_status(&self, index: usize, status: impl Into<WaypointStatus>) -> Result<(), SerialError> {
        self.send(UserCommand::SetStatus { index, status: status.into() }).await
    }

    pub async fn user_remove_waypoint(&self, index: usize) -> Result<(), SerialError> {
        self.send(UserCommand::RemoveWaypoint { index }).await
    }

    pub async fn user_upload_mission(&self) -> Result<(), SerialError> {
        self.send(UserCommand::UploadMission).await
    }

    pub async fn user_reread_mission(&self) -> Result<(), SerialError> {
        self.send(UserCommand::RereadMission).await
    }

    pub async fn shutdown(&self) -> Result<(), SerialError> {
        self.send(UserCommand::Shutdown).await
    }
}

pub struct UnifiedSerialBuilder {
    pub interface: SerialInterface,
    pub settings: LinkSettings,
}

impl UnifiedSerialBuilder {
    pub fn new(settings: LinkSettings) -> Self { Self::with_interface(SerialInterface::new(), settings) }
    pub fn with_interface(interface: SerialInterface, settings: LinkSettings) -> Self { Self { interface, settings } }

    /// Spawn the link task on the current tokio runtime.
    pub fn build(self) -> UnifiedSerialHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.settings.command_capacity.max(1));
        let (events_tx, _events_rx) = broadcast::channel(self.settings.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(MissionSnapshot::default()));
        let (metrics_tx, metrics_rx) = watch::channel(MetricsSnapshot::default());

        let task = LinkTask {
            session: GroundSession::new(&self.settings),
            framer: LineFramer::with_capacity_limit(self.settings.max_line_buffer),
            interface: self.interface,
            settings: self.settings,
            events_tx: events_tx.clone(),
            snapshot_tx,
            metrics_tx,
            metrics: MetricsSnapshot::default(),
            published_revision: 0,
        };
        tokio::spawn(task.run(cmd_rx));

        UnifiedSerialHandle { cmd_tx, events_tx, snapshot_rx, metrics_rx }
    }
}

struct LinkTask {
    session: GroundSession,
    framer: LineFramer,
    interface: SerialInterface,
    settings: LinkSettings,
    events_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<Arc<MissionSnapshot>>,
    metrics_tx: watch::Sender<MetricsSnapshot>,
    metrics: MetricsSnapshot,
    published_revision: u64,
}

impl LinkTask {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<UserCommand>) {
        let mut buf = [0u8; 512];
        'outer: loop {
            // Operator commands first, each processed to completion.
            loop {
                let next = if self.interface.is_connected() {
                    match cmd_rx.try_recv() {
                        Ok(cmd) => Some(cmd),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break 'outer,
                    }
                } else {
                    // Nothing to read without a transport; park on the channel.
                    match cmd_rx.recv().await {
                        Some(cmd) => Some(cmd),
                        None => break 'outer,
                    }
                };
                let Some(cmd) = next else { break };
                if matches!(cmd, UserCommand::Shutdown) {
                    let actions = self.session.shutdown();
                    self.apply(actions).await;
                    break 'outer;
                }
                self.handle_command(cmd).await;
            }

            if !self.interface.is_connected() {
                continue;
            }
            match self.interface.read_data(&mut buf, self.settings.read_timeout_ms).await {
                Ok(n) if n > 0 => self.handle_bytes(&buf[..n]).await,
                Ok(_) | Err(SerialError::Timeout) => {}
                Err(e) => self.handle_transport_failure(e).await,
            }
        }
        log::info!("Link task stopped");
    }

    async fn handle_command(&mut self, cmd: UserCommand) {
        let actions = match cmd {
            UserCommand::Connect { port } => {
                if let Some(open) = self.interface.port_name().filter(|open| *open != port.trim()) {
                    // The request toggles the link that is actually open.
                    log::warn!("Connect request names {} but {} is open; acting on {}", port, open, open);
                }
                if !self.interface.is_connected() {
                    self.framer.clear();
                    if let Err(e) = self.interface.connect(&port, self.settings.baud_rate) {
                        log::error!("Failed to open {}: {}", port, e);
                        let actions = self.session.transport_lost(&port, &e.to_string());
                        self.apply(actions).await;
                        return;
                    }
                }
                self.session.user_request_connect(&port)
            }
            UserCommand::AddWaypoint { lat, lon } => self.session.user_add_waypoint_at(lat, lon),
            UserCommand::SetRadius { index, value } => self.session.user_set_radius(index, value),
            UserCommand::SetAltitude { index, value } => self.session.user_set_altitude(index, value),
            UserCommand::SetStatus { index, status } => self.session.user_set_status(index, status),
            UserCommand::RemoveWaypoint { index } => self.session.user_remove_waypoint(index),
            UserCommand::UploadMission => self.session.user_upload_mission(),
            UserCommand::RereadMission => self.session.user_reread_mission(),
            UserCommand::Shutdown => self.session.shutdown(),
        };
        self.apply(actions).await;
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) {
        self.metrics.bytes_read += bytes.len() as u64;
        let mut lines = Vec::new();
        let mut overflow = None;
        for item in self.framer.feed(bytes) {
            match item {
                Ok(line) => lines.push(line),
                Err(e) => overflow = Some(e),
            }
        }
        self.metrics.utf8_decode_errors = self.framer.utf8_errors();

        for line in lines {
            self.metrics.lines_read += 1;
            let actions = self.session.handle_line(&line);
            self.apply(actions).await;
        }

        if let Some(e) = overflow {
            self.metrics.buffer_overflows += 1;
            let port = self.interface.port_name().unwrap_or_default().to_string();
            self.apply(vec![Action::Emit(SessionEvent::TransportError { port, description: e.to_string() })]).await;
        }
        self.publish_metrics();
    }

    async fn handle_transport_failure(&mut self, e: SerialError) {
        let port = self.interface.port_name().unwrap_or_default().to_string();
        log::error!("Serial link on {} failed: {}", port, e);
        let actions = self.session.transport_lost(&port, &e.to_string());
        self.apply(actions).await;
        self.interface.disconnect();
        self.framer.clear();
    }

    /// Carry out actions in order. A failed write turns into a transport
    /// loss whose own actions are appended to the queue.
    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(cmd) => {
                    let line = cmd.to_line();
                    match self.interface.send_line(&line, self.settings.write_flush_timeout()).await {
                        Ok(outcome) => {
                            log::debug!("-> {}", line);
                            self.metrics.commands_written += 1;
                            if !outcome.flushed {
                                self.metrics.write_flush_timeouts += 1;
                            }
                        }
                        Err(SerialError::NotConnected) => {
                            log::warn!("Dropping {:?}: transport is closed", line);
                        }
                        Err(e) => {
                            let port = self.interface.port_name().unwrap_or_default().to_string();
                            log::error!("Write of {:?} to {} failed: {}", line, port, e);
                            queue.extend(self.session.transport_lost(&port, &e.to_string()));
                            self.interface.disconnect();
                        }
                    }
                }
                Action::CloseTransport => {
                    self.interface.disconnect();
                    self.framer.clear();
                }
                Action::Emit(event) => {
                    self.count_event(&event);
                    // Watchers see state at least as new as the event.
                    self.publish_snapshot();
                    self.publish_metrics();
                    let _ = self.events_tx.send(event);
                }
            }
        }
        self.publish_snapshot();
        self.publish_metrics();
    }

    fn count_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::AttitudeUpdated { .. } => self.metrics.telemetry_samples += 1,
            SessionEvent::MissionReceived(_) => self.metrics.missions_received += 1,
            SessionEvent::ProtocolWarning { line, reason } => {
                log::warn!("Protocol warning on {:?}: {}", line, reason);
                self.metrics.protocol_warnings += 1;
            }
            SessionEvent::ProtocolInfo { line } => {
                log::debug!("Unhandled line {:?}", line);
                self.metrics.protocol_infos += 1;
            }
            SessionEvent::TransportError { port, description } => {
                self.metrics.transport_errors += 1;
                self.metrics.last_error = Some(format!("{}: {}", port, description));
            }
            _ => {}
        }
    }

    fn publish_snapshot(&mut self) {
        let revision = self.session.mission().revision();
        if revision != self.published_revision {
            self.published_revision = revision;
            let _ = self.snapshot_tx.send(Arc::new(self.session.mission().snapshot()));
        }
    }

    fn publish_metrics(&self) {
        let _ = self.metrics_tx.send(self.metrics.clone());
    }
}
