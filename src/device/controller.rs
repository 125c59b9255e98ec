//! Connection lifecycle of the single peripheral session.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> DiscoveringServices -> Ready -> Disconnecting -> Idle
//!            |            |                 |                           ^
//!            v            +------> Error <--+                           |
//!          Idle                      +---- acknowledge / disconnect ----+
//! ```
//!
//! The controller is driven by one owner (see `dispatcher`) and never blocks: transport requests
//! are issued and their completions come back through [`Controller::handle_transport_event`].
//! Events for the presentation layer are queued and drained with [`Controller::take_events`].

use std::time::Duration;
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::device::codec::{self, TelemetryField};
use crate::device::command::{self, Command};
use crate::device::constants::{default_scan_timeout, DEFAULT_TARGET_NAME};
use crate::device::scanner::{ScanOutcome, ScanStart, Scanner};
use crate::device::session::Session;
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{DeviceEvent, DeviceState, PeripheralHandle, SensorSnapshot, SessionId};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub target_name: String,
    pub scan_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            scan_timeout: default_scan_timeout(),
        }
    }
}

pub struct Controller<T: Transport> {
    transport: T,
    settings: ControllerSettings,
    state: DeviceState,
    scanner: Scanner,
    session: Option<Session>,
    session_counter: u64,
    snapshot: SensorSnapshot,
    // optimistic mode, overwritten by every MODO field the peripheral sends
    mode_intent: bool,
    events: Vec<DeviceEvent>,
}

impl<T: Transport> Controller<T> {
    pub fn new(transport: T, settings: ControllerSettings) -> Self {
        Controller {
            transport,
            settings,
            state: DeviceState::Idle,
            scanner: Scanner::new(),
            session: None,
            session_counter: 0,
            snapshot: SensorSnapshot::default(),
            mode_intent: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    /// The mode shown to the user: the last toggle, or the last mode the peripheral reported.
    pub fn mode_intent(&self) -> bool {
        self.mode_intent
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.session.as_ref().map(Session::peripheral)
    }

    pub fn scan_deadline(&self) -> Option<Instant> {
        self.scanner.deadline()
    }

    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn start_scan(&mut self, now: Instant) -> Result<ScanStart, DeviceError> {
        match self.state {
            DeviceState::Idle | DeviceState::Scanning => {},
            state => {
                self.log_line(format!("Cannot scan while {}", state));
                return Err(DeviceError::Busy(state));
            },
        }

        let target_name = self.settings.target_name.clone();
        let start = self.scanner.start(&mut self.transport, &target_name, self.settings.scan_timeout, now);

        if let ScanStart::Started(_) = start {
            self.log_line(format!("Searching for {:?}...", target_name));
            self.set_state(DeviceState::Scanning);
        }

        Ok(start)
    }

    /// Called when the scan deadline elapses. Reports the timeout at most once per scan.
    pub fn on_scan_deadline(&mut self, now: Instant) {
        if self.state != DeviceState::Scanning {
            return;
        }

        if let Some(ScanOutcome::TimedOut) = self.scanner.on_deadline(&mut self.transport, now) {
            let error = DeviceError::ScanTimeout;
            warn!("{}", error);
            self.log_line(format!("{:?} not found. Check that it is powered, in range and advertising.", self.settings.target_name));
            self.set_state(DeviceState::Idle);
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if let Some(session_id) = event.session() {
            if !self.is_current_session(session_id) {
                debug!("Ignoring stale event for session {}: {:?}", session_id, event);
                return;
            }
        }

        match event {
            TransportEvent::Advertisement { id, name } => {
                if self.state != DeviceState::Scanning {
                    return;
                }

                self.log_line(format!("Device found: {}", name.as_deref().unwrap_or("unnamed")));
                if let Some(ScanOutcome::Matched(handle)) = self.scanner.on_advertisement(&mut self.transport, &id, name.as_deref()) {
                    self.begin_session(handle);
                }
            },
            TransportEvent::ScanFailed(error) => {
                if self.state != DeviceState::Scanning {
                    return;
                }

                warn!("Scanning failed {:?}", error);
                self.scanner.cancel(&mut self.transport);
                self.log_line(format!("Scan failed: {}", error));
                self.set_state(DeviceState::Idle);
            },
            TransportEvent::Connected(_) => {
                if self.state != DeviceState::Connecting {
                    return;
                }

                self.log_line("Connected");
                self.set_state(DeviceState::DiscoveringServices);
                if let Some(session) = &self.session {
                    session.discover_services(&mut self.transport);
                }
            },
            TransportEvent::ConnectFailed(_, error) => {
                if self.state == DeviceState::Connecting {
                    self.fail(error);
                }
            },
            TransportEvent::ServicesDiscovered(_, services) => {
                if self.state != DeviceState::DiscoveringServices {
                    return;
                }

                let resolved = match self.session.as_mut() {
                    Some(session) => session.resolve(&services)
                        .and_then(|_| session.subscribe(&mut self.transport)),
                    None => return,
                };

                match resolved {
                    Ok(()) => self.log_line("Services discovered; enabling telemetry"),
                    Err(error) => self.fail(error),
                }
            },
            TransportEvent::DiscoveryFailed(_, error) | TransportEvent::SubscribeFailed(_, error) => {
                if self.state == DeviceState::DiscoveringServices {
                    self.fail(error);
                }
            },
            TransportEvent::Subscribed(_) => {
                if self.state != DeviceState::DiscoveringServices {
                    return;
                }

                if let Some(session) = self.session.as_mut() {
                    session.mark_subscribed();
                }
                info!("Peripheral ready");
                self.log_line("Connection complete, the motor can be controlled");
                self.set_state(DeviceState::Ready);
            },
            TransportEvent::WriteCompleted(_, result) => match result {
                Ok(()) => info!("Command delivered"),
                Err(error) => {
                    warn!("Failed to send to command characteristic: {:?}", error);
                    self.log_line(format!("Command not delivered: {}", error));
                },
            },
            TransportEvent::Notification { characteristic, value, .. } => {
                if self.state != DeviceState::Ready {
                    return;
                }

                let telemetry = self.session.as_ref().and_then(Session::telemetry_channel);
                if telemetry == Some(characteristic) {
                    self.apply_telemetry(&value);
                }
            },
            TransportEvent::Disconnected(_) => match self.state {
                DeviceState::Ready => {
                    warn!("Connection lost");
                    self.log_line("Connection lost");
                    self.teardown();
                },
                DeviceState::Connecting | DeviceState::DiscoveringServices => {
                    self.fail(DeviceError::TransportFailure("link dropped during setup".to_string()));
                },
                _ => {},
            },
        }
    }

    /// Sends a user command. Failures are reported and returned, never panics.
    pub fn send_command(&mut self, command: Command) -> Result<(), DeviceError> {
        if self.state == DeviceState::Ready && command.is_steering() && self.mode_intent {
            let error = DeviceError::ManualControlLocked;
            self.log_line(format!("{}: switch to manual mode first", error));
            return Err(error);
        }

        match command::send(&mut self.transport, self.state, self.session.as_ref(), command) {
            Ok(()) => {
                self.log_line(format!("Sending: {}", command));
                Ok(())
            },
            Err(error) => {
                warn!("Not sending {}: {}", command, error);
                self.log_line(format!("Cannot send {}: {}", command, error));
                Err(error)
            },
        }
    }

    /// Flips the mode right away and asks the peripheral to follow.
    pub fn toggle_mode(&mut self) -> Result<(), DeviceError> {
        if self.state != DeviceState::Ready {
            let error = DeviceError::NotReady(self.state);
            self.log_line(format!("Cannot change mode: {}", error));
            return Err(error);
        }

        let auto_mode = !self.mode_intent;
        self.set_mode_intent(auto_mode);
        self.log_line(if auto_mode { "Requesting automatic mode..." } else { "Requesting manual mode..." });
        self.send_command(Command::for_mode(auto_mode))
    }

    /// Leaves the error state.
    pub fn acknowledge(&mut self) {
        if self.state != DeviceState::Error {
            return;
        }

        self.release_session();
        self.set_state(DeviceState::Idle);
    }

    /// Always safe to call; ends in `Idle` from every state.
    pub fn disconnect(&mut self) {
        match self.state {
            DeviceState::Idle => {},
            DeviceState::Scanning => {
                self.scanner.cancel(&mut self.transport);
                self.log_line("Scan stopped");
                self.set_state(DeviceState::Idle);
            },
            DeviceState::Connecting
            | DeviceState::DiscoveringServices
            | DeviceState::Ready
            | DeviceState::Disconnecting => {
                self.teardown();
            },
            DeviceState::Error => {
                self.release_session();
                self.set_state(DeviceState::Idle);
            },
        }
    }

    fn is_current_session(&self, id: SessionId) -> bool {
        self.session.as_ref()
            .map(|session| session.id() == id && !session.is_closed())
            .unwrap_or(false)
    }

    fn begin_session(&mut self, handle: PeripheralHandle) {
        // a new session requires the previous one to be fully torn down
        self.release_session();

        self.session_counter += 1;
        let session = Session::new(SessionId(self.session_counter), handle);
        self.log_line(format!("Connecting to {}...", session.peripheral().name));
        self.set_state(DeviceState::Connecting);
        session.connect(&mut self.transport);
        self.session = Some(session);
    }

    fn fail(&mut self, error: DeviceError) {
        warn!("Session failed: {}", error);
        if error.is_protocol_mismatch() {
            self.log_line(format!("Unsupported peripheral: {}", error));
        } else {
            self.log_line(format!("Connection failed: {}", error));
        }

        // fail closed: the connection is released now, the session value stays until acknowledged
        if let Some(session) = self.session.as_mut() {
            session.close(&mut self.transport);
        }
        self.set_state(DeviceState::Error);
    }

    fn teardown(&mut self) {
        self.set_state(DeviceState::Disconnecting);
        self.release_session();
        self.log_line("Disconnected");
        self.set_state(DeviceState::Idle);
    }

    fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close(&mut self.transport);
        }
        self.reset_view();
    }

    fn reset_view(&mut self) {
        self.set_mode_intent(false);

        if self.snapshot != SensorSnapshot::default() {
            self.snapshot = SensorSnapshot::default();
            self.events.push(DeviceEvent::SnapshotChange(self.snapshot.clone()));
        }
    }

    fn apply_telemetry(&mut self, value: &[u8]) {
        let mut changed = false;

        for field in codec::parse(value) {
            if let TelemetryField::Mode(auto_mode) = field {
                if self.mode_intent != auto_mode {
                    self.log_line(if auto_mode { "Mode updated: automatic" } else { "Mode updated: manual" });
                }
                self.set_mode_intent(auto_mode);
            }
            changed |= self.snapshot.apply(field);
        }

        if changed {
            debug!("Snapshot {:?}", self.snapshot);
            self.events.push(DeviceEvent::SnapshotChange(self.snapshot.clone()));
        }
    }

    fn set_mode_intent(&mut self, auto_mode: bool) {
        if self.mode_intent != auto_mode {
            self.mode_intent = auto_mode;
            self.events.push(DeviceEvent::ModeChange(auto_mode));
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.state != state {
            info!("State {} -> {}", self.state, state);
            self.state = state;
            self.events.push(DeviceEvent::StateChange(state));
        }
    }

    fn log_line<S: Into<String>>(&mut self, line: S) {
        self.events.push(DeviceEvent::LogLine(line.into()));
    }
}
