use std::fmt;
use uuid::Uuid;

/// Platform independent identifier of a peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peripheral that matched the scan, discarded on disconnect or scan timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    pub name: String,
}

/// Tags transport requests so that completions can be matched to the session that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Ready,
    Disconnecting,
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            DeviceState::Idle => "idle",
            DeviceState::Scanning => "scanning",
            DeviceState::Connecting => "connecting",
            DeviceState::DiscoveringServices => "discovering services",
            DeviceState::Ready => "ready",
            DeviceState::Disconnecting => "disconnecting",
            DeviceState::Error => "error",
        };

        write!(f, "{}", result)
    }
}

/// The last authoritative readings reported by the peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorSnapshot {
    /// Distance reading as sent by the peripheral, centimeters by convention.
    pub distance_cm: Option<String>,
    pub motor_state: String,
    pub auto_mode: bool,
}

/// A service as reported by discovery, reduced to the UUIDs the session resolves against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Events for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StateChange(DeviceState),
    SnapshotChange(SensorSnapshot),
    ModeChange(bool), // true if automatic
    LogLine(String),
}
