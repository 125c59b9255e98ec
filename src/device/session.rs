use log::{debug, info};
use uuid::Uuid;

use crate::device::constants::{COMMAND_CHARACTERISTIC, MOTOR_SERVICE, TELEMETRY_CHARACTERISTIC};
use crate::device::transport::Transport;
use crate::device::types::{GattService, PeripheralHandle, SessionId};
use crate::error::DeviceError;

/// The two characteristics of the motor service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub command: Uuid,
    pub telemetry: Uuid,
}

/// A GATT session with one peripheral. At most one exists at a time; it is closed exactly once.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peripheral: PeripheralHandle,
    channels: Option<Channels>,
    subscribed: bool,
    closed: bool,
}

impl Session {
    pub fn new(id: SessionId, peripheral: PeripheralHandle) -> Self {
        Session {
            id,
            peripheral,
            channels: None,
            subscribed: false,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    pub fn connect<T: Transport + ?Sized>(&self, transport: &mut T) {
        info!("Connecting to peripheral {} ({})...", self.peripheral.name, self.peripheral.id);
        transport.connect(self.id, &self.peripheral);
    }

    pub fn discover_services<T: Transport + ?Sized>(&self, transport: &mut T) {
        info!("Connected; Discovering services...");
        transport.discover_services(self.id);
    }

    /// Finds the motor service and both of its characteristics.
    pub fn resolve(&mut self, services: &[GattService]) -> Result<Channels, DeviceError> {
        let service = services.iter()
            .find(|service| service.uuid == MOTOR_SERVICE)
            .ok_or_else(|| {
                for service in services {
                    debug!("Available service: {}", service.uuid);
                }
                DeviceError::MissingService
            })?;

        for uuid in [COMMAND_CHARACTERISTIC, TELEMETRY_CHARACTERISTIC] {
            if !service.characteristics.contains(&uuid) {
                return Err(DeviceError::MissingCharacteristic(uuid));
            }
        }

        let channels = Channels {
            command: COMMAND_CHARACTERISTIC,
            telemetry: TELEMETRY_CHARACTERISTIC,
        };
        self.channels = Some(channels);
        Ok(channels)
    }

    /// Requests notifications on the telemetry channel. Requires resolved channels.
    pub fn subscribe<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<(), DeviceError> {
        let channels = self.channels.ok_or(DeviceError::MissingCharacteristic(TELEMETRY_CHARACTERISTIC))?;
        info!("Subscribing to characteristic {:?} {:?}", MOTOR_SERVICE, channels.telemetry);
        transport.subscribe(self.id, channels.telemetry);
        Ok(())
    }

    pub fn mark_subscribed(&mut self) {
        self.subscribed = true;
    }

    /// Both channels are resolved and the telemetry subscription was acknowledged.
    pub fn is_ready(&self) -> bool {
        self.channels.is_some() && self.subscribed && !self.closed
    }

    pub fn command_channel(&self) -> Option<Uuid> {
        if self.is_ready() {
            self.channels.map(|channels| channels.command)
        } else {
            None
        }
    }

    pub fn telemetry_channel(&self) -> Option<Uuid> {
        self.channels.map(|channels| channels.telemetry)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the transport connection and clears the handles. Returns false if already closed.
    pub fn close<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        if self.closed {
            return false;
        }

        info!("Closing session {} with {}", self.id, self.peripheral.id);
        transport.close(self.id);
        self.channels = None;
        self.subscribed = false;
        self.closed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::testing::{RecordingTransport, TransportCall};
    use crate::device::types::PeripheralId;

    fn session() -> Session {
        Session::new(SessionId(7), PeripheralHandle {
            id: PeripheralId("AA:BB".to_string()),
            name: "ARDUINO".to_string(),
        })
    }

    fn motor_service(characteristics: Vec<Uuid>) -> GattService {
        GattService { uuid: MOTOR_SERVICE, characteristics }
    }

    #[test]
    fn resolves_both_channels() {
        let mut session = session();
        let other = GattService { uuid: Uuid::from_u128(0x1800), characteristics: vec![] };

        let channels = session.resolve(&[
            other,
            motor_service(vec![TELEMETRY_CHARACTERISTIC, COMMAND_CHARACTERISTIC]),
        ]).unwrap();

        assert_eq!(channels.command, COMMAND_CHARACTERISTIC);
        assert_eq!(channels.telemetry, TELEMETRY_CHARACTERISTIC);
        assert_eq!(session.telemetry_channel(), Some(TELEMETRY_CHARACTERISTIC));
        // not ready until the subscription is acknowledged
        assert!(!session.is_ready());
        assert_eq!(session.command_channel(), None);
    }

    #[test]
    fn missing_service_is_reported() {
        let mut session = session();
        let result = session.resolve(&[]);
        assert!(matches!(result, Err(DeviceError::MissingService)));
    }

    #[test]
    fn missing_characteristic_is_reported() {
        let mut session = session();

        let result = session.resolve(&[motor_service(vec![COMMAND_CHARACTERISTIC])]);
        assert!(matches!(result, Err(DeviceError::MissingCharacteristic(uuid)) if uuid == TELEMETRY_CHARACTERISTIC));

        let result = session.resolve(&[motor_service(vec![TELEMETRY_CHARACTERISTIC])]);
        assert!(matches!(result, Err(DeviceError::MissingCharacteristic(uuid)) if uuid == COMMAND_CHARACTERISTIC));
        assert!(result.unwrap_err().is_protocol_mismatch());
    }

    #[test]
    fn subscribe_requires_resolved_channels() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut session = session();

        assert!(session.subscribe(&mut transport).is_err());
        assert!(calls.take().is_empty());

        session.resolve(&[motor_service(vec![COMMAND_CHARACTERISTIC, TELEMETRY_CHARACTERISTIC])]).unwrap();
        session.subscribe(&mut transport).unwrap();
        assert_eq!(calls.take(), vec![TransportCall::Subscribe(SessionId(7), TELEMETRY_CHARACTERISTIC)]);

        session.mark_subscribed();
        assert!(session.is_ready());
    }

    #[test]
    fn close_is_idempotent() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut session = session();
        session.resolve(&[motor_service(vec![COMMAND_CHARACTERISTIC, TELEMETRY_CHARACTERISTIC])]).unwrap();
        session.mark_subscribed();

        assert!(session.close(&mut transport));
        assert!(!session.close(&mut transport));

        assert_eq!(calls.take(), vec![TransportCall::Close(SessionId(7))]);
        assert!(session.is_closed());
        assert!(!session.is_ready());
        assert_eq!(session.telemetry_channel(), None);
    }
}
