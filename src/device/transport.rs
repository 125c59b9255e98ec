//! The seam between the connection state machine and the radio.
//!
//! Requests are fire-and-forget: every method returns immediately and the outcome is delivered
//! later as a [`TransportEvent`] on the channel the dispatcher consumes. This keeps all state
//! mutation inside the dispatcher no matter which thread the platform uses for its callbacks.

use uuid::Uuid;

use crate::device::types::{GattService, PeripheralHandle, PeripheralId, SessionId};
use crate::error::DeviceError;

pub trait Transport: Send {
    /// Puts the radio in scan mode. Advertisements arrive as [`TransportEvent::Advertisement`].
    fn start_scan(&mut self);

    fn stop_scan(&mut self);

    /// Answered by `Connected` or `ConnectFailed`.
    fn connect(&mut self, session: SessionId, peripheral: &PeripheralHandle);

    /// Answered by `ServicesDiscovered` or `DiscoveryFailed`.
    fn discover_services(&mut self, session: SessionId);

    /// Enables notifications on `characteristic`. Answered by `Subscribed` once the
    /// descriptor write is acknowledged, or `SubscribeFailed`.
    fn subscribe(&mut self, session: SessionId, characteristic: Uuid);

    /// Answered by `WriteCompleted`.
    fn write(&mut self, session: SessionId, characteristic: Uuid, payload: Vec<u8>);

    /// Releases the connection handle of `session`. Never answered, not even by `Disconnected`.
    fn close(&mut self, session: SessionId);
}

#[derive(Debug)]
pub enum TransportEvent {
    Advertisement {
        id: PeripheralId,
        name: Option<String>,
    },
    ScanFailed(DeviceError),
    Connected(SessionId),
    ConnectFailed(SessionId, DeviceError),
    ServicesDiscovered(SessionId, Vec<GattService>),
    DiscoveryFailed(SessionId, DeviceError),
    Subscribed(SessionId),
    SubscribeFailed(SessionId, DeviceError),
    WriteCompleted(SessionId, Result<(), DeviceError>),
    Notification {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The link of `session` dropped. The drop that answers `close` is never reported.
    Disconnected(SessionId),
}

impl TransportEvent {
    /// The session a completion belongs to, None for events not tied to a request.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            TransportEvent::Advertisement { .. }
            | TransportEvent::ScanFailed(_) => None,
            TransportEvent::Connected(session)
            | TransportEvent::ConnectFailed(session, _)
            | TransportEvent::ServicesDiscovered(session, _)
            | TransportEvent::DiscoveryFailed(session, _)
            | TransportEvent::Subscribed(session)
            | TransportEvent::SubscribeFailed(session, _)
            | TransportEvent::WriteCompleted(session, _)
            | TransportEvent::Disconnected(session) => Some(*session),
            TransportEvent::Notification { session, .. } => Some(*session),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TransportCall {
        StartScan,
        StopScan,
        Connect(SessionId, PeripheralId),
        DiscoverServices(SessionId),
        Subscribe(SessionId, Uuid),
        Write(SessionId, Uuid, Vec<u8>),
        Close(SessionId),
    }

    #[derive(Clone, Default)]
    pub struct CallLog {
        calls: Arc<Mutex<Vec<TransportCall>>>,
    }

    impl CallLog {
        pub fn take(&self) -> Vec<TransportCall> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    /// Records every request instead of talking to a radio.
    pub struct RecordingTransport {
        log: CallLog,
    }

    impl RecordingTransport {
        pub fn new() -> (RecordingTransport, CallLog) {
            let log = CallLog::default();
            (RecordingTransport { log: log.clone() }, log)
        }

        fn record(&self, call: TransportCall) {
            self.log.calls.lock().unwrap().push(call);
        }
    }

    impl Transport for RecordingTransport {
        fn start_scan(&mut self) {
            self.record(TransportCall::StartScan);
        }

        fn stop_scan(&mut self) {
            self.record(TransportCall::StopScan);
        }

        fn connect(&mut self, session: SessionId, peripheral: &PeripheralHandle) {
            self.record(TransportCall::Connect(session, peripheral.id.clone()));
        }

        fn discover_services(&mut self, session: SessionId) {
            self.record(TransportCall::DiscoverServices(session));
        }

        fn subscribe(&mut self, session: SessionId, characteristic: Uuid) {
            self.record(TransportCall::Subscribe(session, characteristic));
        }

        fn write(&mut self, session: SessionId, characteristic: Uuid, payload: Vec<u8>) {
            self.record(TransportCall::Write(session, characteristic, payload));
        }

        fn close(&mut self, session: SessionId) {
            self.record(TransportCall::Close(session));
        }
    }
}
