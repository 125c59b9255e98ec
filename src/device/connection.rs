use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::Sender;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{CONNECT_DEADLINE, DISCOVERY_DEADLINE, SUBSCRIBE_DEADLINE, WRITE_DEADLINE};
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{GattService, PeripheralHandle, PeripheralId, SessionId};
use crate::error::DeviceError;

// peripherals seen during the current scan, with the name last reported for them
type SeenPeripherals = Arc<Mutex<HashMap<String, (Peripheral, Option<String>)>>>;

/// Connected peripherals and the session that owns each link.
///
/// A link is registered once its connect succeeds and released by `close`, so the drop that
/// answers our own disconnect finds no owner and is not reported.
#[derive(Clone, Default)]
struct LinkTable {
    owners: Arc<Mutex<HashMap<String, SessionId>>>,
}

impl LinkTable {
    fn register(&self, peripheral: &PeripheralId, session: SessionId) {
        self.owners.lock().expect("Failed to lock link table").insert(peripheral.0.clone(), session);
    }

    fn release(&self, session: SessionId) {
        self.owners.lock().expect("Failed to lock link table").retain(|_, owner| *owner != session);
    }

    fn take_owner(&self, peripheral: &PeripheralId) -> Option<SessionId> {
        self.owners.lock().expect("Failed to lock link table").remove(&peripheral.0)
    }
}

struct SessionTask {
    peripheral: Peripheral,
    cancel: CancellationToken,
}

/// [`Transport`] backed by the first bluetooth adapter btleplug reports.
pub struct BtleTransport {
    adapter: Adapter,
    events: Sender<TransportEvent>,
    cancel: CancellationToken,
    scanning: Arc<AtomicBool>,
    seen: SeenPeripherals,
    links: LinkTable,
    sessions: HashMap<SessionId, SessionTask>,
}

async fn with_deadline<T, F>(what: &'static str, millis: u64, fut: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, btleplug::Error>>,
{
    tokio::select! {
        _ = sleep(Duration::from_millis(millis)) => {
            warn!("{} took too long", what);
            Err(DeviceError::Deadline(what))
        }
        result = fut => Ok(result?),
    }
}

async fn forward(mut events: Sender<TransportEvent>, event: TransportEvent) {
    if let Err(err) = events.send(event).await {
        debug!("Dropping TransportEvent, dispatcher is gone: {}", err);
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or(DeviceError::MissingCharacteristic(uuid))
}

impl BtleTransport {
    /// Opens the first adapter and starts forwarding its events. Stops when `cancel` is cancelled.
    pub async fn new(events: Sender<TransportEvent>, cancel: CancellationToken) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let transport = BtleTransport {
            adapter,
            events,
            cancel,
            scanning: Arc::new(AtomicBool::new(false)),
            seen: Arc::new(Mutex::new(HashMap::new())),
            links: LinkTable::default(),
            sessions: HashMap::new(),
        };
        transport.forward_adapter_events().await?;
        Ok(transport)
    }

    async fn forward_adapter_events(&self) -> Result<(), DeviceError> {
        let mut central_events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let mut events = self.events.clone();
        let cancel = self.cancel.clone();
        let scanning = self.scanning.clone();
        let seen = self.seen.clone();
        let links = self.links.clone();

        spawn(async move {
            'mainloop: loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break 'mainloop,
                    event = central_events.next() => match event {
                        Some(event) => event,
                        None => break 'mainloop,
                    },
                };

                let forwarded = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        if !scanning.load(Ordering::SeqCst) {
                            continue;
                        }

                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(peripheral) => peripheral,
                            Err(err) => {
                                warn!("Failed to query BLE adapter for peripheral: {}", err);
                                continue;
                            },
                        };

                        let name = match peripheral.properties().await {
                            Ok(Some(properties)) => properties.local_name,
                            Ok(None) => None,
                            Err(err) => {
                                warn!("Could not query peripheral for properties: {:?}", err);
                                continue;
                            },
                        };

                        let key = id.to_string();
                        {
                            let mut seen = seen.lock().expect("Failed to lock seen peripherals");
                            // updates are frequent (rssi); only report new peripherals or a newly learned name
                            if let Some((_, reported)) = seen.get(&key) {
                                if reported == &name {
                                    continue;
                                }
                            }
                            seen.insert(key.clone(), (peripheral, name.clone()));
                        }

                        TransportEvent::Advertisement { id: PeripheralId(key), name }
                    },
                    CentralEvent::DeviceDisconnected(id) => {
                        let peripheral = PeripheralId(id.to_string());
                        match links.take_owner(&peripheral) {
                            Some(session) => TransportEvent::Disconnected(session),
                            None => {
                                debug!("Ignoring disconnect of {}, no open session", peripheral);
                                continue;
                            },
                        }
                    },
                    _ => continue,
                };

                if events.send(forwarded).await.is_err() {
                    break 'mainloop;
                }
            }

            debug!("Adapter event task stopped");
        });

        Ok(())
    }

    fn emit(&self, event: TransportEvent) {
        spawn(forward(self.events.clone(), event));
    }

    fn session_peripheral(&self, session: SessionId) -> Option<(Peripheral, CancellationToken)> {
        self.sessions.get(&session).map(|task| (task.peripheral.clone(), task.cancel.clone()))
    }
}

impl Transport for BtleTransport {
    fn start_scan(&mut self) {
        self.seen.lock().expect("Failed to lock seen peripherals").clear();
        self.scanning.store(true, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        spawn(async move {
            if let Err(err) = adapter.start_scan(ScanFilter::default()).await {
                forward(events, TransportEvent::ScanFailed(err.into())).await;
            }
        });
    }

    fn stop_scan(&mut self) {
        self.scanning.store(false, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
            }
        });
    }

    fn connect(&mut self, session: SessionId, handle: &PeripheralHandle) {
        let found = self.seen.lock()
            .expect("Failed to lock seen peripherals")
            .get(&handle.id.0)
            .map(|(peripheral, _)| peripheral.clone());

        let peripheral = match found {
            Some(peripheral) => peripheral,
            None => {
                self.emit(TransportEvent::ConnectFailed(session, DeviceError::UnknownPeripheral));
                return;
            },
        };

        let cancel = self.cancel.child_token();
        self.sessions.insert(session, SessionTask {
            peripheral: peripheral.clone(),
            cancel: cancel.clone(),
        });

        let events = self.events.clone();
        let links = self.links.clone();
        let peripheral_id = handle.id.clone();
        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = with_deadline("Connecting", CONNECT_DEADLINE, peripheral.connect()) => result,
            };

            if cancel.is_cancelled() {
                return;
            }

            let event = match result {
                Ok(()) => {
                    links.register(&peripheral_id, session);
                    TransportEvent::Connected(session)
                },
                Err(err) => TransportEvent::ConnectFailed(session, err),
            };
            forward(events, event).await;
        });
    }

    fn discover_services(&mut self, session: SessionId) {
        let Some((peripheral, cancel)) = self.session_peripheral(session) else {
            return;
        };

        let events = self.events.clone();
        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = with_deadline("Discovering services", DISCOVERY_DEADLINE, peripheral.discover_services()) => result,
            };

            let event = match result {
                Ok(()) => {
                    let services = peripheral.services()
                        .into_iter()
                        .map(|service| GattService {
                            uuid: service.uuid,
                            characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
                        })
                        .collect();
                    TransportEvent::ServicesDiscovered(session, services)
                },
                Err(err) => TransportEvent::DiscoveryFailed(session, err),
            };
            forward(events, event).await;
        });
    }

    fn subscribe(&mut self, session: SessionId, characteristic: Uuid) {
        let Some((peripheral, cancel)) = self.session_peripheral(session) else {
            return;
        };

        let mut events = self.events.clone();
        spawn(async move {
            let target = match find_characteristic(&peripheral, characteristic) {
                Ok(target) => target,
                Err(err) => {
                    forward(events, TransportEvent::SubscribeFailed(session, err)).await;
                    return;
                },
            };

            // open the stream before enabling notifications so the first value is not lost
            let mut notification_stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(err) => {
                    forward(events, TransportEvent::SubscribeFailed(session, err.into())).await;
                    return;
                },
            };

            // writes the client characteristic configuration descriptor, resolves on its acknowledgement
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => return,
                result = with_deadline("Subscribing", SUBSCRIBE_DEADLINE, peripheral.subscribe(&target)) => result,
            };

            if let Err(err) = subscribed {
                forward(events, TransportEvent::SubscribeFailed(session, err)).await;
                return;
            }

            if events.send(TransportEvent::Subscribed(session)).await.is_err() {
                return;
            }

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    data = notification_stream.next() => match data {
                        Some(data) => {
                            if data.uuid != characteristic {
                                continue;
                            }

                            let event = TransportEvent::Notification {
                                session,
                                characteristic: data.uuid,
                                value: data.value,
                            };
                            if events.send(event).await.is_err() {
                                break 'mainloop;
                            }
                        },
                        None => {
                            info!("Notification stream ended");
                            break 'mainloop;
                        },
                    },
                }
            }
        });
    }

    fn write(&mut self, session: SessionId, characteristic: Uuid, payload: Vec<u8>) {
        let Some((peripheral, cancel)) = self.session_peripheral(session) else {
            self.emit(TransportEvent::WriteCompleted(session, Err(DeviceError::UnknownPeripheral)));
            return;
        };

        let events = self.events.clone();
        spawn(async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(target) => tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = with_deadline(
                        "Sending to command characteristic",
                        WRITE_DEADLINE,
                        peripheral.write(&target, &payload, WriteType::WithResponse),
                    ) => result,
                },
                Err(err) => Err(err),
            };

            forward(events, TransportEvent::WriteCompleted(session, result)).await;
        });
    }

    fn close(&mut self, session: SessionId) {
        self.links.release(session);

        let Some(task) = self.sessions.remove(&session) else {
            debug!("Session {} already closed", session);
            return;
        };

        task.cancel.cancel();
        spawn(async move {
            match task.peripheral.disconnect().await {
                Ok(()) => info!("Disconnected from peripheral"),
                Err(err) => warn!("Failed to disconnect from peripheral: {:?}", err),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arduino() -> PeripheralId {
        PeripheralId("AA:BB:CC:DD:EE:FF".to_string())
    }

    #[test]
    fn drop_of_open_link_is_attributed_to_its_session() {
        let links = LinkTable::default();
        links.register(&arduino(), SessionId(3));

        assert_eq!(links.take_owner(&arduino()), Some(SessionId(3)));
        // reported once
        assert_eq!(links.take_owner(&arduino()), None);
    }

    #[test]
    fn drop_after_close_is_not_reported() {
        let links = LinkTable::default();
        links.register(&arduino(), SessionId(1));
        links.release(SessionId(1));

        assert_eq!(links.take_owner(&arduino()), None);
    }

    #[test]
    fn closing_an_old_session_keeps_the_new_link() {
        let links = LinkTable::default();
        links.register(&arduino(), SessionId(1));
        links.release(SessionId(1));
        links.register(&arduino(), SessionId(2));

        // a late close of the old session must not unregister the reconnect
        links.release(SessionId(1));
        assert_eq!(links.take_owner(&arduino()), Some(SessionId(2)));
    }
}
