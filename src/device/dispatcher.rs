use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{future, SinkExt, StreamExt};
use log::{debug, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::command::Command;
use crate::device::controller::Controller;
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::DeviceEvent;
use crate::error::DeviceError;

/// User intents, funneled into the dispatcher together with transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    StartScan,
    Disconnect,
    Send(Command),
    ToggleMode,
    Acknowledge,
}

/// Public API of a running controller. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    requests: Sender<ControlRequest>,
}

impl ControllerHandle {
    pub async fn start_scan(&mut self) -> Result<(), DeviceError> {
        self.request(ControlRequest::StartScan).await
    }

    pub async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.request(ControlRequest::Disconnect).await
    }

    pub async fn send(&mut self, command: Command) -> Result<(), DeviceError> {
        self.request(ControlRequest::Send(command)).await
    }

    pub async fn toggle_mode(&mut self) -> Result<(), DeviceError> {
        self.request(ControlRequest::ToggleMode).await
    }

    pub async fn acknowledge(&mut self) -> Result<(), DeviceError> {
        self.request(ControlRequest::Acknowledge).await
    }

    pub async fn request(&mut self, request: ControlRequest) -> Result<(), DeviceError> {
        self.requests.send(request).await?;
        Ok(())
    }

    /// Queues `request` without waiting. Returns false if the queue is full and the request was dropped.
    ///
    /// Callers that also drain the controller's events must use this one, the controller may be
    /// waiting for them to take an event.
    pub fn try_request(&mut self, request: ControlRequest) -> Result<bool, DeviceError> {
        match self.requests.try_send(request) {
            Ok(()) => Ok(true),
            Err(err) if err.is_full() => Ok(false),
            Err(err) => Err(err.into_send_error().into()),
        }
    }
}

/// Runs `controller` on its own task. All state mutation happens on that task, in arrival order.
///
/// Cancelling `cancel` disconnects and stops the task.
pub fn spawn_controller<T: Transport + 'static>(
    controller: Controller<T>,
    transport_events: Receiver<TransportEvent>,
    cancel: CancellationToken,
    senders: Vec<Sender<DeviceEvent>>,
) -> (ControllerHandle, JoinHandle<()>) {
    let (requests_tx, requests_rx) = channel::<ControlRequest>(16);

    let handle = spawn(async move {
        run_controller(controller, requests_rx, transport_events, cancel, senders).await
    });

    (ControllerHandle { requests: requests_tx }, handle)
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn handle_request<T: Transport>(controller: &mut Controller<T>, request: ControlRequest) {
    let result = match request {
        ControlRequest::StartScan => controller.start_scan(Instant::now()).map(|_| ()),
        ControlRequest::Disconnect => {
            controller.disconnect();
            Ok(())
        },
        ControlRequest::Send(command) => controller.send_command(command),
        ControlRequest::ToggleMode => controller.toggle_mode(),
        ControlRequest::Acknowledge => {
            controller.acknowledge();
            Ok(())
        },
    };

    // failures are already reported to the presentation layer as log lines
    if let Err(err) = result {
        debug!("{:?} failed: {}", request, err);
    }
}

async fn publish<T: Transport>(controller: &mut Controller<T>, senders: &mut Vec<Sender<DeviceEvent>>) {
    for event in controller.take_events() {
        for sender in senders.iter_mut() {
            if let Err(err) = sender.send(event.clone()).await {
                debug!("Dropping DeviceEvent, receiver is gone: {}", err);
            }
        }
    }
    senders.retain(|sender| !sender.is_closed());
}

async fn run_controller<T: Transport>(
    mut controller: Controller<T>,
    mut requests: Receiver<ControlRequest>,
    mut transport_events: Receiver<TransportEvent>,
    cancel: CancellationToken,
    mut senders: Vec<Sender<DeviceEvent>>,
) {
    'mainloop: loop {
        let deadline = controller.scan_deadline();

        tokio::select! {
            _ = cancel.cancelled() => {
                controller.disconnect();
                publish(&mut controller, &mut senders).await;
                break 'mainloop;
            },
            Some(request) = requests.next() => {
                handle_request(&mut controller, request);
            },
            Some(event) = transport_events.next() => {
                controller.handle_transport_event(event);
            },
            _ = wait_for_deadline(deadline) => {
                controller.on_scan_deadline(Instant::now());
            },
        }

        publish(&mut controller, &mut senders).await;
    }

    info!("Controller stopped");
}
