use std::time::Duration;
use log::{debug, info};
use tokio::time::Instant;

use crate::device::transport::Transport;
use crate::device::types::{PeripheralHandle, PeripheralId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOperation {
    pub target_name: String,
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStart {
    Started(ScanOperation),
    /// A scan was already running; nothing was touched.
    AlreadyScanning(ScanOperation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Matched(PeripheralHandle),
    TimedOut,
}

/// Time bounded search for a peripheral advertising an exact name. First match wins.
#[derive(Debug, Default)]
pub struct Scanner {
    active: Option<ScanOperation>,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|operation| operation.deadline)
    }

    pub fn start<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        target_name: &str,
        timeout: Duration,
        now: Instant,
    ) -> ScanStart {
        if let Some(operation) = &self.active {
            debug!("Scan for {:?} already running", operation.target_name);
            return ScanStart::AlreadyScanning(operation.clone());
        }

        info!("Scanning for {:?} ({})...", target_name, humantime::format_duration(timeout));
        let operation = ScanOperation {
            target_name: target_name.to_string(),
            deadline: now + timeout,
        };
        self.active = Some(operation.clone());
        transport.start_scan();
        ScanStart::Started(operation)
    }

    /// Checks one advertisement. On a match the scan is stopped and later advertisements are ignored.
    pub fn on_advertisement<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        id: &PeripheralId,
        name: Option<&str>,
    ) -> Option<ScanOutcome> {
        let operation = self.active.as_ref()?;

        if name != Some(operation.target_name.as_str()) {
            return None;
        }

        info!("Found {:?} at {}", operation.target_name, id);
        let handle = PeripheralHandle {
            id: id.clone(),
            name: operation.target_name.clone(),
        };
        self.stop(transport);
        Some(ScanOutcome::Matched(handle))
    }

    /// Ends the scan if its deadline has passed.
    pub fn on_deadline<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Option<ScanOutcome> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }

        info!("Scan timed out");
        self.stop(transport);
        Some(ScanOutcome::TimedOut)
    }

    /// Stops a running scan, returns false if none was running.
    pub fn cancel<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        if self.active.is_none() {
            return false;
        }

        info!("Scan cancelled");
        self.stop(transport);
        true
    }

    fn stop<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.active = None;
        transport.stop_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::testing::{RecordingTransport, TransportCall};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn id(value: &str) -> PeripheralId {
        PeripheralId(value.to_string())
    }

    #[test]
    fn first_exact_match_wins() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut scanner = Scanner::new();
        let now = Instant::now();

        assert!(matches!(scanner.start(&mut transport, "ARDUINO", TIMEOUT, now), ScanStart::Started(_)));
        assert_eq!(scanner.on_advertisement(&mut transport, &id("1"), None), None);
        assert_eq!(scanner.on_advertisement(&mut transport, &id("2"), Some("ARDUINO-2")), None);
        assert_eq!(scanner.on_advertisement(&mut transport, &id("3"), Some("arduino")), None);

        let outcome = scanner.on_advertisement(&mut transport, &id("4"), Some("ARDUINO"));
        assert_eq!(outcome, Some(ScanOutcome::Matched(PeripheralHandle {
            id: id("4"),
            name: "ARDUINO".to_string(),
        })));

        // later advertisements are ignored, even matching ones
        assert_eq!(scanner.on_advertisement(&mut transport, &id("5"), Some("ARDUINO")), None);
        assert!(!scanner.is_active());
        assert_eq!(calls.take(), vec![TransportCall::StartScan, TransportCall::StopScan]);
    }

    #[test]
    fn second_start_returns_existing_operation() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut scanner = Scanner::new();
        let now = Instant::now();

        let first = match scanner.start(&mut transport, "ARDUINO", TIMEOUT, now) {
            ScanStart::Started(operation) => operation,
            other => panic!("unexpected {:?}", other),
        };
        let second = scanner.start(&mut transport, "OTHER", TIMEOUT, now + Duration::from_secs(1));

        assert_eq!(second, ScanStart::AlreadyScanning(first));
        assert_eq!(calls.take(), vec![TransportCall::StartScan]);
    }

    #[test]
    fn times_out_once() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut scanner = Scanner::new();
        let now = Instant::now();
        scanner.start(&mut transport, "ARDUINO", TIMEOUT, now);

        assert_eq!(scanner.on_deadline(&mut transport, now + Duration::from_secs(9)), None);
        assert_eq!(scanner.on_deadline(&mut transport, now + TIMEOUT), Some(ScanOutcome::TimedOut));
        assert_eq!(scanner.on_deadline(&mut transport, now + TIMEOUT), None);
        assert_eq!(scanner.deadline(), None);
        assert_eq!(calls.take(), vec![TransportCall::StartScan, TransportCall::StopScan]);
    }

    #[test]
    fn cancel_only_stops_an_active_scan() {
        let (mut transport, calls) = RecordingTransport::new();
        let mut scanner = Scanner::new();

        assert!(!scanner.cancel(&mut transport));
        scanner.start(&mut transport, "ARDUINO", TIMEOUT, Instant::now());
        assert!(scanner.cancel(&mut transport));
        assert!(!scanner.cancel(&mut transport));

        assert_eq!(calls.take(), vec![TransportCall::StartScan, TransportCall::StopScan]);
    }
}
