use std::time::Duration;
use uuid::Uuid;

/**
 * The advertised name of the motor controller peripheral.
 */
pub const DEFAULT_TARGET_NAME: &str = "ARDUINO";

/**
 * How long (milliseconds) a scan may run before giving up on the peripheral.
 */
pub const DEFAULT_SCAN_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) establishing the transport connection may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) service discovery may take.
 */
pub const DISCOVERY_DEADLINE: u64 = 15000;

/**
 * How long (milliseconds) the notification descriptor write may take.
 */
pub const SUBSCRIBE_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) the final disconnect may take when the application exits.
 */
pub const SHUTDOWN_GRACE: u64 = 500;

/**
 * The UUID of the BLE service exposed by the motor controller
 */
pub const MOTOR_SERVICE: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

/**
 * The UUID of the characteristic commands are written to.
 */
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214);

/**
 * The UUID of the characteristic telemetry is notified on.
 */
pub const TELEMETRY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x19b10002_e8f2_537e_4f6c_d104768a1214);

pub fn default_scan_timeout() -> Duration {
    Duration::from_millis(DEFAULT_SCAN_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_distinct() {
        assert_ne!(MOTOR_SERVICE, COMMAND_CHARACTERISTIC);
        assert_ne!(MOTOR_SERVICE, TELEMETRY_CHARACTERISTIC);
        assert_ne!(COMMAND_CHARACTERISTIC, TELEMETRY_CHARACTERISTIC);
    }

    #[test]
    fn uuids_match_peripheral_firmware() {
        assert_eq!(MOTOR_SERVICE.to_string(), "19b10000-e8f2-537e-4f6c-d104768a1214");
        assert_eq!(COMMAND_CHARACTERISTIC.to_string(), "19b10001-e8f2-537e-4f6c-d104768a1214");
        assert_eq!(TELEMETRY_CHARACTERISTIC.to_string(), "19b10002-e8f2-537e-4f6c-d104768a1214");
    }
}
