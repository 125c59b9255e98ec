use crate::device::types::{DeviceEvent, SensorSnapshot};

fn render_snapshot(snapshot: &SensorSnapshot) -> String {
    let distance = snapshot.distance_cm.as_deref().unwrap_or("--");
    let motor = if snapshot.motor_state.is_empty() { "--" } else { snapshot.motor_state.as_str() };

    format!("distance: {} cm | motor: {}", distance, motor)
}

pub fn render_mode(auto_mode: bool) -> &'static str {
    if auto_mode { "automatic" } else { "manual" }
}

pub fn render(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::StateChange(state) => format!("[status] {}", state),
        DeviceEvent::SnapshotChange(snapshot) => format!("[sensor] {}", render_snapshot(snapshot)),
        DeviceEvent::ModeChange(auto_mode) => format!("[mode] {}", render_mode(*auto_mode)),
        DeviceEvent::LogLine(line) => format!("[log] {}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::DeviceState;

    #[test]
    fn renders_every_event() {
        assert_eq!(render(&DeviceEvent::StateChange(DeviceState::DiscoveringServices)), "[status] discovering services");
        assert_eq!(render(&DeviceEvent::ModeChange(true)), "[mode] automatic");
        assert_eq!(render(&DeviceEvent::LogLine("Connected".to_string())), "[log] Connected");
    }

    #[test]
    fn empty_readings_render_as_placeholders() {
        assert_eq!(
            render(&DeviceEvent::SnapshotChange(SensorSnapshot::default())),
            "[sensor] distance: -- cm | motor: --",
        );

        let snapshot = SensorSnapshot {
            distance_cm: Some("23".to_string()),
            motor_state: "FORWARD".to_string(),
            auto_mode: true,
        };
        assert_eq!(render(&DeviceEvent::SnapshotChange(snapshot)), "[sensor] distance: 23 cm | motor: FORWARD");
    }
}
