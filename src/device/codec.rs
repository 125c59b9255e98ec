//! Text codec for telemetry notifications.
//!
//! A notification is a comma separated list of `KEY:VALUE` tokens, for example
//! `DISTANCIA:23,MODO:AUTO,MOTOR:FORWARD`. Tokens are decoded independently and
//! tokens with an unknown key are dropped, so a partially garbled message still
//! yields every field that could be recognized.

use std::borrow::Cow;
use std::fmt;

use crate::device::types::SensorSnapshot;

const DISTANCE_KEY: &str = "DISTANCIA:";
const MODE_KEY: &str = "MODO:";
const MOTOR_KEY: &str = "MOTOR:";
const AUTO_MODE_VALUE: &str = "AUTO";
const MANUAL_MODE_VALUE: &str = "MANUAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryField {
    /// Opaque distance reading, not validated as numeric.
    Distance(String),
    /// `true` if the peripheral reports automatic mode. Any value other than `AUTO` is manual.
    Mode(bool),
    Motor(String),
}

impl TelemetryField {
    fn from_token(token: &str) -> Option<TelemetryField> {
        let token = token.trim_matches(|c| c == '\r' || c == '\n' || c == '\0');

        if let Some(value) = token.strip_prefix(DISTANCE_KEY) {
            Some(TelemetryField::Distance(value.to_string()))
        } else if let Some(value) = token.strip_prefix(MODE_KEY) {
            Some(TelemetryField::Mode(value == AUTO_MODE_VALUE))
        } else if let Some(value) = token.strip_prefix(MOTOR_KEY) {
            Some(TelemetryField::Motor(value.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryField::Distance(value) => write!(f, "{}{}", DISTANCE_KEY, value),
            TelemetryField::Mode(true) => write!(f, "{}{}", MODE_KEY, AUTO_MODE_VALUE),
            TelemetryField::Mode(false) => write!(f, "{}{}", MODE_KEY, MANUAL_MODE_VALUE),
            TelemetryField::Motor(value) => write!(f, "{}{}", MOTOR_KEY, value),
        }
    }
}

/// Single pass iterator over the recognized fields of one notification.
pub struct TelemetryFields<'a> {
    text: Cow<'a, str>,
    // byte offset of the next token, None once the last token was consumed
    next: Option<usize>,
}

impl<'a> Iterator for TelemetryFields<'a> {
    type Item = TelemetryField;

    fn next(&mut self) -> Option<TelemetryField> {
        loop {
            let start = self.next?;
            let rest = &self.text[start..];

            let (token, next) = match rest.find(',') {
                Some(index) => (&rest[..index], Some(start + index + 1)),
                None => (rest, None),
            };

            let field = TelemetryField::from_token(token);
            self.next = next;

            if field.is_some() {
                return field;
            }
        }
    }
}

/// Decodes a raw notification payload. Invalid utf-8 is replaced rather than rejected.
pub fn parse(raw: &[u8]) -> TelemetryFields<'_> {
    TelemetryFields {
        text: String::from_utf8_lossy(raw),
        next: Some(0),
    }
}

/// Builds the wire text for a set of fields.
pub fn serialize(fields: &[TelemetryField]) -> String {
    fields.iter()
        .map(|field| field.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl SensorSnapshot {
    /// Applies one decoded field, returns true if the snapshot changed.
    pub fn apply(&mut self, field: TelemetryField) -> bool {
        match field {
            TelemetryField::Distance(value) => {
                if self.distance_cm.as_deref() == Some(value.as_str()) {
                    return false;
                }
                self.distance_cm = Some(value);
            },
            TelemetryField::Mode(auto_mode) => {
                if self.auto_mode == auto_mode {
                    return false;
                }
                self.auto_mode = auto_mode;
            },
            TelemetryField::Motor(value) => {
                if self.motor_state == value {
                    return false;
                }
                self.motor_state = value;
            },
        }

        true
    }
}
