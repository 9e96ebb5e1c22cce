//! Telemetry points and line-protocol rendering
//!
//! Two measurements feed the dashboard read model:
//!
//! - `chargers`, tagged by `charge_point_id`: last-known state per charger
//! - `logs`, tagged by `charge_point_id`: one point per exchanged message

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::ChargerRecord;

/// Direction of an exchanged message, from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Immutable record of one exchanged message. Appended, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    pub direction: Direction,
    /// Action name for Calls, variant name for responses.
    pub message_type: String,
    /// The raw frame as it crossed the wire.
    pub payload: String,
}

impl LogEntry {
    pub fn new(
        identity: impl Into<String>,
        direction: Direction,
        message_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            identity: identity.into(),
            direction,
            message_type: message_type.into(),
            payload: payload.into(),
        }
    }
}

/// One unit of work for the telemetry writer.
#[derive(Debug, Clone)]
pub enum TelemetryPoint {
    Log(LogEntry),
    ChargerState(ChargerRecord),
}

impl TelemetryPoint {
    pub fn identity(&self) -> &str {
        match self {
            Self::Log(entry) => &entry.identity,
            Self::ChargerState(record) => &record.identity,
        }
    }

    /// Render this point as one InfluxDB line-protocol line.
    pub fn to_line_protocol(&self) -> String {
        match self {
            Self::Log(entry) => {
                let mut line = LineBuilder::new("logs", entry.timestamp);
                line.tag("charge_point_id", &entry.identity);
                line.string_field("direction", entry.direction.as_str());
                line.string_field("message_type", &entry.message_type);
                line.string_field("payload", &entry.payload);
                line.finish()
            }
            Self::ChargerState(record) => {
                let mut line = LineBuilder::new("chargers", record.last_seen);
                line.tag("charge_point_id", &record.identity);
                line.string_field("status", record.status.as_str());
                if let Some(ts) = record.last_heartbeat {
                    line.string_field("last_heartbeat", &ts.to_rfc3339());
                }
                if let Some(vendor) = &record.vendor {
                    line.string_field("vendor", vendor);
                }
                if let Some(model) = &record.model {
                    line.string_field("model", model);
                }
                if let Some(firmware) = &record.firmware {
                    line.string_field("firmware", firmware);
                }
                if let Some(power) = record.current_power_w {
                    line.float_field("current_power", power);
                }
                if let Some(energy) = record.total_energy_wh {
                    line.float_field("total_energy", energy);
                }
                line.finish()
            }
        }
    }
}

/// Minimal line-protocol assembler with the escaping InfluxDB requires.
struct LineBuilder {
    line: String,
    has_fields: bool,
    timestamp_ns: i64,
}

impl LineBuilder {
    fn new(measurement: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            line: escape_key(measurement),
            has_fields: false,
            timestamp_ns: timestamp.timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    fn tag(&mut self, key: &str, value: &str) {
        write!(self.line, ",{}={}", escape_key(key), escape_key(value)).unwrap();
    }

    fn field_separator(&mut self) {
        self.line.push(if self.has_fields { ',' } else { ' ' });
        self.has_fields = true;
    }

    fn string_field(&mut self, key: &str, value: &str) {
        self.field_separator();
        write!(
            self.line,
            "{}=\"{}\"",
            escape_key(key),
            value.replace('\\', "\\\\").replace('"', "\\\"")
        )
        .unwrap();
    }

    fn float_field(&mut self, key: &str, value: f64) {
        self.field_separator();
        write!(self.line, "{}={}", escape_key(key), value).unwrap();
    }

    fn finish(mut self) -> String {
        write!(self.line, " {}", self.timestamp_ns).unwrap();
        self.line
    }
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChargerEvent, ChargerRecord};

    #[test]
    fn log_entry_renders_measurement_tag_and_fields() {
        let entry = LogEntry::new("CP-1", Direction::Inbound, "Heartbeat", "[2,\"id\",\"Heartbeat\",{}]");
        let line = TelemetryPoint::Log(entry).to_line_protocol();

        assert!(line.starts_with("logs,charge_point_id=CP-1 "));
        assert!(line.contains("direction=\"inbound\""));
        assert!(line.contains("message_type=\"Heartbeat\""));
        assert!(line.contains("payload=\"[2,\\\"id\\\",\\\"Heartbeat\\\",{}]\""));
        // trailing nanosecond timestamp
        assert!(line.rsplit(' ').next().unwrap().parse::<i64>().is_ok());
    }

    #[test]
    fn charger_state_renders_status_and_readings() {
        let mut record = ChargerRecord::new("CP-1");
        record.apply(&ChargerEvent::ConnectionOpened);
        record.apply(&ChargerEvent::BootAccepted {
            vendor: "Acme".into(),
            model: "FastCharge 22".into(),
            firmware: None,
        });
        record.apply(&ChargerEvent::MeterSample {
            power_w: Some(7200.0),
            energy_wh: Some(15000.5),
        });

        let line = TelemetryPoint::ChargerState(record).to_line_protocol();
        assert!(line.starts_with("chargers,charge_point_id=CP-1 "));
        assert!(line.contains("status=\"Available\""));
        assert!(line.contains("vendor=\"Acme\""));
        assert!(line.contains("model=\"FastCharge 22\""));
        assert!(line.contains("current_power=7200"));
        assert!(line.contains("total_energy=15000.5"));
    }

    #[test]
    fn tag_values_escape_spaces_and_commas() {
        let entry = LogEntry::new("CP 1,A", Direction::Outbound, "CallResult", "{}");
        let line = TelemetryPoint::Log(entry).to_line_protocol();
        assert!(line.starts_with("logs,charge_point_id=CP\\ 1\\,A "));
    }
}
