//! Typed OCPP 1.6 action payloads
//!
//! Wire shapes for the charge-point-initiated actions this Central System
//! models. Field names follow the OCPP 1.6J camelCase convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── BootNotification ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: u32,
    pub status: RegistrationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

// ── Heartbeat ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

// ── StatusNotification ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: ChargePointErrorCode,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

/// Status a charge point reports for itself or a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    OverVoltage,
    WeakSignal,
}

// ── MeterValues ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl MeterValuesRequest {
    /// Latest sample for `measurand`, parsed as a float. OCPP carries all
    /// sampled values as strings.
    pub fn latest_sample(&self, measurand: &str) -> Option<f64> {
        self.meter_value
            .iter()
            .rev()
            .flat_map(|mv| mv.sampled_value.iter())
            .find(|sv| sv.measurand.as_deref() == Some(measurand))
            .and_then(|sv| sv.value.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boot_notification_request_wire_shape() {
        let payload = json!({
            "chargePointVendor": "Acme",
            "chargePointModel": "FastCharge 22",
            "firmwareVersion": "1.4.2"
        });
        let req: BootNotificationRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(req.charge_point_vendor, "Acme");
        assert_eq!(req.firmware_version.as_deref(), Some("1.4.2"));
        assert!(req.iccid.is_none());
    }

    #[test]
    fn boot_notification_response_serializes_camel_case() {
        let resp = BootNotificationResponse {
            current_time: "2024-01-01T00:00:00Z".parse().unwrap(),
            interval: 300,
            status: RegistrationStatus::Accepted,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["currentTime"], "2024-01-01T00:00:00Z");
        assert_eq!(value["interval"], 300);
        assert_eq!(value["status"], "Accepted");
    }

    #[test]
    fn status_notification_parses_status_and_error_code() {
        let payload = json!({
            "connectorId": 1,
            "errorCode": "NoError",
            "status": "Charging"
        });
        let req: StatusNotificationRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(req.status, ChargePointStatus::Charging);
        assert_eq!(req.error_code, ChargePointErrorCode::NoError);
    }

    #[test]
    fn meter_values_latest_sample() {
        let payload = json!({
            "connectorId": 1,
            "meterValue": [
                {
                    "timestamp": "2024-01-01T00:00:00Z",
                    "sampledValue": [
                        {"value": "7200.5", "measurand": "Power.Active.Import", "unit": "W"},
                        {"value": "1200", "measurand": "Energy.Active.Import.Register", "unit": "Wh"}
                    ]
                }
            ]
        });
        let req: MeterValuesRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(req.latest_sample("Power.Active.Import"), Some(7200.5));
        assert_eq!(req.latest_sample("Energy.Active.Import.Register"), Some(1200.0));
        assert_eq!(req.latest_sample("Voltage"), None);
    }
}
