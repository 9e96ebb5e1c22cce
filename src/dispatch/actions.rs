//! Action handlers
//!
//! Closed table of charge-point-initiated actions this Central System
//! models. Anything outside the table answers `NotImplemented` at the
//! dispatch layer; a known action with an unparseable payload answers
//! `FormationViolation`.

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::domain::ChargerEvent;
use crate::protocol::messages::{
    BootNotificationRequest, BootNotificationResponse, HeartbeatResponse, MeterValuesRequest,
    RegistrationStatus, StatusNotificationRequest,
};

use super::Dispatcher;

/// Charge-point-initiated actions with dedicated handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BootNotification,
    Heartbeat,
    StatusNotification,
    MeterValues,
}

impl Action {
    /// Closed name→variant table. `None` routes to the NotImplemented arm.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BootNotification" => Some(Self::BootNotification),
            "Heartbeat" => Some(Self::Heartbeat),
            "StatusNotification" => Some(Self::StatusNotification),
            "MeterValues" => Some(Self::MeterValues),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootNotification => "BootNotification",
            Self::Heartbeat => "Heartbeat",
            Self::StatusNotification => "StatusNotification",
            Self::MeterValues => "MeterValues",
        }
    }
}

/// Handler failures, mapped to OCPP-J error codes by the dispatcher.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ActionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Payload(_) => "FormationViolation",
        }
    }
}

/// Route a decoded Call payload through the table.
pub async fn dispatch_action(
    dispatcher: &Dispatcher,
    identity: &str,
    action: Action,
    payload: Value,
) -> Result<Value, ActionError> {
    match action {
        Action::BootNotification => handle_boot_notification(dispatcher, identity, payload).await,
        Action::Heartbeat => handle_heartbeat(dispatcher, identity).await,
        Action::StatusNotification => {
            handle_status_notification(dispatcher, identity, payload).await
        }
        Action::MeterValues => handle_meter_values(dispatcher, identity, payload).await,
    }
}

/// BootNotification is always accepted; the response carries the server
/// time and the advertised heartbeat interval.
async fn handle_boot_notification(
    dispatcher: &Dispatcher,
    identity: &str,
    payload: Value,
) -> Result<Value, ActionError> {
    let request: BootNotificationRequest = serde_json::from_value(payload)?;

    info!(
        identity,
        vendor = request.charge_point_vendor.as_str(),
        model = request.charge_point_model.as_str(),
        "BootNotification"
    );

    dispatcher
        .apply_charger_event(
            identity,
            ChargerEvent::BootAccepted {
                vendor: request.charge_point_vendor,
                model: request.charge_point_model,
                firmware: request.firmware_version,
            },
        )
        .await;

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: dispatcher.heartbeat_interval(),
        status: RegistrationStatus::Accepted,
    };
    Ok(serde_json::to_value(response)?)
}

/// Heartbeat answers the server time, nothing else.
async fn handle_heartbeat(dispatcher: &Dispatcher, identity: &str) -> Result<Value, ActionError> {
    dispatcher
        .apply_charger_event(identity, ChargerEvent::Heartbeat)
        .await;

    let response = HeartbeatResponse {
        current_time: Utc::now(),
    };
    Ok(serde_json::to_value(response)?)
}

/// The reported status is authoritative; the acknowledgment is empty.
async fn handle_status_notification(
    dispatcher: &Dispatcher,
    identity: &str,
    payload: Value,
) -> Result<Value, ActionError> {
    let request: StatusNotificationRequest = serde_json::from_value(payload)?;

    info!(
        identity,
        connector_id = request.connector_id,
        status = ?request.status,
        error_code = ?request.error_code,
        "StatusNotification"
    );

    dispatcher
        .apply_charger_event(identity, ChargerEvent::StatusReported(request.status))
        .await;

    Ok(json!({}))
}

/// MeterValues refreshes the charger's last-known readings.
async fn handle_meter_values(
    dispatcher: &Dispatcher,
    identity: &str,
    payload: Value,
) -> Result<Value, ActionError> {
    let request: MeterValuesRequest = serde_json::from_value(payload)?;

    let power_w = request.latest_sample("Power.Active.Import");
    let energy_wh = request.latest_sample("Energy.Active.Import.Register");

    dispatcher
        .apply_charger_event(identity, ChargerEvent::MeterSample { power_w, energy_wh })
        .await;

    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_table_is_closed() {
        assert_eq!(
            Action::from_name("BootNotification"),
            Some(Action::BootNotification)
        );
        assert_eq!(Action::from_name("Heartbeat"), Some(Action::Heartbeat));
        assert_eq!(
            Action::from_name("StatusNotification"),
            Some(Action::StatusNotification)
        );
        assert_eq!(Action::from_name("MeterValues"), Some(Action::MeterValues));
        assert_eq!(Action::from_name("Authorize"), None);
        assert_eq!(Action::from_name("bootnotification"), None);
    }
}
