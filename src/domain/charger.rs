//! Charger operational state
//!
//! [`ChargerRecord`] is the in-memory source of truth for a charge point's
//! derived state. It is mutated only through [`ChargerRecord::apply`] /
//! [`ChargerStateStore::apply`]; the telemetry sink and any read model see
//! snapshots, never the live record.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::messages::ChargePointStatus;

/// Derived operational status of a charge point.
///
/// `Unavailable` means the transport is gone; `Faulted` means the charger
/// reported a fault itself. The distinction matters: a faulted charger that
/// reconnects is still faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargerStatus {
    Unknown,
    Available,
    Preparing,
    Charging,
    Finishing,
    Faulted,
    Unavailable,
}

impl ChargerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::Finishing => "Finishing",
            Self::Faulted => "Faulted",
            Self::Unavailable => "Unavailable",
        }
    }
}

/// Protocol and lifecycle events the state machine consumes.
#[derive(Debug, Clone)]
pub enum ChargerEvent {
    ConnectionOpened,
    ConnectionClosed,
    BootAccepted {
        vendor: String,
        model: String,
        firmware: Option<String>,
    },
    Heartbeat,
    StatusReported(ChargePointStatus),
    MeterSample {
        power_w: Option<f64>,
        energy_wh: Option<f64>,
    },
}

/// Durable, derived per-charger state. Persisted to the `chargers`
/// measurement on every transition; survives connections in memory and in
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargerRecord {
    pub identity: String,
    pub status: ChargerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub current_power_w: Option<f64>,
    pub total_energy_wh: Option<f64>,
}

impl ChargerRecord {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            status: ChargerStatus::Unknown,
            last_heartbeat: None,
            last_seen: Utc::now(),
            connected_at: None,
            vendor: None,
            model: None,
            firmware: None,
            current_power_w: None,
            total_energy_wh: None,
        }
    }

    /// Apply one event. Total: unrecognized combinations are a no-op that
    /// still refreshes `last_seen`.
    pub fn apply(&mut self, event: &ChargerEvent) {
        let now = Utc::now();
        self.last_seen = now;

        match event {
            ChargerEvent::ConnectionOpened => {
                self.connected_at = Some(now);
                // A self-reported fault outlives reconnects.
                if self.status != ChargerStatus::Faulted {
                    self.status = ChargerStatus::Available;
                }
            }
            ChargerEvent::ConnectionClosed => {
                self.connected_at = None;
                self.status = ChargerStatus::Unavailable;
            }
            ChargerEvent::BootAccepted {
                vendor,
                model,
                firmware,
            } => {
                self.vendor = Some(vendor.clone());
                self.model = Some(model.clone());
                if firmware.is_some() {
                    self.firmware = firmware.clone();
                }
                self.last_heartbeat = Some(now);
            }
            ChargerEvent::Heartbeat => {
                self.last_heartbeat = Some(now);
            }
            ChargerEvent::StatusReported(reported) => {
                // The reported status is authoritative, not inferred from
                // the prior state. Statuses outside the modeled set leave
                // the state untouched.
                if let Some(status) = Self::map_reported(*reported) {
                    self.status = status;
                }
            }
            ChargerEvent::MeterSample {
                power_w,
                energy_wh,
            } => {
                if power_w.is_some() {
                    self.current_power_w = *power_w;
                }
                if energy_wh.is_some() {
                    self.total_energy_wh = *energy_wh;
                }
            }
        }
    }

    fn map_reported(reported: ChargePointStatus) -> Option<ChargerStatus> {
        match reported {
            ChargePointStatus::Available => Some(ChargerStatus::Available),
            ChargePointStatus::Preparing => Some(ChargerStatus::Preparing),
            ChargePointStatus::Charging => Some(ChargerStatus::Charging),
            ChargePointStatus::Finishing => Some(ChargerStatus::Finishing),
            ChargePointStatus::Unavailable => Some(ChargerStatus::Unavailable),
            ChargePointStatus::Faulted => Some(ChargerStatus::Faulted),
            // Suspended/Reserved are connector-session detail this core
            // does not model; treated as unrecognized.
            ChargePointStatus::SuspendedEV
            | ChargePointStatus::SuspendedEVSE
            | ChargePointStatus::Reserved => None,
        }
    }
}

/// Owned map of charger records keyed by identity.
///
/// All mutation goes through [`apply`], which returns the post-transition
/// snapshot so the caller can persist it in event order.
///
/// [`apply`]: ChargerStateStore::apply
#[derive(Default)]
pub struct ChargerStateStore {
    records: DashMap<String, ChargerRecord>,
}

impl ChargerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to the record for `identity`, creating it on first
    /// contact. Returns the updated snapshot.
    pub fn apply(&self, identity: &str, event: &ChargerEvent) -> ChargerRecord {
        let mut entry = self
            .records
            .entry(identity.to_string())
            .or_insert_with(|| ChargerRecord::new(identity));
        entry.apply(event);
        entry.clone()
    }

    pub fn get(&self, identity: &str) -> Option<ChargerRecord> {
        self.records.get(identity).map(|r| r.clone())
    }

    pub fn status(&self, identity: &str) -> ChargerStatus {
        self.get(identity)
            .map(|r| r.status)
            .unwrap_or(ChargerStatus::Unknown)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
