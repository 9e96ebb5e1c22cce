//! In-memory telemetry sink
//!
//! Backs tests and store-less development runs. Preserves the same
//! per-identity append order the queued sink guarantees.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ChargerRecord;
use crate::support::errors::TelemetryError;

use super::point::LogEntry;
use super::sink::TelemetrySink;

#[derive(Default)]
pub struct MemorySink {
    logs: Mutex<Vec<LogEntry>>,
    charger_states: Mutex<Vec<ChargerRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub fn charger_states(&self) -> Vec<ChargerRecord> {
        self.charger_states.lock().unwrap().clone()
    }

    /// Latest persisted state for `identity`, if any.
    pub fn last_charger_state(&self, identity: &str) -> Option<ChargerRecord> {
        self.charger_states
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.identity == identity)
            .cloned()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn append_log(&self, entry: LogEntry) -> Result<(), TelemetryError> {
        self.logs.lock().unwrap().push(entry);
        Ok(())
    }

    async fn upsert_charger(&self, record: ChargerRecord) -> Result<(), TelemetryError> {
        self.charger_states.lock().unwrap().push(record);
        Ok(())
    }
}
