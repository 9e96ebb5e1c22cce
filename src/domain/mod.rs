//! Core domain state: charger status, records and the transition function.

pub mod charger;

pub use charger::{ChargerEvent, ChargerRecord, ChargerStateStore, ChargerStatus};
