//! OCPP-J wire protocol: envelope framing and typed action payloads.

pub mod frame;
pub mod messages;

pub use frame::{FrameError, OcppFrame};
