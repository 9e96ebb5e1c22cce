//! Connection and session management.

pub mod connection;
pub mod registry;

pub use connection::Connection;
pub use registry::{Registration, SessionPolicy, SessionRegistry, SharedSessionRegistry};
