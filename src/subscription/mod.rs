// WebSocket delivery of building status events

pub mod manager;
pub mod protocol;

pub use manager::ConnectionManager;
pub use protocol::{ClientMessage, ErrorMessage, StatusReportedMessage};
