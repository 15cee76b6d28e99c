// Entity runtime: serialized per-entity state, reminders, activation
pub mod runtime;

// Entity error model
pub mod error;

// Best-effort event fan-out
pub mod channel;

// Sensor and building entities
pub mod building;
pub mod sensor;

// Wiring of store, scheduler and entity hosts
pub mod hub;

// Configuration
pub mod config;

// HTTP and WebSocket APIs
pub mod api;

// WebSocket subscription management
pub mod subscription;

pub use error::EntityError;
pub use hub::SensorHub;
