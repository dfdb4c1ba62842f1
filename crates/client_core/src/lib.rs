//! Session/status synchronization core for the fire panel client.

pub mod activity;
pub mod controller;
pub mod events;
pub mod polling;
pub mod session_store;
pub mod status_client;

pub use activity::{ActivityLog, LogEntry};
pub use controller::{ControllerSettings, SessionController};
pub use events::{Action, ControllerError, ControllerEvent, SessionView};
pub use polling::{PollingScheduler, PollingState};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use status_client::{
    Endpoints, LoginGrant, ProtocolReceipt, StatusApi, StatusClient, StatusReport,
    DEFAULT_SENSOR_SOURCE,
};
