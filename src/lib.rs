pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod status;
pub mod utils;
pub mod viewer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use app::{App, AppMode};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use host::BroadcastCoordinator;
pub use status::{StatusEmitter, StatusEvent};
pub use viewer::{MediaSink, ViewerSessionManager, ViewerStatus};
