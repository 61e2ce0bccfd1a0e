pub mod clock;
pub mod config;
pub mod doctor;
pub mod error;
pub mod manager;

pub use config::EngineConfig;
pub use error::SessionError;
pub use manager::{Frame, SessionManager};
