pub mod bundle;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod retry;
pub mod state;

pub use error::{Result, RvmError};
