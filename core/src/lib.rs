pub mod backoff;
pub mod batch;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
