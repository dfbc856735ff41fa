pub mod cli;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod tpm;

pub use crate::error::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
