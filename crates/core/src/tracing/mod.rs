//! Tracing setup shared by blogx binaries and tests

pub mod config;
pub mod init;

pub use config::InstrumentationConfig;
pub use init::{init_default, init_dev, init_tracing};
