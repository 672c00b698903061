//! blogx core types and utilities
//!
//! Credential model, session storage, configuration and tracing setup used by
//! the authenticated API gateway in `blogx-http`.

pub mod config;
pub mod credential;
pub mod error;
pub mod storage;
pub mod tracing;

pub use config::{AuthEndpoints, CsrfConfig, GatewayConfig};
pub use credential::Credential;
pub use error::{CoreError, CoreResult};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
