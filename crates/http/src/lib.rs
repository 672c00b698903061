//! blogx HTTP gateway
//!
//! Every call from the application to the blog API goes through
//! [`Gateway`], which keeps the access credential fresh, attaches the bearer
//! and anti-forgery headers, and ends the session when the server will no
//! longer accept it.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod error;
pub mod types;

pub use client::{
    ApiRequest, ApiResponse, AuthPolicy, CookieCsrfSource, CsrfTokenSource, EndpointTable,
    Gateway, GatewayBuilder, Navigator, RequestOptions, StaticCsrfToken, TracingNavigator,
};
pub use error::{GatewayError, Result};
pub use types::{LoginRequest, RefreshRequest, TokenGrant};
