//! Wire types for the authentication endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Refresh and logout request body
#[derive(Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Tokens issued at login or registration.
///
/// Accepts both `accessToken`-style and `access`-style field names.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(rename = "accessToken", alias = "access", alias = "access_token")]
    pub access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh", alias = "refresh_token")]
    pub refresh_token: String,
    #[serde(
        rename = "accessExpiry",
        alias = "access_expiry",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_expiry: Option<DateTime<Utc>>,
}

/// Tokens issued by the refresh endpoint; the refresh token is only present when rotated
#[derive(Clone, Deserialize)]
pub struct RefreshGrant {
    #[serde(rename = "accessToken", alias = "access", alias = "access_token")]
    pub access_token: String,
    #[serde(
        rename = "refreshToken",
        alias = "refresh",
        alias = "refresh_token",
        default
    )]
    pub refresh_token: Option<String>,
    #[serde(rename = "accessExpiry", alias = "access_expiry", default)]
    pub access_expiry: Option<DateTime<Utc>>,
}
