//! Access/refresh token pair held on behalf of a logged-in user

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential persisted by the gateway
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub access_expiry: DateTime<Utc>,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        access_expiry: DateTime<Utc>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            access_expiry,
            refresh_token: refresh_token.into(),
        }
    }

    /// Whether the access token can still be attached at `now`.
    ///
    /// A token within `skew` of its expiry already counts as expired.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now < self.access_expiry - skew
    }

    /// Replace the access token, keeping the refresh token unless a rotated one is supplied
    #[must_use]
    pub fn rotated(
        &self,
        access_token: String,
        access_expiry: DateTime<Utc>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            access_token,
            access_expiry,
            refresh_token: refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
        }
    }

    /// Resolve the expiry of an access token.
    ///
    /// Order: the server-reported value, the JWT `exp` claim, then `now + fallback_ttl`.
    pub fn resolve_expiry(
        access_token: &str,
        reported: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        fallback_ttl: Duration,
    ) -> DateTime<Utc> {
        reported
            .or_else(|| jwt_expiry(access_token))
            .unwrap_or(now + fallback_ttl)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Read the `exp` claim of a JWT without verifying it
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claim.exp, 0).single()
}
