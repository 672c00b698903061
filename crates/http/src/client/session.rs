//! Login, logout and session restore

use super::{Gateway, policy::AuthPolicy, request::ApiRequest};
use crate::error::Result;
use crate::types::{LoginRequest, RefreshRequest, TokenGrant};
use blogx_core::Credential;
use chrono::Utc;
use std::sync::Arc;

impl Gateway {
    /// Log in with username and password and hold the issued credential
    ///
    /// # Errors
    ///
    /// `ApiError` if the server rejects the login, `Storage` if the credential cannot be persisted
    #[tracing::instrument(name = "gateway.login", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Credential>> {
        let request = ApiRequest::post(self.inner.config.endpoints.login.as_str())
            .with_auth(AuthPolicy::Public)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })?;

        let grant: TokenGrant = self.send(request).await?.json()?;
        let credential = self.establish_session(grant).await?;
        info!(expiry = %credential.access_expiry, "Logged in");
        Ok(credential)
    }

    /// Hold a credential issued outside [`Gateway::login`], e.g. by registration
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential cannot be persisted
    pub async fn establish_session(&self, grant: TokenGrant) -> Result<Arc<Credential>> {
        let now = Utc::now();
        let expiry = Credential::resolve_expiry(
            &grant.access_token,
            grant.access_expiry,
            now,
            self.inner.config.default_access_ttl(),
        );
        let credential = Arc::new(Credential::new(
            grant.access_token,
            expiry,
            grant.refresh_token,
        ));

        let _session = self.inner.session_lock.lock().await;
        self.inner.persist(&credential).await?;
        self.inner.credential.store(Some(credential.clone()));
        self.inner.touch(now);
        Ok(credential)
    }

    /// Restore the credential persisted by an earlier process.
    ///
    /// Returns whether a credential was found. An unreadable stored value is
    /// discarded and treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the storage facility itself fails
    pub async fn load_session(&self) -> Result<bool> {
        let key = &self.inner.config.storage_key;
        let _session = self.inner.session_lock.lock().await;
        let Some(stored) = self.inner.storage.get(key).await? else {
            return Ok(false);
        };

        match serde_json::from_str::<Credential>(&stored) {
            Ok(credential) => {
                debug!(expiry = %credential.access_expiry, "Restored stored credential");
                self.inner.credential.store(Some(Arc::new(credential)));
                self.inner.touch(Utc::now());
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "Discarding unreadable stored credential");
                self.inner.storage.remove(key).await?;
                Ok(false)
            }
        }
    }

    /// Forget the credential and end the session on the server (best effort).
    ///
    /// Does not redirect; the caller decides where to go next.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the stored credential cannot be removed
    #[tracing::instrument(name = "gateway.logout", skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let previous = {
            let _session = self.inner.session_lock.lock().await;
            let previous = self.inner.credential.swap(None);
            self.inner.reset_activity();
            self.inner
                .storage
                .remove(&self.inner.config.storage_key)
                .await?;
            previous
        };

        if let Some(credential) = previous {
            let notify = ApiRequest::post(self.inner.config.endpoints.logout.as_str())
                .with_auth(AuthPolicy::Always)
                .json(&RefreshRequest {
                    refresh: credential.refresh_token.clone(),
                })?;

            match self.inner.dispatch(&notify, Some(&*credential)).await {
                Ok(response) if !response.status().is_success() => {
                    debug!(status = %response.status(), "Server rejected logout");
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "Logout request failed"),
            }
        }

        info!("Logged out");
        Ok(())
    }
}
