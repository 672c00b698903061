//! Single-flight credential refresh and session teardown

use super::{Inner, PendingRefresh, policy::AuthPolicy, request::ApiRequest};
use crate::error::{GatewayError, Result};
use crate::types::{RefreshGrant, RefreshRequest};
use arc_swap::Guard;
use blogx_core::Credential;
use chrono::Utc;
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};

impl Inner {
    /// Obtain a fresh credential, joining the pending refresh if there is one.
    ///
    /// `stale_token` is the access token the caller found unusable; if the
    /// held credential has already moved past it, that credential is returned
    /// without another round trip.
    pub(super) async fn refresh(self: &Arc<Self>, stale_token: Option<&str>) -> Result<Arc<Credential>> {
        let pending: PendingRefresh = {
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pending) = slot.as_ref() {
                trace!("Joining pending refresh");
                pending.clone()
            } else {
                let Some(current) = self.credential.load_full() else {
                    return Err(GatewayError::RefreshFailed(
                        "no credential to refresh".to_string(),
                    ));
                };

                let superseded =
                    stale_token.is_some_and(|token| token != current.access_token);
                if superseded && current.is_fresh(Utc::now(), self.config.refresh_skew()) {
                    return Ok(current);
                }

                let task = tokio::spawn(Self::run_refresh(self.clone(), current.clone()));
                let inner = Arc::downgrade(self);
                let pending = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            warn!(error = %err, "Refresh task did not complete");
                            if let Some(inner) = inner.upgrade() {
                                inner.end_session(&current, "refresh task failed").await;
                            }
                            Err(GatewayError::RefreshFailed(format!(
                                "refresh task failed: {err}"
                            )))
                        }
                    }
                }
                .boxed()
                .shared();
                *slot = Some(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Body of the spawned refresh task
    async fn run_refresh(self: Arc<Self>, current: Arc<Credential>) -> Result<Arc<Credential>> {
        // Empties the slot before any waiter sees the outcome, also on panic or cancellation
        let _clear = ClearPending(&self.pending);
        debug!("Refreshing access token");

        match self.request_refresh(&current).await {
            Ok(next) => self.replace_credential(&current, next).await,
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                self.end_session(&current, "refresh failed").await;
                Err(GatewayError::RefreshFailed(err.to_string()))
            }
        }
    }

    async fn request_refresh(&self, current: &Credential) -> Result<Credential> {
        let request = ApiRequest::post(self.config.endpoints.refresh.as_str())
            .with_auth(AuthPolicy::Public)
            .json(&RefreshRequest {
                refresh: current.refresh_token.clone(),
            })?;

        let grant: RefreshGrant = self
            .dispatch(&request, None)
            .await?
            .error_for_status()?
            .json()?;

        let now = Utc::now();
        let expiry = Credential::resolve_expiry(
            &grant.access_token,
            grant.access_expiry,
            now,
            self.config.default_access_ttl(),
        );
        Ok(current.rotated(grant.access_token, expiry, grant.refresh_token))
    }

    /// Swap in the refreshed credential unless the session changed meanwhile
    async fn replace_credential(
        &self,
        current: &Arc<Credential>,
        next: Credential,
    ) -> Result<Arc<Credential>> {
        let next = Arc::new(next);
        let _session = self.session_lock.lock().await;
        let previous =
            Guard::into_inner(self.credential.compare_and_swap(current, Some(next.clone())));

        match previous {
            Some(previous) if Arc::ptr_eq(&previous, current) => {
                if let Err(err) = self.persist(&next).await {
                    warn!(error = %err, "Failed to persist refreshed credential");
                }
                info!(expiry = %next.access_expiry, "Access token refreshed");
                Ok(next)
            }
            // A login replaced the credential while refreshing; it wins
            Some(previous) => Ok(previous),
            None => Err(GatewayError::RefreshFailed(
                "session ended during refresh".to_string(),
            )),
        }
    }

    /// Write a credential to session storage; callers hold `session_lock`
    pub(super) async fn persist(&self, credential: &Credential) -> Result<()> {
        let serialized = serde_json::to_string(credential)
            .map_err(|err| GatewayError::Storage(err.to_string()))?;
        self.storage
            .set(&self.config.storage_key, &serialized)
            .await?;
        Ok(())
    }

    /// Tear the session down once per credential.
    ///
    /// Only the caller that actually removes `expected` clears storage and
    /// redirects; later callers for the same credential are no-ops.
    pub(super) async fn end_session(&self, expected: &Arc<Credential>, reason: &str) {
        {
            let _session = self.session_lock.lock().await;
            let previous = Guard::into_inner(
                self.credential
                    .compare_and_swap(expected, None::<Arc<Credential>>),
            );
            let ended = previous.is_some_and(|previous| Arc::ptr_eq(&previous, expected));
            if !ended {
                return;
            }

            warn!(reason, "Session ended");
            self.reset_activity();
            if let Err(err) = self.storage.remove(&self.config.storage_key).await {
                warn!(error = %err, "Failed to remove stored credential");
            }
        }
        self.navigator.redirect_to(&self.config.login_redirect_path);
    }
}

struct ClearPending<'a>(&'a Mutex<Option<PendingRefresh>>);

impl Drop for ClearPending<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
