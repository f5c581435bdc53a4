use super::auth_state::AuthModeHandle;
use super::provider::TokenAuthority;
use super::subscription_store::SubscriptionStore;
use super::token_store::TokenStore;
use super::types::{
    AuthMode, AuthenticationResult, Credential, InteractiveRequest, PromptBehavior,
    SubscriptionIdentity, TokenScope,
};
use crate::common::ManagementError;
use crate::settings::ManagementSettings;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Credential chosen for one call attempt.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub credential: Credential,
    /// Token obtained by an interactive sign-in during this resolution.
    /// The resolver never writes the token store; the caller persists it.
    pub acquired: Option<AuthenticationResult>,
}

impl Resolution {
    fn cached(credential: Credential) -> Self {
        Self {
            credential,
            acquired: None,
        }
    }

    fn acquired(token: AuthenticationResult) -> Self {
        Self {
            credential: Credential::BearerToken(token.clone()),
            acquired: Some(token),
        }
    }
}

/// Picks the credential for a management call according to the current
/// [`AuthMode`].
pub struct CredentialResolver {
    settings: Arc<ManagementSettings>,
    mode: AuthModeHandle,
    tokens: TokenStore,
    authority: Arc<dyn TokenAuthority>,
    subscriptions: Arc<dyn SubscriptionStore>,
    login_lock: Mutex<()>,
    /// Token of the last interactive sign-in per scope, kept until the
    /// scope is invalidated so callers queued behind that sign-in reuse it
    signed_in: std::sync::Mutex<HashMap<TokenScope, AuthenticationResult>>,
}

impl CredentialResolver {
    pub fn new(
        settings: Arc<ManagementSettings>,
        mode: AuthModeHandle,
        tokens: TokenStore,
        authority: Arc<dyn TokenAuthority>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            settings,
            mode,
            tokens,
            authority,
            subscriptions,
            login_lock: Mutex::new(()),
            signed_in: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ManagementSettings {
        &self.settings
    }

    pub fn mode(&self) -> &AuthModeHandle {
        &self.mode
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Resolves the credential for a call on `subscription`, or a
    /// tenant-wide call when `None`.
    ///
    /// With `force_interactive` stored tokens are ignored and the user is
    /// sent through the browser sign-in again.
    ///
    /// # Errors
    ///
    /// - [`ManagementError::NoSubscriptionConfigured`] when no certificate is
    ///   registered or nothing has been configured yet
    /// - [`ManagementError::NotSignedIn`] for a tenant-wide call without a
    ///   default token
    /// - [`ManagementError::AuthenticationCancelled`] when the user abandoned
    ///   the sign-in
    pub async fn resolve(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        force_interactive: bool,
    ) -> Result<Resolution, ManagementError> {
        match self.mode.get() {
            AuthMode::Unconfigured => Err(ManagementError::NoSubscriptionConfigured {
                subscription_id: None,
            }),
            AuthMode::CertificateBased => self.resolve_certificate(subscription).await,
            AuthMode::AzureAd => match TokenScope::for_subscription(subscription) {
                TokenScope::Subscription(id) => {
                    self.resolve_subscription_token(&id, subscription, force_interactive)
                        .await
                }
                TokenScope::Tenant => self.resolve_tenant_token(force_interactive).await,
            },
        }
    }

    /// Forgets the stored token for `scope`, along with the token of the
    /// last sign-in for it, so the next call signs in again.
    pub async fn invalidate(&self, scope: &TokenScope) {
        self.signed_in_tokens().remove(scope);
        self.tokens.invalidate(scope).await;
    }

    /// Exchanges the refresh token of `previous` for a new token pair
    /// against the tenant that issued it.
    pub async fn refresh(
        &self,
        previous: &AuthenticationResult,
        subscription: Option<&SubscriptionIdentity>,
    ) -> Result<AuthenticationResult, ManagementError> {
        let tenant = self.tenant_for(subscription);
        self.authority
            .acquire_token_by_refresh_token(
                previous,
                tenant,
                &self.settings.service_management_uri,
                &self.settings.client_id,
            )
            .await
    }

    /// Tenant a subscription's tokens come from; the configured tenant for
    /// tenant-wide calls or subscriptions without a known tenant.
    pub fn tenant_for<'a>(&'a self, subscription: Option<&'a SubscriptionIdentity>) -> &'a str {
        subscription
            .map(|s| s.tenant_id.trim())
            .filter(|tenant| !tenant.is_empty())
            .unwrap_or(self.settings.tenant_name.as_str())
    }

    async fn resolve_certificate(
        &self,
        subscription: Option<&SubscriptionIdentity>,
    ) -> Result<Resolution, ManagementError> {
        let Some(id) = subscription
            .map(|s| s.subscription_id.trim())
            .filter(|id| !id.is_empty())
        else {
            return Err(ManagementError::NoSubscriptionConfigured {
                subscription_id: None,
            });
        };

        match self.subscriptions.certificate(id).await {
            Some(certificate) => Ok(Resolution::cached(Credential::Certificate(certificate))),
            None => Err(ManagementError::NoSubscriptionConfigured {
                subscription_id: Some(id.to_string()),
            }),
        }
    }

    async fn resolve_subscription_token(
        &self,
        subscription_id: &str,
        subscription: Option<&SubscriptionIdentity>,
        force_interactive: bool,
    ) -> Result<Resolution, ManagementError> {
        let scope = TokenScope::Subscription(subscription_id.to_string());

        if !force_interactive {
            if let Some(token) = self.tokens.get(&scope).await {
                return Ok(Resolution::cached(Credential::BearerToken(token)));
            }
        }

        let _login = self.login_lock.lock().await;

        // Another caller may have signed in while this one was queued
        if !force_interactive {
            if let Some(token) = self.tokens.get(&scope).await {
                log::debug!("Reusing token acquired by a concurrent sign-in for {scope}");
                return Ok(Resolution::cached(Credential::BearerToken(token)));
            }
            let signed_in = self.signed_in_tokens().get(&scope).cloned();
            if let Some(token) = signed_in {
                log::debug!("Reusing token of the sign-in that just completed for {scope}");
                return Ok(Resolution::acquired(token));
            }
        }

        let tenant = self.tenant_for(subscription).to_string();
        self.sign_in(tenant, PromptBehavior::AttemptNone, &scope)
            .await
            .map(Resolution::acquired)
    }

    async fn resolve_tenant_token(
        &self,
        force_interactive: bool,
    ) -> Result<Resolution, ManagementError> {
        if !force_interactive {
            return match self.tokens.default_token().await {
                Some(token) => Ok(Resolution::cached(Credential::BearerToken(token))),
                None => Err(ManagementError::NotSignedIn),
            };
        }

        let _login = self.login_lock.lock().await;
        self.sign_in(
            self.settings.tenant_name.clone(),
            PromptBehavior::Login,
            &TokenScope::Tenant,
        )
        .await
        .map(Resolution::acquired)
    }

    async fn sign_in(
        &self,
        tenant: String,
        prompt: PromptBehavior,
        scope: &TokenScope,
    ) -> Result<AuthenticationResult, ManagementError> {
        log::info!("Starting interactive sign-in for {scope} (tenant {tenant})");
        let request = InteractiveRequest {
            tenant,
            resource: self.settings.service_management_uri.clone(),
            client_id: self.settings.client_id.clone(),
            redirect_uri: self.settings.redirect_uri.clone(),
            prompt,
        };

        match self.authority.acquire_token_interactive(&request).await? {
            Some(token) => {
                log::info!("Interactive sign-in for {scope} completed");
                self.signed_in_tokens().insert(scope.clone(), token.clone());
                Ok(token)
            }
            None => {
                log::info!("Interactive sign-in for {scope} was cancelled");
                Err(ManagementError::AuthenticationCancelled)
            }
        }
    }

    fn signed_in_tokens(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<TokenScope, AuthenticationResult>> {
        self.signed_in
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
