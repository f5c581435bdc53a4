use super::types::{AuthenticationResult, InteractiveRequest};
use crate::common::ManagementError;
use async_trait::async_trait;

/// Source of OAuth2 tokens for management calls.
///
/// [`AuthenticationContext`](super::AuthenticationContext) is the production
/// implementation; the credential resolver and the call executor only see
/// this trait.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use client::auth::{AuthenticationResult, InteractiveRequest, TokenAuthority};
/// use client::common::ManagementError;
///
/// struct FixedAuthority;
///
/// #[async_trait]
/// impl TokenAuthority for FixedAuthority {
///     async fn acquire_token_interactive(
///         &self,
///         _request: &InteractiveRequest,
///     ) -> Result<Option<AuthenticationResult>, ManagementError> {
///         Ok(Some(AuthenticationResult::new("Bearer", "AT", "RT", i64::MIN, None)))
///     }
///
///     async fn acquire_token_by_refresh_token(
///         &self,
///         previous: &AuthenticationResult,
///         _tenant: &str,
///         _resource: &str,
///         _client_id: &str,
///     ) -> Result<AuthenticationResult, ManagementError> {
///         Ok(previous.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Runs a browser sign-in.
    ///
    /// Returns `Ok(None)` when the user abandoned the sign-in.
    ///
    /// # Errors
    ///
    /// [`ManagementError::AuthFailure`] when the identity provider reported an
    /// error, [`ManagementError::TokenEndpointFailure`] when the code could
    /// not be redeemed.
    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<Option<AuthenticationResult>, ManagementError>;

    /// Redeems the refresh token of `previous` for a new token pair.
    ///
    /// # Errors
    ///
    /// A [`ManagementError::TokenEndpointFailure`] with status 400 when the
    /// refresh token was rejected (see [`ManagementError::is_refresh_rejection`]).
    async fn acquire_token_by_refresh_token(
        &self,
        previous: &AuthenticationResult,
        tenant: &str,
        resource: &str,
        client_id: &str,
    ) -> Result<AuthenticationResult, ManagementError>;
}
