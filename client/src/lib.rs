//! # azmgmt client library
//!
//! Authentication and call resilience for the Azure Service Management API.
//! A call goes through the [`management::ManagementCallExecutor`], which asks
//! the [`auth::CredentialResolver`] for a management certificate or a bearer
//! token, sends the request, recovers from 401 answers by refreshing the
//! token and then by signing the user in again, and waits for asynchronous
//! operations to finish.
//!
//! ## Modules
//!
//! - [`auth`] - OAuth2 flows, token store, credential resolution
//! - [`management`] - Request model, transport, retry protocol, operation polling
//! - [`settings`] - Identity provider and endpoint settings
//! - [`common`] - Error types
//! - [`utils`] - Environment variable helpers
//!
//! ## Example
//!
//! ```no_run
//! use client::auth::{
//!     AuthModeHandle, AuthenticationContext, CredentialResolver, PublishSettingsStore,
//!     SubscriptionIdentity, SystemBrowser, TokenStore,
//! };
//! use client::management::{
//!     AsyncOperationPoller, HttpTransport, ManagementCallExecutor, ManagementRequest, PollerConfig,
//! };
//! use client::settings::ManagementSettings;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), client::common::ManagementError> {
//! let settings = Arc::new(ManagementSettings {
//!     client_id: "00000000-0000-0000-0000-000000000000".to_string(),
//!     ..Default::default()
//! });
//! let authority = Arc::new(AuthenticationContext::new(
//!     &settings.ad_authority,
//!     Arc::new(SystemBrowser),
//! ));
//! let resolver = Arc::new(CredentialResolver::new(
//!     settings.clone(),
//!     AuthModeHandle::new(settings.auth_mode),
//!     TokenStore::new(),
//!     authority,
//!     Arc::new(PublishSettingsStore::new()),
//! ));
//! let transport = Arc::new(HttpTransport::new());
//! let poller = AsyncOperationPoller::new(
//!     transport.clone(),
//!     PollerConfig::from(&settings.poll),
//!     settings.user_agent(),
//! );
//! let executor = ManagementCallExecutor::new(resolver, transport, poller);
//!
//! let subscription = SubscriptionIdentity::new(
//!     "my-subscription-id",
//!     "contoso.onmicrosoft.com",
//!     "https://management.core.windows.net/",
//! );
//! let body = executor
//!     .execute(
//!         Some(&subscription),
//!         &ManagementRequest::get("/my-subscription-id/services/hostedservices"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod common;
pub mod management;
pub mod settings;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
