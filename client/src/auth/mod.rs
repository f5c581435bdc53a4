pub mod auth_state;
pub mod authentication_context;
pub mod browser;
pub mod callback_listener;
pub mod credential_resolver;
pub mod provider;
pub mod subscription_store;
pub mod token_store;
pub mod types;

pub use auth_state::AuthModeHandle;
pub use authentication_context::AuthenticationContext;
pub use browser::{BrowserLauncher, SystemBrowser};
pub use callback_listener::{CallbackListener, CallbackOutcome};
pub use credential_resolver::{CredentialResolver, Resolution};
pub use provider::TokenAuthority;
pub use subscription_store::{PublishSettingsStore, PublishedSubscription, SubscriptionStore};
pub use token_store::TokenStore;
pub use types::{
    AuthMode, AuthenticationResult, Credential, EXPIRES_ON_UNKNOWN, InteractiveRequest,
    ManagementCertificate, PromptBehavior, SubscriptionIdentity, TokenScope, UserInfo,
};
