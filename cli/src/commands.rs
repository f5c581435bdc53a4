//! Command-line surface and the wiring of the client core.

use crate::config::AppConfig;
use anyhow::Context;
use azmgmt_client::auth::{
    AuthMode, AuthModeHandle, AuthenticationContext, Credential, CredentialResolver,
    PublishSettingsStore, SubscriptionIdentity, SystemBrowser, TokenScope, TokenStore,
};
use azmgmt_client::common::ManagementError;
use azmgmt_client::management::{
    AsyncOperationPoller, ContentKind, ErrorReporter, HttpTransport, ManagementCallExecutor,
    ManagementRequest, PollerConfig,
};
use azmgmt_client::settings::ManagementSettings;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "azmgmt", version, about = "Authenticated calls to the Azure Service Management API")]
pub struct Cli {
    /// Configuration file (defaults to the user config directory, then ./config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Overrides `management.auth_mode`
    #[arg(long, global = true, value_enum)]
    pub auth_mode: Option<ModeArg>,

    /// Publish settings file with management certificates; selects
    /// certificate mode unless --auth-mode says otherwise
    #[arg(long, global = true, value_name = "FILE")]
    pub publish_settings: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Certificate,
    AzureAd,
}

impl From<ModeArg> for AuthMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Certificate => AuthMode::CertificateBased,
            ModeArg::AzureAd => AuthMode::AzureAd,
        }
    }
}

/// Which subscription a command acts on.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Subscription id; tenant-wide when omitted
    #[arg(long)]
    pub subscription: Option<String>,

    /// Tenant that issues tokens for the subscription
    #[arg(long)]
    pub tenant: Option<String>,

    /// Management endpoint of the subscription
    #[arg(long)]
    pub endpoint: Option<String>,
}

impl TargetArgs {
    pub fn identity(&self) -> Option<SubscriptionIdentity> {
        self.subscription.as_ref().map(|id| {
            SubscriptionIdentity::new(
                id.clone(),
                self.tenant.clone().unwrap_or_default(),
                self.endpoint.clone().unwrap_or_default(),
            )
        })
    }

    /// Tenant-wide calls take the tenant and endpoint from the settings.
    pub fn apply_to(&self, settings: &mut ManagementSettings) {
        if self.subscription.is_some() {
            return;
        }
        if let Some(tenant) = &self.tenant {
            settings.tenant_name = tenant.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            settings.service_management_uri = endpoint.clone();
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// Path below the management endpoint, or an absolute URL
    pub path: String,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Send and accept XML instead of JSON
    #[arg(long)]
    pub xml: bool,

    /// Operation status prefix; a 202 answer is polled until the operation ends
    #[arg(long, value_name = "PREFIX")]
    pub async_base_url: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BodyCallArgs {
    #[command(flatten)]
    pub call: CallArgs,

    /// Request body, or @FILE to read it from a file
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and report the account in use
    Login(TargetArgs),
    Get(CallArgs),
    Post(BodyCallArgs),
    Put(BodyCallArgs),
    Delete(CallArgs),
}

impl Command {
    pub fn target(&self) -> &TargetArgs {
        match self {
            Command::Login(target) => target,
            Command::Get(call) | Command::Delete(call) => &call.target,
            Command::Post(args) | Command::Put(args) => &args.call.target,
        }
    }

    /// The management call behind this command; `None` for `login`.
    pub fn request(&self) -> anyhow::Result<Option<ManagementRequest>> {
        let request = match self {
            Command::Login(_) => return Ok(None),
            Command::Get(call) => call.finish(ManagementRequest::get(&call.path)),
            Command::Delete(call) => call.finish(ManagementRequest::delete(&call.path)),
            Command::Post(args) => args
                .call
                .finish(ManagementRequest::post(&args.call.path, args.read_body()?)),
            Command::Put(args) => args
                .call
                .finish(ManagementRequest::put(&args.call.path, args.read_body()?)),
        };
        Ok(Some(request))
    }
}

impl CallArgs {
    fn finish(&self, request: ManagementRequest) -> ManagementRequest {
        let content = if self.xml {
            ContentKind::Xml
        } else {
            ContentKind::Json
        };
        let request = request.with_content(content);
        match &self.async_base_url {
            Some(prefix) => request.with_async_base_url(prefix.clone()),
            None => request,
        }
    }
}

impl BodyCallArgs {
    fn read_body(&self) -> anyhow::Result<String> {
        match self.body.as_deref() {
            Some(raw) => match raw.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read request body from {path}")),
                None => Ok(raw.to_string()),
            },
            None => Ok(String::new()),
        }
    }
}

/// The client core wired for one invocation.
pub struct Services {
    authority: Arc<AuthenticationContext>,
    executor: ManagementCallExecutor,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    pub fn build(
        settings: ManagementSettings,
        config: &AppConfig,
        publish_settings: Option<&Path>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let subscriptions = Arc::new(
            PublishSettingsStore::new().with_password(config.certificates().password()),
        );
        if let Some(path) = publish_settings {
            let xml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read publish settings {}", path.display()))?;
            let ids = subscriptions.import(&xml)?;
            log::info!("Imported {} subscription(s) from {}", ids.len(), path.display());
        }

        let authority = Arc::new(AuthenticationContext::new(
            &settings.ad_authority,
            Arc::new(SystemBrowser),
        ));
        let resolver = Arc::new(CredentialResolver::new(
            settings.clone(),
            AuthModeHandle::new(settings.auth_mode),
            TokenStore::new(),
            authority.clone(),
            subscriptions,
        ));

        let transport = Arc::new(match timeout {
            Some(timeout) => HttpTransport::new().with_timeout(timeout),
            None => HttpTransport::new(),
        });
        let poller = AsyncOperationPoller::new(
            transport.clone(),
            PollerConfig::from(&settings.poll),
            settings.user_agent(),
        );
        let reporter: ErrorReporter = Arc::new(|error: &ManagementError| {
            if let Some(hint) = remedy(error) {
                eprintln!("hint: {hint}");
            }
        });
        let executor =
            ManagementCallExecutor::new(resolver, transport, poller).with_error_reporter(reporter);

        Ok(Self {
            authority,
            executor,
        })
    }

    /// Signs in through the browser, or reports the certificate in use.
    pub async fn login(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        cancel: &CancellationToken,
    ) -> Result<String, ManagementError> {
        let resolver = self.executor.resolver();
        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ManagementError::Cancelled),
            resolution = resolver.resolve(subscription, true) => resolution?,
        };

        let token = match resolution.credential {
            Credential::Certificate(_) => {
                return Ok("Using management certificate from publish settings".to_string());
            }
            Credential::BearerToken(token) => token,
        };
        resolver
            .tokens()
            .store(&TokenScope::for_subscription(subscription), token.clone())
            .await;

        let account = token
            .user_info()
            .and_then(|user| user.display_name())
            .unwrap_or("unknown account");
        Ok(match token.expires_at() {
            Some(expires) => format!("Signed in as {account} (token expires {expires})"),
            None => format!("Signed in as {account}"),
        })
    }

    pub async fn call(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        request: &ManagementRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ManagementError> {
        self.executor.execute(subscription, request, cancel).await
    }

    /// Stops the loopback listener of a pending sign-in.
    pub async fn shutdown(&self) {
        self.authority.dispose().await;
    }
}

/// What the user can do about a failed call, when there is something to do.
/// The failure itself is already logged by the executor.
fn remedy(error: &ManagementError) -> Option<&'static str> {
    match error {
        ManagementError::NotSignedIn => Some("run `azmgmt login` first"),
        ManagementError::NoSubscriptionConfigured { .. } => {
            Some("import the subscription certificate with --publish-settings")
        }
        ManagementError::HttpError {
            http_status: 401, ..
        } => Some("the stored sign-in was discarded; run `azmgmt login` again"),
        ManagementError::HttpError {
            http_status: 403, ..
        } => Some("the account has no access to this subscription"),
        ManagementError::AuthenticationCancelled => Some("sign-in was cancelled in the browser"),
        _ => None,
    }
}

/// Applies the command-line overrides to the loaded settings.
pub fn effective_settings(
    cli: &Cli,
    config: &AppConfig,
) -> Result<ManagementSettings, ManagementError> {
    let mut settings = config.management().clone();
    cli.command.target().apply_to(&mut settings);
    match cli.auth_mode {
        Some(mode) => settings.auth_mode = mode.into(),
        None if cli.publish_settings.is_some() => settings.auth_mode = AuthMode::CertificateBased,
        None => {}
    }
    settings.validate()?;
    Ok(settings)
}

pub async fn run(cli: Cli, config: AppConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = effective_settings(&cli, &config)?;
    let publish_settings = cli
        .publish_settings
        .clone()
        .or_else(|| config.certificates().publish_settings());
    let services = Services::build(
        settings,
        &config,
        publish_settings.as_deref(),
        cli.timeout.map(Duration::from_secs),
    )?;

    let subscription = cli.command.target().identity();
    let outcome = match cli.command.request()? {
        None => services.login(subscription.as_ref(), &cancel).await,
        Some(request) => services.call(subscription.as_ref(), &request, &cancel).await,
    };
    services.shutdown().await;

    let output = outcome?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
