use crate::common::ManagementError;

/// Opens the authorization page for an interactive sign-in.
pub trait BrowserLauncher: Send + Sync {
    /// `callback_url` is the loopback listener address; launchers that host
    /// their own browser window forward the final redirect there.
    fn launch(&self, authorize_url: &str, callback_url: &str) -> Result<(), ManagementError>;
}

/// Opens the authorization page in the user's default browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn launch(&self, authorize_url: &str, _callback_url: &str) -> Result<(), ManagementError> {
        log::info!("Opening system browser for sign-in");
        open::that(authorize_url).map_err(|e| ManagementError::Browser {
            reason: e.to_string(),
        })
    }
}
