use super::types::AuthMode;
use std::sync::{Arc, RwLock};

/// Shared, mutable authentication mode.
///
/// The mode is process-wide: importing publish settings switches every
/// subsequent call to certificates, signing in switches it to Azure AD.
/// Clones share the same value.
#[derive(Clone, Debug, Default)]
pub struct AuthModeHandle {
    inner: Arc<RwLock<AuthMode>>,
}

impl AuthModeHandle {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mode)),
        }
    }

    pub fn get(&self) -> AuthMode {
        match self.inner.read() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, mode: AuthMode) {
        let previous = match self.inner.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, mode),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), mode),
        };
        if previous != mode {
            log::info!("Authentication mode changed from {previous:?} to {mode:?}");
        }
    }
}
