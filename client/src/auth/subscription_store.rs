use super::types::ManagementCertificate;
use crate::common::ManagementError;
use crate::settings::DEFAULT_SERVICE_MANAGEMENT_URI;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::sync::RwLock;

/// Management certificates by subscription id.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Certificate registered for `subscription_id`, if any.
    async fn certificate(&self, subscription_id: &str) -> Option<ManagementCertificate>;
}

/// A subscription entry read from a publish settings document.
#[derive(Clone, Debug)]
pub struct PublishedSubscription {
    pub id: String,
    pub name: Option<String>,
    pub certificate: ManagementCertificate,
}

/// [`SubscriptionStore`] backed by `.publishsettings` documents.
///
/// Both schema versions are understood: version 2 puts the certificate and
/// `ServiceManagementUrl` on each `<Subscription>`, version 1 puts the
/// certificate and `Url` on the enclosing `<PublishProfile>`.
#[derive(Debug, Default)]
pub struct PublishSettingsStore {
    password: String,
    subscriptions: RwLock<HashMap<String, PublishedSubscription>>,
}

impl PublishSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Password protecting the PKCS#12 blobs. Publish settings files
    /// downloaded from the portal use an empty password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn from_xml(xml: &str) -> Result<Self, ManagementError> {
        let store = Self::new();
        store.import(xml)?;
        Ok(store)
    }

    /// Merges the subscriptions of `xml`, replacing entries with the same id.
    ///
    /// Returns the imported subscription ids in document order.
    pub fn import(&self, xml: &str) -> Result<Vec<String>, ManagementError> {
        let parsed = parse_publish_settings(xml, &self.password)?;
        let ids: Vec<String> = parsed.iter().map(|s| s.id.clone()).collect();

        let mut subscriptions = self.write();
        for subscription in parsed {
            if subscriptions
                .insert(subscription.id.clone(), subscription)
                .is_some()
            {
                log::debug!("Replaced existing publish settings entry");
            }
        }
        log::info!("Imported {} subscription(s) from publish settings", ids.len());
        Ok(ids)
    }

    pub fn remove(&self, subscription_id: &str) -> Option<PublishedSubscription> {
        self.write().remove(subscription_id)
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<PublishedSubscription> {
        self.read().get(subscription_id).cloned()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PublishedSubscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PublishedSubscription>> {
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SubscriptionStore for PublishSettingsStore {
    async fn certificate(&self, subscription_id: &str) -> Option<ManagementCertificate> {
        self.subscription(subscription_id).map(|s| s.certificate)
    }
}

fn parse_publish_settings(
    xml: &str,
    password: &str,
) -> Result<Vec<PublishedSubscription>, ManagementError> {
    let document = roxmltree::Document::parse(xml).map_err(|e| ManagementError::Configuration {
        reason: format!("publish settings are not valid XML: {e}"),
    })?;

    let root = document.root_element();
    if !root.has_tag_name("PublishData") {
        return Err(ManagementError::Configuration {
            reason: format!(
                "expected a PublishData document, found <{}>",
                root.tag_name().name()
            ),
        });
    }

    let mut subscriptions = Vec::new();
    for profile in root.children().filter(|n| n.has_tag_name("PublishProfile")) {
        let profile_url = profile.attribute("Url");
        let profile_certificate = profile.attribute("ManagementCertificate");

        for node in profile.children().filter(|n| n.has_tag_name("Subscription")) {
            let id = node
                .attribute("Id")
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ManagementError::Configuration {
                    reason: "publish settings subscription has no Id".to_string(),
                })?;

            let encoded = node
                .attribute("ManagementCertificate")
                .or(profile_certificate)
                .ok_or_else(|| ManagementError::Certificate {
                    reason: format!("subscription {id} has no management certificate"),
                })?;

            let management_uri = node
                .attribute("ServiceManagementUrl")
                .or(profile_url)
                .unwrap_or(DEFAULT_SERVICE_MANAGEMENT_URI)
                .to_string();

            subscriptions.push(PublishedSubscription {
                id: id.to_string(),
                name: node.attribute("Name").map(str::to_string),
                certificate: ManagementCertificate {
                    pkcs12: decode_certificate(id, encoded)?,
                    password: password.to_string(),
                    management_uri,
                },
            });
        }
    }

    Ok(subscriptions)
}

fn decode_certificate(subscription_id: &str, encoded: &str) -> Result<Vec<u8>, ManagementError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ManagementError::Certificate {
            reason: format!("subscription {subscription_id} has an empty management certificate"),
        });
    }
    STANDARD
        .decode(compact)
        .map_err(|e| ManagementError::Certificate {
            reason: format!("management certificate of subscription {subscription_id}: {e}"),
        })
}
