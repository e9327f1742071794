use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{SiteConfig, UploaderConfig};
use crate::error::UploadError;
use crate::order::{Order, Website};
use crate::sanitize::redact_url;

use super::{UploadPayload, Uploader};

/// Website -> upload implementation. Only sites with an entry can be
/// delivered to.
pub struct UploaderRegistry {
    uploaders: BTreeMap<Website, Box<dyn Uploader>>,
}

impl UploaderRegistry {
    /// Registry with only the `test` site.
    pub fn new() -> Self {
        let mut registry = Self {
            uploaders: BTreeMap::new(),
        };
        registry.register(Website::Test, Box::new(TestUploader));
        registry
    }

    /// Adds a webhook uploader for every site in `uploader.sites`.
    pub fn from_config(config: &UploaderConfig) -> Result<Self, UploadError> {
        let mut registry = Self::new();

        for (name, site) in &config.sites {
            let Some(website) = Website::from_name(name) else {
                warn!("Ignoring upload site '{}': not a known website", name);
                continue;
            };
            let uploader = WebhookUploader::new(website, site, config.proxy.as_deref())?;
            registry.register(website, Box::new(uploader));
        }

        Ok(registry)
    }

    pub fn register(&mut self, website: Website, uploader: Box<dyn Uploader>) {
        self.uploaders.insert(website, uploader);
    }

    pub fn contains(&self, website: Website) -> bool {
        self.uploaders.contains_key(&website)
    }

    pub fn get_mut(&mut self, website: Website) -> Option<&mut (dyn Uploader + 'static)> {
        self.uploaders.get_mut(&website).map(|u| u.as_mut())
    }

    pub fn websites(&self) -> Vec<Website> {
        self.uploaders.keys().copied().collect()
    }

    /// Fails on the first Order whose site has no uploader.
    pub fn validate(&self, orders: &[Order]) -> Result<(), UploadError> {
        for order in orders {
            let website = order.info().website;
            if !self.contains(website) {
                return Err(UploadError::Unsupported {
                    index: order.upload_index(),
                    name: website.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for UploaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes nothing.
pub struct TestUploader;

impl Uploader for TestUploader {
    fn start_upload(&mut self, payload: &UploadPayload) -> Result<String, UploadError> {
        info!(
            files = payload.files.len(),
            "Website is 'test', skipping upload of '{}'", payload.title
        );
        Ok(String::new())
    }
}

/// Hands the payload to an HTTP service that performs the site-specific
/// upload and answers with `{ "url": "..." }`.
pub struct WebhookUploader {
    website: Website,
    endpoint: String,
    token: Option<SecretString>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    url: String,
}

impl WebhookUploader {
    pub fn new(website: Website, site: &SiteConfig, proxy: Option<&str>) -> Result<Self, UploadError> {
        let failed = |reason: String| UploadError::Request {
            site: website.to_string(),
            reason,
        };

        let token = site.token.resolve_optional().map_err(|e| failed(e.to_string()))?;

        let mut builder = Client::builder().timeout(Duration::from_secs(600));
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(|e| failed(e.to_string()))?);
        }
        let client = builder.build().map_err(|e| failed(e.to_string()))?;

        Ok(Self {
            website,
            endpoint: site.endpoint.clone(),
            token,
            client,
        })
    }
}

impl Uploader for WebhookUploader {
    fn start_upload(&mut self, payload: &UploadPayload) -> Result<String, UploadError> {
        let failed = |reason: String| UploadError::Request {
            site: self.website.to_string(),
            reason,
        };

        let files: Vec<String> = payload
            .files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let body = json!({
            "website": payload.website,
            "title": payload.title,
            "caption": payload.caption,
            "tags": payload.tags,
            "adult": payload.adult,
            "files": files,
        });

        info!(
            website = %self.website,
            endpoint = %redact_url(&self.endpoint),
            "Uploading {} files",
            files.len()
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response: WebhookResponse = request
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| failed(e.to_string()))?
            .json()
            .map_err(|e| failed(format!("bad response: {}", e)))?;

        Ok(response.url)
    }
}
