//! Demo configuration and its resolution against the HTTP endpoints

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use ice_protocol::{DEFAULT_ICE_ADDRESS, DEFAULT_ICE_PASSWORD, DEFAULT_ICE_PORT};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Where the remote ICE address, port and password come from.
///
/// A set URL wins over its literal, but only when `origin` is an http(s)
/// URL. An empty URL path counts as unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DemoConfig {
    pub ice_address_url: Option<String>,
    pub ice_port_url: Option<String>,
    pub ice_password_url: Option<String>,

    pub ice_address: String,
    pub ice_port: u16,
    pub ice_password: String,

    /// Base URL the paths above are resolved against
    pub origin: Option<Url>,
    /// Path the upload variant posts the local password to
    pub upload_path: String,
    /// Server name for the QUIC handshake
    pub server_name: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            ice_address_url: Some("/ice-address".to_string()),
            ice_port_url: Some("/ice-port".to_string()),
            ice_password_url: Some("/ice-password".to_string()),
            ice_address: DEFAULT_ICE_ADDRESS.to_string(),
            ice_port: DEFAULT_ICE_PORT,
            ice_password: DEFAULT_ICE_PASSWORD.to_string(),
            origin: None,
            upload_path: "/ice".to_string(),
            server_name: "localhost".to_string(),
        }
    }
}

/// The values the bootstrapper actually uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub address: String,
    pub port: u16,
    pub password: String,
}

impl DemoConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
    }

    /// The origin, if it is one the endpoints can be fetched from
    pub fn networked_origin(&self) -> Option<&Url> {
        self.origin
            .as_ref()
            .filter(|origin| matches!(origin.scheme(), "http" | "https"))
    }

    /// Full URL of an endpoint path
    pub fn endpoint(&self, origin: &Url, path: &str) -> ClientResult<Url> {
        Ok(origin.join(path)?)
    }

    /// Apply the endpoint overrides to the literal defaults
    pub async fn resolve<E: ConfigEndpoints>(
        &self,
        endpoints: &E,
    ) -> ClientResult<ResolvedConfig> {
        let mut resolved = ResolvedConfig {
            address: self.ice_address.clone(),
            port: self.ice_port,
            password: self.ice_password.clone(),
        };

        let Some(origin) = self.networked_origin() else {
            debug!("No networked origin, using literal ICE parameters");
            return Ok(resolved);
        };

        if let Some(path) = set_path(&self.ice_address_url) {
            resolved.address = endpoints.fetch_text(&self.endpoint(origin, path)?).await?;
        }
        if let Some(path) = set_path(&self.ice_port_url) {
            let body = endpoints.fetch_text(&self.endpoint(origin, path)?).await?;
            resolved.port = body.parse().map_err(|_| ClientError::InvalidPort(body))?;
        }
        if let Some(path) = set_path(&self.ice_password_url) {
            resolved.password = endpoints.fetch_text(&self.endpoint(origin, path)?).await?;
        }

        Ok(resolved)
    }
}

fn set_path(path: &Option<String>) -> Option<&str> {
    path.as_deref().filter(|p| !p.is_empty())
}

/// HTTP surface the configuration is fetched from
pub trait ConfigEndpoints: Send + Sync {
    /// GET `url` and return the trimmed body text
    fn fetch_text(&self, url: &Url) -> impl Future<Output = ClientResult<String>> + Send;

    /// POST `body` as plain text to `url`
    fn post_text(&self, url: &Url, body: &str) -> impl Future<Output = ClientResult<()>> + Send;
}

/// `ConfigEndpoints` over reqwest
pub struct HttpEndpoints {
    client: reqwest::Client,
}

impl HttpEndpoints {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

fn http_error(url: &Url, e: reqwest::Error) -> ClientError {
    ClientError::Http {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl ConfigEndpoints for HttpEndpoints {
    async fn fetch_text(&self, url: &Url) -> ClientResult<String> {
        debug!("GET {}", url);
        let body = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(url, e))?
            .text()
            .await
            .map_err(|e| http_error(url, e))?;
        Ok(body.trim().to_string())
    }

    async fn post_text(&self, url: &Url, body: &str) -> ClientResult<()> {
        debug!("POST {}", url);
        self.client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(url, e))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Serves canned bodies and records every request
    #[derive(Clone, Default)]
    pub(crate) struct FakeEndpoints {
        pub bodies: HashMap<String, String>,
        pub requests: Arc<Mutex<Vec<String>>>,
    }

    impl FakeEndpoints {
        pub fn with(mut self, path: &str, body: &str) -> Self {
            self.bodies.insert(path.to_string(), body.to_string());
            self
        }

        pub fn sharing_log(mut self, requests: Arc<Mutex<Vec<String>>>) -> Self {
            self.requests = requests;
            self
        }
    }

    impl ConfigEndpoints for FakeEndpoints {
        async fn fetch_text(&self, url: &Url) -> ClientResult<String> {
            self.requests.lock().push(format!("GET {}", url.path()));
            self.bodies
                .get(url.path())
                .map(|body| body.trim().to_string())
                .ok_or_else(|| ClientError::Http {
                    url: url.to_string(),
                    reason: "404 Not Found".to_string(),
                })
        }

        async fn post_text(&self, url: &Url, body: &str) -> ClientResult<()> {
            self.requests
                .lock()
                .push(format!("POST {} {}", url.path(), body));
            Ok(())
        }
    }

    fn networked() -> DemoConfig {
        DemoConfig {
            origin: Some(Url::parse("http://localhost:3030").unwrap()),
            ..DemoConfig::default()
        }
    }

    fn literals() -> ResolvedConfig {
        ResolvedConfig {
            address: "127.0.0.1".to_string(),
            port: 3737,
            password: "password".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unset_urls_use_literals() {
        let config = DemoConfig {
            ice_address_url: None,
            ice_port_url: Some(String::new()),
            ice_password_url: None,
            ..networked()
        };
        let endpoints = FakeEndpoints::default();

        assert_eq!(config.resolve(&endpoints).await.unwrap(), literals());
        assert!(endpoints.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_networked_origin_uses_literals() {
        let endpoints = FakeEndpoints::default().with("/ice-address", "10.0.0.1");

        let no_origin = DemoConfig::default();
        assert_eq!(no_origin.resolve(&endpoints).await.unwrap(), literals());

        let file_origin = DemoConfig {
            origin: Some(Url::parse("file:///srv/demo/index.html").unwrap()),
            ..DemoConfig::default()
        };
        assert_eq!(file_origin.resolve(&endpoints).await.unwrap(), literals());
        assert!(endpoints.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fetched_bodies_override_literals() {
        let endpoints = FakeEndpoints::default()
            .with("/ice-address", "192.168.1.20\n")
            .with("/ice-port", " 4444 ")
            .with("/ice-password", "hunter2");

        let resolved = networked().resolve(&endpoints).await.unwrap();
        assert_eq!(
            resolved,
            ResolvedConfig {
                address: "192.168.1.20".to_string(),
                port: 4444,
                password: "hunter2".to_string(),
            }
        );
        assert_eq!(
            *endpoints.requests.lock(),
            vec!["GET /ice-address", "GET /ice-port", "GET /ice-password"]
        );
    }

    #[tokio::test]
    async fn test_only_set_urls_override() {
        let config = DemoConfig {
            ice_address_url: None,
            ice_password_url: None,
            ..networked()
        };
        let endpoints = FakeEndpoints::default().with("/ice-port", "5000");

        let resolved = config.resolve(&endpoints).await.unwrap();
        assert_eq!(resolved.port, 5000);
        assert_eq!(resolved.address, "127.0.0.1");
        assert_eq!(resolved.password, "password");
    }

    #[tokio::test]
    async fn test_bad_port_body_is_an_error() {
        let endpoints = FakeEndpoints::default()
            .with("/ice-address", "127.0.0.1")
            .with("/ice-port", "not-a-port");

        let err = networked().resolve(&endpoints).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidPort(body) if body == "not-a-port"));
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let err = networked()
            .resolve(&FakeEndpoints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Http { .. }));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DemoConfig = serde_json::from_str(
            r#"{"iceAddress": "10.1.1.1", "icePortUrl": null, "origin": "https://demo.local/"}"#,
        )
        .unwrap();

        assert_eq!(config.ice_address, "10.1.1.1");
        assert_eq!(config.ice_port, 3737);
        assert_eq!(config.ice_port_url, None);
        assert_eq!(config.ice_address_url.as_deref(), Some("/ice-address"));
        assert_eq!(config.upload_path, "/ice");
        assert!(config.networked_origin().is_some());
    }
}
