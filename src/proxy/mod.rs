use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, ScraperError};

/// One egress proxy. Immutable once loaded; the pool owns the full list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ProxyCredential {
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port:user:pass` form used by static config lists.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(ScraperError::Config(format!(
                "Invalid proxy entry '{}', expected 'host:port:user:pass'",
                raw
            ))
            .into());
        }
        let port: u16 = parts[1].parse().map_err(|_| {
            ScraperError::Config(format!("Invalid proxy port in '{}'", raw))
        })?;
        Ok(Self {
            host: parts[0].to_string(),
            port,
            username: parts[2].to_string(),
            password: parts[3].to_string(),
        })
    }
}

/// Wire format of the provider's proxy list endpoint.
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    results: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    proxy_address: String,
    port: u16,
    username: String,
    password: String,
}

/// Round-robin pool of proxy credentials loaded from the provider API.
///
/// The cursor advances atomically so concurrent callers never observe the
/// same index twice for one pull.
pub struct ProxyPool {
    provider_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    credentials: RwLock<Vec<ProxyCredential>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(provider_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            provider_url,
            api_key,
            client,
            credentials: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pool seeded from an in-memory list; no provider call involved.
    pub fn from_credentials(credentials: Vec<ProxyCredential>) -> Self {
        let pool = Self::new(String::new(), None);
        pool.install(credentials);
        pool
    }

    /// Fetch the proxy list from the provider, replacing any previous list
    /// and resetting the rotation cursor.
    pub async fn load(&self) -> Result<usize> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ScraperError::Provider("No provider API key configured".to_string())
        })?;

        let response = self
            .client
            .get(&self.provider_url)
            .header("Authorization", format!("Token {}", api_key))
            .send()
            .await
            .map_err(|e| ScraperError::Provider(format!("Proxy list request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ScraperError::Provider(format!(
                "Proxy list request returned status {}",
                response.status()
            ))
            .into());
        }

        let body: ProviderResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::Provider(format!("Invalid proxy list response: {}", e)))?;

        let credentials = Self::from_provider_response(body);
        let count = credentials.len();
        if count == 0 {
            warn!("Proxy provider returned an empty list");
        }

        self.install(credentials);
        info!("Loaded {} proxies from provider", count);
        Ok(count)
    }

    /// Replace the credential list and reset the rotation cursor.
    fn install(&self, credentials: Vec<ProxyCredential>) {
        *self.credentials.write().expect("proxy list lock poisoned") = credentials;
        self.cursor.store(0, Ordering::SeqCst);
    }

    fn from_provider_response(body: ProviderResponse) -> Vec<ProxyCredential> {
        body.results
            .into_iter()
            .map(|entry| ProxyCredential {
                host: entry.proxy_address,
                port: entry.port,
                username: entry.username,
                password: entry.password,
            })
            .collect()
    }

    /// Next credential in round-robin order. Fails if the pool was never
    /// loaded or loaded empty.
    pub fn next(&self) -> Result<ProxyCredential> {
        let credentials = self.credentials.read().expect("proxy list lock poisoned");
        if credentials.is_empty() {
            return Err(ScraperError::EmptyPool.into());
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % credentials.len();
        let proxy = credentials[index].clone();
        debug!("Rotating to proxy {}", proxy.server());
        Ok(proxy)
    }

    pub fn len(&self) -> usize {
        self.credentials.read().expect("proxy list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
