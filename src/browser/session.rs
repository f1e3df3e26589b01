use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, Headers, SetBlockedUrLsParams, SetCookiesParams,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::stealth::{generate_init_script, SessionProfile};
use crate::error::{Result, ScraperError};
use crate::proxy::ProxyCredential;

/// One navigable browsing context. The pool loans a session to exactly one
/// in-flight operation at a time; navigation and evaluation are sequential
/// within it.
#[async_trait]
pub trait BrowsingSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn proxy(&self) -> Option<&ProxyCredential>;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Full rendered HTML of the current document.
    async fn content(&self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates sessions for the pool; injectable so tests can substitute a stub
/// for a live browser.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, proxy: Option<ProxyCredential>) -> Result<Box<dyn BrowsingSession>>;
}

/// Session backed by a dedicated headless Chromium process. Each session
/// owns its own browser so the egress proxy can differ per session.
pub struct ChromiumSession {
    id: Uuid,
    proxy: Option<ProxyCredential>,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl BrowsingSession for ChromiumSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn proxy(&self) -> Option<&ProxyCredential> {
        self.proxy.as_ref()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Session {} navigating to {}", self.id, url);
        self.page
            .goto(url)
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to navigate to {}: {}", url, e)))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::Browser(format!("Script evaluation failed: {}", e)))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to get page content: {}", e)).into())
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.page.clone().close().await {
            debug!("Session {} page close: {}", self.id, e);
        }
        if let Err(e) = self.browser.close().await {
            debug!("Session {} browser close: {}", self.id, e);
        }
        self.handler_task.abort();
        let age = chrono::Utc::now().signed_duration_since(self.created_at);
        info!("Closed session {} after {}s", self.id, age.num_seconds());
        Ok(())
    }
}

/// Launches one headless Chromium per session, bound to the given proxy and
/// shaped by the shared [`SessionProfile`].
pub struct ChromiumSessionFactory {
    profile: SessionProfile,
}

impl ChromiumSessionFactory {
    pub fn new(profile: SessionProfile) -> Self {
        Self { profile }
    }

    async fn launch_browser(&self, proxy: Option<&ProxyCredential>) -> Result<(Browser, JoinHandle<()>)> {
        // unique user data dir to avoid singleton lock issues
        let user_data_dir = format!(
            "/tmp/vivino-scraper-{}-{}",
            std::process::id(),
            Uuid::new_v4()
        );
        let _ = std::fs::create_dir_all(&user_data_dir);

        let user_data_arg = format!("--user-data-dir={}", user_data_dir);
        let mut args = vec![
            user_data_arg.as_str(),
            "--headless",
            "--no-sandbox",
            "--disable-gpu",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--mute-audio",
            "--no-first-run",
            "--disable-default-apps",
            "--disable-sync",
            "--disable-background-networking",
            "--disable-blink-features=AutomationControlled",
            "--remote-debugging-port=0",
        ];

        let proxy_arg = proxy.map(|p| format!("--proxy-server=http://{}", p.server()));
        if let Some(ref arg) = proxy_arg {
            args.push(arg.as_str());
        }

        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .args(args)
            .build()
            .map_err(|e| ScraperError::Browser(format!("Failed to create browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    // filter out common websocket deserialization noise
                    let message = e.to_string();
                    if message.contains("data did not match any variant") {
                        debug!("Ignoring WebSocket deserialization error: {}", e);
                    } else {
                        warn!("Browser handler error: {}", e);
                    }
                }
            }
            debug!("Browser handler task ended");
        });

        Ok((browser, handler_task))
    }

    /// Seed identity, consent state and the request-blocking rule set before
    /// first navigation.
    async fn apply_profile(&self, page: &Page, proxy: Option<&ProxyCredential>) -> Result<()> {
        let user_agent_params = SetUserAgentOverrideParams::builder()
            .user_agent(&self.profile.user_agent)
            .accept_language(&self.profile.accept_language)
            .platform(&self.profile.platform)
            .build()
            .map_err(|e| ScraperError::Browser(format!("Failed to build user agent params: {}", e)))?;
        page.execute(user_agent_params)
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to set user agent: {}", e)))?;

        let init_script = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(generate_init_script(&self.profile))
            .build()
            .map_err(|e| ScraperError::Browser(format!("Failed to build init script: {}", e)))?;
        page.execute(init_script)
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to install init script: {}", e)))?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to enable network domain: {}", e)))?;

        page.execute(SetBlockedUrLsParams::new(
            self.profile.blocked_url_patterns(),
        ))
        .await
        .map_err(|e| ScraperError::Browser(format!("Failed to install blocking rules: {}", e)))?;

        let consent_cookie = CookieParam::builder()
            .name(&self.profile.consent_cookie_name)
            .value("true")
            .domain(&self.profile.consent_cookie_domain)
            .path("/")
            .secure(true)
            .build()
            .map_err(|e| ScraperError::Browser(format!("Failed to build consent cookie: {}", e)))?;
        page.execute(SetCookiesParams::new(vec![consent_cookie]))
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to seed consent cookie: {}", e)))?;

        // proxy credentials travel as a basic auth header; the proxy address
        // itself is a browser launch argument
        if let Some(proxy) = proxy {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", proxy.username, proxy.password));
            let headers = Headers::new(serde_json::json!({
                "Proxy-Authorization": format!("Basic {}", token),
            }));
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| ScraperError::Browser(format!("Failed to set proxy auth header: {}", e)))?;
        }

        Ok(())
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn create(&self, proxy: Option<ProxyCredential>) -> Result<Box<dyn BrowsingSession>> {
        let id = Uuid::new_v4();
        let (browser, handler_task) = self.launch_browser(proxy.as_ref()).await?;

        let page = match tokio::time::timeout(
            Duration::from_secs(10),
            browser.new_page("about:blank"),
        )
        .await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                handler_task.abort();
                return Err(ScraperError::Browser(format!("Failed to create new page: {}", e)).into());
            }
            Err(_) => {
                handler_task.abort();
                return Err(ScraperError::Browser("Timeout creating new page".to_string()).into());
            }
        };

        self.apply_profile(&page, proxy.as_ref()).await?;

        match &proxy {
            Some(p) => info!("Created session {} via proxy {}", id, p.server()),
            None => info!("Created session {} without proxy", id),
        }

        Ok(Box::new(ChromiumSession {
            id,
            proxy,
            browser,
            page,
            handler_task,
            created_at: chrono::Utc::now(),
        }))
    }
}
