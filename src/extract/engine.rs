use rand::Rng;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::stealth::banner_removal_script;
use crate::browser::BrowsingSession;
use crate::error::{Result, ScraperError};
use crate::extract::records::{DetailRecord, SearchResultRecord};
use crate::extract::schema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub base_url: String,
    /// Upper bound for the primary-marker condition wait.
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_step_px: u32,
    pub scroll_max_steps: u32,
    /// Randomized post-navigation delay, milliseconds. (0, 0) disables it.
    pub delay_range: (u64, u64),
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.vivino.com".to_string(),
            wait_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
            scroll_step_px: 800,
            scroll_max_steps: 30,
            delay_range: (400, 1200),
        }
    }
}

/// What "stable enough to extract" means for one page kind.
struct StabilizePlan {
    marker: &'static str,
    scroll_until_stable: bool,
    remove_banners: bool,
}

/// Drives a leased session through navigation, stabilization and schema
/// application. Holds no session state of its own; sessions come and go per
/// call.
pub struct ExtractionEngine {
    settings: EngineSettings,
}

impl ExtractionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/wines?q={}",
            self.settings.base_url,
            urlencoding::encode(query)
        )
    }

    pub fn detail_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    /// Run a search and extract every usable result card. Cards whose link
    /// cannot be resolved are dropped; missing sub-elements degrade to
    /// `None` on that field only.
    pub async fn search(
        &self,
        session: &dyn BrowsingSession,
        query: &str,
    ) -> Result<Vec<SearchResultRecord>> {
        let url = self.search_url(query);
        self.navigate_and_stabilize(
            session,
            &url,
            StabilizePlan {
                marker: schema::SEARCH_MARKER,
                scroll_until_stable: false,
                remove_banners: true,
            },
        )
        .await?;

        let html = session.content().await?;
        let document = Html::parse_document(&html);
        let node_selector = Selector::parse(schema::SEARCH_NODE)
            .map_err(|e| ScraperError::Parse(format!("Invalid search node selector: {:?}", e)))?;

        let mut records = Vec::new();
        let mut dropped = 0usize;
        for card in document.select(&node_selector) {
            let record = schema::extract_search_record(card);
            if record.url.is_none() {
                // a card without a link cannot be followed up; drop the node
                dropped += 1;
                continue;
            }
            records.push(record);
        }

        if dropped > 0 {
            debug!("Dropped {} unusable result cards for query '{}'", dropped, query);
        }

        if records.is_empty() {
            return Err(ScraperError::ExtractionFailed(format!(
                "Search for '{}' produced no usable records",
                query
            ))
            .into());
        }

        info!("Extracted {} search records for query '{}'", records.len(), query);
        Ok(records)
    }

    /// Fetch one detail page, scrolling until the lazily loaded widgets have
    /// settled, then extract the full record. Absent widgets come back as
    /// empty sequences.
    pub async fn fetch_detail(
        &self,
        session: &dyn BrowsingSession,
        path: &str,
    ) -> Result<DetailRecord> {
        let url = self.detail_url(path);
        self.navigate_and_stabilize(
            session,
            &url,
            StabilizePlan {
                marker: schema::DETAIL_MARKER,
                scroll_until_stable: true,
                remove_banners: true,
            },
        )
        .await?;

        let html = session.content().await?;
        let document = Html::parse_document(&html);
        let record = schema::extract_detail_record(&document, path);

        if record.has_no_core_fields() {
            return Err(ScraperError::ExtractionFailed(format!(
                "Detail page {} yielded no usable fields",
                path
            ))
            .into());
        }

        info!(
            "Extracted detail record for {} ({} reviews, {} facts)",
            path,
            record.reviews.len(),
            record.facts.len()
        );
        Ok(record)
    }

    /// One parameterized navigate-wait-settle step shared by both
    /// operations: navigate, poll for the marker within the timeout bound,
    /// strip consent chrome, optionally scroll until the page height stops
    /// growing.
    async fn navigate_and_stabilize(
        &self,
        session: &dyn BrowsingSession,
        url: &str,
        plan: StabilizePlan,
    ) -> Result<()> {
        session.navigate(url).await?;
        self.post_navigation_delay().await;
        self.wait_for_marker(session, plan.marker).await?;

        if plan.remove_banners {
            if let Err(e) = session.evaluate(banner_removal_script()).await {
                debug!("Banner removal failed on {}: {}", url, e);
            }
        }

        if plan.scroll_until_stable {
            self.scroll_until_stable(session).await;
        }

        Ok(())
    }

    async fn post_navigation_delay(&self) {
        let (min, max) = self.settings.delay_range;
        if max == 0 || max < min {
            return;
        }
        let delay = rand::thread_rng().gen_range(min..=max);
        sleep(Duration::from_millis(delay)).await;
    }

    /// Condition wait, not a fixed sleep: poll for at least one marker match
    /// until the configured bound.
    async fn wait_for_marker(&self, session: &dyn BrowsingSession, marker: &str) -> Result<()> {
        let script = format!(
            "document.querySelectorAll({}).length > 0",
            serde_json::json!(marker)
        );
        let deadline = Instant::now() + self.settings.wait_timeout;

        loop {
            match session.evaluate(&script).await {
                Ok(value) if value.as_bool() == Some(true) => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!("Marker poll failed: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(ScraperError::NavigationTimeout(format!(
                    "marker '{}' never appeared within {:?}",
                    marker, self.settings.wait_timeout
                ))
                .into());
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Progressive scrolling to trigger lazy-loaded widgets; stops once the
    /// scrollable height stops growing (or after the step bound).
    async fn scroll_until_stable(&self, session: &dyn BrowsingSession) {
        let script = format!(
            "(() => {{ window.scrollBy(0, {}); return document.body.scrollHeight; }})()",
            self.settings.scroll_step_px
        );

        let mut last_height: i64 = -1;
        for _ in 0..self.settings.scroll_max_steps {
            let height = match session.evaluate(&script).await {
                Ok(value) => value.as_i64().unwrap_or(0),
                Err(e) => {
                    warn!("Scroll step failed: {}", e);
                    break;
                }
            };

            if height == last_height {
                break;
            }
            last_height = height;
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let engine = ExtractionEngine::new(EngineSettings::default());
        assert_eq!(
            engine.search_url("chianti classico"),
            "https://www.vivino.com/search/wines?q=chianti%20classico"
        );
    }

    #[test]
    fn test_detail_url_appends_relative_path() {
        let engine = ExtractionEngine::new(EngineSettings::default());
        assert_eq!(
            engine.detail_url("/IT/it/wines/1894613"),
            "https://www.vivino.com/IT/it/wines/1894613"
        );
    }
}
