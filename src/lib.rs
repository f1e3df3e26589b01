pub mod api;
pub mod browser;
pub mod config;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod proxy;
pub mod retry;

pub use browser::{SessionPool, SessionProfile};
pub use config::Config;
pub use enrich::EnrichmentClient;
pub use error::{Result, ScraperError};
pub use extract::ExtractionEngine;
pub use proxy::ProxyPool;
