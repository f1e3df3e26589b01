use serde::{Deserialize, Serialize};

/// Fixed identity a session presents to the target site. One profile is
/// shared by every session in the pool; rotation happens at the proxy layer,
/// not the fingerprint layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProfile {
    pub user_agent: String,
    pub platform: String,
    pub accept_language: String,
    pub locale: String,
    /// Value seeded into the site's country-selection localStorage key.
    pub country_seed: String,
    pub consent_cookie_name: String,
    pub consent_cookie_domain: String,
    /// Requests whose URL contains any of these fragments are blocked at the
    /// network layer before first navigation.
    pub blocked_url_fragments: Vec<String>,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            user_agent:
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/119 Safari/537.36"
                    .to_string(),
            platform: "Win32".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            locale: "en-US".to_string(),
            country_seed: "US".to_string(),
            consent_cookie_name: "cookieConsent".to_string(),
            consent_cookie_domain: ".vivino.com".to_string(),
            blocked_url_fragments: vec![
                "cookielaw".to_string(),
                "consent".to_string(),
                "onetrust".to_string(),
                "braze".to_string(),
                "datadog".to_string(),
            ],
        }
    }
}

impl SessionProfile {
    /// URL patterns for the CDP request-blocking rule set.
    pub fn blocked_url_patterns(&self) -> Vec<String> {
        self.blocked_url_fragments
            .iter()
            .map(|fragment| format!("*{}*", fragment))
            .collect()
    }
}

/// Script evaluated on every new document before site code runs: hides the
/// usual automation markers and seeds the locale/country state the site
/// checks before rendering localized content.
pub fn generate_init_script(profile: &SessionProfile) -> String {
    let language = profile
        .locale
        .split(',')
        .next()
        .unwrap_or("en-US")
        .to_string();

    format!(
        r#"
    (function() {{
        Object.defineProperty(navigator, 'webdriver', {{ get: () => false }});
        Object.defineProperty(navigator, 'language', {{ get: () => '{language}' }});
        Object.defineProperty(navigator, 'languages', {{ get: () => ['{language}', 'en'] }});
        Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3] }});
        window.chrome = window.chrome || {{ runtime: {{}} }};
        try {{
            window.localStorage.setItem('vivino_user_country', '"{country}"');
        }} catch (e) {{
            // storage unavailable on opaque origins
        }}
    }})();
    "#,
        language = language,
        country = profile.country_seed,
    )
}

/// Removes consent/overlay chrome that survives the network-layer blocking.
pub fn banner_removal_script() -> &'static str {
    r#"
    (function() {
        ['#onetrust-banner-sdk', '#consent-blocker', '.popup', '.overlay'].forEach(
            (sel) => document.querySelector(sel)?.remove()
        );
    })();
    "#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let profile = SessionProfile::default();

        assert!(profile.user_agent.contains("Mozilla"));
        assert_eq!(profile.locale, "en-US");
        assert!(profile
            .blocked_url_fragments
            .iter()
            .any(|f| f == "onetrust"));
    }

    #[test]
    fn test_blocked_url_patterns_are_wildcarded() {
        let profile = SessionProfile::default();
        let patterns = profile.blocked_url_patterns();

        assert!(patterns.contains(&"*cookielaw*".to_string()));
        assert!(patterns.iter().all(|p| p.starts_with('*') && p.ends_with('*')));
    }

    #[test]
    fn test_init_script_seeds_identity() {
        let profile = SessionProfile::default();
        let script = generate_init_script(&profile);

        assert!(script.contains("webdriver"));
        assert!(script.contains("vivino_user_country"));
        assert!(script.contains("\"US\""));
        assert!(script.contains("'en-US'"));
    }

    #[test]
    fn test_banner_removal_targets_consent_chrome() {
        let script = banner_removal_script();
        assert!(script.contains("#onetrust-banner-sdk"));
        assert!(script.contains(".overlay"));
    }
}
