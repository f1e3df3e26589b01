//! Chat-completion client for the sommelier enrichment step.
//!
//! The core hands over extracted facts and receives opaque generated text
//! plus token-usage accounting. Calls are not retried here; the HTTP layer
//! wraps them with the retry orchestrator at a lower attempt budget, since
//! every attempt bills tokens.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, ScraperError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    It,
    En,
}

impl Language {
    pub fn from_code(code: &str) -> Self {
        match code.to_lowercase().as_str() {
            "en" => Language::En,
            _ => Language::It,
        }
    }
}

/// Token accounting passed through unmodified from the enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A candidate wine offered to the pairing recommender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WineOffer {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Three wine references per price tier: low under $30, medium $30-60,
/// high above $60.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieredRecommendations {
    #[serde(default)]
    pub low: Vec<String>,
    #[serde(default)]
    pub medium: Vec<String>,
    #[serde(default)]
    pub high: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub recommendations: TieredRecommendations,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub language: Language,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            language: Language::It,
        }
    }
}

pub struct EnrichmentClient {
    client: reqwest::Client,
    api_key: String,
    settings: EnrichmentSettings,
}

impl EnrichmentClient {
    pub fn new(api_key: String, settings: EnrichmentSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            settings,
        }
    }

    /// Generate a short wine description from extracted facts and community
    /// reviews. The text is truncated to the last complete sentence.
    pub async fn describe(
        &self,
        facts: &[String],
        reviews: &[String],
        language: Language,
    ) -> Result<EnrichmentResult> {
        let prompt = build_description_prompt(facts, reviews, language);
        let (content, usage) = self.complete(&prompt).await?;

        let text = truncate_to_last_sentence(content.trim());
        info!("Generated description ({} chars)", text.len());
        Ok(EnrichmentResult { text, usage })
    }

    /// Recommend three wines per price tier for a dish, chosen from the
    /// supplied candidates.
    pub async fn recommend(
        &self,
        dish: &str,
        wines: &[WineOffer],
    ) -> Result<RecommendationResult> {
        let prompt = build_pairing_prompt(dish, wines);
        let (content, usage) = self.complete(&prompt).await?;

        let recommendations = parse_tiered_recommendations(&content)?;
        info!(
            "Generated pairings for '{}': {}/{}/{} per tier",
            dish,
            recommendations.low.len(),
            recommendations.medium.len(),
            recommendations.high.len()
        );
        Ok(RecommendationResult {
            recommendations,
            usage,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<(String, Option<TokenUsage>)> {
        let payload = json!({
            "model": self.settings.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScraperError::Service(format!("Enrichment request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScraperError::Service(format!(
                "Enrichment service returned status {}: {}",
                status, body
            ))
            .into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::Service(format!("Invalid enrichment response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ScraperError::Service("Enrichment response had no choices".to_string()))?;

        debug!("Enrichment call used {:?} tokens", body.usage);
        Ok((content, body.usage))
    }
}

fn build_description_prompt(facts: &[String], reviews: &[String], language: Language) -> String {
    let instruction = match language {
        Language::En => {
            "Write a very short, engaging wine description based on the wine facts and community \
             reviews. Summarize the wine's aroma, taste, and overall impression never citing the \
             price in ENGLISH."
        }
        Language::It => {
            "Scrivi una brevissima e coinvolgente descrizione del vino basata sui fatti del vino \
             e sulle recensioni della comunità. Riassumi l'aroma, il gusto e l'impressione \
             complessiva senza fare Mai riferimento al prezzo in ITALIANO."
        }
    };

    let numbered = |items: &[String]| {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a sommelier. {}\n\nWine Facts:\n{}\n\nReviews:\n{}",
        instruction,
        numbered(facts),
        numbered(reviews)
    )
}

fn build_pairing_prompt(dish: &str, wines: &[WineOffer]) -> String {
    let listing = wines
        .iter()
        .enumerate()
        .map(|(i, wine)| {
            format!(
                "{}. {} - ${} - {}",
                i + 1,
                wine.name,
                wine.price,
                wine.description.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a sommelier expert. For the dish \"{}\", recommend **3 wines** for each of the \
         following price categories:\n\n\
         - Low price wines (under $30)\n\
         - Medium price wines ($30 to $60)\n\
         - High price wines (above $60)\n\n\
         You have the following wines available:\n\n{}\n\n\
         For each price category, choose 3 wines from the list above that best pair with the \
         dish.\n\n\
         Return the recommendations as a JSON object with keys \"low\", \"medium\", and \"high\", \
         each containing an array of wine names.",
        dish, listing
    )
}

/// Cut generated text after its last sentence terminator so a token-capped
/// response never ends mid-sentence.
fn truncate_to_last_sentence(text: &str) -> String {
    match text.rfind(['.', '!', '?']) {
        Some(index) => text[..=index].to_string(),
        None => text.to_string(),
    }
}

/// Parse the model's tier mapping, tolerating markdown code fences around
/// the JSON body.
fn parse_tiered_recommendations(content: &str) -> Result<TieredRecommendations> {
    let body = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(body).map_err(|e| {
        ScraperError::Service(format!("Unparseable recommendation payload: {}", e)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_last_complete_sentence() {
        assert_eq!(
            truncate_to_last_sentence("A fine wine. Drink it now! And also"),
            "A fine wine. Drink it now!"
        );
        assert_eq!(truncate_to_last_sentence("No terminator here"), "No terminator here");
        assert_eq!(truncate_to_last_sentence("Done."), "Done.");
    }

    #[test]
    fn test_description_prompt_numbers_facts_and_reviews() {
        let facts = vec!["Alcohol 14%".to_string(), "Oak aged".to_string()];
        let reviews = vec!["Superb".to_string()];

        let prompt = build_description_prompt(&facts, &reviews, Language::En);
        assert!(prompt.contains("1. Alcohol 14%"));
        assert!(prompt.contains("2. Oak aged"));
        assert!(prompt.contains("1. Superb"));
        assert!(prompt.contains("ENGLISH"));

        let prompt_it = build_description_prompt(&facts, &reviews, Language::It);
        assert!(prompt_it.contains("ITALIANO"));
    }

    #[test]
    fn test_pairing_prompt_lists_candidates_with_prices() {
        let wines = vec![
            WineOffer {
                name: "Barolo".to_string(),
                price: 75.0,
                description: Some("structured".to_string()),
            },
            WineOffer {
                name: "Soave".to_string(),
                price: 15.0,
                description: None,
            },
        ];

        let prompt = build_pairing_prompt("osso buco", &wines);
        assert!(prompt.contains("\"osso buco\""));
        assert!(prompt.contains("1. Barolo - $75"));
        assert!(prompt.contains("2. Soave - $15"));
    }

    #[test]
    fn test_parse_recommendations_plain_json() {
        let parsed = parse_tiered_recommendations(
            r#"{"low": ["Soave"], "medium": ["Chianti"], "high": ["Barolo"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.low, vec!["Soave"]);
        assert_eq!(parsed.high, vec!["Barolo"]);
    }

    #[test]
    fn test_parse_recommendations_tolerates_code_fences() {
        let parsed = parse_tiered_recommendations(
            "```json\n{\"low\": [], \"medium\": [\"Chianti\"], \"high\": []}\n```",
        )
        .unwrap();
        assert_eq!(parsed.medium, vec!["Chianti"]);
    }

    #[test]
    fn test_parse_recommendations_rejects_prose() {
        assert!(parse_tiered_recommendations("I'd pour a nice Chianti.").is_err());
    }

    #[test]
    fn test_language_from_code_defaults_to_italian() {
        assert_eq!(Language::from_code("en"), Language::En);
        assert_eq!(Language::from_code("EN"), Language::En);
        assert_eq!(Language::from_code("it"), Language::It);
        assert_eq!(Language::from_code("anything"), Language::It);
    }
}
