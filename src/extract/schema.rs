//! Declarative field -> (locator, transform) mappings from rendered markup
//! to typed records.
//!
//! The target site's markup drifts; keeping the selector rules as data means
//! they can be updated without touching engine logic. Every rule degrades to
//! `None` when its element is missing; a field-level miss is never an
//! error.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::warn;

use crate::extract::records::{DetailRecord, SearchResultRecord};

/// Where a field's raw value comes from.
#[derive(Debug, Clone)]
pub enum Locator {
    /// Inner text of the first match.
    Text(&'static str),
    /// Last direct text node of the first match. Used for headline elements
    /// whose leading children are links (winery) and whose trailing text is
    /// the wine name.
    TailText(&'static str),
    /// Attribute of the first match.
    Attr(&'static str, &'static str),
    /// `url("…")` capture from the first match's inline style.
    StyleUrl(&'static str),
    /// `href` of the first preload-image link whose URL matches the pattern.
    PreloadImage(&'static str),
}

/// How a raw value becomes a field value.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Trim surrounding whitespace; empty results normalize to `None`.
    Trim,
    /// Trim, then resolve protocol-relative paths to absolute https URLs.
    SecureUrl,
    /// Remove a known path prefix (country codes embedded in link paths).
    StripPrefix(&'static str),
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: &'static str,
    pub locator: Locator,
    pub transform: Transform,
}

/// How one item of a repeated widget becomes a string.
#[derive(Debug, Clone)]
pub enum ListSource {
    /// Item's own text.
    Text,
    /// Item attribute.
    Attr(&'static str),
    /// Texts of the item's `<p>` descendants joined by newline.
    Paragraphs,
}

#[derive(Debug, Clone)]
pub struct ListRule {
    pub field: &'static str,
    pub selector: &'static str,
    pub source: ListSource,
    pub limit: Option<usize>,
}

pub const SEARCH_NODE: &str = ".default-wine-card";
pub const SEARCH_MARKER: &str = ".default-wine-card";
pub const DETAIL_MARKER: &str = "div.wineHeadline-module__wineHeadline--32Ety";

pub const SEARCH_FIELDS: &[FieldRule] = &[
    FieldRule {
        field: "url",
        locator: Locator::Attr(".wine-card__image-wrapper a", "href"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "image",
        locator: Locator::StyleUrl("figure.wine-card__image"),
        transform: Transform::SecureUrl,
    },
    FieldRule {
        field: "name",
        locator: Locator::Text(".wine-card__name .bold"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "region",
        locator: Locator::Text(".wine-card__region"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "country",
        locator: Locator::Attr(".wine-card__region a[data-item-type=\"country\"]", "href"),
        transform: Transform::StripPrefix("/wine-countries/"),
    },
];

pub const DETAIL_FIELDS: &[FieldRule] = &[
    FieldRule {
        field: "name",
        locator: Locator::TailText("div.wineHeadline-module__wineHeadline--32Ety"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "winery",
        locator: Locator::Text("a.wineHeadline-module__link--G1mKm div"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "wine_type",
        locator: Locator::Text("[data-cy=\"breadcrumb-winetype\"]"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "region",
        locator: Locator::Text("[data-cy=\"breadcrumb-region\"]"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "country",
        locator: Locator::Text("[data-cy=\"breadcrumb-country\"]"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "grape",
        locator: Locator::Text("[data-cy=\"breadcrumb-grape\"]"),
        transform: Transform::Trim,
    },
    FieldRule {
        field: "image",
        locator: Locator::PreloadImage(r"vivino\.com/thumbs/.*\.(png|jpg)"),
        transform: Transform::SecureUrl,
    },
];

pub const DETAIL_LISTS: &[ListRule] = &[
    ListRule {
        field: "reviews",
        selector: "[data-testid=\"communityReview\"]",
        source: ListSource::Paragraphs,
        limit: Some(3),
    },
    ListRule {
        field: "facts",
        selector: ".wineFacts__fact--3BAsi",
        source: ListSource::Text,
        limit: None,
    },
    ListRule {
        field: "pairings",
        selector: ".foodPairing__foodImage--2OYHg",
        source: ListSource::Attr("aria-label"),
        limit: None,
    },
];

fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Invalid selector '{}': {:?}", raw, e);
            None
        }
    }
}

fn locate(scope: ElementRef<'_>, locator: &Locator) -> Option<String> {
    match locator {
        Locator::Text(selector) => {
            let sel = parse_selector(selector)?;
            scope
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>())
        }
        Locator::TailText(selector) => {
            let sel = parse_selector(selector)?;
            let element = scope.select(&sel).next()?;
            element.children().rev().find_map(|child| {
                child
                    .value()
                    .as_text()
                    .map(|t| t.to_string())
                    .filter(|t| !t.trim().is_empty())
            })
        }
        Locator::Attr(selector, attr) => {
            let sel = parse_selector(selector)?;
            scope
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr(attr))
                .map(str::to_string)
        }
        Locator::StyleUrl(selector) => {
            let sel = parse_selector(selector)?;
            let style = scope
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("style"))?;
            extract_style_url(style)
        }
        Locator::PreloadImage(pattern) => {
            let sel = parse_selector("link[rel=\"preload\"][as=\"image\"]")?;
            let matcher = Regex::new(pattern).ok()?;
            scope
                .select(&sel)
                .filter_map(|el| el.value().attr("href"))
                .find(|href| matcher.is_match(href))
                .map(str::to_string)
        }
    }
}

fn transform(raw: String, transform: &Transform) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match transform {
        Transform::Trim => Some(trimmed.to_string()),
        Transform::SecureUrl => {
            if let Some(rest) = trimmed.strip_prefix("//") {
                Some(format!("https://{}", rest))
            } else {
                Some(trimmed.to_string())
            }
        }
        Transform::StripPrefix(prefix) => {
            let stripped = trimmed.replacen(prefix, "", 1);
            if stripped.is_empty() {
                None
            } else {
                Some(stripped)
            }
        }
    }
}

fn apply_fields(
    scope: ElementRef<'_>,
    rules: &[FieldRule],
) -> HashMap<&'static str, Option<String>> {
    rules
        .iter()
        .map(|rule| {
            let value = locate(scope, &rule.locator).and_then(|raw| transform(raw, &rule.transform));
            (rule.field, value)
        })
        .collect()
}

fn apply_list(scope: ElementRef<'_>, rule: &ListRule) -> Vec<String> {
    let Some(sel) = parse_selector(rule.selector) else {
        return Vec::new();
    };

    let items = scope.select(&sel).filter_map(|item| {
        let raw = match &rule.source {
            ListSource::Text => item.text().collect::<String>(),
            ListSource::Attr(attr) => item.value().attr(attr).unwrap_or_default().to_string(),
            ListSource::Paragraphs => {
                let Some(p_sel) = parse_selector("p") else {
                    return None;
                };
                item.select(&p_sel)
                    .map(|p| p.text().collect::<String>().trim().to_string())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    match rule.limit {
        Some(limit) => items.take(limit).collect(),
        None => items.collect(),
    }
}

fn extract_style_url(style: &str) -> Option<String> {
    let matcher = Regex::new(r#"url\(["']?(.*?)["']?\)"#).ok()?;
    matcher
        .captures(style)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Build one search record from a result card node.
pub fn extract_search_record(card: ElementRef<'_>) -> SearchResultRecord {
    let mut fields = apply_fields(card, SEARCH_FIELDS);
    SearchResultRecord {
        url: fields.remove("url").flatten(),
        image: fields.remove("image").flatten(),
        name: fields.remove("name").flatten(),
        region: fields.remove("region").flatten(),
        country: fields.remove("country").flatten(),
    }
}

/// Build the detail record from a full rendered document.
pub fn extract_detail_record(document: &Html, path: &str) -> DetailRecord {
    let root = document.root_element();
    let mut fields = apply_fields(root, DETAIL_FIELDS);

    let mut lists: HashMap<&'static str, Vec<String>> = DETAIL_LISTS
        .iter()
        .map(|rule| (rule.field, apply_list(root, rule)))
        .collect();

    DetailRecord {
        url: Some(path.to_string()),
        image: fields.remove("image").flatten(),
        name: fields.remove("name").flatten(),
        winery: fields.remove("winery").flatten(),
        wine_type: fields.remove("wine_type").flatten(),
        region: fields.remove("region").flatten(),
        country: fields.remove("country").flatten(),
        grape: fields.remove("grape").flatten(),
        reviews: lists.remove("reviews").unwrap_or_default(),
        facts: lists.remove("facts").unwrap_or_default(),
        pairings: lists.remove("pairings").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_url_extraction() {
        assert_eq!(
            extract_style_url(r#"background-image: url("//images.vivino.com/thumbs/x.png")"#),
            Some("//images.vivino.com/thumbs/x.png".to_string())
        );
        assert_eq!(
            extract_style_url("background-image: url('/local.jpg')"),
            Some("/local.jpg".to_string())
        );
        assert_eq!(extract_style_url("color: red"), None);
    }

    #[test]
    fn test_secure_url_transform_resolves_protocol_relative() {
        assert_eq!(
            transform("//images.vivino.com/x.png".to_string(), &Transform::SecureUrl),
            Some("https://images.vivino.com/x.png".to_string())
        );
        assert_eq!(
            transform("https://images.vivino.com/x.png".to_string(), &Transform::SecureUrl),
            Some("https://images.vivino.com/x.png".to_string())
        );
        assert_eq!(transform("   ".to_string(), &Transform::SecureUrl), None);
    }

    #[test]
    fn test_strip_prefix_transform() {
        assert_eq!(
            transform(
                "/wine-countries/it".to_string(),
                &Transform::StripPrefix("/wine-countries/")
            ),
            Some("it".to_string())
        );
        assert_eq!(
            transform(
                "/wine-countries/".to_string(),
                &Transform::StripPrefix("/wine-countries/")
            ),
            None
        );
    }

    #[test]
    fn test_trim_normalizes_empty_to_none() {
        assert_eq!(transform("  Chianti  ".to_string(), &Transform::Trim), Some("Chianti".to_string()));
        assert_eq!(transform("\n\t".to_string(), &Transform::Trim), None);
    }

    #[test]
    fn test_search_record_from_card_markup() {
        let html = Html::parse_fragment(
            r#"
            <div class="default-wine-card">
                <div class="wine-card__image-wrapper">
                    <a href="/IT/it/wines/1894613" data-cartitemsource="text-search"></a>
                </div>
                <figure class="wine-card__image"
                        style='background-image: url("//images.vivino.com/thumbs/abc.png")'></figure>
                <div class="wine-card__name"><span class="bold"> Chianti Classico </span></div>
                <div class="wine-card__region">
                    Toscana, <a data-item-type="country" href="/wine-countries/it">Italy</a>
                </div>
            </div>
            "#,
        );

        let record = extract_search_record(html.root_element());

        assert_eq!(record.url.as_deref(), Some("/IT/it/wines/1894613"));
        assert_eq!(
            record.image.as_deref(),
            Some("https://images.vivino.com/thumbs/abc.png")
        );
        assert_eq!(record.name.as_deref(), Some("Chianti Classico"));
        assert_eq!(record.country.as_deref(), Some("it"));
        assert!(record.region.as_deref().unwrap().starts_with("Toscana"));
    }

    #[test]
    fn test_search_record_missing_fields_become_none() {
        let html = Html::parse_fragment(r#"<div class="default-wine-card"><p>redesigned card</p></div>"#);
        let record = extract_search_record(html.root_element());
        assert!(record.is_empty());
    }

    #[test]
    fn test_detail_headline_splits_winery_and_name() {
        let html = Html::parse_document(
            r#"
            <html><head>
                <link rel="preload" as="image"
                      href="//images.vivino.com/thumbs/wine_375x500.png">
            </head><body>
                <div class="wineHeadline-module__wineHeadline--32Ety">
                    <a class="wineHeadline-module__link--G1mKm" href="/wineries/acme"><div>ACME Winery</div></a>
                    Chianti Classico
                </div>
                <span data-cy="breadcrumb-winetype">Red wine</span>
                <span data-cy="breadcrumb-region">Toscana</span>
                <span data-cy="breadcrumb-country">Italy</span>
                <span data-cy="breadcrumb-grape">Sangiovese</span>
            </body></html>
            "#,
        );

        let record = extract_detail_record(&html, "/IT/it/wines/1894613");

        assert_eq!(record.name.as_deref(), Some("Chianti Classico"));
        assert_eq!(record.winery.as_deref(), Some("ACME Winery"));
        assert_eq!(record.wine_type.as_deref(), Some("Red wine"));
        assert_eq!(record.grape.as_deref(), Some("Sangiovese"));
        assert_eq!(
            record.image.as_deref(),
            Some("https://images.vivino.com/thumbs/wine_375x500.png")
        );
        assert_eq!(record.url.as_deref(), Some("/IT/it/wines/1894613"));
    }

    #[test]
    fn test_detail_widgets_missing_yield_empty_lists() {
        let html = Html::parse_document(
            r#"<html><body>
                <div class="wineHeadline-module__wineHeadline--32Ety">Barolo</div>
            </body></html>"#,
        );

        let record = extract_detail_record(&html, "/w/1");

        assert_eq!(record.name.as_deref(), Some("Barolo"));
        assert!(record.reviews.is_empty());
        assert!(record.facts.is_empty());
        assert!(record.pairings.is_empty());
    }

    #[test]
    fn test_detail_review_widget_caps_at_three_and_joins_paragraphs() {
        let html = Html::parse_document(
            r#"<html><body>
                <div class="wineHeadline-module__wineHeadline--32Ety">Barolo</div>
                <div data-testid="communityReview"><p>Bold nose.</p><p>Long finish.</p></div>
                <div data-testid="communityReview"><p>Great value.</p></div>
                <div data-testid="communityReview"><p>Earthy.</p></div>
                <div data-testid="communityReview"><p>Fourth review, past the cap.</p></div>
                <div class="wineFacts__fact--3BAsi">Alcohol content: 14%</div>
                <img class="foodPairing__foodImage--2OYHg" aria-label="Beef">
                <img class="foodPairing__foodImage--2OYHg" aria-label="Game">
            </body></html>"#,
        );

        let record = extract_detail_record(&html, "/w/1");

        assert_eq!(record.reviews.len(), 3);
        assert_eq!(record.reviews[0], "Bold nose.\nLong finish.");
        assert_eq!(record.facts, vec!["Alcohol content: 14%"]);
        assert_eq!(record.pairings, vec!["Beef", "Game"]);
    }
}
