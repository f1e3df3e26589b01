use serde::{Deserialize, Serialize};

/// One card from the search results listing. Absence of a DOM field yields
/// `None`, never a failure; a record where every field is `None` is still
/// valid and left to the caller to filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultRecord {
    pub url: Option<String>,
    pub image: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

impl SearchResultRecord {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.image.is_none()
            && self.name.is_none()
            && self.region.is_none()
            && self.country.is_none()
    }
}

/// Full wine detail page record, including the lazily loaded review, fact
/// and food-pairing widgets. The widgets are optional on the page; missing
/// ones come back as empty sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub url: Option<String>,
    pub image: Option<String>,
    pub name: Option<String>,
    pub winery: Option<String>,
    pub wine_type: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub grape: Option<String>,
    #[serde(default)]
    pub reviews: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub pairings: Vec<String>,
}

impl DetailRecord {
    /// True when none of the headline or breadcrumb fields resolved, which
    /// distinguishes a dead page from a merely sparse one.
    pub fn has_no_core_fields(&self) -> bool {
        self.name.is_none()
            && self.winery.is_none()
            && self.wine_type.is_none()
            && self.region.is_none()
            && self.country.is_none()
            && self.grape.is_none()
    }
}
