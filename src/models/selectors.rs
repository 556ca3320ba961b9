// src/models/selectors.rs

//! CSS selectors for scraping an auction listing page.

use serde::{Deserialize, Serialize};

/// CSS selectors for scraping an auction listing page.
///
/// Every selector except `row_selector` and `title_selector` is evaluated
/// relative to a row and may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSelectors {
    /// Selector for each listing row/card
    pub row_selector: String,

    /// Selector for the title element within a row
    pub title_selector: String,

    /// Optional selector for the link element (if different from title)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_selector: Option<String>,

    /// HTML attribute name for extracting links (usually "href")
    #[serde(default = "default_attr_name")]
    pub attr_name: String,

    /// Selector for the source's native listing id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_selector: Option<String>,

    /// Selector for an absolute end date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_selector: Option<String>,

    /// Selector for a relative "time left" countdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left_selector: Option<String>,

    /// Selector for the start date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date_selector: Option<String>,

    /// Selector for the current price / bid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_selector: Option<String>,

    /// Selector for free-text location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_selector: Option<String>,

    /// Selector for the description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_selector: Option<String>,

    /// Selector for image elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_selector: Option<String>,

    /// Attributes tried in order for image URLs
    #[serde(default = "default_image_attrs")]
    pub image_attrs: Vec<String>,
}

fn default_attr_name() -> String {
    "href".to_string()
}

fn default_image_attrs() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string()]
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self::fallback()
    }
}

impl ListingSelectors {
    /// Create selectors from the three mandatory parts.
    pub fn new(
        row: impl Into<String>,
        title: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Self {
        Self {
            row_selector: row.into(),
            title_selector: title.into(),
            end_date_selector: Some(end_date.into()),
            ..Self::fallback()
        }
    }

    /// Generic selectors that work with most table-based listings.
    pub fn fallback() -> Self {
        Self {
            row_selector: "table tr:has(a)".to_string(),
            title_selector: "a".to_string(),
            link_selector: None,
            attr_name: default_attr_name(),
            id_selector: None,
            end_date_selector: Some("td:last-child".to_string()),
            time_left_selector: None,
            start_date_selector: None,
            price_selector: None,
            location_selector: None,
            description_selector: None,
            image_selector: None,
            image_attrs: default_image_attrs(),
        }
    }

    /// All configured selector strings, for up-front validation.
    pub fn all(&self) -> Vec<&str> {
        let mut out = vec![self.row_selector.as_str(), self.title_selector.as_str()];
        out.extend(
            [
                &self.link_selector,
                &self.id_selector,
                &self.end_date_selector,
                &self.time_left_selector,
                &self.start_date_selector,
                &self.price_selector,
                &self.location_selector,
                &self.description_selector,
                &self.image_selector,
            ]
            .into_iter()
            .flatten()
            .map(String::as_str),
        );
        out
    }
}
