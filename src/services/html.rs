// src/services/html.rs

//! HTML listing adapter.
//!
//! Fetches a source's listing pages and turns every row matched by the
//! configured CSS selectors into a [`RawRecord`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ListingSelectors, RawRecord, RawValue, SourceConfig, SourceInfo};
use crate::pipeline::normalize::clean_text;
use crate::services::SourceAdapter;
use crate::utils::http::fetch_text_async;
use crate::utils::url::{extract_listing_id, resolve, stable_id};

/// Selectors compiled once when the adapter is built.
#[derive(Debug)]
struct CompiledSelectors {
    row: Selector,
    title: Selector,
    link: Option<Selector>,
    id: Option<Selector>,
    end_date: Option<Selector>,
    time_left: Option<Selector>,
    start_date: Option<Selector>,
    price: Option<Selector>,
    location: Option<Selector>,
    description: Option<Selector>,
    image: Option<Selector>,
    attr_name: String,
    image_attrs: Vec<String>,
}

impl CompiledSelectors {
    fn compile(selectors: &ListingSelectors) -> Result<Self> {
        let optional = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();

        Ok(Self {
            row: parse_selector(&selectors.row_selector)?,
            title: parse_selector(&selectors.title_selector)?,
            link: optional(&selectors.link_selector)?,
            id: optional(&selectors.id_selector)?,
            end_date: optional(&selectors.end_date_selector)?,
            time_left: optional(&selectors.time_left_selector)?,
            start_date: optional(&selectors.start_date_selector)?,
            price: optional(&selectors.price_selector)?,
            location: optional(&selectors.location_selector)?,
            description: optional(&selectors.description_selector)?,
            image: optional(&selectors.image_selector)?,
            attr_name: selectors.attr_name.clone(),
            image_attrs: selectors.image_attrs.clone(),
        })
    }
}

/// Parse a CSS selector, mapping failures to [`AppError::Selector`].
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Scrapes listing rows from HTML pages.
pub struct HtmlListingAdapter {
    info: SourceInfo,
    pages: Vec<String>,
    selectors: CompiledSelectors,
    default_location: Option<String>,
    client: Client,
    delay: Duration,
}

impl HtmlListingAdapter {
    /// Build an adapter for an html source. Selectors are validated here.
    pub fn new(config: &SourceConfig, client: Client, delay: Duration) -> Result<Self> {
        let selectors = config
            .selectors
            .as_ref()
            .ok_or_else(|| AppError::adapter(&config.key, "no selectors configured"))?;

        Ok(Self {
            info: config.info(),
            pages: config.pages.clone(),
            selectors: CompiledSelectors::compile(selectors)?,
            default_location: config.default_location.clone(),
            client,
            delay,
        })
    }

    /// Extract every listing row from one page.
    pub fn parse_page(&self, html: &str, page_url: &str) -> Vec<RawRecord> {
        let document = Html::parse_document(html);
        document
            .select(&self.selectors.row)
            .filter_map(|row| self.parse_row(&row, page_url))
            .collect()
    }

    fn parse_row(&self, row: &ElementRef<'_>, page_url: &str) -> Option<RawRecord> {
        let sel = &self.selectors;
        let title_elem = row.select(&sel.title).next()?;
        let title = clean_text(&title_elem.text().collect::<String>());
        if title.is_empty() {
            return None;
        }

        let mut record = RawRecord::new();

        let href = sel
            .link
            .as_ref()
            .and_then(|s| row.select(s).next())
            .or(Some(title_elem))
            .and_then(|e| e.value().attr(&sel.attr_name))
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.starts_with('#') && !h.starts_with("javascript:"));

        let external_id = sel
            .id
            .as_ref()
            .and_then(|s| text_of(row, s))
            .filter(|id| !id.is_empty());

        match href {
            Some(href) => {
                let url = resolve(page_url, href);
                if let Some(id) = external_id.or_else(|| extract_listing_id(&url)) {
                    record.insert("external_id".into(), RawValue::Text(id));
                }
                record.insert("url".into(), RawValue::Text(url));
            }
            None => {
                // Rows without a detail link all share the page URL.
                let id = external_id.unwrap_or_else(|| stable_id(&[title.as_str(), page_url]));
                record.insert("external_id".into(), RawValue::Text(id));
                record.insert("url".into(), RawValue::Text(page_url.to_string()));
            }
        }

        let fields = [
            ("end_date", &sel.end_date),
            ("time_left", &sel.time_left),
            ("start_date", &sel.start_date),
            ("current_price", &sel.price),
            ("location", &sel.location),
            ("description", &sel.description),
        ];
        for (key, selector) in fields {
            if let Some(text) = selector.as_ref().and_then(|s| text_of(row, s)) {
                record.insert(key.into(), RawValue::Text(text));
            }
        }

        if !record.contains_key("location") {
            if let Some(location) = &self.default_location {
                record.insert("location".into(), RawValue::Text(location.clone()));
            }
        }

        if let Some(image_sel) = &sel.image {
            let images: Vec<String> = row
                .select(image_sel)
                .filter_map(|img| {
                    sel.image_attrs
                        .iter()
                        .find_map(|attr| img.value().attr(attr))
                        .map(|src| resolve(page_url, src))
                })
                .collect();
            if !images.is_empty() {
                record.insert("images".into(), RawValue::Text(images.join(" | ")));
            }
        }

        record.insert("title".into(), RawValue::Text(title));
        Some(record)
    }
}

fn text_of(row: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text = clean_text(&row.select(selector).next()?.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl SourceAdapter for HtmlListingAdapter {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match fetch_text_async(&self.client, page).await {
                Ok(html) => {
                    let rows = self.parse_page(&html, page);
                    log::debug!("[{}] {} rows from {}", self.info.key, rows.len(), page);
                    records.extend(rows);
                }
                Err(error) => {
                    failures += 1;
                    log::warn!("[{}] Failed to fetch {}: {}", self.info.key, page, error);
                    last_error = Some(error);
                }
            }
        }

        if failures == self.pages.len() {
            let message = last_error
                .map_or_else(|| "no pages configured".to_string(), |e| e.to_string());
            return Err(AppError::adapter(&self.info.key, message));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::SourceKind;

    const LISTING: &str = r#"
        <html><body>
        <table class="listings"><tbody>
          <tr>
            <td class="id">1001</td>
            <td><a href="/auction/view?auc=1001">  2012   Ford F-250 </a></td>
            <td class="ends">03/18/2025 04:30 PM CDT</td>
            <td class="bid">$2,150.00</td>
            <td><img data-src="/img/1001.jpg" src="/img/placeholder.gif"></td>
          </tr>
          <tr>
            <td class="id"></td>
            <td><a href="/auction/lot/2002">Office chairs (lot of 12)</a></td>
            <td class="ends">3 days 4 hours</td>
            <td class="bid">$40</td>
            <td class="where">Boerne, TX 78006</td>
          </tr>
          <tr>
            <td class="id"></td>
            <td><a>Pallet of monitors</a></td>
            <td class="ends">03/20/2025</td>
          </tr>
          <tr><td colspan="4">No title here</td></tr>
        </tbody></table>
        </body></html>
    "#;

    fn source_config(pages: Vec<String>) -> SourceConfig {
        SourceConfig {
            key: "test_source".into(),
            name: "Test Source".into(),
            website_url: "https://auctions.example.com/".into(),
            description: None,
            is_government: true,
            enabled: true,
            kind: SourceKind::Html,
            pages,
            path: None,
            selectors: Some(ListingSelectors {
                row_selector: "table.listings tbody tr".into(),
                title_selector: "td a".into(),
                id_selector: Some("td.id".into()),
                end_date_selector: Some("td.ends".into()),
                price_selector: Some("td.bid".into()),
                location_selector: Some("td.where".into()),
                image_selector: Some("img".into()),
                ..ListingSelectors::fallback()
            }),
            default_location: Some("Austin, TX".into()),
        }
    }

    fn adapter(pages: Vec<String>) -> HtmlListingAdapter {
        HtmlListingAdapter::new(&source_config(pages), Client::new(), Duration::ZERO).unwrap()
    }

    fn text(record: &RawRecord, key: &str) -> Option<String> {
        record.get(key).and_then(RawValue::as_text)
    }

    #[test]
    fn test_parse_selector_valid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector("tr:has(a)").is_ok());
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(matches!(
            parse_selector("[[invalid"),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn invalid_selectors_fail_construction() {
        let mut config = source_config(vec![]);
        if let Some(selectors) = config.selectors.as_mut() {
            selectors.price_selector = Some("td[[".into());
        }
        assert!(HtmlListingAdapter::new(&config, Client::new(), Duration::ZERO).is_err());
    }

    #[test]
    fn rows_become_raw_records() {
        let adapter = adapter(vec![]);
        let records = adapter.parse_page(LISTING, "https://auctions.example.com/list?page=1");
        assert_eq!(records.len(), 3);

        let truck = &records[0];
        assert_eq!(text(truck, "title").as_deref(), Some("2012 Ford F-250"));
        assert_eq!(text(truck, "external_id").as_deref(), Some("1001"));
        assert_eq!(
            text(truck, "url").as_deref(),
            Some("https://auctions.example.com/auction/view?auc=1001")
        );
        assert_eq!(
            text(truck, "end_date").as_deref(),
            Some("03/18/2025 04:30 PM CDT")
        );
        assert_eq!(text(truck, "current_price").as_deref(), Some("$2,150.00"));
        assert_eq!(text(truck, "location").as_deref(), Some("Austin, TX"));
        assert_eq!(
            text(truck, "images").as_deref(),
            Some("https://auctions.example.com/img/1001.jpg")
        );

        let chairs = &records[1];
        assert_eq!(text(chairs, "external_id").as_deref(), Some("2002"));
        assert_eq!(text(chairs, "location").as_deref(), Some("Boerne, TX 78006"));
    }

    #[test]
    fn rows_without_links_get_distinct_stable_ids() {
        let adapter = adapter(vec![]);
        let page = "https://auctions.example.com/list?page=1";
        let first = adapter.parse_page(LISTING, page);
        let second = adapter.parse_page(LISTING, page);

        let monitors = &first[2];
        assert_eq!(text(monitors, "url").as_deref(), Some(page));
        let id = text(monitors, "external_id").unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(text(&second[2], "external_id"), Some(id));
    }

    #[tokio::test]
    async fn fetch_collects_rows_from_all_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = adapter(vec![
            format!("{}/list", server.uri()),
            format!("{}/broken", server.uri()),
        ]);
        let records = adapter.fetch().await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn fetch_fails_when_every_page_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter(vec![format!("{}/list", server.uri())]);
        assert!(matches!(
            adapter.fetch().await,
            Err(AppError::SourceAdapter { .. })
        ));
    }
}
