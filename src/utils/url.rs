// src/utils/url.rs

//! URL manipulation utilities.

use sha2::{Digest, Sha256};
use url::Url;

/// Resolve a potentially relative URL against a base URL.
///
/// Unparseable input is returned unchanged.
///
/// # Examples
/// ```
/// use txauctions::utils::url::resolve;
///
/// assert_eq!(
///     resolve("https://example.com/path/", "page.html"),
///     "https://example.com/path/page.html"
/// );
/// ```
pub fn resolve(base: &str, href: &str) -> String {
    let href = href.trim();
    if let Ok(absolute) = Url::parse(href) {
        return absolute.to_string();
    }
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Extract a listing identifier from an auction detail URL.
///
/// Well-known query keys win, then any key that looks like an id, then the
/// digits of the last path segment.
pub fn extract_listing_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut fallback_keyed: Option<String> = None;

    for (key, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }

        let key_lower = key.to_lowercase();
        if matches!(
            key_lower.as_str(),
            "auctionid"
                | "auction_id"
                | "itemid"
                | "item_id"
                | "lotid"
                | "lot_id"
                | "listingid"
                | "listing_id"
                | "id"
        ) {
            return Some(value.to_string());
        }

        if fallback_keyed.is_none() && (key_lower.ends_with("id") || key_lower.contains("lot")) {
            fallback_keyed = Some(value.to_string());
        }
    }

    if fallback_keyed.is_some() {
        return fallback_keyed;
    }

    let last = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())?;
    let digits: String = last.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Short deterministic id derived from the given parts.
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        assert_eq!(
            resolve("https://example.com/path/", "https://other.com/page"),
            "https://other.com/page"
        );
    }

    #[test]
    fn test_resolve_absolute_path() {
        assert_eq!(
            resolve("https://example.com/path/", "/root.html"),
            "https://example.com/root.html"
        );
    }

    #[test]
    fn test_resolve_relative_from_file() {
        assert_eq!(
            resolve("https://example.com/path/index.html", "other.html"),
            "https://example.com/path/other.html"
        );
    }

    #[test]
    fn test_resolve_unparseable_base() {
        assert_eq!(resolve("not a url", "/x"), "/x");
    }

    #[test]
    fn test_extract_listing_id() {
        assert_eq!(
            extract_listing_id("https://www.govdeals.com/index.cfm?fa=Main.Item&itemid=512&acctid=9"),
            Some("512".to_string())
        );
        assert_eq!(
            extract_listing_id("https://www.publicsurplus.com/sms/auction/view?auc=3104"),
            None
        );
        assert_eq!(
            extract_listing_id("https://example.com/auction/lot/88231/"),
            Some("88231".to_string())
        );
    }

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = stable_id(&["Forklift", "https://example.com/list"]);
        assert_eq!(a, stable_id(&["Forklift", "https://example.com/list"]));
        assert_ne!(a, stable_id(&["Forklift", "https://example.com/list2"]));
        assert_eq!(a.len(), 16);
    }
}
