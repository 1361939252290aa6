//! URL handling for listing pages and item links
//!
//! Item URLs are normalized before they are used as dedup keys, so the same
//! product reached from two listing pages (or with different tracking
//! parameters) is only enriched once.

mod normalize;

pub use normalize::normalize_item_url;

use crate::{UrlError, UrlResult};
use url::Url;

/// Builds the URL of listing page `page_index` for a category seed
///
/// Page 1 is the seed itself; later pages carry a `page` query parameter,
/// replacing any `page` the seed already had.
///
/// # Examples
///
/// ```
/// use market_harvest::url::listing_page_url;
///
/// let url = listing_page_url("https://example.com/impcat/pumps.html", 3).unwrap();
/// assert_eq!(url, "https://example.com/impcat/pumps.html?page=3");
/// ```
pub fn listing_page_url(seed_url: &str, page_index: u32) -> UrlResult<String> {
    let mut url = Url::parse(seed_url).map_err(|e| UrlError::Parse(e.to_string()))?;

    if page_index <= 1 {
        return Ok(url.to_string());
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("page", &page_index.to_string());
    }

    Ok(url.to_string())
}

/// Resolves a link href found on a page to an absolute HTTP(S) URL
///
/// Returns None for empty hrefs, fragment-only links, `javascript:`,
/// `mailto:`, `tel:` and `data:` links, and anything that does not resolve
/// to HTTP or HTTPS.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}
