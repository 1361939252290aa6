//! HTML extraction
//!
//! Two extractors live here:
//! - `ListingExtractor` pulls item stubs out of a rendered listing page
//! - `FieldRules` is the fixed, ordered list of detail-page field rules
//!
//! Each field rule is independently fallible: a rule that does not match
//! leaves its field empty instead of failing the record.

use crate::config::ListingConfig;
use crate::model::{ItemStub, ListingSnippet};
use crate::url::{normalize_item_url, resolve_link};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Rupee amount as shown on listing cards and detail pages
const PRICE_PATTERN: &str = r"₹\s?\d[\d,]*(?:\.\d+)?";

const STATE_PATTERN: &str = r"\b(Tamil Nadu|Kerala|Karnataka|Maharashtra|Delhi|Gujarat|Telangana|Andhra Pradesh|West Bengal|Uttar Pradesh|Rajasthan|Punjab|Haryana|Madhya Pradesh|Bihar|Odisha|Assam|Jharkhand|Chhattisgarh|Uttarakhand|Himachal Pradesh|Goa)\b";

/// How many ancestors of a listing link are searched for its price text
const CARD_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector '{0}'")]
    Selector(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::Selector(css.to_string()))
}

/// Collapses runs of whitespace and trims; empty text becomes None
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    clean_text(&element.text().collect::<String>())
}

/// Extracts item stubs from listing pages
pub struct ListingExtractor {
    items: Selector,
    price: Regex,
    max_items: usize,
}

impl ListingExtractor {
    pub fn new(config: &ListingConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            items: selector(&config.item_selector)?,
            price: Regex::new(PRICE_PATTERN)?,
            max_items: config.max_items_per_page,
        })
    }

    /// Extracts the stubs currently visible on a listing page
    ///
    /// Only the first `max-items-per-page` matching links are considered.
    /// Links without text or href are skipped, hrefs are resolved against
    /// the page URL and normalized, and duplicates on the same page are
    /// dropped.
    pub fn extract(&self, html: &str, page_url: &Url, category_id: &str) -> Vec<ItemStub> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut stubs = Vec::new();

        for link in document.select(&self.items).take(self.max_items) {
            let Some(title) = element_text(link) else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(absolute) = resolve_link(href, page_url) else {
                continue;
            };
            let Ok(item_url) = normalize_item_url(absolute.as_str()) else {
                continue;
            };

            if !seen.insert(item_url.clone()) {
                continue;
            }

            stubs.push(ItemStub {
                item_url,
                category_id: category_id.to_string(),
                snippet: ListingSnippet {
                    title,
                    price_text: self.card_price(link),
                },
            });
        }

        stubs
    }

    /// Looks for a price in the card around a listing link
    ///
    /// The search stops at the first ancestor that also holds a link to a
    /// different item.
    fn card_price(&self, link: ElementRef<'_>) -> Option<String> {
        let href = link.value().attr("href");

        for card in link.ancestors().take(CARD_DEPTH).filter_map(ElementRef::wrap) {
            if card
                .select(&self.items)
                .any(|other| other.value().attr("href") != href)
            {
                return None;
            }

            let text = card.text().collect::<String>();
            if let Some(found) = self.price.find(&text) {
                return clean_text(found.as_str());
            }
        }
        None
    }
}

/// A parsed detail page
pub struct Page {
    document: Html,
    text: String,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let text = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ");
        Self { document, text }
    }

    /// Visible text of the whole document
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text of the first element matching any of `selectors`, in order
    pub fn first_text(&self, selectors: &[Selector]) -> Option<String> {
        selectors.iter().find_map(|s| {
            self.document
                .select(s)
                .find_map(element_text)
        })
    }

    /// `content` attribute of the first element matching `selector`
    pub fn attr(&self, selector: &Selector, attr: &str) -> Option<String> {
        self.document
            .select(selector)
            .find_map(|el| el.value().attr(attr).and_then(clean_text))
    }

    /// Returns true if any element matches `selector`
    pub fn has(&self, selector: &Selector) -> bool {
        self.document.select(selector).next().is_some()
    }
}

/// Fields of an `ItemRecord` filled by detail extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Price,
    Supplier,
    Location,
    Description,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::Price => "price",
            Self::Supplier => "supplier",
            Self::Location => "location",
            Self::Description => "description",
        };
        f.write_str(name)
    }
}

/// One named extraction rule
pub trait FieldRule: Send + Sync {
    /// The field this rule fills
    fn field(&self) -> Field;

    /// Cheap check whether the page carries this field at all
    fn matches(&self, page: &Page) -> bool;

    /// Extracts the field; None if the page structure is not recognized
    fn extract(&self, page: &Page) -> Option<String>;
}

/// Product name: main heading, then og:title, then the document title
pub struct TitleRule {
    heading: Selector,
    og_title: Selector,
    title: Selector,
}

impl TitleRule {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            heading: selector("h1")?,
            og_title: selector("meta[property='og:title']")?,
            title: selector("title")?,
        })
    }
}

impl FieldRule for TitleRule {
    fn field(&self) -> Field {
        Field::Title
    }

    fn matches(&self, page: &Page) -> bool {
        page.has(&self.heading) || page.has(&self.og_title) || page.has(&self.title)
    }

    fn extract(&self, page: &Page) -> Option<String> {
        page.first_text(std::slice::from_ref(&self.heading))
            .or_else(|| page.attr(&self.og_title, "content"))
            .or_else(|| page.first_text(std::slice::from_ref(&self.title)))
    }
}

/// First rupee amount in the page text
pub struct PriceRule {
    pattern: Regex,
}

impl PriceRule {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            pattern: Regex::new(PRICE_PATTERN)?,
        })
    }
}

impl FieldRule for PriceRule {
    fn field(&self) -> Field {
        Field::Price
    }

    fn matches(&self, page: &Page) -> bool {
        page.text().contains('₹')
    }

    fn extract(&self, page: &Page) -> Option<String> {
        self.pattern
            .find(page.text())
            .and_then(|m| clean_text(m.as_str()))
    }
}

/// Seller name: company blocks first, then og:title
pub struct SupplierRule {
    company: Vec<Selector>,
    og_title: Selector,
}

impl SupplierRule {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            company: vec![
                selector("[itemprop='seller'] [itemprop='name']")?,
                selector(".companyname")?,
                selector(".cmp-nm")?,
                selector(".company-name")?,
            ],
            og_title: selector("meta[property='og:title']")?,
        })
    }
}

impl FieldRule for SupplierRule {
    fn field(&self) -> Field {
        Field::Supplier
    }

    fn matches(&self, page: &Page) -> bool {
        self.company.iter().any(|s| page.has(s)) || page.has(&self.og_title)
    }

    fn extract(&self, page: &Page) -> Option<String> {
        page.first_text(&self.company)
            .or_else(|| page.attr(&self.og_title, "content"))
    }
}

/// Indian state name mentioned in the page text
pub struct LocationRule {
    pattern: Regex,
}

impl LocationRule {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            pattern: Regex::new(STATE_PATTERN)?,
        })
    }
}

impl FieldRule for LocationRule {
    fn field(&self) -> Field {
        Field::Location
    }

    fn matches(&self, page: &Page) -> bool {
        self.pattern.is_match(page.text())
    }

    fn extract(&self, page: &Page) -> Option<String> {
        self.pattern
            .find(page.text())
            .map(|m| m.as_str().to_string())
    }
}

/// Meta description, then og:description
pub struct DescriptionRule {
    description: Selector,
    og_description: Selector,
}

impl DescriptionRule {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            description: selector("meta[name='description']")?,
            og_description: selector("meta[property='og:description']")?,
        })
    }
}

impl FieldRule for DescriptionRule {
    fn field(&self) -> Field {
        Field::Description
    }

    fn matches(&self, page: &Page) -> bool {
        page.has(&self.description) || page.has(&self.og_description)
    }

    fn extract(&self, page: &Page) -> Option<String> {
        page.attr(&self.description, "content")
            .or_else(|| page.attr(&self.og_description, "content"))
    }
}

/// Fields produced by one pass of the rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub price: Option<String>,
    pub supplier: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl ExtractedFields {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Price => &mut self.price,
            Field::Supplier => &mut self.supplier,
            Field::Location => &mut self.location,
            Field::Description => &mut self.description,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Returns true if no rule produced anything
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.price.is_none()
            && self.supplier.is_none()
            && self.location.is_none()
            && self.description.is_none()
    }

    /// Returns true if every field is present
    pub fn is_complete(&self) -> bool {
        self.title.is_some()
            && self.price.is_some()
            && self.supplier.is_some()
            && self.location.is_some()
            && self.description.is_some()
    }
}

/// Fixed, ordered list of field rules
pub struct FieldRules {
    rules: Vec<Box<dyn FieldRule>>,
}

impl FieldRules {
    /// The standard rule set: title, price, supplier, location, description
    pub fn standard() -> Result<Self, ExtractError> {
        Ok(Self::from_rules(vec![
            Box::new(TitleRule::new()?),
            Box::new(PriceRule::new()?),
            Box::new(SupplierRule::new()?),
            Box::new(LocationRule::new()?),
            Box::new(DescriptionRule::new()?),
        ]))
    }

    pub fn from_rules(rules: Vec<Box<dyn FieldRule>>) -> Self {
        Self { rules }
    }

    /// Runs every rule in order against a detail page
    ///
    /// The first rule to produce a field wins.
    pub fn apply(&self, html: &str) -> ExtractedFields {
        let page = Page::parse(html);
        let mut fields = ExtractedFields::default();

        for rule in &self.rules {
            if !rule.matches(&page) {
                continue;
            }
            match rule.extract(&page) {
                Some(value) => fields.set(rule.field(), value),
                None => tracing::trace!("rule '{}' matched but extracted nothing", rule.field()),
            }
        }

        fields
    }
}
