//! Core data types shared by the listing crawler, the detail enricher and
//! the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One category of the marketplace to traverse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CategorySpec {
    /// Stable identifier, used as the key for progress and dedup
    pub id: String,

    /// Human readable name
    pub display_name: String,

    /// First listing page of the category
    pub seed_url: String,

    /// Maximum number of listing pages to visit
    pub max_pages: u32,
}

/// Position of the listing crawler inside one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPageCursor {
    pub category_id: String,

    /// 1-based listing page number
    pub page_index: u32,

    /// Number of load-more actions performed on the current page
    pub scroll_step: u32,

    /// When the current page was last rendered
    pub rendered_at: Option<DateTime<Utc>>,
}

impl ListingPageCursor {
    /// Creates a cursor positioned at the start of `page_index`
    pub fn at_page(category_id: &str, page_index: u32) -> Self {
        Self {
            category_id: category_id.to_string(),
            page_index,
            scroll_step: 0,
            rendered_at: None,
        }
    }

    /// Moves the cursor to the next listing page
    pub fn advance_page(&mut self) {
        self.page_index += 1;
        self.scroll_step = 0;
        self.rendered_at = None;
    }
}

/// What the listing page showed about an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSnippet {
    pub title: String,

    /// Price text shown on the listing card, if any
    pub price_text: Option<String>,
}

/// Lightweight reference to one item, extracted from a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStub {
    /// Normalized item URL; the unique key for dedup
    pub item_url: String,
    pub category_id: String,
    pub snippet: ListingSnippet,
}

/// How complete an output record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordQuality {
    /// Every field was extracted
    Complete,

    /// Some fields could not be extracted and are left empty
    Partial,

    /// Enrichment failed; only a failure-log entry exists
    Failed,
}

impl RecordQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully enriched item, handed to the output sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_url: String,
    pub category_id: String,
    pub title: Option<String>,
    pub price_raw: Option<String>,
    pub supplier: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub fetched_at: DateTime<Utc>,

    /// Number of fetch attempts it took to produce this record
    pub attempts: u32,
    pub quality: RecordQuality,
}

/// Failure classes used across the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, 5xx or rate limit that outlived its retry budget
    Transient,

    /// 404, blocked, or structurally unparseable
    Permanent,

    /// A whole category could not be rendered
    Structural,

    /// No render or fetch capability at all
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Structural => "structural",
            Self::Fatal => "fatal",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            "structural" => Some(Self::Structural),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn all() -> [Self; 4] {
        [Self::Transient, Self::Permanent, Self::Structural, Self::Fatal]
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure-log entry, written alongside the successful output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Item URL, or the listing page URL for structural failures
    pub url: String,
    pub category_id: String,
    pub attempts: u32,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        url: impl Into<String>,
        category_id: impl Into<String>,
        attempts: u32,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            category_id: category_id.into(),
            attempts,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
