//! Detail enrichment
//!
//! Turns an item stub into an `ItemRecord` with one lightweight fetch of the
//! item page. Every attempt waits for a detail-host permit first. Transient
//! failures are retried under a bounded exponential backoff that is separate
//! from the politeness delay.

use crate::config::RetryConfig;
use crate::crawler::backend::{ContentFetcher, FetchError};
use crate::crawler::extract::{ExtractedFields, FieldRules};
use crate::model::{FailureKind, ItemRecord, ItemStub, RecordQuality};
use crate::politeness::{HostClass, Outcome, PolitenessController};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why an attempt failed in a way worth retrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    Timeout,
    RateLimited,
    ServerError(u16),
    Network(String),

    /// The page loaded but no field rule recognized it
    Unparseable,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited (HTTP 429)"),
            Self::ServerError(status) => write!(f, "server error (HTTP {})", status),
            Self::Network(message) => write!(f, "network error: {}", message),
            Self::Unparseable => write!(f, "page structure not recognized"),
        }
    }
}

/// Why an item can never be enriched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermanentCause {
    /// 404 or 410
    NotFound(u16),

    /// 401, 403 or 451
    Blocked(u16),

    /// Any other 4xx
    ClientError(u16),

    /// Unrecognized page structure on every attempt
    Unparseable,
}

impl fmt::Display for PermanentCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(status) => write!(f, "not found (HTTP {})", status),
            Self::Blocked(status) => write!(f, "blocked (HTTP {})", status),
            Self::ClientError(status) => write!(f, "client error (HTTP {})", status),
            Self::Unparseable => write!(f, "page structure not recognized"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichError {
    /// Retry budget exhausted on transient failures
    #[error("{cause} after {attempts} attempts")]
    Transient { cause: TransientCause, attempts: u32 },

    #[error("{cause} after {attempts} attempts")]
    Permanent { cause: PermanentCause, attempts: u32 },
}

impl EnrichError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transient { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::Permanent { .. } => FailureKind::Permanent,
        }
    }
}

enum AttemptError {
    Transient(TransientCause),
    Permanent(PermanentCause),
}

/// Maps a response status to the politeness outcome and attempt result
fn classify_status(status: u16) -> Result<(), (Outcome, AttemptError)> {
    match status {
        200..=299 => Ok(()),
        404 | 410 => Err((
            Outcome::ClientError,
            AttemptError::Permanent(PermanentCause::NotFound(status)),
        )),
        401 | 403 | 451 => Err((
            Outcome::ClientError,
            AttemptError::Permanent(PermanentCause::Blocked(status)),
        )),
        429 => Err((
            Outcome::RateLimited,
            AttemptError::Transient(TransientCause::RateLimited),
        )),
        500..=599 => Err((
            Outcome::ServerError,
            AttemptError::Transient(TransientCause::ServerError(status)),
        )),
        _ => Err((
            Outcome::ClientError,
            AttemptError::Permanent(PermanentCause::ClientError(status)),
        )),
    }
}

/// Retry backoff before attempt `failed + 1`
///
/// `base * 2^(failed - 1)`, capped at `max`.
pub fn retry_backoff(retry: &RetryConfig, failed: u32) -> Duration {
    let exponent = failed.saturating_sub(1).min(30);
    let delay = retry.backoff_base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(retry.backoff_max_ms))
}

pub struct DetailEnricher {
    politeness: Arc<PolitenessController>,
    fetcher: Arc<dyn ContentFetcher>,
    rules: Arc<FieldRules>,
    retry: RetryConfig,
    timeout: Duration,
}

impl DetailEnricher {
    /// Creates an enricher
    ///
    /// # Arguments
    ///
    /// * `politeness` - Shared pacing gate
    /// * `fetcher` - Lightweight fetch backend
    /// * `rules` - Ordered field rules
    /// * `retry` - Retry budget and backoff
    /// * `timeout` - Bound on every single fetch
    pub fn new(
        politeness: Arc<PolitenessController>,
        fetcher: Arc<dyn ContentFetcher>,
        rules: Arc<FieldRules>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            politeness,
            fetcher,
            rules,
            retry,
            timeout,
        }
    }

    /// Fetches and parses one item
    ///
    /// Transient failures are retried up to `transient-attempts` attempts in
    /// total. A page no rule recognizes is retried the same way and becomes
    /// a permanent failure once the attempts run out.
    pub async fn enrich(&self, stub: &ItemStub) -> Result<ItemRecord, EnrichError> {
        let max_attempts = self.retry.transient_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let cause = match self.attempt(stub).await {
                Ok(fields) => return Ok(self.build_record(stub, fields, attempt)),
                Err(AttemptError::Permanent(cause)) => {
                    return Err(EnrichError::Permanent {
                        cause,
                        attempts: attempt,
                    })
                }
                Err(AttemptError::Transient(cause)) => cause,
            };

            if attempt >= max_attempts {
                return Err(match cause {
                    TransientCause::Unparseable => EnrichError::Permanent {
                        cause: PermanentCause::Unparseable,
                        attempts: attempt,
                    },
                    cause => EnrichError::Transient {
                        cause,
                        attempts: attempt,
                    },
                });
            }

            let backoff = retry_backoff(&self.retry, attempt);
            tracing::debug!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt,
                max_attempts,
                stub.item_url,
                cause,
                backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt(&self, stub: &ItemStub) -> Result<ExtractedFields, AttemptError> {
        let permit = self.politeness.acquire(HostClass::Detail).await;
        let identity = self.politeness.next_identity();

        let fetched = tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch(&stub.item_url, &identity, self.timeout),
        )
        .await;

        let content = match fetched {
            Ok(Ok(content)) => content,
            Ok(Err(FetchError::Timeout)) | Err(_) => {
                self.politeness.report_outcome(&permit, Outcome::Timeout);
                return Err(AttemptError::Transient(TransientCause::Timeout));
            }
            Ok(Err(FetchError::Network(message))) => {
                self.politeness.report_outcome(&permit, Outcome::ServerError);
                return Err(AttemptError::Transient(TransientCause::Network(message)));
            }
        };

        if let Err((outcome, error)) = classify_status(content.status) {
            self.politeness.report_outcome(&permit, outcome);
            return Err(error);
        }

        self.politeness.report_outcome(&permit, Outcome::Success);

        let fields = self.rules.apply(&content.body);
        if fields.is_empty() {
            return Err(AttemptError::Transient(TransientCause::Unparseable));
        }
        Ok(fields)
    }

    fn build_record(&self, stub: &ItemStub, fields: ExtractedFields, attempts: u32) -> ItemRecord {
        let title = fields
            .title
            .or_else(|| Some(stub.snippet.title.clone()).filter(|t| !t.is_empty()));
        let price_raw = fields.price.or_else(|| stub.snippet.price_text.clone());

        let complete = title.is_some()
            && price_raw.is_some()
            && fields.supplier.is_some()
            && fields.location.is_some()
            && fields.description.is_some();

        ItemRecord {
            item_url: stub.item_url.clone(),
            category_id: stub.category_id.clone(),
            title,
            price_raw,
            supplier: fields.supplier,
            location: fields.location,
            description: fields.description,
            fetched_at: Utc::now(),
            attempts,
            quality: if complete {
                RecordQuality::Complete
            } else {
                RecordQuality::Partial
            },
        }
    }
}
