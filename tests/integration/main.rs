//! Integration tests for the crawl engine
//!
//! Sessions run against scripted render/fetch backends (with tokio's paused
//! clock where timing matters) and against wiremock servers for the HTTP
//! backends.

mod common;
mod crawl_tests;
mod http_tests;
mod queue_tests;
mod resume_tests;
