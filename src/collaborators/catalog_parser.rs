//! The catalog parser collaborator: drives pagination over a search-results
//! listing and yields either a finished result or a mid-run page request.

use async_trait::async_trait;

use crate::repository::listings::CatalogListingInput;
use crate::worker::rendezvous::PageRendezvous;

use super::Page;

/// Terminal status of one catalog parse attempt, and the status carried on
/// an in-flight `PageRequest` while the parser is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOutcomeStatus {
    Success,
    Empty,
    ProxyBlocked,
    ProxyAuthRequired,
    CaptchaUnsolved,
    NotDetected,
}

/// Emitted by the foreground parser whenever it decides its current
/// page/proxy is no longer viable. The background page-provider loop
/// consumes these and answers with a fresh `Page` over the paired channel.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub attempt: u32,
    pub status: CatalogOutcomeStatus,
    pub next_start_page: i32,
}

/// Search parameters for one catalog parse invocation.
#[derive(Debug, Clone)]
pub struct CatalogParseContext {
    pub articulum: String,
    pub search_url: String,
    pub field_list: Vec<String>,
    pub start_page: i32,
    pub max_pages: i32,
    pub filter_overrides: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CatalogParseOutcome {
    pub listings: Vec<CatalogListingInput>,
    pub status: CatalogOutcomeStatus,
}

#[async_trait]
pub trait CatalogParser: Send + Sync {
    /// Parse `ctx.search_url` starting from `page`, suspending on
    /// `rendezvous` (not returning) whenever a fresh page is needed
    /// mid-run, and returning only once a terminal status is reached.
    async fn parse(&self, page: Page, ctx: &CatalogParseContext, rendezvous: &mut PageRendezvous) -> CatalogParseOutcome;
}

/// A scripted stand-in used by tests and `unsafe-dev` runs: replays a fixed
/// sequence of outcomes, requesting a new page between each one via the
/// real rendezvous channel so the page-provider side is exercised too.
pub struct StubCatalogParser {
    pub script: Vec<CatalogParseOutcome>,
}

impl StubCatalogParser {
    pub fn new(script: Vec<CatalogParseOutcome>) -> Self {
        Self { script }
    }

    pub fn always(status: CatalogOutcomeStatus, listings: Vec<CatalogListingInput>) -> Self {
        Self::new(vec![CatalogParseOutcome { listings, status }])
    }
}

#[async_trait]
impl CatalogParser for StubCatalogParser {
    async fn parse(&self, _page: Page, ctx: &CatalogParseContext, rendezvous: &mut PageRendezvous) -> CatalogParseOutcome {
        let mut attempt = 0u32;
        let mut start_page = ctx.start_page;

        for (i, outcome) in self.script.iter().enumerate() {
            let is_last = i + 1 == self.script.len();
            if is_last {
                return outcome.clone();
            }

            attempt += 1;
            let request = PageRequest {
                attempt,
                status: outcome.status,
                next_start_page: start_page + 1,
            };
            start_page += 1;

            if rendezvous.request_page(request).await.is_none() {
                return CatalogParseOutcome {
                    listings: Vec::new(),
                    status: CatalogOutcomeStatus::NotDetected,
                };
            }
        }

        CatalogParseOutcome {
            listings: Vec::new(),
            status: CatalogOutcomeStatus::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::rendezvous::new_rendezvous;

    #[tokio::test]
    async fn stub_parser_returns_the_final_scripted_outcome() {
        let (mut parser_side, mut provider_side) = new_rendezvous();
        let stub = StubCatalogParser::always(CatalogOutcomeStatus::Success, Vec::new());
        let ctx = CatalogParseContext {
            articulum: "ABC123".to_string(),
            search_url: "https://example.invalid/search".to_string(),
            field_list: vec![],
            start_page: 1,
            max_pages: 10,
            filter_overrides: serde_json::Value::Null,
        };

        let handle = tokio::spawn(async move {
            while let Some(_request) = provider_side.next_request().await {
                let _ = provider_side.supply_page(Page::new("p2")).await;
            }
        });

        let outcome = stub.parse(Page::new("p1"), &ctx, &mut parser_side).await;
        assert_eq!(outcome.status, CatalogOutcomeStatus::Success);
        drop(parser_side);
        let _ = handle.await;
    }
}
