//! Cooperative page handoff between a running catalog/card parse and its
//! background page-provider loop.
//!
//! The original page-request/page-supply dance was a single module-global
//! awaitable that any in-flight parse would contend on. Reworked here as an
//! explicit channel pair owned by the in-flight task object: each parse gets
//! its own `PageRendezvous`/`PageProvider` pair, so there is no global state
//! and no re-entrancy hazard between concurrently running browser workers.

use tokio::sync::mpsc;

use crate::collaborators::{Page, PageRequest};

/// Held by the foreground parser. `request_page` blocks until the provider
/// side answers with a fresh page, or returns `None` if the provider side
/// was dropped (the worker is shutting down).
pub struct PageRendezvous {
    requests_tx: mpsc::Sender<PageRequest>,
    supplies_rx: mpsc::Receiver<Page>,
}

impl PageRendezvous {
    pub async fn request_page(&mut self, request: PageRequest) -> Option<Page> {
        if self.requests_tx.send(request).await.is_err() {
            return None;
        }
        self.supplies_rx.recv().await
    }
}

/// Held by the background provider loop (the code that owns the live
/// browser session / proxy swap logic).
pub struct PageProvider {
    requests_rx: mpsc::Receiver<PageRequest>,
    supplies_tx: mpsc::Sender<Page>,
}

impl PageProvider {
    /// Waits for the next page request. Returns `None` once the parser side
    /// has been dropped, at which point this loop should exit.
    pub async fn next_request(&mut self) -> Option<PageRequest> {
        self.requests_rx.recv().await
    }

    /// Hands a freshly prepared page back to the waiting parser. Fails only
    /// if the parser side has already given up.
    pub async fn supply_page(&mut self, page: Page) -> Result<(), Page> {
        self.supplies_tx.send(page).await.map_err(|e| e.0)
    }
}

/// Build one connected rendezvous pair. Buffer of 1: a parser never has more
/// than one outstanding page request at a time.
pub fn new_rendezvous() -> (PageRendezvous, PageProvider) {
    let (requests_tx, requests_rx) = mpsc::channel(1);
    let (supplies_tx, supplies_rx) = mpsc::channel(1);
    (
        PageRendezvous { requests_tx, supplies_rx },
        PageProvider { requests_rx, supplies_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CatalogOutcomeStatus;

    #[tokio::test]
    async fn provider_answers_a_request_with_a_fresh_page() {
        let (mut parser_side, mut provider_side) = new_rendezvous();

        let handle = tokio::spawn(async move {
            let request = provider_side.next_request().await.expect("request");
            assert_eq!(request.attempt, 1);
            provider_side.supply_page(Page::new("fresh")).await.unwrap();
        });

        let request = PageRequest {
            attempt: 1,
            status: CatalogOutcomeStatus::ProxyBlocked,
            next_start_page: 2,
        };
        let page = parser_side.request_page(request).await;
        assert_eq!(page, Some(Page::new("fresh")));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_provider_unblocks_the_parser_with_none() {
        let (mut parser_side, provider_side) = new_rendezvous();
        drop(provider_side);

        let request = PageRequest {
            attempt: 1,
            status: CatalogOutcomeStatus::NotDetected,
            next_start_page: 1,
        };
        assert_eq!(parser_side.request_page(request).await, None);
    }
}
