//! The page detector collaborator: classifies whatever is currently loaded
//! in a browser session so the worker runtimes know what to do next
//! (keep parsing, solve a captcha, swap the proxy, back off, give up).

use async_trait::async_trait;

use super::Page;

/// What a loaded page currently shows. `ServerError` is a local extension
/// (ADDED): the underlying `PageDetector` implementations only classify DOM
/// content, so a 502/503/504 response never reaches them as a DOM state —
/// `enhanced_detect_page_state` layers that check in front using the raw
/// HTTP status the caller observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    CatalogFound,
    CardFound,
    SellerProfile,
    ProxyBlock403,
    ProxyAuthRequired,
    Captcha,
    RateLimit429,
    ContinueButton,
    Removed,
    NotDetected,
    ServerError(u16),
}

#[async_trait]
pub trait PageDetector: Send + Sync {
    async fn detect(&self, page: &Page) -> DetectorState;
}

/// Wraps `detector` with the server-error extension: a 502/503/504 observed
/// on the HTTP response always wins over whatever the DOM looks like, since
/// a gateway error page can coincidentally resemble catalog/card markup.
pub async fn enhanced_detect_page_state(
    detector: &dyn PageDetector,
    page: &Page,
    last_http_status: Option<u16>,
) -> DetectorState {
    if let Some(status @ (502 | 503 | 504)) = last_http_status {
        return DetectorState::ServerError(status);
    }
    detector.detect(page).await
}

/// A scripted stand-in for tests: returns a fixed state regardless of page
/// content.
pub struct StubPageDetector {
    pub state: DetectorState,
}

impl StubPageDetector {
    pub fn new(state: DetectorState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PageDetector for StubPageDetector {
    async fn detect(&self, _page: &Page) -> DetectorState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_error_status_overrides_the_dom_classification() {
        let detector = StubPageDetector::new(DetectorState::CatalogFound);
        let page = Page::new("whatever");
        let state = enhanced_detect_page_state(&detector, &page, Some(503)).await;
        assert_eq!(state, DetectorState::ServerError(503));
    }

    #[tokio::test]
    async fn no_server_error_status_falls_through_to_the_detector() {
        let detector = StubPageDetector::new(DetectorState::Captcha);
        let page = Page::new("whatever");
        let state = enhanced_detect_page_state(&detector, &page, Some(200)).await;
        assert_eq!(state, DetectorState::Captcha);
    }
}
